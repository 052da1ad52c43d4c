//! LH-005: Volume propagation and volume sanity assertions.
//!
//! Downstream draws (plus per-transfer carry and the destination well's
//! residual) can exceed what a mix was declared to produce. `propagate`
//! walks the chain backwards, inflating upstream mixes proportionally, then
//! `refresh` walks forwards to resynchronise whole-liquid pass-throughs.

use super::error::{PlanError, PlanResult};
use super::sequencer::{op, Chain};
use super::types::{Location, OpKind, Operation, OperationSet, VOLUME_EPSILON};
use indexmap::IndexMap;
use log::{debug, info};
use rustc_hash::{FxHashMap, FxHashSet};

/// One physical withdrawal made by a mix.
#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
    /// Index into the mix's inputs
    pub input: usize,
    /// Id of the liquid physically drawn from
    pub source_key: String,
    /// Volume leaving the source well, carry included
    pub volume: f64,
    /// Whole-well take by an in-place mix (no carry)
    pub in_place: bool,
}

/// Withdrawals made by `op` (empty for splits and prompts).
pub fn draws(op: &Operation, carry: f64) -> Vec<Draw> {
    if !matches!(op.kind, OpKind::Mix) {
        return Vec::new();
    }
    op.inputs
        .iter()
        .enumerate()
        .map(|(i, input)| {
            let whole = i == 0 && op.is_in_place();
            Draw {
                input: i,
                source_key: input.source_key().to_string(),
                volume: if whole { input.volume } else { input.volume + carry },
                in_place: whole,
            }
        })
        .collect()
}

fn sum_inputs(op: &Operation) -> f64 {
    op.inputs.iter().map(|l| l.volume).sum()
}

/// Structural volume checks: nothing negative, mixes conserve volume,
/// splits never move more than they hold.
pub fn assert_volumes(chain: &Chain, ops: &OperationSet) -> PlanResult<()> {
    for id in chain.op_ids() {
        let o = op(ops, id)?;
        for l in o.inputs.iter().chain(o.outputs.iter()) {
            if l.volume < -VOLUME_EPSILON || !l.volume.is_finite() {
                return Err(PlanError::Volume(format!(
                    "{} '{}': liquid '{}' ({}) has invalid volume {:.3} ul",
                    o.op_type(),
                    o.id,
                    l.name,
                    l.id,
                    l.volume
                )));
            }
        }
        match &o.kind {
            OpKind::Mix => {
                let product = o
                    .product()
                    .ok_or_else(|| PlanError::Dire(format!("mix '{}' has no product", o.id)))?;
                let total = sum_inputs(o);
                if (total - product.volume).abs() > VOLUME_EPSILON {
                    return Err(PlanError::Dire(format!(
                        "mix '{}': inputs total {:.3} ul but product '{}' declares {:.3} ul",
                        o.id, total, product.name, product.volume
                    )));
                }
                if product.volume <= VOLUME_EPSILON {
                    return Err(PlanError::Volume(format!(
                        "mix '{}': product '{}' has no volume",
                        o.id, product.name
                    )));
                }
            }
            OpKind::Split => {
                let input = &o.inputs[0];
                let moving = &o.outputs[0];
                if moving.volume <= VOLUME_EPSILON {
                    return Err(PlanError::Volume(format!(
                        "split '{}' moves nothing from '{}'",
                        o.id, input.name
                    )));
                }
                if moving.volume > input.volume + VOLUME_EPSILON {
                    return Err(PlanError::Volume(format!(
                        "split '{}' moves {:.3} ul of '{}' but only {:.3} ul is present",
                        o.id, moving.volume, input.name, input.volume
                    )));
                }
            }
            OpKind::Prompt { .. } => {
                if o.inputs.len() != o.outputs.len() {
                    return Err(PlanError::Dire(format!(
                        "prompt '{}' has {} inputs but {} outputs",
                        o.id,
                        o.inputs.len(),
                        o.outputs.len()
                    )));
                }
            }
        }
    }
    Ok(())
}

/// After propagation: no produced liquid is drawn below zero.
pub fn assert_draws(chain: &Chain, ops: &OperationSet) -> PlanResult<()> {
    let mut available: FxHashMap<&str, f64> = FxHashMap::default();
    for id in chain.op_ids() {
        let o = op(ops, id)?;
        if let OpKind::Mix = o.kind {
            for (i, input) in o.inputs.iter().enumerate() {
                if i == 0 && o.is_in_place() {
                    continue;
                }
                if let Some(left) = available.get_mut(input.source_key()) {
                    *left -= input.volume;
                    if *left < -VOLUME_EPSILON {
                        return Err(PlanError::Volume(format!(
                            "mix '{}' draws {:.3} ul of '{}' ({}) but it runs dry by {:.3} ul",
                            o.id,
                            input.volume,
                            input.name,
                            input.source_key(),
                            -*left
                        )));
                    }
                }
            }
        }
        for out in &o.outputs {
            if out.is_sample() {
                continue;
            }
            available.insert(out.id.as_str(), out.volume);
        }
    }
    Ok(())
}

/// Backward pass. Returns the ids of mixes whose volumes were inflated.
pub fn propagate<F>(
    chain: &Chain,
    ops: &mut OperationSet,
    carry: f64,
    residual_of: F,
) -> PlanResult<Vec<String>>
where
    F: Fn(&Location) -> PlanResult<f64>,
{
    let mut wanted: IndexMap<String, f64> = IndexMap::new();
    let mut whole: FxHashSet<String> = FxHashSet::default();
    let mut inflated = Vec::new();

    for stage in chain.stages.iter().rev() {
        for id in &stage.op_ids {
            let o = ops
                .get_mut(id)
                .ok_or_else(|| PlanError::Dire(format!("chain references unknown operation '{}'", id)))?;
            match o.kind {
                OpKind::Mix => {
                    if inflate_mix(o, &mut wanted, &mut whole, carry, &residual_of)? {
                        inflated.push(o.id.clone());
                    }
                    for d in draws(o, carry) {
                        *wanted.entry(d.source_key.clone()).or_insert(0.0) += d.volume;
                        if d.in_place {
                            whole.insert(d.source_key);
                        }
                    }
                }
                OpKind::Split => {
                    let source = o.inputs[0].source_key().to_string();
                    let remaining = &o.outputs[1].id;
                    relabel(&mut wanted, &mut whole, remaining, &source);
                }
                OpKind::Prompt { .. } => {
                    for (input, output) in o.inputs.iter().zip(o.outputs.iter()) {
                        relabel(&mut wanted, &mut whole, &output.id, input.source_key());
                    }
                }
            }
        }
    }

    refresh(chain, ops)?;
    info!(
        "volume propagation inflated {} mix(es); {} source liquid(s) wanted",
        inflated.len(),
        wanted.len()
    );
    Ok(inflated)
}

fn relabel(
    wanted: &mut IndexMap<String, f64>,
    whole: &mut FxHashSet<String>,
    from: &str,
    to: &str,
) {
    if let Some(w) = wanted.shift_remove(from) {
        *wanted.entry(to.to_string()).or_insert(0.0) += w;
        if whole.remove(from) {
            whole.insert(to.to_string());
        }
    }
}

fn inflate_mix<F>(
    o: &mut Operation,
    wanted: &mut IndexMap<String, f64>,
    whole: &mut FxHashSet<String>,
    carry: f64,
    residual_of: &F,
) -> PlanResult<bool>
where
    F: Fn(&Location) -> PlanResult<f64>,
{
    let declared = sum_inputs(o);
    let in_place = o.is_in_place();
    let product = o
        .outputs
        .first_mut()
        .ok_or_else(|| PlanError::Dire(format!("mix '{}' has no product", o.id)))?;
    if (declared - product.volume).abs() > VOLUME_EPSILON {
        return Err(PlanError::Dire(format!(
            "mix '{}': inputs total {:.3} ul but product declares {:.3} ul",
            o.id, declared, product.volume
        )));
    }

    let want = match wanted.shift_remove(&product.id) {
        Some(w) => w,
        None => return Ok(false),
    };
    let target = if whole.remove(&product.id) || in_place {
        want
    } else {
        let loc = product.location.as_ref().ok_or_else(|| {
            PlanError::Dire(format!("mix '{}' product '{}' has no location", o.id, product.name))
        })?;
        want + residual_of(loc)? - carry
    };

    if target <= product.volume + VOLUME_EPSILON {
        return Ok(false);
    }
    if product.volume <= VOLUME_EPSILON {
        return Err(PlanError::Dire(format!("mix '{}' has an empty product", o.id)));
    }

    let factor = target / product.volume;
    debug!(
        "mix '{}': '{}' raised from {:.3} to {:.3} ul (x{:.4})",
        o.id, product.name, product.volume, target, factor
    );
    product.volume = target;
    for input in &mut o.inputs {
        input.volume *= factor;
    }
    Ok(true)
}

/// Forward pass: whole-liquid inputs (splits, prompts, in-place takes)
/// pick up their producer's current volume.
pub fn refresh(chain: &Chain, ops: &mut OperationSet) -> PlanResult<()> {
    let mut current: FxHashMap<String, f64> = FxHashMap::default();
    for stage in &chain.stages {
        for id in &stage.op_ids {
            let o = ops
                .get_mut(id)
                .ok_or_else(|| PlanError::Dire(format!("chain references unknown operation '{}'", id)))?;
            match o.kind {
                OpKind::Mix => {
                    let mut changed = false;
                    for input in &mut o.inputs {
                        if input.is_sample() {
                            continue;
                        }
                        if let Some(&v) = current.get(&input.id) {
                            changed |= (v - input.volume).abs() > VOLUME_EPSILON;
                            input.volume = v;
                        }
                    }
                    let total = sum_inputs(o);
                    if let Some(product) = o.outputs.first_mut() {
                        if changed {
                            product.volume = total;
                        }
                        current.insert(product.id.clone(), product.volume);
                    }
                }
                OpKind::Split => {
                    if let Some(&v) = current.get(&o.inputs[0].id) {
                        o.inputs[0].volume = v;
                    }
                    let moving = o.outputs[0].volume;
                    o.outputs[1].volume = o.inputs[0].volume - moving;
                    for out in &o.outputs {
                        current.insert(out.id.clone(), out.volume);
                    }
                }
                OpKind::Prompt { .. } => {
                    for (input, output) in o.inputs.iter_mut().zip(o.outputs.iter_mut()) {
                        if let Some(&v) = current.get(&input.id) {
                            input.volume = v;
                        }
                        output.volume = input.volume;
                        current.insert(output.id.clone(), output.volume);
                    }
                }
            }
        }
    }
    Ok(())
}
