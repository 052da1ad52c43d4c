//! LH-013: Transfer block handler (tips, aspirate, dispense).
//!
//! A stage of mixes is expanded one component index at a time, so every
//! mix receives its first component before any receives its second.
//! Neighbouring transfers are batched into one multichannel step when the
//! liquid policy, volumes and well geometry allow it.

use super::{ExpandCtx, Instruction};
use crate::core::error::{PlanError, PlanResult};
use crate::core::sequencer::op;
use crate::core::types::{Location, VOLUME_EPSILON};
use log::debug;

/// One liquid movement between two wells.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub op_id: String,
    pub source: Location,
    pub dest: Location,
    pub volume: f64,
    pub liquid: String,
    pub liquid_type: String,
}

/// Collect the transfers of a mix stage grouped by component index.
pub fn transfers(ctx: &ExpandCtx<'_>, op_ids: &[String]) -> PlanResult<Vec<Vec<Transfer>>> {
    let mut groups: Vec<Vec<Transfer>> = Vec::new();
    for id in op_ids {
        let o = op(ctx.ops, id)?;
        let dest = o
            .product()
            .and_then(|p| p.location.clone())
            .ok_or_else(|| PlanError::Dire(format!("mix '{}' has no destination", o.id)))?;
        for (k, input) in o.inputs.iter().enumerate() {
            // The first input of an in-place mix is already in the well
            if k == 0 && o.is_in_place() {
                continue;
            }
            let source = input.location.clone().ok_or_else(|| {
                PlanError::Dire(format!(
                    "mix '{}': input '{}' was never bound to a well",
                    o.id, input.name
                ))
            })?;
            if groups.len() <= k {
                groups.resize_with(k + 1, Vec::new);
            }
            groups[k].push(Transfer {
                op_id: o.id.clone(),
                source,
                dest: dest.clone(),
                volume: input.volume,
                liquid: input.name.clone(),
                liquid_type: input.liquid_type.clone(),
            });
        }
    }
    groups.retain(|g| !g.is_empty());
    Ok(groups)
}

/// Whether `next` can ride in the same multichannel step as `prev`.
fn joins(ctx: &ExpandCtx<'_>, prev: &Transfer, next: &Transfer) -> bool {
    if !ctx.policy.can_multichannel(&next.liquid_type) {
        return false;
    }
    if (prev.volume - next.volume).abs() > VOLUME_EPSILON {
        return false;
    }
    let dest_ok = prev.dest.plate_id == next.dest.plate_id
        && prev.dest.well.col == next.dest.well.col
        && next.dest.well.row == prev.dest.well.row + 1;
    if !dest_ok || prev.source.plate_id != next.source.plate_id {
        return false;
    }
    let trough = ctx
        .state
        .plate(&next.source.plate_id)
        .is_some_and(|p| p.rows == 1);
    if trough {
        prev.source.well == next.source.well
    } else {
        prev.source.well.col == next.source.well.col
            && next.source.well.row == prev.source.well.row + 1
    }
}

/// Greedily cut one component group into channel batches.
pub fn batch(ctx: &ExpandCtx<'_>, group: &[Transfer]) -> Vec<Vec<Transfer>> {
    let channels = ctx.policy.channels.max(1) as usize;
    let mut batches: Vec<Vec<Transfer>> = Vec::new();
    for t in group {
        let extend = batches.last().is_some_and(|b| {
            b.len() < channels
                && ctx.policy.can_multichannel(&b[0].liquid_type)
                && b.last().is_some_and(|prev| joins(ctx, prev, t))
        });
        match batches.last_mut() {
            Some(b) if extend => b.push(t.clone()),
            _ => batches.push(vec![t.clone()]),
        }
    }
    batches
}

fn tip_max_volume(ctx: &ExpandCtx<'_>) -> PlanResult<f64> {
    ctx.state
        .tipboxes
        .last()
        .map(|t| t.tip_max_volume)
        .filter(|v| *v > 0.0)
        .ok_or_else(|| PlanError::Dire("no usable tipbox on the deck".to_string()))
}

/// Expand a transfer block into terminal instructions.
pub fn expand(ctx: &mut ExpandCtx<'_>, op_ids: &[String]) -> PlanResult<Vec<Instruction>> {
    let mut out = Vec::new();
    for group in transfers(ctx, op_ids)? {
        for b in batch(ctx, &group) {
            let n = b.len() as u32;
            let head = &b[0];
            let passes = (head.volume / tip_max_volume(ctx)?).ceil().max(1.0) as u32;
            let per_pass = head.volume / passes as f64;
            debug!(
                "transfer {:.2} ul '{}' x{} channel(s) in {} pass(es) for {}",
                head.volume, head.liquid, n, passes, head.op_id
            );

            out.push(ctx.load_tips(n)?);
            for _ in 0..passes {
                out.push(Instruction::Aspirate {
                    plate: head.source.plate_id.clone(),
                    wells: b.iter().map(|t| t.source.well).collect(),
                    volume: per_pass,
                    liquid: head.liquid.clone(),
                    liquid_type: head.liquid_type.clone(),
                });
                out.push(Instruction::Dispense {
                    plate: head.dest.plate_id.clone(),
                    wells: b.iter().map(|t| t.dest.well).collect(),
                    volume: per_pass,
                    liquid: head.liquid.clone(),
                    liquid_type: head.liquid_type.clone(),
                });
            }
            out.push(ctx.unload_tips(n)?);
        }
    }
    Ok(out)
}
