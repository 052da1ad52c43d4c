//! LH-004: Stage sequencing into dependency-ordered, type-homogeneous stages.
//!
//! Operations are topologically sorted, then greedily packed into the
//! tail-most stage that holds none of their dependencies and accepts their
//! type. Prompts with identical message and wait are merged when no merge
//! candidate can reach another, after which the chain is rebuilt. Stages that
//! ended up holding both mixes and splits are separated (mixes first).

use super::error::{PlanError, PlanResult};
use super::graph::{build_graph, DependencyGraph};
use super::types::{OpKind, OpType, Operation, OperationSet};
use log::{debug, info};
use rustc_hash::FxHashMap;

/// A set of mutually independent operations of one type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stage {
    pub op_ids: Vec<String>,
}

/// Ordered sequence of stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chain {
    pub stages: Vec<Stage>,
}

impl Chain {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Index of the stage holding `op_id`.
    pub fn stage_of(&self, op_id: &str) -> Option<usize> {
        self.stages
            .iter()
            .position(|s| s.op_ids.iter().any(|id| id == op_id))
    }

    /// All operation ids, first stage first.
    pub fn op_ids(&self) -> impl Iterator<Item = &str> {
        self.stages
            .iter()
            .flat_map(|s| s.op_ids.iter().map(String::as_str))
    }

    /// Drop stages that no longer hold anything.
    pub fn cull_empty(&mut self) {
        self.stages.retain(|s| !s.op_ids.is_empty());
    }
}

/// Resolve an operation id or fail with an internal error.
pub fn op<'a>(ops: &'a OperationSet, id: &str) -> PlanResult<&'a Operation> {
    ops.get(id)
        .ok_or_else(|| PlanError::Dire(format!("chain references unknown operation '{}'", id)))
}

/// The single operation type of a stage.
pub fn stage_type(stage: &Stage, ops: &OperationSet) -> PlanResult<OpType> {
    let mut found: Option<OpType> = None;
    for id in &stage.op_ids {
        let t = op(ops, id)?.op_type();
        match found {
            None => found = Some(t),
            Some(prev) if prev != t => {
                return Err(PlanError::Dire(format!(
                    "stage mixes {} and {} operations (at '{}')",
                    prev, t, id
                )));
            }
            Some(_) => {}
        }
    }
    found.ok_or_else(|| PlanError::Dire("empty stage in chain".to_string()))
}

/// Every stage must hold exactly one operation type.
pub fn check_homogeneous(chain: &Chain, ops: &OperationSet) -> PlanResult<()> {
    for (i, stage) in chain.stages.iter().enumerate() {
        stage_type(stage, ops).map_err(|e| match e {
            PlanError::Dire(msg) => PlanError::Dire(format!("stage {}: {}", i, msg)),
            other => other,
        })?;
    }
    Ok(())
}

/// Build the final chain. May merge prompts in `ops`.
pub fn sequence(ops: &mut OperationSet) -> PlanResult<Chain> {
    let graph = build_graph(ops)?;
    let chain = group(ops, &graph)?;

    let merged = aggregate_prompts(ops, &chain, &graph)?;
    let mut chain = if merged > 0 {
        debug!("merged {} prompt(s); re-sorting chain", merged);
        let graph = build_graph(ops)?;
        group(ops, &graph)?
    } else {
        chain
    };

    separate_mix_split(&mut chain, ops)?;
    chain.cull_empty();
    check_homogeneous(&chain, ops)?;
    info!(
        "sequenced {} operation(s) into {} stage(s)",
        ops.len(),
        chain.len()
    );
    Ok(chain)
}

fn can_share(a: OpType, b: OpType) -> bool {
    a == b || matches!((a, b), (OpType::Mix, OpType::Split) | (OpType::Split, OpType::Mix))
}

/// Greedy stage packing over the topological order.
fn group(ops: &OperationSet, graph: &DependencyGraph) -> PlanResult<Chain> {
    let order = graph.topological_order()?;
    let mut stages: Vec<(Vec<OpType>, Stage)> = Vec::new();
    let mut placed: FxHashMap<String, usize> = FxHashMap::default();

    for id in order {
        let t = op(ops, &id)?.op_type();
        let floor = graph
            .deps_of(&id)
            .iter()
            .filter_map(|d| placed.get(*d).copied())
            .max()
            .map(|s| s + 1)
            .unwrap_or(0);

        let chosen = (floor..stages.len())
            .rev()
            .find(|&s| stages[s].0.iter().all(|&other| can_share(other, t)));

        let s = match chosen {
            Some(s) => s,
            None => {
                stages.push((Vec::new(), Stage::default()));
                stages.len() - 1
            }
        };
        if !stages[s].0.contains(&t) {
            stages[s].0.push(t);
        }
        stages[s].1.op_ids.push(id.clone());
        placed.insert(id, s);
    }

    Ok(Chain {
        stages: stages.into_iter().map(|(_, s)| s).collect(),
    })
}

/// Merge prompts with equal message and wait when none can reach another.
/// Returns the number of prompts folded away.
fn aggregate_prompts(
    ops: &mut OperationSet,
    chain: &Chain,
    graph: &DependencyGraph,
) -> PlanResult<usize> {
    let closure = graph.ancestors();
    let mut groups: Vec<((String, u64), Vec<usize>)> = Vec::new();

    for id in chain.op_ids() {
        let (message, wait) = match &op(ops, id)?.kind {
            OpKind::Prompt {
                message,
                wait_seconds,
            } => (message.clone(), *wait_seconds),
            _ => continue,
        };
        let idx = graph
            .index_of(id)
            .ok_or_else(|| PlanError::Dire(format!("prompt '{}' missing from graph", id)))?;
        let key = (message, wait);
        let slot = groups.iter_mut().find(|(k, members)| {
            *k == key
                && members
                    .iter()
                    .all(|&m| !DependencyGraph::related(&closure, m, idx))
        });
        match slot {
            Some((_, members)) => members.push(idx),
            None => groups.push((key, vec![idx])),
        }
    }

    let mut folded = 0;
    for (_, members) in groups.into_iter().filter(|(_, m)| m.len() > 1) {
        let keep = graph.id_of(members[0]).to_string();
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut generation = 0;
        for &m in &members[1..] {
            let id = graph.id_of(m);
            let absorbed = ops
                .shift_remove(id)
                .ok_or_else(|| PlanError::Dire(format!("prompt '{}' vanished", id)))?;
            generation = generation.max(absorbed.generation);
            inputs.extend(absorbed.inputs);
            outputs.extend(absorbed.outputs);
            folded += 1;
        }
        let target = ops
            .get_mut(&keep)
            .ok_or_else(|| PlanError::Dire(format!("prompt '{}' vanished", keep)))?;
        target.inputs.extend(inputs);
        target.outputs.extend(outputs);
        target.generation = target.generation.max(generation);
        debug!(
            "prompt '{}' now carries {} liquid(s)",
            keep,
            target.inputs.len()
        );
    }
    Ok(folded)
}

/// Split stages holding both mixes and splits into [mixes], [splits].
fn separate_mix_split(chain: &mut Chain, ops: &OperationSet) -> PlanResult<()> {
    let mut out = Vec::with_capacity(chain.stages.len());
    for stage in chain.stages.drain(..) {
        let mut mixes = Vec::new();
        let mut splits = Vec::new();
        let mut others = Vec::new();
        for id in stage.op_ids {
            match op(ops, &id)?.op_type() {
                OpType::Mix => mixes.push(id),
                OpType::Split => splits.push(id),
                OpType::Prompt => others.push(id),
            }
        }
        if !mixes.is_empty() && !splits.is_empty() {
            out.push(Stage { op_ids: mixes });
            out.push(Stage { op_ids: splits });
        } else {
            let mut ids = mixes;
            ids.extend(splits);
            ids.extend(others);
            out.push(Stage { op_ids: ids });
        }
    }
    chain.stages = out;
    Ok(())
}
