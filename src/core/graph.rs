//! LH-003: Dependency graph construction.
//!
//! Links operations through shared liquid identity. An operation depends on
//! whichever operation produced each of its inputs (for samples, the producer
//! of the sample's parent). Splits are the exception: a split depends on the
//! mix that consumes its moving output, so the split is recorded after the
//! draw and the renamed remainder never loops back through the split.
//!
//! Topological order uses Kahn's algorithm with submission-order tie-breaking.

use super::error::{PlanError, PlanResult};
use super::types::{OpType, OperationSet};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Operation dependency graph; nodes are indexed by submission order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    index: FxHashMap<String, usize>,
    /// `deps[i]` = nodes that must run before node `i`
    deps: Vec<Vec<usize>>,
}

/// Build the dependency graph for a set of operations.
pub fn build_graph(ops: &OperationSet) -> PlanResult<DependencyGraph> {
    let nodes: Vec<String> = ops.keys().cloned().collect();
    let index: FxHashMap<String, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), i))
        .collect();

    // Output liquid id -> producing op
    let mut producers: FxHashMap<&str, usize> = FxHashMap::default();
    for (i, op) in ops.values().enumerate() {
        for out in &op.outputs {
            if let Some(prev) = producers.insert(out.id.as_str(), i) {
                return Err(PlanError::InvalidRequest(format!(
                    "liquid '{}' is produced by both '{}' and '{}'",
                    out.id, nodes[prev], op.id
                )));
            }
        }
    }

    // Input liquid id -> consuming mixes
    let mut mix_consumers: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
    for (i, op) in ops.values().enumerate() {
        if op.op_type() != OpType::Mix {
            continue;
        }
        for input in &op.inputs {
            mix_consumers.entry(input.id.as_str()).or_default().push(i);
        }
    }

    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, op) in ops.values().enumerate() {
        let mut edges: Vec<usize> = Vec::new();
        match op.op_type() {
            OpType::Split => {
                let moving = op.outputs.first().ok_or_else(|| {
                    PlanError::InvalidRequest(format!("split '{}' has no outputs", op.id))
                })?;
                let consumers = mix_consumers.get(moving.id.as_str()).ok_or_else(|| {
                    PlanError::InvalidRequest(format!(
                        "no producer found for split '{}': moving output '{}' ({}) is never consumed by a mix",
                        op.id, moving.id, moving.name
                    ))
                })?;
                edges.extend(consumers.iter().copied());
            }
            OpType::Mix | OpType::Prompt => {
                for input in &op.inputs {
                    if let Some(&p) = producers.get(input.source_key()) {
                        if p != i {
                            edges.push(p);
                        }
                    }
                }
            }
        }
        edges.sort_unstable();
        edges.dedup();
        deps[i] = edges;
    }

    Ok(DependencyGraph { nodes, index, deps })
}

impl DependencyGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn id_of(&self, i: usize) -> &str {
        &self.nodes[i]
    }

    /// Direct dependencies of `id` (ops that must run first).
    pub fn deps_of(&self, id: &str) -> Vec<&str> {
        self.index_of(id)
            .map(|i| self.deps[i].iter().map(|&d| self.nodes[d].as_str()).collect())
            .unwrap_or_default()
    }

    /// Operation ids in dependency order; ties go to the earlier submission.
    pub fn topological_order(&self) -> PlanResult<Vec<String>> {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, ds) in self.deps.iter().enumerate() {
            in_degree[i] = ds.len();
            for &d in ds {
                dependents[d].push(i);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(current)) = ready.pop() {
            order.push(current);
            for &next in &dependents[current] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != n {
            let ordered: FxHashSet<usize> = order.iter().copied().collect();
            let cycle_members: Vec<&str> = (0..n)
                .filter(|i| !ordered.contains(i))
                .map(|i| self.nodes[i].as_str())
                .collect();
            return Err(PlanError::InvalidRequest(format!(
                "dependency cycle detected involving: {}",
                cycle_members.join(", ")
            )));
        }

        Ok(order.into_iter().map(|i| self.nodes[i].clone()).collect())
    }

    /// Transitive closure: `closure[i]` holds every node `i` depends on.
    pub fn ancestors(&self) -> Vec<FxHashSet<usize>> {
        let n = self.nodes.len();
        let mut closure: Vec<Option<FxHashSet<usize>>> = vec![None; n];

        fn visit(
            i: usize,
            deps: &[Vec<usize>],
            closure: &mut [Option<FxHashSet<usize>>],
            on_stack: &mut FxHashSet<usize>,
        ) {
            if closure[i].is_some() || !on_stack.insert(i) {
                return;
            }
            let mut set = FxHashSet::default();
            for &d in &deps[i] {
                visit(d, deps, closure, on_stack);
                set.insert(d);
                if let Some(sub) = &closure[d] {
                    set.extend(sub.iter().copied());
                }
            }
            on_stack.remove(&i);
            closure[i] = Some(set);
        }

        let mut on_stack = FxHashSet::default();
        for i in 0..n {
            visit(i, &self.deps, &mut closure, &mut on_stack);
        }
        closure.into_iter().map(|s| s.unwrap_or_default()).collect()
    }

    /// True when either op can reach the other.
    pub fn related(closure: &[FxHashSet<usize>], a: usize, b: usize) -> bool {
        closure[a].contains(&b) || closure[b].contains(&a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::types::{Liquid, Operation};

    fn ops(list: Vec<Operation>) -> OperationSet {
        list.into_iter().map(|o| (o.id.clone(), o)).collect()
    }

    fn water() -> Liquid {
        Liquid::new("water", "water", 1000.0)
    }

    #[test]
    fn test_lh003_linear_pipeline() {
        let m1 = Operation::mix(
            "m1",
            vec![water().sample("m1.0", 50.0)],
            Liquid::new("m1/out", "water", 50.0),
        );
        let m2 = Operation::mix(
            "m2",
            vec![m1.outputs[0].sample("m2.0", 10.0)],
            Liquid::new("m2/out", "water", 10.0),
        );
        let set = ops(vec![m2, m1]);
        let g = build_graph(&set).unwrap();
        assert_eq!(g.deps_of("m2"), vec!["m1"]);
        assert!(g.deps_of("m1").is_empty());
        assert_eq!(g.topological_order().unwrap(), vec!["m1", "m2"]);
    }

    #[test]
    fn test_lh003_ties_follow_submission_order() {
        let a = Operation::mix("zeta", vec![water().sample("a", 1.0)], Liquid::new("z", "w", 1.0));
        let b = Operation::mix("alpha", vec![water().sample("b", 1.0)], Liquid::new("y", "w", 1.0));
        let g = build_graph(&ops(vec![a, b])).unwrap();
        assert_eq!(g.topological_order().unwrap(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_lh003_split_points_at_consumer() {
        let m1 = Operation::mix(
            "m1",
            vec![water().sample("m1.0", 50.0)],
            Liquid::new("m1/out", "water", 50.0),
        );
        let s = Operation::split("s1", &m1.outputs[0], 20.0);
        let m2 = Operation::mix(
            "m2",
            vec![s.outputs[0].clone()],
            Liquid::new("m2/out", "water", 20.0),
        );
        let m3 = Operation::mix(
            "m3",
            vec![s.outputs[1].sample("m3.0", 10.0)],
            Liquid::new("m3/out", "water", 10.0),
        );
        let g = build_graph(&ops(vec![m1, s, m2, m3])).unwrap();
        assert_eq!(g.deps_of("s1"), vec!["m2"]);
        assert_eq!(g.deps_of("m2"), vec!["m1"]);
        assert_eq!(g.deps_of("m3"), vec!["s1"]);
        assert_eq!(g.topological_order().unwrap(), vec!["m1", "m2", "s1", "m3"]);
    }

    #[test]
    fn test_lh003_orphaned_split_is_structural_error() {
        let m1 = Operation::mix(
            "m1",
            vec![water().sample("m1.0", 50.0)],
            Liquid::new("m1/out", "water", 50.0),
        );
        let s = Operation::split("s1", &m1.outputs[0], 20.0);
        let err = build_graph(&ops(vec![m1, s])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        let msg = err.to_string();
        assert!(msg.contains("no producer found"));
        assert!(msg.contains("s1"));
    }

    #[test]
    fn test_lh003_duplicate_producer_rejected() {
        let a = Operation::mix("a", vec![water().sample("a.0", 1.0)], Liquid::new("x", "w", 1.0));
        let b = Operation::mix("b", vec![water().sample("b.0", 1.0)], Liquid::new("x", "w", 1.0));
        assert!(build_graph(&ops(vec![a, b])).is_err());
    }

    #[test]
    fn test_lh003_cycle_detected() {
        let a = Operation::mix("a", vec![Liquid::new("y", "w", 1.0).sample("a.0", 1.0)], Liquid::new("x", "w", 1.0));
        let b = Operation::mix("b", vec![Liquid::new("x", "w", 1.0).sample("b.0", 1.0)], Liquid::new("y", "w", 1.0));
        let g = build_graph(&ops(vec![a, b])).unwrap();
        let err = g.topological_order().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_lh003_ancestors_transitive() {
        let m1 = Operation::mix("m1", vec![water().sample("1", 5.0)], Liquid::new("o1", "w", 5.0));
        let m2 = Operation::mix("m2", vec![m1.outputs[0].sample("2", 5.0)], Liquid::new("o2", "w", 5.0));
        let m3 = Operation::mix("m3", vec![m2.outputs[0].sample("3", 5.0)], Liquid::new("o3", "w", 5.0));
        let m4 = Operation::mix("m4", vec![water().sample("4", 5.0)], Liquid::new("o4", "w", 5.0));
        let g = build_graph(&ops(vec![m1, m2, m3, m4])).unwrap();
        let closure = g.ancestors();
        assert!(closure[2].contains(&0));
        assert!(DependencyGraph::related(&closure, 0, 2));
        assert!(!DependencyGraph::related(&closure, 3, 2));
    }
}
