// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Execution counts of the flattened graph.
//!
//! The rate scheduler counts firings per operator of the source program.
//! Here these counts are copied onto graph nodes, derived for the nodes
//! created by flattening, and renormalized so that splitters and joiners
//! count items rather than passes over all their arcs.

use petgraph::prelude::NodeIndex;
use std::collections::HashMap;
use std::fmt;

use crate::graph::{NodeKind, OperatorId, Origin, StreamGraph};
use crate::Cycle;

/// The two periods of a static schedule.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Phase {
    Init,
    Steady,
}

pub const PHASES: usize = 2;

impl From<Phase> for usize {
    fn from(phase: Phase) -> usize {
        match phase {
            Phase::Init => 0,
            Phase::Steady => 1,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Steady => write!(f, "steady"),
        }
    }
}

/// Number of firings of every node in one phase.
pub type ExecutionCountTable = HashMap<NodeIndex, usize>;

/// Counts and cost estimates from the rate scheduler.
pub trait RateScheduler {
    /// How often `op` fires in `phase`, if it is scheduled at all.
    fn execution_count(&self, phase: Phase, op: OperatorId) -> Option<usize>;

    /// Estimated cycles of one firing of `node`. Only used to order events.
    fn work_estimate(&self, node: NodeIndex) -> Cycle;
}

/// Rate scheduler results held in tables.
#[derive(Clone, Debug, Default)]
pub struct StaticRates {
    counts: [HashMap<OperatorId, usize>; PHASES],
    work: HashMap<NodeIndex, Cycle>,
}

impl StaticRates {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set_count(&mut self, phase: Phase, op: OperatorId, count: usize) {
        let index: usize = phase.into();
        self.counts[index].insert(op, count);
    }

    pub fn set_work(&mut self, node: NodeIndex, work: Cycle) {
        self.work.insert(node, work);
    }
}

impl RateScheduler for StaticRates {
    fn execution_count(&self, phase: Phase, op: OperatorId) -> Option<usize> {
        let index: usize = phase.into();
        self.counts[index].get(&op).copied()
    }

    fn work_estimate(&self, node: NodeIndex) -> Cycle {
        self.work.get(&node).copied().unwrap_or(1)
    }
}

/// Execution counts of graph nodes, one table per phase.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecutionCounts {
    tables: [ExecutionCountTable; PHASES],
}

impl ExecutionCounts {
    /// Map operator counts onto `graph` for both phases.
    pub fn compute(graph: &StreamGraph, rates: &dyn RateScheduler) -> Self {
        let mut counts = Self::default();
        for phase in [Phase::Init, Phase::Steady].iter() {
            let index: usize = (*phase).into();
            counts.tables[index] = Self::compute_phase(graph, rates, *phase);
        }
        counts
    }

    fn compute_phase(
        graph: &StreamGraph,
        rates: &dyn RateScheduler,
        phase: Phase,
    ) -> ExecutionCountTable {
        let mut table = ExecutionCountTable::new();

        for node in graph.node_indices() {
            if let Origin::Operator(op) = graph.node(node).origin() {
                if let Some(count) = rates.execution_count(phase, op) {
                    table.insert(node, count);
                }
            }
        }

        // nodes created by flattening take their count from their upstream
        // neighbor, in creation order so that chains of new nodes resolve.
        for &node in graph.synthesized() {
            let upstream = graph
                .predecessor(node, 0)
                .and_then(|prev| Self::known_count(graph, rates, phase, &table, prev));
            match graph.kind(node) {
                NodeKind::Joiner(_) => {
                    if let Origin::Synthesized { replaces: Some(op) } = graph.node(node).origin() {
                        if let Some(count) = rates.execution_count(phase, op) {
                            table.insert(node, count);
                        }
                    }
                }
                NodeKind::Splitter(splitter) => {
                    let count = match upstream {
                        Some(count) => count,
                        None => {
                            log::debug!("no count for synthesized splitter {}", graph.name(node));
                            continue;
                        }
                    };
                    let sum: usize = splitter.weights.iter().sum();
                    if sum > 0 {
                        for (arc, next, _) in graph.successors(node) {
                            let weight = splitter.weights.get(arc).copied().unwrap_or(0);
                            table.insert(next, count * weight / sum);
                        }
                    }
                    table.insert(node, count);
                }
                _ => match upstream {
                    Some(count) => {
                        table.insert(node, count);
                    }
                    None => log::debug!("no count for synthesized node {}", graph.name(node)),
                },
            }
        }

        // splitters and joiners are counted per pass over all arcs, turn that
        // into items.
        for node in graph.node_indices() {
            let count = match table.get(&node) {
                Some(count) => *count,
                None => continue,
            };
            match graph.kind(node) {
                NodeKind::Joiner(joiner) => {
                    let mut items = count * joiner.weight_sum();
                    if let Some((mult, div)) = joiner.rate_scale {
                        if mult != 0 && div != 0 {
                            let common = num::integer::gcd(mult, div);
                            items = items * (mult / common) / (div / common);
                        }
                    }
                    table.insert(node, items);
                }
                NodeKind::Splitter(splitter) => {
                    table.insert(node, count * splitter.weights.iter().sum::<usize>());
                }
                _ => {}
            }
        }
        log::debug!("{} execution counts: {:?}", phase, table);
        table
    }

    fn known_count(
        graph: &StreamGraph,
        rates: &dyn RateScheduler,
        phase: Phase,
        table: &ExecutionCountTable,
        node: NodeIndex,
    ) -> Option<usize> {
        if let Some(count) = table.get(&node) {
            return Some(*count);
        }
        match graph.node(node).origin() {
            Origin::Operator(op) => rates.execution_count(phase, op),
            Origin::Synthesized { .. } => None,
        }
    }

    pub fn table(&self, phase: Phase) -> &ExecutionCountTable {
        let index: usize = phase.into();
        &self.tables[index]
    }

    /// The count of `node`, absent nodes never fire.
    pub fn get(&self, phase: Phase, node: NodeIndex) -> Option<usize> {
        self.table(phase).get(&node).copied()
    }
}

#[cfg(test)]
mod counts_tests {
    use super::*;
    use crate::graph::{FilterRates, GraphNode, Joiner, SplitType, Splitter};

    fn filter(name: &str, op: OperatorId) -> GraphNode {
        GraphNode::new(
            name,
            NodeKind::Filter(FilterRates::new(1, 1, 1)),
            Origin::Operator(op),
        )
    }

    #[test]
    fn test_operator_counts() {
        let mut g = StreamGraph::new();
        let a = g.add_node(filter("a", 7));
        let b = g.add_node(filter("b", 8));
        g.connect(a, b);
        let mut rates = StaticRates::new();
        rates.set_count(Phase::Steady, 7, 4);
        rates.set_count(Phase::Steady, 8, 4);
        rates.set_count(Phase::Init, 8, 1);
        let counts = ExecutionCounts::compute(&g, &rates);
        assert_eq!(counts.get(Phase::Steady, a), Some(4));
        assert_eq!(counts.get(Phase::Steady, b), Some(4));
        assert_eq!(counts.get(Phase::Init, a), None);
        assert_eq!(counts.get(Phase::Init, b), Some(1));
    }

    // a -> id -> split(3,1) -> (x, y)
    #[test]
    fn test_synthesized_nodes() {
        let mut g = StreamGraph::new();
        let a = g.add_node(filter("a", 0));
        let id = g.add_node(GraphNode::new(
            "id",
            NodeKind::Identity,
            Origin::Synthesized { replaces: None },
        ));
        let split = g.add_node(GraphNode::new(
            "split",
            NodeKind::Splitter(Splitter {
                kind: SplitType::RoundRobin,
                weights: vec![3, 1],
            }),
            Origin::Synthesized { replaces: None },
        ));
        let x = g.add_node(filter("x", 1));
        let y = g.add_node(filter("y", 2));
        g.connect(a, id);
        g.connect(id, split);
        g.connect(split, x);
        g.connect(split, y);
        let mut rates = StaticRates::new();
        rates.set_count(Phase::Steady, 0, 8);
        let counts = ExecutionCounts::compute(&g, &rates);
        assert_eq!(counts.get(Phase::Steady, id), Some(8));
        // 8 * 3 / 4 and 8 * 1 / 4
        assert_eq!(counts.get(Phase::Steady, x), Some(6));
        assert_eq!(counts.get(Phase::Steady, y), Some(2));
        // the splitter count is renormalized by its weight sum
        assert_eq!(counts.get(Phase::Steady, split), Some(32));
        // nothing is known in the init phase
        assert!(counts.table(Phase::Init).is_empty());
    }

    #[test]
    fn test_joiner_renormalization() {
        let mut g = StreamGraph::new();
        let a = g.add_node(filter("a", 0));
        let b = g.add_node(filter("b", 1));
        let mut scaled = Joiner::round_robin(&[2, 1]);
        scaled.rate_scale = Some((2, 3));
        let j = g.add_node(GraphNode::new(
            "join",
            NodeKind::Joiner(Joiner::round_robin(&[2, 1])),
            Origin::Synthesized { replaces: Some(5) },
        ));
        let k = g.add_node(GraphNode::new(
            "scaled",
            NodeKind::Joiner(scaled),
            Origin::Operator(6),
        ));
        g.connect(a, j);
        g.connect(b, j);
        g.connect(j, k);
        let mut rates = StaticRates::new();
        rates.set_count(Phase::Steady, 5, 2);
        rates.set_count(Phase::Steady, 6, 3);
        let counts = ExecutionCounts::compute(&g, &rates);
        assert_eq!(counts.get(Phase::Steady, j), Some(6));
        // 3 * 3 * 2 / 3
        assert_eq!(counts.get(Phase::Steady, k), Some(6));
    }
}
