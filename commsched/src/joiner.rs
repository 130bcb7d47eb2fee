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

//! Input schedules of round-robin joiners.
//!
//! A joiner mapped to a tile may stand for a whole tree of joiners that
//! were not mapped. Items reach it through several buffers, one per path
//! through that tree, and the joiner has to forward them in the order the
//! joiner tree would. The order is found by tracing items upstream through
//! the tree for one full round-robin cycle.

use itertools::Itertools;
use petgraph::prelude::NodeIndex;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::counter::{BufferLabel, SimulationCounter};
use crate::error::Error;
use crate::graph::{JoinType, NodeKind, StreamGraph};
use crate::mesh::Placement;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StepKind {
    /// Take an item arriving from the network into a buffer.
    Receive,
    /// Forward an item from a buffer downstream.
    Fire,
    /// An item already received once for this send lands in a second buffer.
    Duplicate,
    /// Enqueue the `n`-th delayed item of a feedback loop.
    InitPath(usize),
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct JoinerStep {
    pub kind: StepKind,
    pub buffer: BufferLabel,
}

impl JoinerStep {
    pub fn new(kind: StepKind, buffer: BufferLabel) -> Self {
        Self { kind, buffer }
    }
}

impl fmt::Display for JoinerStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            StepKind::Receive => write!(f, "receive {}", self.buffer),
            StepKind::Fire => write!(f, "fire {}", self.buffer),
            StepKind::Duplicate => write!(f, "duplicate {}", self.buffer),
            StepKind::InitPath(index) => write!(f, "initpath({}) {}", index, self.buffer),
        }
    }
}

/// A sequence of joiner steps. Steps from `loop_start` on repeat forever;
/// a schedule that does not repeat has `loop_start == len()`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct JoinerSchedule {
    steps: Vec<JoinerStep>,
    loop_start: usize,
}

impl JoinerSchedule {
    pub fn cyclic(steps: Vec<JoinerStep>) -> Self {
        Self {
            steps,
            loop_start: 0,
        }
    }

    pub fn linear(steps: Vec<JoinerStep>) -> Self {
        let loop_start = steps.len();
        Self { steps, loop_start }
    }

    pub fn push(&mut self, step: JoinerStep) {
        let cyclic = self.is_cyclic();
        self.steps.push(step);
        if !cyclic {
            self.loop_start = self.steps.len();
        }
    }

    pub fn is_cyclic(&self) -> bool {
        self.loop_start < self.steps.len()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[JoinerStep] {
        &self.steps
    }

    pub fn cycle_len(&self) -> usize {
        self.steps.len() - self.loop_start
    }

    /// The step at `position`, wrapping around the cycle.
    pub fn get(&self, position: usize) -> Option<&JoinerStep> {
        if position < self.steps.len() {
            return self.steps.get(position);
        }
        if !self.is_cyclic() {
            return None;
        }
        let offset = (position - self.loop_start) % self.cycle_len();
        self.steps.get(self.loop_start + offset)
    }
}

impl fmt::Display for JoinerSchedule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if self.is_cyclic() && i == self.loop_start {
                writeln!(f, "loop:")?;
            }
            writeln!(f, "  {}", step)?;
        }
        Ok(())
    }
}

/// Builds the cyclic input schedule of every round-robin joiner.
pub struct JoinerSimulator<'a> {
    graph: &'a StreamGraph,
    placement: &'a dyn Placement,
}

impl<'a> JoinerSimulator<'a> {
    pub fn new(graph: &'a StreamGraph, placement: &'a dyn Placement) -> Self {
        Self { graph, placement }
    }

    /// Schedules of all joiners reachable from the root.
    pub fn simulate(&self) -> Result<HashMap<NodeIndex, JoinerSchedule>, Error> {
        let mut schedules = HashMap::new();
        for node in self.graph.breadth_first() {
            if self.graph.kind(node).is_joiner() {
                schedules.insert(node, self.simulate_joiner(node)?);
            }
        }
        Ok(schedules)
    }

    fn cycle_bound(&self, node: NodeIndex) -> usize {
        // the round-robin state of the joiner tree traced from `node` has at
        // most this many distinct values, so the cycle is never longer.
        fn tree_states(
            sim: &JoinerSimulator,
            node: NodeIndex,
            visited: &mut HashSet<NodeIndex>,
        ) -> usize {
            let joiner = match sim.graph.kind(node) {
                NodeKind::Joiner(joiner) if visited.insert(node) => joiner,
                _ => return 1,
            };
            let mut states = joiner.weights.iter().sum::<usize>().max(1);
            for (_, upstream) in sim.graph.predecessors(node) {
                if !sim.placement.is_assigned(upstream) {
                    states = states.saturating_mul(tree_states(sim, upstream, visited));
                }
            }
            states
        }
        tree_states(self, node, &mut HashSet::new())
    }

    fn simulate_joiner(&self, node: NodeIndex) -> Result<JoinerSchedule, Error> {
        let joiner = match self.graph.kind(node) {
            NodeKind::Joiner(joiner) => joiner,
            _ => {
                log::error!("{} is not a joiner", self.graph.name(node));
                return Err(Error::InvalidGraph(self.graph.name(node).to_string()));
            }
        };
        if joiner.kind == JoinType::Combine {
            log::error!("combine joiner {} is not supported", self.graph.name(node));
            return Err(Error::CombineJoiner(node));
        }
        if self.graph.in_degree(node) == 0 || joiner.weights.iter().all(|w| *w == 0) {
            return Ok(JoinerSchedule::default());
        }

        let bound = self.cycle_bound(node);
        let mut counter = SimulationCounter::new();
        let mut steps = vec![];
        loop {
            let label = self.trace(&mut counter, node, BufferLabel::default())?;
            log::trace!("joiner {} receives from {}", self.graph.name(node), label);
            steps.push(JoinerStep::new(StepKind::Receive, label));
            if counter.incoming_exhausted() {
                break;
            }
            if steps.len() > bound {
                log::error!(
                    "joiner {} does not return to its start within {} items",
                    self.graph.name(node),
                    bound
                );
                return Err(Error::UnterminatedJoinerCycle(node));
            }
        }
        log::debug!(
            "joiner {} schedule: {}",
            self.graph.name(node),
            steps.iter().map(|s| s.buffer.to_string()).format(" ")
        );
        Ok(JoinerSchedule::cyclic(steps))
    }

    /// Follow one item from `node` upstream until it reaches its producer and
    /// return the label of the path taken.
    fn trace(
        &self,
        counter: &mut SimulationCounter,
        node: NodeIndex,
        label: BufferLabel,
    ) -> Result<BufferLabel, Error> {
        let joiner = match self.graph.kind(node) {
            NodeKind::Joiner(joiner) => joiner,
            _ => return Ok(label),
        };
        if joiner.kind == JoinType::Combine {
            log::error!("combine joiner {} is not supported", self.graph.name(node));
            return Err(Error::CombineJoiner(node));
        }
        let arc = counter
            .select_incoming(node, &joiner.weights)
            .ok_or_else(|| {
                log::error!("joiner {} has no input with weight", self.graph.name(node));
                Error::InvalidGraph(self.graph.name(node).to_string())
            })?;
        let label = label.after(arc);
        let upstream = self.graph.predecessor(node, arc).ok_or_else(|| {
            log::error!("joiner {} has no input arc {}", self.graph.name(node), arc);
            Error::InvalidGraph(self.graph.name(node).to_string())
        })?;
        // a mapped joiner upstream is a producer of its own.
        if self.graph.kind(upstream).is_joiner() && !self.placement.is_assigned(upstream) {
            self.trace(counter, upstream, label)
        } else {
            Ok(label)
        }
    }

    /// The init-phase steps of a feedback-loop joiner: one `InitPath` per
    /// delayed item, each into the next buffer of the cycle that is fed by
    /// the loop arc.
    pub fn init_paths(
        &self,
        node: NodeIndex,
        schedule: &JoinerSchedule,
    ) -> Result<Vec<JoinerStep>, Error> {
        let feedback = match self.graph.kind(node) {
            NodeKind::Joiner(joiner) => match joiner.feedback {
                Some(feedback) => feedback,
                None => return Ok(vec![]),
            },
            _ => return Ok(vec![]),
        };
        let cycle = schedule.steps();
        if feedback.delay > 0
            && !cycle
                .iter()
                .any(|s| s.buffer.last_arc() == Some(feedback.loop_arc))
        {
            log::error!(
                "joiner {} never receives on its loop arc {}",
                self.graph.name(node),
                feedback.loop_arc
            );
            return Err(Error::MissingInitPath(node));
        }
        let mut steps = vec![];
        let mut position = 0;
        for index in 0..feedback.delay {
            while cycle[position % cycle.len()].buffer.last_arc() != Some(feedback.loop_arc) {
                position += 1;
            }
            let buffer = cycle[position % cycle.len()].buffer.clone();
            steps.push(JoinerStep::new(StepKind::InitPath(index), buffer));
            position += 1;
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod joiner_tests {
    use super::*;
    use crate::graph::{FeedbackLoop, FilterRates, GraphNode, Joiner, OperatorId, Origin};
    use crate::mesh::{Coordinate, Layout};

    fn filter(name: &str, op: OperatorId) -> GraphNode {
        GraphNode::new(
            name,
            NodeKind::Filter(FilterRates::new(1, 1, 1)),
            Origin::Operator(op),
        )
    }

    fn labels(schedule: &JoinerSchedule) -> Vec<String> {
        schedule
            .steps()
            .iter()
            .map(|s| s.buffer.to_string())
            .collect()
    }

    #[test]
    fn test_weighted_round_robin() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut g = StreamGraph::new();
        let a = g.add_node(filter("a", 0));
        let b = g.add_node(filter("b", 1));
        let j = g.add_node(GraphNode::new(
            "join",
            NodeKind::Joiner(Joiner::round_robin(&[2, 1])),
            Origin::Operator(2),
        ));
        g.connect(a, j);
        g.connect(b, j);
        let layout = Layout::new(1, 1);
        let schedules = JoinerSimulator::new(&g, &layout).simulate().unwrap();
        let schedule = &schedules[&j];
        assert_eq!(labels(schedule), vec!["0", "0", "1"]);
        assert!(schedule
            .steps()
            .iter()
            .all(|s| s.kind == StepKind::Receive));
        // the schedule repeats
        assert_eq!(schedule.get(3), schedule.get(0));
        assert_eq!(schedule.get(5).unwrap().buffer, BufferLabel::new(&[1]));
    }

    // a ---\
    //       inner(1,1) --\
    // b ---/              outer(2,1) -> (mapped)
    // c ------------------/
    #[test]
    fn test_nested_joiners() {
        let mut g = StreamGraph::new();
        let a = g.add_node(filter("a", 0));
        let b = g.add_node(filter("b", 1));
        let c = g.add_node(filter("c", 2));
        let inner = g.add_node(GraphNode::new(
            "inner",
            NodeKind::Joiner(Joiner::round_robin(&[1, 1])),
            Origin::Operator(3),
        ));
        let outer = g.add_node(GraphNode::new(
            "outer",
            NodeKind::Joiner(Joiner::round_robin(&[2, 1])),
            Origin::Operator(4),
        ));
        g.connect(a, inner);
        g.connect(b, inner);
        g.connect(inner, outer);
        g.connect(c, outer);
        let mut layout = Layout::new(2, 2);
        layout.assign(outer, Coordinate::new(0, 0)).unwrap();
        let schedules = JoinerSimulator::new(&g, &layout).simulate().unwrap();
        assert_eq!(labels(&schedules[&outer]), vec!["00", "10", "1"]);
        // the unmapped joiner still gets its own schedule
        assert_eq!(labels(&schedules[&inner]), vec!["0", "1"]);
    }

    #[test]
    fn test_empty_and_combine() {
        let mut g = StreamGraph::new();
        let j = g.add_node(GraphNode::new(
            "join",
            NodeKind::Joiner(Joiner::round_robin(&[])),
            Origin::Operator(0),
        ));
        let layout = Layout::new(1, 1);
        let schedules = JoinerSimulator::new(&g, &layout).simulate().unwrap();
        assert!(schedules[&j].is_empty());

        let mut combine = Joiner::round_robin(&[1, 1]);
        combine.kind = JoinType::Combine;
        let mut g = StreamGraph::new();
        let a = g.add_node(filter("a", 0));
        let c = g.add_node(GraphNode::new(
            "combine",
            NodeKind::Joiner(combine),
            Origin::Operator(1),
        ));
        g.connect(a, c);
        assert_eq!(
            JoinerSimulator::new(&g, &layout).simulate(),
            Err(Error::CombineJoiner(c))
        );
    }

    #[test]
    fn test_init_paths() {
        let mut g = StreamGraph::new();
        let a = g.add_node(filter("a", 0));
        let body = g.add_node(filter("body", 1));
        let mut joiner = Joiner::round_robin(&[1, 1]);
        joiner.feedback = Some(FeedbackLoop {
            delay: 3,
            loop_arc: 1,
        });
        let j = g.add_node(GraphNode::new("loop", NodeKind::Joiner(joiner), Origin::Operator(2)));
        g.connect(a, j);
        g.connect(body, j);
        let layout = Layout::new(1, 1);
        let sim = JoinerSimulator::new(&g, &layout);
        let schedules = sim.simulate().unwrap();
        let steps = sim.init_paths(j, &schedules[&j]).unwrap();
        assert_eq!(
            steps,
            (0..3)
                .map(|i| JoinerStep::new(StepKind::InitPath(i), BufferLabel::new(&[1])))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_linear_schedule() {
        let mut schedule = JoinerSchedule::linear(vec![]);
        schedule.push(JoinerStep::new(StepKind::Receive, BufferLabel::new(&[0])));
        schedule.push(JoinerStep::new(StepKind::Fire, BufferLabel::new(&[0])));
        assert!(!schedule.is_cyclic());
        assert_eq!(schedule.get(2), None);
        assert_eq!(schedule.to_string(), "  receive 0\n  fire 0\n");
    }

    // c --- inner(1,1) --- middle(1,1) --- outer(1,1) -> (mapped)
    // d ---/              /               /
    // b -----------------/               /
    // a --------------------------------/
    #[test]
    fn test_three_level_joiner_tree() {
        let _logger = env_logger::builder().is_test(true).try_init();
        let mut g = StreamGraph::new();
        let c = g.add_node(filter("c", 0));
        let d = g.add_node(filter("d", 1));
        let b = g.add_node(filter("b", 2));
        let a = g.add_node(filter("a", 3));
        let mut joiners = vec![];
        for (op, name) in ["inner", "middle", "outer"].iter().enumerate() {
            joiners.push(g.add_node(GraphNode::new(
                name,
                NodeKind::Joiner(Joiner::round_robin(&[1, 1])),
                Origin::Operator(4 + op),
            )));
        }
        let (inner, middle, outer) = (joiners[0], joiners[1], joiners[2]);
        g.connect(c, inner);
        g.connect(d, inner);
        g.connect(inner, middle);
        g.connect(b, middle);
        g.connect(middle, outer);
        g.connect(a, outer);
        let mut layout = Layout::new(1, 1);
        layout.assign(outer, Coordinate::new(0, 0)).unwrap();
        let schedules = JoinerSimulator::new(&g, &layout).simulate().unwrap();
        // every joiner of the tree has to wrap around before the cycle closes
        assert_eq!(
            labels(&schedules[&outer]),
            vec!["000", "1", "10", "1", "100", "1", "10", "1"]
        );
        assert_eq!(labels(&schedules[&middle]), vec!["00", "1", "10", "1"]);
    }

    #[test]
    fn test_loop_arc_without_items() {
        let mut g = StreamGraph::new();
        let a = g.add_node(filter("a", 0));
        let body = g.add_node(filter("body", 1));
        // the loop arc has no weight, so the joiner never reads it
        let mut joiner = Joiner::round_robin(&[1, 0]);
        joiner.feedback = Some(FeedbackLoop {
            delay: 1,
            loop_arc: 1,
        });
        let j = g.add_node(GraphNode::new("loop", NodeKind::Joiner(joiner), Origin::Operator(2)));
        g.connect(a, j);
        g.connect(body, j);
        let layout = Layout::new(1, 1);
        let sim = JoinerSimulator::new(&g, &layout);
        let schedules = sim.simulate().unwrap();
        assert_eq!(labels(&schedules[&j]), vec!["0"]);
        assert_eq!(
            sim.init_paths(j, &schedules[&j]),
            Err(Error::MissingInitPath(j))
        );
    }

    // a -> dead(0,0) -> outer(1) -> (mapped)
    #[test]
    fn test_unmapped_joiner_without_weights() {
        let mut g = StreamGraph::new();
        let a = g.add_node(filter("a", 0));
        let dead = g.add_node(GraphNode::new(
            "dead",
            NodeKind::Joiner(Joiner::round_robin(&[0, 0])),
            Origin::Operator(1),
        ));
        let outer = g.add_node(GraphNode::new(
            "outer",
            NodeKind::Joiner(Joiner::round_robin(&[1])),
            Origin::Operator(2),
        ));
        g.connect(a, dead);
        g.connect(dead, outer);
        let mut layout = Layout::new(1, 1);
        layout.assign(outer, Coordinate::new(0, 0)).unwrap();
        assert_eq!(
            JoinerSimulator::new(&g, &layout).simulate(),
            Err(Error::InvalidGraph("dead".to_string()))
        );
    }
}
