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

//! Bookkeeping of one simulation run.

use itertools::Itertools;
use petgraph::prelude::NodeIndex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::error::Error;

/// Names one causal path from a producer into a joiner: the joiner input
/// arcs taken, upstream first, ending with the arc of the joiner itself.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BufferLabel(Vec<usize>);

impl BufferLabel {
    pub fn new(arcs: &[usize]) -> Self {
        Self(arcs.to_vec())
    }

    /// The label one joiner further downstream.
    pub fn then(&self, arc: usize) -> Self {
        let mut arcs = self.0.clone();
        arcs.push(arc);
        Self(arcs)
    }

    /// The label one joiner further upstream.
    pub fn after(&self, arc: usize) -> Self {
        let mut arcs = vec![arc];
        arcs.extend_from_slice(&self.0);
        Self(arcs)
    }

    /// The arc on which the item enters the last joiner.
    pub fn last_arc(&self) -> Option<usize> {
        self.0.last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for BufferLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.iter().format(""))
    }
}

/// Weighted round-robin arc selection: arc `i` is chosen `weights[i]` times
/// in a row, and all arcs are refilled once every weight is used up.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoundRobin {
    weights: Vec<usize>,
    remaining: Vec<usize>,
}

impl RoundRobin {
    pub fn new(weights: &[usize]) -> Self {
        Self {
            weights: weights.to_vec(),
            remaining: weights.to_vec(),
        }
    }

    /// Take one item from the next arc with weight left.
    pub fn select(&mut self) -> Option<usize> {
        if self.remaining.iter().all(|w| *w == 0) {
            self.reset();
        }
        let arc = self.remaining.iter().position(|w| *w > 0)?;
        self.remaining[arc] -= 1;
        Some(arc)
    }

    pub fn reset(&mut self) {
        self.remaining = self.weights.clone();
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining.iter().all(|w| *w == 0)
    }

    pub fn remaining(&self) -> &[usize] {
        &self.remaining
    }
}

/// Mutable state of one simulation run. Indexed by graph node, never
/// shared between runs.
#[derive(Clone, Debug, Default)]
pub struct SimulationCounter {
    incoming: HashMap<NodeIndex, RoundRobin>,
    outgoing: HashMap<NodeIndex, RoundRobin>,
    buffers: HashMap<NodeIndex, usize>,
    joiner_buffers: HashMap<NodeIndex, BTreeMap<BufferLabel, usize>>,
    joiner_positions: HashMap<NodeIndex, usize>,
    fired: HashSet<NodeIndex>,
}

impl SimulationCounter {
    pub fn new() -> Self {
        Default::default()
    }

    /// A counter for the next phase: items still buffered and round-robin
    /// positions carry over, the fired flags do not.
    pub fn carry_over(&self) -> Self {
        Self {
            fired: HashSet::new(),
            ..self.clone()
        }
    }

    /// Pick the next input arc of a joiner with input weights `weights`.
    pub fn select_incoming(&mut self, node: NodeIndex, weights: &[usize]) -> Option<usize> {
        self.incoming
            .entry(node)
            .or_insert_with(|| RoundRobin::new(weights))
            .select()
    }

    /// Pick the next output arc of a splitter with output weights `weights`.
    pub fn select_outgoing(&mut self, node: NodeIndex, weights: &[usize]) -> Option<usize> {
        self.outgoing
            .entry(node)
            .or_insert_with(|| RoundRobin::new(weights))
            .select()
    }

    /// True once every input arc counter used so far is spent.
    pub fn incoming_exhausted(&self) -> bool {
        self.incoming.values().all(|rr| rr.is_exhausted())
    }

    pub fn buffer(&self, node: NodeIndex) -> usize {
        self.buffers.get(&node).copied().unwrap_or(0)
    }

    pub fn increment_buffer(&mut self, node: NodeIndex) {
        *self.buffers.entry(node).or_insert(0) += 1;
    }

    pub fn decrement_buffer(&mut self, node: NodeIndex, items: usize) -> Result<(), Error> {
        let available = self.buffer(node);
        if available < items {
            log::error!(
                "buffer of node {} underflows: {} requested, {} available",
                node.index(),
                items,
                available
            );
            return Err(Error::BufferUnderflow {
                node,
                requested: items,
                available,
            });
        }
        self.buffers.insert(node, available - items);
        Ok(())
    }

    pub fn joiner_buffer(&self, node: NodeIndex, label: &BufferLabel) -> usize {
        self.joiner_buffers
            .get(&node)
            .and_then(|buffers| buffers.get(label))
            .copied()
            .unwrap_or(0)
    }

    pub fn increment_joiner_buffer(&mut self, node: NodeIndex, label: &BufferLabel) {
        *self
            .joiner_buffers
            .entry(node)
            .or_insert_with(BTreeMap::new)
            .entry(label.clone())
            .or_insert(0) += 1;
    }

    pub fn decrement_joiner_buffer(
        &mut self,
        node: NodeIndex,
        label: &BufferLabel,
    ) -> Result<(), Error> {
        match self
            .joiner_buffers
            .get_mut(&node)
            .and_then(|buffers| buffers.get_mut(label))
        {
            Some(items) if *items > 0 => {
                *items -= 1;
                Ok(())
            }
            _ => {
                log::error!("joiner {} has nothing in buffer {}", node.index(), label);
                Err(Error::JoinerBufferUnderflow(node, label.to_string()))
            }
        }
    }

    /// Position of the joiner in its cyclic input schedule.
    pub fn joiner_position(&self, node: NodeIndex) -> usize {
        self.joiner_positions.get(&node).copied().unwrap_or(0)
    }

    pub fn advance_joiner(&mut self, node: NodeIndex) {
        *self.joiner_positions.entry(node).or_insert(0) += 1;
    }

    pub fn has_fired(&self, node: NodeIndex) -> bool {
        self.fired.contains(&node)
    }

    pub fn set_fired(&mut self, node: NodeIndex) {
        self.fired.insert(node);
    }
}

#[cfg(test)]
mod counter_tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let mut rr = RoundRobin::new(&[2, 0, 1]);
        let picks: Vec<_> = (0..6).map(|_| rr.select().unwrap()).collect();
        assert_eq!(picks, vec![0, 0, 2, 0, 0, 2]);
        assert!(rr.is_exhausted());
        assert_eq!(RoundRobin::new(&[0, 0]).select(), None);
    }

    #[test]
    fn test_labels() {
        let label = BufferLabel::new(&[1]).after(0);
        assert_eq!(label, BufferLabel::new(&[0, 1]));
        assert_eq!(label.to_string(), "01");
        assert_eq!(BufferLabel::default().then(1).then(0).last_arc(), Some(0));
    }

    #[test]
    fn test_buffers() {
        let n = NodeIndex::new(3);
        let mut counter = SimulationCounter::new();
        counter.increment_buffer(n);
        counter.increment_buffer(n);
        assert!(counter.decrement_buffer(n, 2).is_ok());
        assert_eq!(
            counter.decrement_buffer(n, 1),
            Err(Error::BufferUnderflow {
                node: n,
                requested: 1,
                available: 0
            })
        );

        let label = BufferLabel::new(&[1]);
        assert!(counter.decrement_joiner_buffer(n, &label).is_err());
        counter.increment_joiner_buffer(n, &label);
        assert_eq!(counter.joiner_buffer(n, &label), 1);
        assert!(counter.decrement_joiner_buffer(n, &label).is_ok());
        assert_eq!(counter.joiner_buffer(n, &label), 0);
    }

    #[test]
    fn test_carry_over_keeps_items() {
        let n = NodeIndex::new(0);
        let mut counter = SimulationCounter::new();
        counter.increment_buffer(n);
        counter.set_fired(n);
        counter.advance_joiner(n);
        let next = counter.carry_over();
        assert_eq!(next.buffer(n), 1);
        assert_eq!(next.joiner_position(n), 1);
        assert!(!next.has_fired(n));
    }
}
