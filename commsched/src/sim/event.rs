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

use petgraph::prelude::NodeIndex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::counter::BufferLabel;
use crate::Cycle;

/// A node an item is delivered to. Joiners also learn which of their
/// buffers the item lands in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Destination {
    pub node: NodeIndex,
    pub buffer: BufferLabel,
}

/// `source` sends item `item` to `destinations` at `time`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SimulatorEvent {
    pub time: Cycle,
    pub source: NodeIndex,
    /// increases with every item `source` produces.
    pub item: usize,
    pub destinations: Vec<Destination>,
    /// the last item of the firing that produced it.
    pub is_last: bool,
}

struct Entry {
    sequence: u64,
    event: SimulatorEvent,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // reversed: the heap pops the earliest event, ties in insertion order.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.event.time, other.sequence).cmp(&(self.event.time, self.sequence))
    }
}

/// Scheduled events, earliest first.
#[derive(Default)]
pub struct EventHeap {
    heap: BinaryHeap<Entry>,
    sequence: u64,
    item_ids: HashMap<NodeIndex, usize>,
}

impl EventHeap {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn push(&mut self, event: SimulatorEvent) {
        self.sequence += 1;
        self.heap.push(Entry {
            sequence: self.sequence,
            event,
        });
    }

    pub fn pop(&mut self) -> Option<SimulatorEvent> {
        self.heap.pop().map(|entry| entry.event)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// The id of the next item produced by `node`.
    pub fn next_item_id(&mut self, node: NodeIndex) -> usize {
        let id = self.item_ids.entry(node).or_insert(0);
        let item = *id;
        *id += 1;
        item
    }
}

#[cfg(test)]
mod event_tests {
    use super::*;

    fn event(time: Cycle, item: usize) -> SimulatorEvent {
        SimulatorEvent {
            time,
            source: NodeIndex::new(0),
            item,
            destinations: vec![],
            is_last: false,
        }
    }

    #[test]
    fn test_earliest_first() {
        let mut heap = EventHeap::new();
        heap.push(event(5, 0));
        heap.push(event(2, 1));
        heap.push(event(5, 2));
        heap.push(event(2, 3));
        assert_eq!(heap.len(), 4);
        let order: Vec<_> = std::iter::from_fn(|| heap.pop()).map(|e| e.item).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_item_ids() {
        let mut heap = EventHeap::new();
        let a = NodeIndex::new(0);
        let b = NodeIndex::new(1);
        assert_eq!(heap.next_item_id(a), 0);
        assert_eq!(heap.next_item_id(a), 1);
        assert_eq!(heap.next_item_id(b), 0);
    }
}
