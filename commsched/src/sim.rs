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

//! Event driven simulation of one schedule phase.
//!
//! Nodes are fired greedily in breadth-first order. Every item a firing
//! produces becomes a pending event; an event is scheduled once its
//! destinations are not about to fire themselves, and executing it moves
//! the item through the network and into the destination buffers. The
//! simulated time only orders events, it is not a cycle count.

mod event;

pub use event::{Destination, EventHeap, SimulatorEvent};

use petgraph::prelude::NodeIndex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::config::SchedulerConfiguration;
use crate::counter::{BufferLabel, SimulationCounter};
use crate::counts::{ExecutionCountTable, ExecutionCounts, Phase, RateScheduler};
use crate::error::Error;
use crate::graph::{NodeKind, SplitType, StreamGraph};
use crate::joiner::{JoinerSchedule, JoinerSimulator, JoinerStep, StepKind};
use crate::mesh::{Coordinate, Placement, Router};
use crate::network::NetworkCode;
use crate::Cycle;

/// Read-only inputs of a simulation run.
#[derive(Clone, Copy)]
pub struct SimulationContext<'a> {
    pub graph: &'a StreamGraph,
    pub placement: &'a dyn Placement,
    pub router: &'a dyn Router,
    pub rates: &'a dyn RateScheduler,
    pub config: &'a SchedulerConfiguration,
    pub counts: &'a ExecutionCounts,
    /// cyclic input schedule of every joiner.
    pub joiner_cycles: &'a HashMap<NodeIndex, JoinerSchedule>,
}

/// Everything one phase produced.
#[derive(Debug)]
pub struct PhaseSchedule {
    pub phase: Phase,
    pub network: NetworkCode,
    pub joiner_code: BTreeMap<NodeIndex, JoinerSchedule>,
    /// executions left per node, all zero for a complete schedule.
    pub remaining: ExecutionCountTable,
    /// how often every node fired.
    pub firings: BTreeMap<NodeIndex, usize>,
    /// (time, source, item) of every executed send, in execution order.
    pub sent: Vec<(Cycle, NodeIndex, usize)>,
    pub counter: SimulationCounter,
}

impl PhaseSchedule {
    /// Fail if a node mapped to a tile has executions left.
    pub fn check_execution_counts(
        &self,
        graph: &StreamGraph,
        placement: &dyn Placement,
    ) -> Result<(), Error> {
        let leftover: Vec<(String, usize)> = graph
            .node_indices()
            .filter(|node| placement.is_assigned(*node))
            .filter_map(|node| match self.remaining.get(&node) {
                Some(count) if *count > 0 => Some((graph.name(node).to_string(), *count)),
                _ => None,
            })
            .collect();
        if leftover.is_empty() {
            return Ok(());
        }
        for (name, count) in &leftover {
            log::error!(
                "{} schedule: node {} has {} executions left",
                self.phase,
                name,
                count
            );
        }
        Err(Error::IncompleteSchedule(self.phase, leftover))
    }
}

pub struct Simulator<'a> {
    context: SimulationContext<'a>,
    phase: Phase,
    order: Vec<NodeIndex>,
    counts: ExecutionCountTable,
    counter: SimulationCounter,
    current_time: Cycle,
    events: EventHeap,
    pending: VecDeque<SimulatorEvent>,
    firing: HashSet<NodeIndex>,
    network: NetworkCode,
    joiner_code: BTreeMap<NodeIndex, Vec<JoinerStep>>,
    firings: BTreeMap<NodeIndex, usize>,
    sent: Vec<(Cycle, NodeIndex, usize)>,
}

impl<'a> Simulator<'a> {
    /// A simulator for `phase` starting from the state in `counter`. The
    /// init phase also enqueues the delayed items of feedback loops.
    pub fn new(
        context: SimulationContext<'a>,
        phase: Phase,
        counter: SimulationCounter,
    ) -> Result<Self, Error> {
        let mut simulator = Self {
            context,
            phase,
            order: context.graph.breadth_first(),
            counts: context.counts.table(phase).clone(),
            counter,
            current_time: 0,
            events: EventHeap::new(),
            pending: VecDeque::new(),
            firing: HashSet::new(),
            network: NetworkCode::new(context.config.network),
            joiner_code: BTreeMap::new(),
            firings: BTreeMap::new(),
            sent: vec![],
        };
        if phase == Phase::Init {
            simulator.enqueue_init_paths()?;
        }
        Ok(simulator)
    }

    fn enqueue_init_paths(&mut self) -> Result<(), Error> {
        let joiners = JoinerSimulator::new(self.context.graph, self.context.placement);
        for node in self.order.clone() {
            if !self.context.placement.is_assigned(node) {
                continue;
            }
            let cycle = match self.context.joiner_cycles.get(&node) {
                Some(cycle) => cycle,
                None => continue,
            };
            for step in joiners.init_paths(node, cycle)? {
                self.counter.increment_joiner_buffer(node, &step.buffer);
                self.joiner_code.entry(node).or_insert_with(Vec::new).push(step);
            }
        }
        Ok(())
    }

    /// Run the phase until no event is left.
    pub fn run(mut self) -> Result<PhaseSchedule, Error> {
        log::info!("simulating the {} phase", self.phase);
        loop {
            let mut progress = false;
            if let Some(event) = self.events.pop() {
                progress = true;
                self.current_time = event.time;
                self.send_item(&event)?;
                if event.is_last {
                    self.firing.remove(&event.source);
                }
            }
            progress |= self.add_events()?;
            if self.events.is_empty() && self.pending.is_empty() {
                break;
            }
            if !progress {
                log::error!(
                    "{} phase is stuck at time {} with {} pending sends",
                    self.phase,
                    self.current_time,
                    self.pending.len()
                );
                return Err(Error::Deadlock(self.phase));
            }
        }
        log::debug!("{} phase done at time {}", self.phase, self.current_time);

        let phase = self.phase;
        let joiner_code = self
            .joiner_code
            .into_iter()
            .map(|(node, steps)| {
                let schedule = match phase {
                    Phase::Init => JoinerSchedule::linear(steps),
                    Phase::Steady => JoinerSchedule::cyclic(steps),
                };
                (node, schedule)
            })
            .collect();
        Ok(PhaseSchedule {
            phase,
            network: self.network,
            joiner_code,
            remaining: self.counts,
            firings: self.firings,
            sent: self.sent,
            counter: self.counter,
        })
    }

    fn add_events(&mut self) -> Result<bool, Error> {
        let fired = self.build_and_queue_events()?;
        let promoted = self.promote_pending();
        Ok(fired || promoted)
    }

    /// Fire nodes until one of them produces items, and queue those items.
    fn build_and_queue_events(&mut self) -> Result<bool, Error> {
        let mut fired = false;
        while let Some(node) = self.next_to_fire() {
            fired = true;
            let items = self.fire(node)?;
            log::trace!(
                "{}: {} fires at {}, {} items",
                self.phase,
                self.context.graph.name(node),
                self.current_time,
                items
            );
            if items == 0 {
                continue;
            }
            for i in 0..items {
                let destinations = self.destinations(node)?;
                let item = self.events.next_item_id(node);
                self.pending.push_back(SimulatorEvent {
                    time: i,
                    source: node,
                    item,
                    destinations,
                    is_last: i + 1 == items,
                });
            }
            self.firing.insert(node);
            break;
        }
        Ok(fired)
    }

    /// Schedule pending events whose destinations are safe to receive,
    /// keeping the items of every source in order.
    fn promote_pending(&mut self) -> bool {
        let limit = self.context.config.promotions_per_round.max(1);
        let mut promoted = 0;
        let mut index = 0;
        while index < self.pending.len() && promoted < limit {
            let event = &self.pending[index];
            let earlier_item = self
                .pending
                .iter()
                .take(index)
                .any(|other| other.source == event.source);
            let busy = event
                .destinations
                .iter()
                .any(|dest| self.firing.contains(&dest.node) || self.can_fire(dest.node));
            if earlier_item || busy {
                index += 1;
                continue;
            }
            if let Some(mut event) = self.pending.remove(index) {
                event.time += self.current_time + self.context.rates.work_estimate(event.source);
                log::trace!(
                    "{}: item {} of {} scheduled for {}",
                    self.phase,
                    event.item,
                    self.context.graph.name(event.source),
                    event.time
                );
                self.events.push(event);
                promoted += 1;
            }
        }
        promoted > 0
    }

    /// The first node in breadth-first order that can fire and whose
    /// consumers are not about to fire themselves.
    fn next_to_fire(&self) -> Option<NodeIndex> {
        self.order.iter().copied().find(|&node| {
            self.context.placement.is_assigned(node)
                && self.can_fire(node)
                && !self.firing.contains(&node)
                && (self.context.graph.out_degree(node) == 0
                    || self.check_downstream(node, &mut HashSet::new()))
        })
    }

    fn check_downstream(&self, node: NodeIndex, visited: &mut HashSet<NodeIndex>) -> bool {
        if !visited.insert(node) {
            return true;
        }
        let downstream = self
            .context
            .graph
            .assigned_successors(node, self.context.placement);
        if downstream.is_empty() {
            return true;
        }
        for current in downstream {
            // a joiner can always receive
            if visited.contains(&current) || self.context.graph.kind(current).is_joiner() {
                return true;
            }
            if !self.can_fire(current)
                && !self.firing.contains(&current)
                && self.check_downstream(current, visited)
            {
                return true;
            }
        }
        false
    }

    fn rate_matched(&self) -> bool {
        self.phase == Phase::Steady && self.context.config.rate_match
    }

    fn steady_count(&self, node: NodeIndex) -> usize {
        self.context.counts.get(Phase::Steady, node).unwrap_or(0)
    }

    fn first_init_firing(&self, node: NodeIndex) -> bool {
        self.phase == Phase::Init && !self.counter.has_fired(node)
    }

    fn items_needed(&self, node: NodeIndex) -> usize {
        match self.context.graph.kind(node) {
            NodeKind::TwoStageFilter { init, .. } if self.first_init_firing(node) => init.peek,
            kind => {
                let rates = kind.rates().unwrap_or_default();
                if self.rate_matched() {
                    rates.pop * self.steady_count(node) + rates.peek.saturating_sub(rates.pop)
                } else {
                    rates.peek
                }
            }
        }
    }

    /// The buffer the joiner forwards from next.
    fn active_buffer(&self, node: NodeIndex) -> Option<BufferLabel> {
        self.context
            .joiner_cycles
            .get(&node)?
            .get(self.counter.joiner_position(node))
            .map(|step| step.buffer.clone())
    }

    fn can_fire(&self, node: NodeIndex) -> bool {
        let count = self.counts.get(&node).copied().unwrap_or(0);
        let assigned = self.context.placement.is_assigned(node);
        match self.context.graph.kind(node) {
            NodeKind::Splitter(_) => false,
            NodeKind::Identity if !assigned => false,
            NodeKind::Joiner(_) => {
                assigned
                    && count > 0
                    && self
                        .active_buffer(node)
                        .map(|label| self.counter.joiner_buffer(node, &label) > 0)
                        .unwrap_or(false)
            }
            _ => count > 0 && self.counter.buffer(node) >= self.items_needed(node),
        }
    }

    /// Fire `node` once and return the number of items it produces.
    fn fire(&mut self, node: NodeIndex) -> Result<usize, Error> {
        match self.counts.get_mut(&node) {
            Some(count) if *count > 0 => *count -= 1,
            _ => {
                log::error!(
                    "{} fires more often than scheduled",
                    self.context.graph.name(node)
                );
                return Err(Error::ExecutedTooMuch(node));
            }
        }
        *self.firings.entry(node).or_insert(0) += 1;

        let graph = self.context.graph;
        let (pop, push) = match graph.kind(node) {
            NodeKind::Joiner(_) => return Ok(1),
            NodeKind::Splitter(_) => {
                log::error!("splitter {} can not fire", graph.name(node));
                return Err(Error::InvalidGraph(graph.name(node).to_string()));
            }
            NodeKind::TwoStageFilter { init, .. } if self.first_init_firing(node) => {
                (init.pop, init.push)
            }
            kind => {
                let rates = kind.rates().unwrap_or_default();
                if self.rate_matched() {
                    let batch = self.steady_count(node);
                    self.counts.insert(node, 0);
                    (rates.pop * batch, rates.push * batch)
                } else {
                    (rates.pop, rates.push)
                }
            }
        };
        self.counter.decrement_buffer(node, pop)?;
        self.counter.set_fired(node);
        Ok(push)
    }

    /// Resolve where the next item of `source` goes, walking through the
    /// nodes that are not mapped to a tile.
    fn destinations(&mut self, source: NodeIndex) -> Result<Vec<Destination>, Error> {
        let graph = self.context.graph;
        let successors = graph.successors(source);
        if successors.len() != 1 {
            log::error!(
                "{} produces items but has {} outputs",
                graph.name(source),
                successors.len()
            );
            return Err(Error::InvalidGraph(graph.name(source).to_string()));
        }
        let (_, next, arc) = successors[0];
        let mut result = vec![];
        self.walk(next, arc, BufferLabel::default(), 0, &mut result)?;
        Ok(result)
    }

    fn walk(
        &mut self,
        node: NodeIndex,
        arc: usize,
        label: BufferLabel,
        depth: usize,
        result: &mut Vec<Destination>,
    ) -> Result<(), Error> {
        let graph = self.context.graph;
        if depth > graph.node_count() {
            log::error!("items circle through unmapped nodes at {}", graph.name(node));
            return Err(Error::InvalidGraph(graph.name(node).to_string()));
        }
        let assigned = self.context.placement.is_assigned(node);
        match graph.kind(node) {
            NodeKind::Joiner(_) => {
                let label = label.then(arc);
                if assigned {
                    result.push(Destination {
                        node,
                        buffer: label,
                    });
                    Ok(())
                } else {
                    self.walk_output(node, label, depth, result)
                }
            }
            NodeKind::Splitter(splitter) => match splitter.kind {
                SplitType::Duplicate => {
                    for (_, next, next_arc) in graph.successors(node) {
                        self.walk(next, next_arc, BufferLabel::default(), depth + 1, result)?;
                    }
                    Ok(())
                }
                SplitType::RoundRobin => {
                    let out = self
                        .counter
                        .select_outgoing(node, &splitter.weights)
                        .and_then(|port| {
                            graph
                                .successors(node)
                                .into_iter()
                                .find(|(src_port, _, _)| *src_port == port)
                        });
                    match out {
                        Some((_, next, next_arc)) => {
                            self.walk(next, next_arc, BufferLabel::default(), depth + 1, result)
                        }
                        None => {
                            log::error!("splitter {} has no output to send to", graph.name(node));
                            Err(Error::InvalidGraph(graph.name(node).to_string()))
                        }
                    }
                }
            },
            NodeKind::Identity if !assigned => {
                self.walk_output(node, BufferLabel::default(), depth, result)
            }
            _ => {
                if !assigned {
                    log::error!("{} receives items but has no tile", graph.name(node));
                    return Err(Error::UnassignedNode(node));
                }
                result.push(Destination {
                    node,
                    buffer: BufferLabel::default(),
                });
                Ok(())
            }
        }
    }

    fn walk_output(
        &mut self,
        node: NodeIndex,
        label: BufferLabel,
        depth: usize,
        result: &mut Vec<Destination>,
    ) -> Result<(), Error> {
        let graph = self.context.graph;
        match graph.successors(node).first() {
            Some(&(_, next, arc)) => self.walk(next, arc, label, depth + 1, result),
            None => {
                log::error!("{} has no output", graph.name(node));
                Err(Error::InvalidGraph(graph.name(node).to_string()))
            }
        }
    }

    fn tile(&self, node: NodeIndex) -> Result<Coordinate, Error> {
        self.context.placement.tile(node).ok_or_else(|| {
            log::error!("{} has no tile", self.context.graph.name(node));
            Error::UnassignedNode(node)
        })
    }

    /// Deliver the item of `event` and record the traffic it causes.
    fn send_item(&mut self, event: &SimulatorEvent) -> Result<(), Error> {
        let graph = self.context.graph;
        let source = event.source;
        log::trace!(
            "{}: {} sends item {} at {}",
            self.phase,
            graph.name(source),
            event.item,
            self.current_time
        );
        self.sent.push((self.current_time, source, event.item));
        if graph.kind(source).is_joiner() {
            let label = self.active_buffer(source).ok_or_else(|| {
                log::error!("joiner {} has no input schedule", graph.name(source));
                Error::MissingJoinerSchedule(source)
            })?;
            self.counter.decrement_joiner_buffer(source, &label)?;
            self.push_joiner_step(source, JoinerStep::new(StepKind::Fire, label));
            self.counter.advance_joiner(source);
        }

        let mut delivered: Vec<NodeIndex> = vec![];
        let mut tiles: Vec<Coordinate> = vec![];
        for dest in &event.destinations {
            if graph.kind(dest.node).is_joiner() {
                self.counter.increment_joiner_buffer(dest.node, &dest.buffer);
                let kind = if delivered.contains(&dest.node) {
                    StepKind::Duplicate
                } else {
                    StepKind::Receive
                };
                self.push_joiner_step(dest.node, JoinerStep::new(kind, dest.buffer.clone()));
            } else {
                self.counter.increment_buffer(dest.node);
            }
            delivered.push(dest.node);
            let tile = self.tile(dest.node)?;
            if !tiles.contains(&tile) {
                tiles.push(tile);
            }
        }

        let source_tile = self.tile(source)?;
        let words = graph.node(source).words();
        self.network
            .send(self.context.router, source_tile, &tiles, words)
    }

    fn push_joiner_step(&mut self, node: NodeIndex, step: JoinerStep) {
        self.joiner_code.entry(node).or_insert_with(Vec::new).push(step);
    }
}
