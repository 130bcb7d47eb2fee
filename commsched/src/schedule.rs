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

//! The communication scheduler: execution counts, joiner cycles, then the
//! init and steady simulations.

use itertools::Itertools;
use petgraph::prelude::NodeIndex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::config::SchedulerConfiguration;
use crate::counter::SimulationCounter;
use crate::counts::{ExecutionCounts, Phase, RateScheduler, PHASES};
use crate::error::Error;
use crate::graph::StreamGraph;
use crate::joiner::{JoinerSchedule, JoinerSimulator};
use crate::mesh::{Placement, Router};
use crate::network::NetworkCode;
use crate::rate_match;
use crate::sim::{PhaseSchedule, SimulationContext, Simulator};

/// The static communication program of a placed stream graph.
#[derive(Debug)]
pub struct CommunicationSchedule {
    names: HashMap<NodeIndex, String>,
    pub execution_counts: ExecutionCounts,
    /// cyclic input order of every joiner.
    pub joiner_cycles: HashMap<NodeIndex, JoinerSchedule>,
    phases: [PhaseSchedule; PHASES],
}

impl CommunicationSchedule {
    pub fn phase(&self, phase: Phase) -> &PhaseSchedule {
        let index: usize = phase.into();
        &self.phases[index]
    }

    pub fn network(&self, phase: Phase) -> &NetworkCode {
        &self.phase(phase).network
    }

    /// The steps of `joiner` in `phase`.
    pub fn joiner_code(&self, phase: Phase, joiner: NodeIndex) -> Option<&JoinerSchedule> {
        self.phase(phase).joiner_code.get(&joiner)
    }

    /// How often `node` fired in `phase`.
    pub fn firings(&self, phase: Phase, node: NodeIndex) -> usize {
        self.phase(phase).firings.get(&node).copied().unwrap_or(0)
    }

    fn name(&self, node: NodeIndex) -> &str {
        self.names.get(&node).map(|n| n.as_str()).unwrap_or("?")
    }
}

impl fmt::Display for CommunicationSchedule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for phase in [Phase::Init, Phase::Steady].iter() {
            writeln!(f, "=== {} ===", phase)?;
            let counts: BTreeMap<_, _> = self.execution_counts.table(*phase).iter().collect();
            writeln!(
                f,
                "executions: {}",
                counts
                    .iter()
                    .map(|(node, count)| format!("{}={}", self.name(**node), count))
                    .format(" ")
            )?;
            write!(f, "{}", self.network(*phase))?;
            for (node, code) in &self.phase(*phase).joiner_code {
                writeln!(f, "joiner {}:", self.name(*node))?;
                write!(f, "{}", code)?;
            }
        }
        Ok(())
    }
}

/// Schedule all communication of `graph` placed by `placement`.
pub fn schedule(
    graph: &StreamGraph,
    placement: &dyn Placement,
    router: &dyn Router,
    rates: &dyn RateScheduler,
    config: &SchedulerConfiguration,
) -> Result<CommunicationSchedule, Error> {
    graph.top()?;
    let execution_counts = ExecutionCounts::compute(graph, rates);
    let joiner_cycles = JoinerSimulator::new(graph, placement).simulate()?;

    if config.rate_match {
        rate_match::check_routes(graph, placement, router)?.into_result()?;
    }

    let context = SimulationContext {
        graph,
        placement,
        router,
        rates,
        config,
        counts: &execution_counts,
        joiner_cycles: &joiner_cycles,
    };
    let init = Simulator::new(context, Phase::Init, SimulationCounter::new())?.run()?;
    init.check_execution_counts(graph, placement)?;

    let steady = Simulator::new(context, Phase::Steady, init.counter.carry_over())?.run()?;
    steady.check_execution_counts(graph, placement)?;

    let names = graph
        .node_indices()
        .map(|node| (node, graph.name(node).to_string()))
        .collect();
    Ok(CommunicationSchedule {
        names,
        execution_counts,
        joiner_cycles,
        phases: [init, steady],
    })
}
