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

//! Static communication scheduling for stream programs on tiled mesh
//! processors.
//!
//! Given a flattened stream graph whose nodes are placed on mesh tiles and
//! the execution counts of its operators, the scheduler simulates the init
//! and steady phases and produces the switch routing code of every tile
//! (or the sender and receiver lists of a magic network) plus the input
//! schedules of the joiners.

mod config;
mod counter;
mod counts;
mod description;
mod error;
mod graph;
mod joiner;
mod mesh;
mod network;
mod rate_match;
mod schedule;
mod sim;

// Public types
// type to use for simulated time and work estimates
pub type Cycle = usize;

pub use crate::config::{NetworkMode, SchedulerConfiguration};
pub use crate::counter::{BufferLabel, RoundRobin, SimulationCounter};
pub use crate::counts::{
    ExecutionCountTable, ExecutionCounts, Phase, RateScheduler, StaticRates, PHASES,
};
pub use crate::description::{MeshDescription, NodeDescription, Program, ProgramDescription};
pub use crate::error::Error;
pub use crate::graph::{
    Channel, FeedbackLoop, FilterRates, GraphNode, JoinType, Joiner, NodeKind, OperatorId,
    Origin, SplitType, Splitter, StreamGraph,
};
pub use crate::joiner::{JoinerSchedule, JoinerSimulator, JoinerStep, StepKind};
pub use crate::mesh::{
    delinearize_tile, linearize_tile, Coordinate, Direction, Layout, Placement, Router, XyRouter,
};
pub use crate::network::{MagicSchedule, NetworkCode, RouteInstruction, SwitchCode, SwitchPort};
pub use crate::rate_match::{check_routes, RateMatchReport, RouteConflict};
pub use crate::schedule::{schedule, CommunicationSchedule};
pub use crate::sim::{
    Destination, EventHeap, PhaseSchedule, SimulationContext, SimulatorEvent, Simulator,
};
pub use petgraph::graph::NodeIndex;
