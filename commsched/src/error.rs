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

use itertools::Itertools;
use petgraph::prelude::*;
use std::fmt;

use crate::mesh::Coordinate;
use crate::Phase;

/// Every error is fatal: the graph can not be statically scheduled with the
/// given placement and rates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// Assigned nodes with a non-zero execution count after a phase.
    IncompleteSchedule(Phase, Vec<(String, usize)>),
    /// One item would reach `tile` from two different neighbors.
    ConflictingRoute {
        tile: Coordinate,
        first: Coordinate,
        second: Coordinate,
    },
    /// A rate-matched route crosses a tile that runs a node.
    RouteThroughOccupiedTile(Coordinate),
    /// A rate-matched route crosses a tile already used as a hop.
    RouteThroughUsedTile(Coordinate),
    BufferUnderflow {
        node: NodeIndex,
        requested: usize,
        available: usize,
    },
    JoinerBufferUnderflow(NodeIndex, String),
    MissingInitPath(NodeIndex),
    /// A mapped joiner sends without a cyclic input schedule.
    MissingJoinerSchedule(NodeIndex),
    CombineJoiner(NodeIndex),
    ExecutedTooMuch(NodeIndex),
    UnassignedNode(NodeIndex),
    InvalidRoute(Coordinate, Coordinate),
    InvalidPlacement(NodeIndex, Coordinate),
    InvalidGraph(String),
    Deadlock(Phase),
    UnterminatedJoinerCycle(NodeIndex),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::IncompleteSchedule(phase, remaining) => write!(
                f,
                "ERROR: {} schedule incomplete, nodes left with executions: {}",
                phase,
                remaining
                    .iter()
                    .map(|(name, count)| format!("{} ({})", name, count))
                    .format(", ")
            ),
            Self::ConflictingRoute {
                tile,
                first,
                second,
            } => write!(
                f,
                "ERROR: tile {} receives the same item from {} and {}",
                tile, first, second
            ),
            Self::RouteThroughOccupiedTile(tile) => {
                write!(f, "ERROR: route crosses tile {} which has a node", tile)
            }
            Self::RouteThroughUsedTile(tile) => {
                write!(f, "ERROR: route crosses tile {} twice", tile)
            }
            Self::BufferUnderflow {
                node,
                requested,
                available,
            } => write!(
                f,
                "ERROR: node {} consumes {} items but only {} are buffered",
                node.index(),
                requested,
                available
            ),
            Self::JoinerBufferUnderflow(node, label) => write!(
                f,
                "ERROR: joiner {} has no item in buffer {}",
                node.index(),
                label
            ),
            Self::MissingJoinerSchedule(node) => write!(
                f,
                "ERROR: joiner {} sends but has no input schedule",
                node.index()
            ),
            Self::CombineJoiner(node) => write!(
                f,
                "ERROR: combine joiner {} can not be scheduled",
                node.index()
            ),
            Self::InvalidRoute(src, dst) => {
                write!(f, "ERROR: no route from tile {} to tile {}", src, dst)
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

// this is needed to allow `anyhow::Result` to accept our definition of
// errors in the command line tools.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
