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

//! What the network does for every item the simulator sends.

mod magic;
mod switch;

pub use magic::MagicSchedule;
pub use switch::{RouteInstruction, SwitchCode, SwitchPort};

use std::fmt;

use crate::config::NetworkMode;
use crate::error::Error;
use crate::mesh::{Coordinate, Router};

/// Network traffic of one phase.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NetworkCode {
    Switch(SwitchCode),
    Magic(MagicSchedule),
}

impl NetworkCode {
    pub fn new(mode: NetworkMode) -> Self {
        match mode {
            NetworkMode::Switch => Self::Switch(SwitchCode::new()),
            NetworkMode::Magic => Self::Magic(MagicSchedule::new()),
        }
    }

    /// Record one item of `words` network words sent from `source` to the
    /// distinct tiles `destinations`.
    pub fn send(
        &mut self,
        router: &dyn Router,
        source: Coordinate,
        destinations: &[Coordinate],
        words: usize,
    ) -> Result<(), Error> {
        match self {
            Self::Switch(code) => code.route_item(router, source, destinations, words),
            Self::Magic(schedule) => {
                schedule.record(source, destinations);
                Ok(())
            }
        }
    }

    pub fn switch_code(&self) -> Option<&SwitchCode> {
        match self {
            Self::Switch(code) => Some(code),
            Self::Magic(_) => None,
        }
    }

    pub fn magic_schedule(&self) -> Option<&MagicSchedule> {
        match self {
            Self::Switch(_) => None,
            Self::Magic(schedule) => Some(schedule),
        }
    }
}

impl fmt::Display for NetworkCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Switch(code) => write!(f, "{}", code),
            Self::Magic(schedule) => write!(f, "{}", schedule),
        }
    }
}
