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

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

/// What the scheduler emits for each send.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum NetworkMode {
    /// Routing instructions for the static switch of every tile.
    Switch,
    /// Sender and receiver lists only, without explicit paths.
    Magic,
}

impl FromStr for NetworkMode {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Switch" => Ok(NetworkMode::Switch),
            "Magic" => Ok(NetworkMode::Magic),
            _ => Err(Self::Err::new(
                std::io::ErrorKind::Other,
                format!("Invalid network mode: {}", s),
            )),
        }
    }
}

/// Knobs of the communication scheduler.
///
/// constructed programmatically or read from a config file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SchedulerConfiguration {
    #[serde(default = "SchedulerConfiguration::default_network")]
    pub network: NetworkMode,
    /// Fire every filter once per steady state with its whole batch.
    #[serde(default)]
    pub rate_match: bool,
    /// How many pending events may be scheduled per simulation round.
    #[serde(default = "SchedulerConfiguration::default_promotions")]
    pub promotions_per_round: usize,
}

impl SchedulerConfiguration {
    fn default_network() -> NetworkMode {
        NetworkMode::Switch
    }

    fn default_promotions() -> usize {
        1
    }

    pub fn from_file(file_name: &Path) -> anyhow::Result<Self> {
        let file = File::open(file_name)
            .with_context(|| format!("File {} not found", file_name.display()))?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader)
            .with_context(|| format!("Invalid configuration in {}", file_name.display()))
    }

    pub fn from_str(config: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(config)?)
    }
}

impl Default for SchedulerConfiguration {
    fn default() -> Self {
        Self {
            network: Self::default_network(),
            rate_match: false,
            promotions_per_round: Self::default_promotions(),
        }
    }
}
