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
use std::collections::BTreeMap;
use std::fmt;

use crate::mesh::Coordinate;

/// Sender and receiver lists of one phase for networks that route items
/// without switch code.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MagicSchedule {
    receives: BTreeMap<Coordinate, Vec<Coordinate>>,
    sends: BTreeMap<Coordinate, Vec<Vec<Coordinate>>>,
}

impl MagicSchedule {
    pub fn new() -> Self {
        Default::default()
    }

    /// One item leaves `source` for every tile in `destinations`.
    pub fn record(&mut self, source: Coordinate, destinations: &[Coordinate]) {
        for dest in destinations {
            self.receives
                .entry(*dest)
                .or_insert_with(Vec::new)
                .push(source);
        }
        self.sends
            .entry(source)
            .or_insert_with(Vec::new)
            .push(destinations.to_vec());
    }

    /// The senders of the items `tile` receives, in order.
    pub fn receive_schedule(&self, tile: Coordinate) -> &[Coordinate] {
        self.receives.get(&tile).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The destination tiles of the items `tile` sends, in order.
    pub fn send_schedule(&self, tile: Coordinate) -> &[Vec<Coordinate>] {
        self.sends.get(&tile).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.sends.is_empty()
    }
}

impl fmt::Display for MagicSchedule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tiles = self.sends.keys().chain(self.receives.keys()).sorted().dedup();
        for tile in tiles {
            writeln!(f, "tile {}:", tile)?;
            for dests in self.send_schedule(*tile) {
                writeln!(f, "  send -> {}", dests.iter().format(" "))?;
            }
            for src in self.receive_schedule(*tile) {
                writeln!(f, "  receive <- {}", src)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod magic_tests {
    use super::*;

    #[test]
    fn test_record() {
        let mut schedule = MagicSchedule::new();
        let src = Coordinate::new(0, 1);
        let a = Coordinate::new(0, 0);
        let b = Coordinate::new(1, 1);
        schedule.record(src, &[a, b]);
        schedule.record(src, &[b]);
        assert_eq!(schedule.send_schedule(src), &[vec![a, b], vec![b]]);
        assert_eq!(schedule.receive_schedule(b), &[src, src]);
        assert_eq!(schedule.receive_schedule(a), &[src]);
        assert!(schedule.receive_schedule(src).is_empty());
        assert_eq!(
            schedule.to_string(),
            "tile (0,0):\n  receive <- (0,1)\n\
             tile (0,1):\n  send -> (0,0) (1,1)\n  send -> (1,1)\n\
             tile (1,1):\n  receive <- (0,1)\n  receive <- (0,1)\n"
        );
    }
}
