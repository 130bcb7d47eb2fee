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
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::Error;
use crate::mesh::{Coordinate, Direction, Router};

/// A port of a tile's static switch.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SwitchPort {
    /// The tile's own processor.
    Processor,
    Link(Direction),
}

impl SwitchPort {
    fn input(&self) -> String {
        match self {
            Self::Processor => "$csto".to_string(),
            Self::Link(d) => format!("$c{}i", d),
        }
    }

    fn output(&self) -> String {
        match self {
            Self::Processor => "$csti".to_string(),
            Self::Link(d) => format!("$c{}o", d),
        }
    }
}

/// One crossbar configuration: every output port is driven by the input
/// port it is paired with for one network word.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteInstruction {
    routes: Vec<(SwitchPort, SwitchPort)>,
}

impl RouteInstruction {
    pub fn new(routes: Vec<(SwitchPort, SwitchPort)>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &[(SwitchPort, SwitchPort)] {
        &self.routes
    }
}

impl fmt::Display for RouteInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "route {}",
            self.routes
                .iter()
                .map(|(src, dst)| format!("{}->{}", src.input(), dst.output()))
                .format(",")
        )
    }
}

/// Fan-out tree of one item: every tile has one predecessor and a set of
/// successors. A destination tile is its own successor.
#[derive(Debug, Default)]
struct RouteTree {
    previous: BTreeMap<Coordinate, Coordinate>,
    next: BTreeMap<Coordinate, BTreeSet<Coordinate>>,
}

impl RouteTree {
    fn add_hop(&mut self, from: Coordinate, to: Coordinate) -> Result<(), Error> {
        if let Some(first) = self.previous.get(&to) {
            if *first != from {
                log::error!(
                    "tile {} receives one item from both {} and {}",
                    to,
                    first,
                    from
                );
                return Err(Error::ConflictingRoute {
                    tile: to,
                    first: *first,
                    second: from,
                });
            }
        }
        self.previous.insert(to, from);
        self.next.entry(from).or_insert_with(BTreeSet::new).insert(to);
        Ok(())
    }

    fn add_route(&mut self, hops: &[Coordinate]) -> Result<(), Error> {
        for hop in hops.windows(2) {
            self.add_hop(hop[0], hop[1])?;
        }
        if let Some(dest) = hops.last() {
            self.next.entry(*dest).or_insert_with(BTreeSet::new).insert(*dest);
        }
        Ok(())
    }

    fn instructions(
        &self,
        source: Coordinate,
        router: &dyn Router,
    ) -> Result<Vec<(Coordinate, RouteInstruction)>, Error> {
        let mut result = vec![];
        for (tile, nexts) in &self.next {
            let input = if *tile == source {
                SwitchPort::Processor
            } else {
                let prev = self.previous.get(tile).ok_or_else(|| {
                    log::error!("tile {} is not reached from {}", tile, source);
                    Error::InvalidRoute(source, *tile)
                })?;
                SwitchPort::Link(router.direction(*tile, *prev)?)
            };
            let mut routes = vec![];
            for next in nexts {
                let output = if next == tile {
                    SwitchPort::Processor
                } else {
                    SwitchPort::Link(router.direction(*tile, *next)?)
                };
                routes.push((input, output));
            }
            result.push((*tile, RouteInstruction::new(routes)));
        }
        Ok(result)
    }
}

/// Per-tile switch instructions of one phase, in execution order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SwitchCode {
    tiles: BTreeMap<Coordinate, Vec<RouteInstruction>>,
}

impl SwitchCode {
    pub fn new() -> Self {
        Default::default()
    }

    /// Route one item of `words` network words from `source` to all of
    /// `destinations`. Shared hops carry the item once.
    pub fn route_item(
        &mut self,
        router: &dyn Router,
        source: Coordinate,
        destinations: &[Coordinate],
        words: usize,
    ) -> Result<(), Error> {
        let mut tree = RouteTree::default();
        for dest in destinations {
            let hops = router.route(source, *dest)?;
            if hops.len() < 2 || hops.first() != Some(&source) || hops.last() != Some(dest) {
                log::error!("invalid route from {} to {}: {:?}", source, dest, hops);
                return Err(Error::InvalidRoute(source, *dest));
            }
            tree.add_route(&hops)?;
        }
        if tree.next.is_empty() {
            return Ok(());
        }
        if tree.previous.contains_key(&source) {
            log::error!("an item from {} is routed back into its source", source);
            return Err(Error::ConflictingRoute {
                tile: source,
                first: source,
                second: tree.previous[&source],
            });
        }
        let instructions = tree.instructions(source, router)?;
        for _ in 0..words {
            for (tile, instruction) in &instructions {
                self.tiles
                    .entry(*tile)
                    .or_insert_with(Vec::new)
                    .push(instruction.clone());
            }
        }
        Ok(())
    }

    pub fn instructions(&self, tile: Coordinate) -> &[RouteInstruction] {
        self.tiles.get(&tile).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Coordinate> {
        self.tiles.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl fmt::Display for SwitchCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (tile, instructions) in &self.tiles {
            writeln!(f, "tile {}:", tile)?;
            for instruction in instructions {
                writeln!(f, "  {}", instruction)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod switch_tests {
    use super::*;
    use crate::mesh::XyRouter;

    fn rendered(code: &SwitchCode, tile: Coordinate) -> Vec<String> {
        code.instructions(tile)
            .iter()
            .map(|i| i.to_string())
            .collect()
    }

    #[test]
    fn test_single_hop() {
        let router = XyRouter::new(1, 2);
        let mut code = SwitchCode::new();
        code.route_item(&router, Coordinate::new(0, 0), &[Coordinate::new(0, 1)], 1)
            .unwrap();
        assert_eq!(rendered(&code, Coordinate::new(0, 0)), vec!["route $csto->$cEo"]);
        assert_eq!(rendered(&code, Coordinate::new(0, 1)), vec!["route $cWi->$csti"]);
    }

    // src(0,0) -> (0,1) -> (0,2) = d1
    //               |
    //             (1,1) = d2
    #[test]
    fn test_shared_prefix_fans_out_once() {
        let router = XyRouter::new(2, 3);
        let mut code = SwitchCode::new();
        let d1 = Coordinate::new(0, 2);
        let d2 = Coordinate::new(1, 1);
        code.route_item(&router, Coordinate::new(0, 0), &[d1, d2], 2)
            .unwrap();
        // one instruction per tile and word, never one per destination
        assert_eq!(
            rendered(&code, Coordinate::new(0, 0)),
            vec!["route $csto->$cEo"; 2]
        );
        assert_eq!(
            rendered(&code, Coordinate::new(0, 1)),
            vec!["route $cWi->$cEo,$cWi->$cSo"; 2]
        );
        assert_eq!(rendered(&code, d1), vec!["route $cWi->$csti"; 2]);
        assert_eq!(rendered(&code, d2), vec!["route $cNi->$csti"; 2]);
    }

    // (0,1) is both a destination and a hop towards (0,2)
    #[test]
    fn test_deliver_and_forward() {
        let router = XyRouter::new(1, 3);
        let mut code = SwitchCode::new();
        code.route_item(
            &router,
            Coordinate::new(0, 0),
            &[Coordinate::new(0, 1), Coordinate::new(0, 2)],
            1,
        )
        .unwrap();
        assert_eq!(
            rendered(&code, Coordinate::new(0, 1)),
            vec!["route $cWi->$csti,$cWi->$cEo"]
        );
    }

    #[test]
    fn test_route_to_self_is_rejected() {
        let router = XyRouter::new(1, 1);
        let mut code = SwitchCode::new();
        let tile = Coordinate::new(0, 0);
        assert_eq!(
            code.route_item(&router, tile, &[tile], 1),
            Err(Error::InvalidRoute(tile, tile))
        );
    }

    #[test]
    fn test_conflicting_predecessors() {
        let mut tree = RouteTree::default();
        tree.add_route(&[Coordinate::new(0, 0), Coordinate::new(0, 1)])
            .unwrap();
        assert_eq!(
            tree.add_route(&[Coordinate::new(1, 1), Coordinate::new(0, 1)]),
            Err(Error::ConflictingRoute {
                tile: Coordinate::new(0, 1),
                first: Coordinate::new(0, 0),
                second: Coordinate::new(1, 1),
            })
        );
    }
}
