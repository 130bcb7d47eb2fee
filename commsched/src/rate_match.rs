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

//! Static check of the routes of a rate-matched layout: a rate-matched
//! filter sends its whole output as one burst, so no route may cross a tile
//! that computes or that another route already crosses.

use petgraph::prelude::NodeIndex;
use std::collections::HashSet;

use crate::error::Error;
use crate::graph::StreamGraph;
use crate::mesh::{Coordinate, Placement, Router};

/// A route from `source` to `destination` that shares `tile`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteConflict {
    pub source: NodeIndex,
    pub destination: NodeIndex,
    pub tile: Coordinate,
    pub reason: Error,
}

/// Outcome of the check, with every conflict found.
#[derive(Debug, Default)]
pub struct RateMatchReport {
    conflicts: Vec<RouteConflict>,
}

impl RateMatchReport {
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn conflicts(&self) -> &[RouteConflict] {
        &self.conflicts
    }

    /// The first conflict as an error.
    pub fn into_result(self) -> Result<(), Error> {
        match self.conflicts.into_iter().next() {
            Some(conflict) => Err(conflict.reason),
            None => Ok(()),
        }
    }
}

pub fn check_routes(
    graph: &StreamGraph,
    placement: &dyn Placement,
    router: &dyn Router,
) -> Result<RateMatchReport, Error> {
    let mut report = RateMatchReport::default();
    let mut routed: HashSet<Coordinate> = HashSet::new();
    for node in graph.breadth_first() {
        let source_tile = match placement.tile(node) {
            Some(tile) => tile,
            None => continue,
        };
        for dest in graph.assigned_successors(node, placement) {
            let dest_tile = placement.tile(dest).ok_or(Error::UnassignedNode(dest))?;
            let hops = router.route(source_tile, dest_tile)?;
            for tile in hops.into_iter().skip(1).filter(|t| *t != dest_tile) {
                let reason = if placement.node_at(tile).is_some() {
                    Some(Error::RouteThroughOccupiedTile(tile))
                } else if routed.contains(&tile) {
                    Some(Error::RouteThroughUsedTile(tile))
                } else {
                    None
                };
                if let Some(reason) = reason {
                    log::warn!(
                        "route {} -> {} can not be rate matched: {}",
                        graph.name(node),
                        graph.name(dest),
                        reason
                    );
                    report.conflicts.push(RouteConflict {
                        source: node,
                        destination: dest,
                        tile,
                        reason,
                    });
                }
                routed.insert(tile);
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod rate_match_tests {
    use super::*;
    use crate::graph::{FilterRates, GraphNode, NodeKind, OperatorId, Origin};
    use crate::mesh::{Layout, XyRouter};

    fn filter(name: &str, op: OperatorId) -> GraphNode {
        GraphNode::new(
            name,
            NodeKind::Filter(FilterRates::new(1, 1, 1)),
            Origin::Operator(op),
        )
    }

    // a(0,0) -> b(0,2) crosses the free tile (0,1)
    #[test]
    fn test_free_intermediate_tile() {
        let mut g = StreamGraph::new();
        let a = g.add_node(filter("a", 0));
        let b = g.add_node(filter("b", 1));
        g.connect(a, b);
        let mut layout = Layout::new(1, 3);
        layout.assign(a, Coordinate::new(0, 0)).unwrap();
        layout.assign(b, Coordinate::new(0, 2)).unwrap();
        let router = XyRouter::for_layout(&layout);
        assert!(check_routes(&g, &layout, &router).unwrap().is_valid());
    }

    // a(0,0) -> b(0,2) crosses c(0,1)
    #[test]
    fn test_occupied_intermediate_tile() {
        let mut g = StreamGraph::new();
        let a = g.add_node(filter("a", 0));
        let b = g.add_node(filter("b", 1));
        let c = g.add_node(filter("c", 2));
        g.connect(a, b);
        g.connect(b, c);
        let mut layout = Layout::new(1, 3);
        layout.assign(a, Coordinate::new(0, 0)).unwrap();
        layout.assign(c, Coordinate::new(0, 1)).unwrap();
        layout.assign(b, Coordinate::new(0, 2)).unwrap();
        let router = XyRouter::for_layout(&layout);
        let report = check_routes(&g, &layout, &router).unwrap();
        assert!(!report.is_valid());
        assert_eq!(report.conflicts()[0].source, a);
        assert_eq!(
            report.into_result(),
            Err(Error::RouteThroughOccupiedTile(Coordinate::new(0, 1)))
        );
    }

    // a(1,0) -> b(1,2) crosses (1,1) first, the later routes
    // b -> c(0,0) and c -> d(2,1) cross it again.
    #[test]
    fn test_used_intermediate_tile() {
        let mut g = StreamGraph::new();
        let a = g.add_node(filter("a", 0));
        let b = g.add_node(filter("b", 1));
        let c = g.add_node(filter("c", 2));
        let d = g.add_node(filter("d", 3));
        g.connect(a, b);
        g.connect(b, c);
        g.connect(c, d);
        let mut layout = Layout::new(3, 3);
        layout.assign(a, Coordinate::new(1, 0)).unwrap();
        layout.assign(b, Coordinate::new(1, 2)).unwrap();
        layout.assign(c, Coordinate::new(0, 0)).unwrap();
        layout.assign(d, Coordinate::new(2, 1)).unwrap();
        let router = XyRouter::for_layout(&layout);
        let report = check_routes(&g, &layout, &router).unwrap();
        let reasons: Vec<_> = report.conflicts().iter().map(|c| c.reason.clone()).collect();
        assert!(reasons.contains(&Error::RouteThroughUsedTile(Coordinate::new(1, 1))));
    }
}
