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

//! Tiles of the mesh and the placement and routing queries the scheduler
//! makes about them.
//!
//! A 3x4 mesh looks like this:
//! <pre>
//! (0,0) --- (0,1) --- (0,2) --- (0,3)   ^
//!   |         |         |         |     |
//! (1,0) --- (1,1) --- (1,2) --- (1,3)   rows
//!   |         |         |         |     |
//! (2,0) --- (2,1) --- (2,2) --- (2,3)   v
//! < ------------ columns ------------ >
//! </pre>

use petgraph::prelude::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::Error;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Coordinate {
    pub row: usize,
    pub column: usize,
}

impl Coordinate {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }

    fn distance(&self, other: &Self) -> usize {
        let dr = (self.row as isize - other.row as isize).abs() as usize;
        let dc = (self.column as isize - other.column as isize).abs() as usize;
        dr + dc
    }

    /// The direction of `other` as seen from this tile, if they are
    /// neighbors.
    pub fn direction_to(&self, other: &Self) -> Option<Direction> {
        if self.distance(other) != 1 {
            return None;
        }
        Some(if other.row < self.row {
            Direction::North
        } else if other.row > self.row {
            Direction::South
        } else if other.column > self.column {
            Direction::East
        } else {
            Direction::West
        })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{})", self.row, self.column)
    }
}

/// Switch ports towards the neighboring tiles.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            Self::North => "N",
            Self::South => "S",
            Self::East => "E",
            Self::West => "W",
        };
        write!(f, "{}", label)
    }
}

/// Answers which tile a node of the stream graph runs on.
pub trait Placement {
    /// The tile of `node`, or `None` if the node is not mapped to the mesh.
    fn tile(&self, node: NodeIndex) -> Option<Coordinate>;

    /// The node running on `tile`.
    fn node_at(&self, tile: Coordinate) -> Option<NodeIndex>;

    fn is_assigned(&self, node: NodeIndex) -> bool {
        self.tile(node).is_some()
    }

    fn are_neighbors(&self, a: Coordinate, b: Coordinate) -> bool {
        a.direction_to(&b).is_some()
    }
}

/// return the linear index of a tile in a mesh with `columns` columns.
pub fn linearize_tile(tile: Coordinate, columns: usize) -> usize {
    tile.row * columns + tile.column
}

/// given a linear tile number, return its coordinate in a mesh with
/// `columns` columns.
pub fn delinearize_tile(index: usize, columns: usize) -> Coordinate {
    Coordinate::new(index / columns, index % columns)
}

/// A placement of stream graph nodes on a `rows x columns` mesh, at most
/// one node per tile.
#[derive(Clone, Debug)]
pub struct Layout {
    rows: usize,
    columns: usize,
    assignment: HashMap<NodeIndex, Coordinate>,
    occupant: HashMap<Coordinate, NodeIndex>,
}

impl Layout {
    pub fn new(rows: usize, columns: usize) -> Self {
        Self {
            rows,
            columns,
            assignment: HashMap::new(),
            occupant: HashMap::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn contains(&self, tile: Coordinate) -> bool {
        tile.row < self.rows && tile.column < self.columns
    }

    pub fn assign(&mut self, node: NodeIndex, tile: Coordinate) -> Result<(), Error> {
        if !self.contains(tile) {
            log::error!("tile {} is outside of the {}x{} mesh", tile, self.rows, self.columns);
            return Err(Error::InvalidPlacement(node, tile));
        }
        if let Some(other) = self.occupant.get(&tile) {
            if *other != node {
                log::error!(
                    "tile {} already runs node {}, can not place node {}",
                    tile,
                    other.index(),
                    node.index()
                );
                return Err(Error::InvalidPlacement(node, tile));
            }
        }
        if let Some(old) = self.assignment.insert(node, tile) {
            self.occupant.remove(&old);
        }
        self.occupant.insert(tile, node);
        Ok(())
    }

    /// The tile number used by code generation.
    pub fn tile_number(&self, tile: Coordinate) -> usize {
        linearize_tile(tile, self.columns)
    }

    pub fn tile_count(&self) -> usize {
        self.rows * self.columns
    }
}

impl Placement for Layout {
    fn tile(&self, node: NodeIndex) -> Option<Coordinate> {
        self.assignment.get(&node).copied()
    }

    fn node_at(&self, tile: Coordinate) -> Option<NodeIndex> {
        self.occupant.get(&tile).copied()
    }
}

/// Computes the tiles an item crosses between two tiles.
pub trait Router {
    /// Ordered tiles from `src` to `dst`, both included.
    fn route(&self, src: Coordinate, dst: Coordinate) -> Result<Vec<Coordinate>, Error>;

    /// The switch port of `from` that leads to the adjacent tile `to`.
    fn direction(&self, from: Coordinate, to: Coordinate) -> Result<Direction, Error> {
        from.direction_to(&to).ok_or_else(|| {
            log::error!("tiles {} and {} are not neighbors", from, to);
            Error::InvalidRoute(from, to)
        })
    }
}

/// Dimension-ordered routing: first along the row to the destination
/// column, then along the column to the destination row.
#[derive(Clone, Copy, Debug)]
pub struct XyRouter {
    rows: usize,
    columns: usize,
}

impl XyRouter {
    pub fn new(rows: usize, columns: usize) -> Self {
        Self { rows, columns }
    }

    pub fn for_layout(layout: &Layout) -> Self {
        Self::new(layout.rows(), layout.columns())
    }
}

impl Router for XyRouter {
    fn route(&self, src: Coordinate, dst: Coordinate) -> Result<Vec<Coordinate>, Error> {
        for tile in [src, dst].iter() {
            if tile.row >= self.rows || tile.column >= self.columns {
                log::error!("tile {} is outside of the {}x{} mesh", tile, self.rows, self.columns);
                return Err(Error::InvalidRoute(src, dst));
            }
        }
        let mut path = vec![src];
        let mut current = src;
        while current.column != dst.column {
            if current.column < dst.column {
                current.column += 1;
            } else {
                current.column -= 1;
            }
            path.push(current);
        }
        while current.row != dst.row {
            if current.row < dst.row {
                current.row += 1;
            } else {
                current.row -= 1;
            }
            path.push(current);
        }
        Ok(path)
    }
}

#[cfg(test)]
mod mesh_tests {
    use super::*;

    #[test]
    fn test_directions() {
        let c = Coordinate::new(1, 1);
        assert_eq!(c.direction_to(&Coordinate::new(0, 1)), Some(Direction::North));
        assert_eq!(c.direction_to(&Coordinate::new(2, 1)), Some(Direction::South));
        assert_eq!(c.direction_to(&Coordinate::new(1, 2)), Some(Direction::East));
        assert_eq!(c.direction_to(&Coordinate::new(1, 0)), Some(Direction::West));
        assert_eq!(c.direction_to(&Coordinate::new(0, 0)), None);
        assert_eq!(c.direction_to(&c), None);
    }

    #[test]
    fn test_linearize() {
        for i in 0..12 {
            let tile = delinearize_tile(i, 4);
            assert_eq!(linearize_tile(tile, 4), i);
        }
        assert_eq!(delinearize_tile(6, 4), Coordinate::new(1, 2));
    }

    #[test]
    fn test_layout_rejects_shared_tiles() {
        let mut layout = Layout::new(2, 2);
        let a = NodeIndex::new(0);
        let b = NodeIndex::new(1);
        assert!(layout.assign(a, Coordinate::new(0, 0)).is_ok());
        assert_eq!(
            layout.assign(b, Coordinate::new(0, 0)),
            Err(Error::InvalidPlacement(b, Coordinate::new(0, 0)))
        );
        assert_eq!(
            layout.assign(b, Coordinate::new(2, 0)),
            Err(Error::InvalidPlacement(b, Coordinate::new(2, 0)))
        );
        // moving a node frees its old tile
        layout.assign(a, Coordinate::new(1, 1)).unwrap();
        assert!(layout.assign(b, Coordinate::new(0, 0)).is_ok());
        assert_eq!(layout.node_at(Coordinate::new(1, 1)), Some(a));
        assert!(layout.are_neighbors(Coordinate::new(0, 0), Coordinate::new(0, 1)));
    }

    // (0,0) -> (0,1) -> (0,2)
    //                     |
    //                   (1,2)
    #[test]
    fn test_xy_route() {
        let router = XyRouter::new(3, 3);
        let path = router
            .route(Coordinate::new(0, 0), Coordinate::new(1, 2))
            .unwrap();
        assert_eq!(
            path,
            vec![
                Coordinate::new(0, 0),
                Coordinate::new(0, 1),
                Coordinate::new(0, 2),
                Coordinate::new(1, 2)
            ]
        );
        let back = router
            .route(Coordinate::new(1, 2), Coordinate::new(0, 0))
            .unwrap();
        assert_eq!(back.len(), 4);
        assert_eq!(back[1], Coordinate::new(1, 1));
        assert!(router
            .route(Coordinate::new(0, 0), Coordinate::new(3, 0))
            .is_err());
        assert_eq!(
            router.direction(Coordinate::new(0, 0), Coordinate::new(0, 1)),
            Ok(Direction::East)
        );
    }
}
