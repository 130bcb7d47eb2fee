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

//! A placed stream program in YAML, as handed over by the flattening,
//! placement and rate scheduling passes.
//!
//! ```yaml
//! mesh: {rows: 1, columns: 2}
//! nodes:
//!   - name: source
//!     kind: FileSource
//!     tile: {row: 0, column: 0}
//!     steady_count: 4
//!   - name: sink
//!     kind: FileSink
//!     tile: {row: 0, column: 1}
//!     steady_count: 4
//! edges:
//!   - [source, sink]
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::counts::{Phase, StaticRates};
use crate::error::Error;
use crate::graph::{GraphNode, NodeKind, Origin, StreamGraph};
use crate::mesh::{Coordinate, Layout, XyRouter};
use crate::Cycle;

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct MeshDescription {
    pub rows: usize,
    pub columns: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeDescription {
    pub name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub tile: Option<Coordinate>,
    #[serde(default)]
    pub init_count: Option<usize>,
    #[serde(default)]
    pub steady_count: Option<usize>,
    #[serde(default)]
    pub work: Option<Cycle>,
    #[serde(default = "NodeDescription::default_words")]
    pub words: usize,
    /// Created by flattening. The counts of a synthesized joiner are the
    /// counts of the joiner it replaces, other synthesized nodes derive
    /// theirs.
    #[serde(default)]
    pub synthesized: bool,
}

impl NodeDescription {
    fn default_words() -> usize {
        1
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProgramDescription {
    pub mesh: MeshDescription,
    pub nodes: Vec<NodeDescription>,
    pub edges: Vec<(String, String)>,
    /// The root of the graph, the first node if absent.
    #[serde(default)]
    pub top: Option<String>,
}

/// The inputs of the scheduler built from a description.
#[derive(Clone, Debug)]
pub struct Program {
    pub graph: StreamGraph,
    pub layout: Layout,
    pub router: XyRouter,
    pub rates: StaticRates,
}

impl ProgramDescription {
    pub fn from_file(file_name: &Path) -> anyhow::Result<Self> {
        let file = File::open(file_name)
            .with_context(|| format!("File {} not found", file_name.display()))?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader)
            .with_context(|| format!("Invalid program description in {}", file_name.display()))
    }

    pub fn from_str(description: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(description)?)
    }

    pub fn build(&self) -> Result<Program, Error> {
        let mut graph = StreamGraph::new();
        let mut layout = Layout::new(self.mesh.rows, self.mesh.columns);
        let mut rates = StaticRates::new();
        let mut ids = HashMap::new();

        // every described node is one operator of the source program.
        for (op, desc) in self.nodes.iter().enumerate() {
            let origin = match (desc.synthesized, &desc.kind) {
                (false, _) => Origin::Operator(op),
                (true, NodeKind::Joiner(_)) => Origin::Synthesized { replaces: Some(op) },
                (true, _) => Origin::Synthesized { replaces: None },
            };
            let node = graph.add_node(
                GraphNode::new(&desc.name, desc.kind.clone(), origin).with_words(desc.words),
            );
            if ids.insert(desc.name.clone(), node).is_some() {
                log::error!("node {} is described twice", desc.name);
                return Err(Error::InvalidGraph(desc.name.clone()));
            }
            if let Some(tile) = desc.tile {
                layout.assign(node, tile)?;
            }
            if let Some(count) = desc.init_count {
                rates.set_count(Phase::Init, op, count);
            }
            if let Some(count) = desc.steady_count {
                rates.set_count(Phase::Steady, op, count);
            }
            if let Some(work) = desc.work {
                rates.set_work(node, work);
            }
        }

        let lookup = |name: &str| {
            ids.get(name).copied().ok_or_else(|| {
                log::error!("edge refers to unknown node {}", name);
                Error::InvalidGraph(name.to_string())
            })
        };
        for (src, dst) in &self.edges {
            graph.connect(lookup(src)?, lookup(dst)?);
        }
        if let Some(top) = &self.top {
            graph.set_top(lookup(top)?);
        }

        let router = XyRouter::for_layout(&layout);
        Ok(Program {
            graph,
            layout,
            router,
            rates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counts::RateScheduler;
    use crate::graph::{FilterRates, SplitType};
    use crate::mesh::Placement;

    const SPLIT: &str = "---
mesh:
  rows: 1
  columns: 3
nodes:
  - name: source
    kind: FileSource
    tile: {row: 0, column: 1}
    steady_count: 2
    work: 5
  - name: split
    kind:
      Splitter:
        kind: Duplicate
        weights: [1, 1]
    steady_count: 2
  - name: left
    kind:
      Filter: {peek: 1, pop: 1, push: 0}
    tile: {row: 0, column: 0}
    steady_count: 2
    words: 2
  - name: right
    kind: FileSink
    tile: {row: 0, column: 2}
    steady_count: 2
edges:
  - [source, split]
  - [split, left]
  - [split, right]
";

    #[test]
    fn read_description() {
        let description = ProgramDescription::from_str(SPLIT).unwrap();
        assert_eq!(description.nodes.len(), 4);
        let program = description.build().unwrap();
        let g = &program.graph;
        let split = g.node_by_name("split").unwrap();
        let left = g.node_by_name("left").unwrap();
        match g.kind(split) {
            NodeKind::Splitter(s) => assert_eq!(s.kind, SplitType::Duplicate),
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(g.kind(left), &NodeKind::Filter(FilterRates::new(1, 1, 0)));
        assert_eq!(g.node(left).words(), 2);
        assert!(!program.layout.is_assigned(split));
        assert_eq!(program.layout.tile(left), Some(Coordinate::new(0, 0)));
        assert_eq!(program.rates.execution_count(Phase::Steady, 2), Some(2));
        assert_eq!(program.rates.work_estimate(g.node_by_name("source").unwrap()), 5);
        assert_eq!(program.rates.work_estimate(left), 1);
        assert_eq!(g.top().unwrap(), g.node_by_name("source").unwrap());
    }

    #[test]
    fn unknown_edge() {
        let mut description = ProgramDescription::from_str(SPLIT).unwrap();
        description.edges.push(("left".to_string(), "nowhere".to_string()));
        assert_eq!(
            description.build().unwrap_err(),
            Error::InvalidGraph("nowhere".to_string())
        );
    }
}
