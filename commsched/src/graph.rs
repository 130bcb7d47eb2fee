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

//! The flattened stream graph.
//!
//! Nodes live in a petgraph arena and are referred to by their `NodeIndex`
//! everywhere else in the scheduler. Topology, rates and weights are fixed
//! once the graph is built; all mutable scheduling state is kept in the
//! simulation counters.

use itertools::Itertools;
use petgraph::prelude::*;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

use crate::error::Error;
use crate::mesh::Placement;

/// Identifier of an operator of the stream program before flattening.
pub type OperatorId = usize;

/// Static rates of a filter: items inspected, consumed and produced per
/// firing.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FilterRates {
    pub peek: usize,
    pub pop: usize,
    pub push: usize,
}

impl FilterRates {
    pub fn new(peek: usize, pop: usize, push: usize) -> Self {
        Self { peek, pop, push }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SplitType {
    Duplicate,
    RoundRobin,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Splitter {
    pub kind: SplitType,
    /// one weight per output arc, a duplicate splitter uses 1 per arc.
    pub weights: Vec<usize>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum JoinType {
    RoundRobin,
    Combine,
}

/// The back edge of a feedback loop enters its joiner on `loop_arc`, with
/// `delay` items enqueued before the loop starts.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FeedbackLoop {
    pub delay: usize,
    #[serde(default = "FeedbackLoop::default_loop_arc")]
    pub loop_arc: usize,
}

impl FeedbackLoop {
    fn default_loop_arc() -> usize {
        1
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Joiner {
    pub kind: JoinType,
    /// one weight per input arc, ordered by arc index.
    pub weights: Vec<usize>,
    /// sum of the weights of the joiner before flattening. Defaults to the
    /// sum of `weights`.
    #[serde(default)]
    pub original_weight_sum: Option<usize>,
    /// multiplier and divider applied to the renormalized count when an
    /// upstream transformation changed the joiner's effective rate.
    #[serde(default)]
    pub rate_scale: Option<(usize, usize)>,
    #[serde(default)]
    pub feedback: Option<FeedbackLoop>,
}

impl Joiner {
    pub fn round_robin(weights: &[usize]) -> Self {
        Self {
            kind: JoinType::RoundRobin,
            weights: weights.to_vec(),
            original_weight_sum: None,
            rate_scale: None,
            feedback: None,
        }
    }

    pub fn weight_sum(&self) -> usize {
        self.original_weight_sum
            .unwrap_or_else(|| self.weights.iter().sum())
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum NodeKind {
    Filter(FilterRates),
    TwoStageFilter {
        init: FilterRates,
        steady: FilterRates,
    },
    Identity,
    Splitter(Splitter),
    Joiner(Joiner),
    FileSource,
    FileSink,
}

impl NodeKind {
    /// Steady rates for the node kinds that behave like filters.
    pub fn rates(&self) -> Option<FilterRates> {
        match self {
            Self::Filter(rates) => Some(*rates),
            Self::TwoStageFilter { steady, .. } => Some(*steady),
            Self::Identity => Some(FilterRates::new(1, 1, 1)),
            Self::FileSource => Some(FilterRates::new(0, 0, 1)),
            Self::FileSink => Some(FilterRates::new(1, 1, 0)),
            Self::Splitter(_) | Self::Joiner(_) => None,
        }
    }

    pub fn is_joiner(&self) -> bool {
        matches!(self, Self::Joiner(_))
    }
}

/// Where a graph node comes from.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Origin {
    Operator(OperatorId),
    /// Created while flattening. A synthesized joiner refers to the joiner
    /// operator it replaces.
    Synthesized { replaces: Option<OperatorId> },
}

#[derive(Clone, Debug)]
pub struct GraphNode {
    name: String,
    kind: NodeKind,
    origin: Origin,
    words: usize,
}

impl GraphNode {
    pub fn new(name: &str, kind: NodeKind, origin: Origin) -> Self {
        Self {
            name: name.to_string(),
            kind,
            origin,
            words: 1,
        }
    }

    /// Set the number of network words of one output item.
    pub fn with_words(mut self, words: usize) -> Self {
        self.words = words;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }
    pub fn origin(&self) -> Origin {
        self.origin
    }
    pub fn words(&self) -> usize {
        self.words
    }
}

/// An arc of the stream graph, connecting output arc `src_port` of its
/// source to input arc `dst_port` of its target.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Channel {
    pub src_port: usize,
    pub dst_port: usize,
}

#[derive(Clone, Debug)]
pub struct StreamGraph {
    topo: Graph<GraphNode, Channel>,
    top: Option<NodeIndex>,
    synthesized: Vec<NodeIndex>,
}

impl Default for StreamGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamGraph {
    pub fn new() -> Self {
        Self {
            topo: Graph::new(),
            top: None,
            synthesized: vec![],
        }
    }

    /// Add a node. The first node added is the root of the graph unless
    /// `set_top` says otherwise.
    pub fn add_node(&mut self, node: GraphNode) -> NodeIndex {
        let is_synthesized = matches!(node.origin, Origin::Synthesized { .. });
        let id = self.topo.add_node(node);
        if self.top.is_none() {
            self.top = Some(id);
        }
        if is_synthesized {
            self.synthesized.push(id);
        }
        id
    }

    pub fn set_top(&mut self, top: NodeIndex) {
        self.top = Some(top);
    }

    /// Connect the next free output arc of `src` to the next free input arc
    /// of `dst`.
    pub fn connect(&mut self, src: NodeIndex, dst: NodeIndex) -> EdgeIndex {
        let src_port = self.topo.edges_directed(src, Outgoing).count();
        let dst_port = self.topo.edges_directed(dst, Incoming).count();
        self.topo.add_edge(src, dst, Channel { src_port, dst_port })
    }

    pub fn top(&self) -> Result<NodeIndex, Error> {
        self.top.ok_or_else(|| {
            log::error!("stream graph has no nodes");
            Error::InvalidGraph("empty graph".to_string())
        })
    }

    pub fn node(&self, node: NodeIndex) -> &GraphNode {
        &self.topo[node]
    }

    pub fn name(&self, node: NodeIndex) -> &str {
        self.topo[node].name()
    }

    pub fn kind(&self, node: NodeIndex) -> &NodeKind {
        self.topo[node].kind()
    }

    pub fn node_count(&self) -> usize {
        self.topo.node_count()
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> {
        self.topo.node_indices()
    }

    /// Nodes created during flattening, in creation order.
    pub fn synthesized(&self) -> &[NodeIndex] {
        &self.synthesized
    }

    /// Returns the first node index matching name.
    pub fn node_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.topo
            .node_indices()
            .find(|n| self.topo[*n].name() == name)
    }

    /// The node consuming from output arcs of `node`, ordered by arc.
    pub fn successors(&self, node: NodeIndex) -> Vec<(usize, NodeIndex, usize)> {
        self.topo
            .edges_directed(node, Outgoing)
            .map(|e| (e.weight().src_port, e.target(), e.weight().dst_port))
            .sorted()
            .collect()
    }

    /// The nodes feeding input arcs of `node`, ordered by arc.
    pub fn predecessors(&self, node: NodeIndex) -> Vec<(usize, NodeIndex)> {
        self.topo
            .edges_directed(node, Incoming)
            .map(|e| (e.weight().dst_port, e.source()))
            .sorted()
            .collect()
    }

    /// The node on input arc `arc` of `node`.
    pub fn predecessor(&self, node: NodeIndex, arc: usize) -> Option<NodeIndex> {
        self.topo
            .edges_directed(node, Incoming)
            .find(|e| e.weight().dst_port == arc)
            .map(|e| e.source())
    }

    pub fn out_degree(&self, node: NodeIndex) -> usize {
        self.topo.edges_directed(node, Outgoing).count()
    }

    pub fn in_degree(&self, node: NodeIndex) -> usize {
        self.topo.edges_directed(node, Incoming).count()
    }

    /// Breadth-first order of the nodes reachable from the root.
    pub fn breadth_first(&self) -> Vec<NodeIndex> {
        let mut order = vec![];
        if let Some(top) = self.top {
            // petgraph's Bfs visits neighbors in reverse insertion order, so we
            // drive the queue ourselves to keep the arc order.
            let mut seen = HashSet::new();
            let mut queue = VecDeque::new();
            seen.insert(top);
            queue.push_back(top);
            while let Some(node) = queue.pop_front() {
                order.push(node);
                for (_, next, _) in self.successors(node) {
                    if seen.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }
        order
    }

    /// The tile-assigned nodes that directly consume the output of `node`,
    /// walking through nodes without a tile.
    pub fn assigned_successors(&self, node: NodeIndex, placement: &dyn Placement) -> Vec<NodeIndex> {
        fn walk(
            graph: &StreamGraph,
            node: NodeIndex,
            placement: &dyn Placement,
            visited: &mut HashSet<NodeIndex>,
            result: &mut Vec<NodeIndex>,
        ) {
            for (_, next, _) in graph.successors(node) {
                if placement.is_assigned(next) {
                    if !result.contains(&next) {
                        result.push(next);
                    }
                } else if visited.insert(next) {
                    walk(graph, next, placement, visited, result);
                }
            }
        }
        let mut visited = HashSet::new();
        let mut result = vec![];
        walk(self, node, placement, &mut visited, &mut result);
        result
    }

    pub fn to_graphviz(&self) -> String {
        use petgraph::dot::{Config, Dot};

        let generator = Dot::with_attr_getters(
            &self.topo,
            &[Config::NodeNoLabel, Config::EdgeNoLabel],
            &|_, edge| {
                format!(
                    "headlabel=\"{}\"; taillabel=\"{}\"",
                    edge.weight().dst_port,
                    edge.weight().src_port
                )
            },
            &|_, node| {
                let shape = match node.1.kind() {
                    NodeKind::Splitter(_) | NodeKind::Joiner(_) => "diamond",
                    _ => "box",
                };
                format!(
                    "label=\"{}\n(id: {})\"; shape={}",
                    node.1.name(),
                    node.0.index(),
                    shape
                )
            },
        );
        format!("{:?}", generator)
    }
}

impl fmt::Display for StreamGraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_graphviz())
    }
}
