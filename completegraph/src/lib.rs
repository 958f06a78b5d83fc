//! Shortest path costs over a sparse skeleton graph, computed per query.
//!
//! The skeleton is built once and reused. Searches never clear per-vertex
//! state: a [`SearchSpace`] stamps each vertex with the id of the search
//! that touched it, and only bumps the stamp between searches.
//!
//! Edge weights can be overridden temporarily by an [`Overlay`]. Every
//! replaced weight is recorded in an [`EdgeWeightJournal`] and
//! [`CompleteGraph::reset`] restores them in reverse order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::mem;

use log::{debug, trace};
use priority_queue::PriorityQueue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Distance = u64;
pub type EdgeWeight = u32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("vertex {vertex} out of range for {vertex_count} vertices")]
    VertexOutOfRange { vertex: usize, vertex_count: usize },
    #[error("edge from vertex {0} to itself")]
    SelfLoop(usize),
    #[error("edge ({0}, {1}) given twice")]
    DuplicateEdge(usize, usize),
    #[error("no edge ({0}, {1}) in the skeleton")]
    UnknownEdge(usize, usize),
    #[error("overlay loaded while {0} journal entries are outstanding")]
    JournalNotEmpty(usize),
}

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonEdge {
    pub a: usize,
    pub b: usize,
    pub weight: EdgeWeight,
    pub original: EdgeWeight,
}

/// Shortest-path tree entry for one reached vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reach {
    pub predecessor: Option<usize>,
    pub distance: Distance,
}

/// One vertex of a path, with the distance gained by stepping onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub vertex: usize,
    pub weight: Distance,
}

/// A batch of temporary weight overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Overlay {
    /// Edges whose weight drops to zero.
    pub erasures: Vec<(usize, usize)>,
    /// Edges with a replacement weight.
    pub dynamic_weights: Vec<(usize, usize, EdgeWeight)>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.erasures.is_empty() && self.dynamic_weights.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JournalEntry {
    edge: usize,
    weight: EdgeWeight,
}

/// Stack of replaced edge weights.
#[derive(Debug, Clone, Default)]
pub struct EdgeWeightJournal {
    entries: Vec<JournalEntry>,
}

impl EdgeWeightJournal {
    fn push(&mut self, edge: usize, weight: EdgeWeight) {
        self.entries.push(JournalEntry { edge, weight });
    }

    fn pop(&mut self) -> Option<JournalEntry> {
        self.entries.pop()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct Vertex {
    /// (peer, edge index)
    adjacency: Vec<(usize, usize)>,
}

/// Scratch state for one Dijkstra caller.
#[derive(Debug, Clone, Default)]
pub struct SearchSpace {
    stamp: u32,
    /// Stamp of the last search that reached the vertex.
    reached: Vec<u32>,
    /// Stamp of the last search that settled the vertex.
    settled: Vec<u32>,
    distance: Vec<Distance>,
    predecessor: Vec<Option<usize>>,
    queue: PriorityQueue<usize, Reverse<(Distance, usize)>>,
}

impl SearchSpace {
    pub fn new(vertex_count: usize) -> Self {
        let mut space = SearchSpace::default();
        space.fit(vertex_count);
        space
    }

    fn fit(&mut self, vertex_count: usize) {
        if self.reached.len() < vertex_count {
            self.reached.resize(vertex_count, 0);
            self.settled.resize(vertex_count, 0);
            self.distance.resize(vertex_count, 0);
            self.predecessor.resize(vertex_count, None);
        }
    }

    fn begin(&mut self) {
        if self.stamp == u32::MAX {
            debug!("search stamp wrapped, clearing {} vertices", self.reached.len());
            for s in self.reached.iter_mut().chain(self.settled.iter_mut()) {
                *s = 0;
            }
            self.stamp = 0;
        }
        self.stamp += 1;
        self.queue.clear();
    }

    fn is_reached(&self, v: usize) -> bool {
        self.reached[v] == self.stamp
    }

    fn is_settled(&self, v: usize) -> bool {
        self.settled[v] == self.stamp
    }

    fn reach(&mut self, v: usize, distance: Distance, predecessor: Option<usize>) {
        self.reached[v] = self.stamp;
        self.distance[v] = distance;
        self.predecessor[v] = predecessor;
        self.queue.push(v, Reverse((distance, v)));
    }

    fn settled_tree(&self) -> BTreeMap<usize, Reach> {
        (0..self.settled.len())
            .filter(|&v| self.is_settled(v))
            .map(|v| {
                let reach = Reach {
                    predecessor: self.predecessor[v],
                    distance: self.distance[v],
                };
                (v, reach)
            })
            .collect()
    }
}

fn index_gap(a: usize, b: usize) -> usize {
    if a > b {
        a - b
    } else {
        b - a
    }
}

#[derive(Debug, Clone)]
pub struct CompleteGraph {
    vertices: Vec<Vertex>,
    edges: Vec<SkeletonEdge>,
    edge_index: HashMap<(usize, usize), usize>,
    journal: EdgeWeightJournal,
    space: SearchSpace,
}

impl CompleteGraph {
    pub fn new<I>(vertex_count: usize, edges: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, usize, EdgeWeight)>,
    {
        let mut graph = CompleteGraph {
            vertices: vec![Vertex::default(); vertex_count],
            edges: Vec::new(),
            edge_index: HashMap::new(),
            journal: EdgeWeightJournal::default(),
            space: SearchSpace::new(vertex_count),
        };
        for (a, b, weight) in edges {
            graph.check_vertex(a)?;
            graph.check_vertex(b)?;
            if a == b {
                return Err(GraphError::SelfLoop(a));
            }
            let key = (a.min(b), a.max(b));
            if graph.edge_index.contains_key(&key) {
                return Err(GraphError::DuplicateEdge(a, b));
            }
            let e = graph.edges.len();
            graph.edges.push(SkeletonEdge {
                a,
                b,
                weight,
                original: weight,
            });
            graph.edge_index.insert(key, e);
            graph.vertices[a].adjacency.push((b, e));
            graph.vertices[b].adjacency.push((a, e));
        }
        Ok(graph)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edges(&self) -> &[SkeletonEdge] {
        &self.edges
    }

    /// Current weight of edge (a, b).
    pub fn weight(&self, a: usize, b: usize) -> Option<EdgeWeight> {
        self.find_edge(a, b).map(|e| self.edges[e].weight)
    }

    pub fn journal(&self) -> &EdgeWeightJournal {
        &self.journal
    }

    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    pub fn check_vertex(&self, vertex: usize) -> Result<()> {
        if vertex < self.vertices.len() {
            Ok(())
        } else {
            Err(GraphError::VertexOutOfRange {
                vertex,
                vertex_count: self.vertices.len(),
            })
        }
    }

    fn find_edge(&self, a: usize, b: usize) -> Option<usize> {
        self.edge_index.get(&(a.min(b), a.max(b))).copied()
    }

    /// Shortest distance and predecessor for every vertex reachable from
    /// `source`.
    pub fn all_edges(&mut self, source: usize) -> Result<BTreeMap<usize, Reach>> {
        self.with_space(|graph, space| graph.all_edges_in(space, source))
    }

    /// Like [`all_edges`](Self::all_edges) but stops once `target` is
    /// settled; only settled vertices are returned.
    pub fn all_edges_with_terminate(
        &mut self,
        source: usize,
        target: usize,
    ) -> Result<BTreeMap<usize, Reach>> {
        self.check_vertex(target)?;
        self.with_space(|graph, space| {
            graph.search(space, source, |v| v == target)?;
            Ok(space.settled_tree())
        })
    }

    /// Searches with caller-owned scratch state, so that several sources
    /// can be explored concurrently over a shared graph.
    pub fn all_edges_in(
        &self,
        space: &mut SearchSpace,
        source: usize,
    ) -> Result<BTreeMap<usize, Reach>> {
        self.search(space, source, |_| false)?;
        Ok(space.settled_tree())
    }

    /// Shortest path from `a` to `b`, starting with `a` itself at weight 0.
    pub fn get_path(&mut self, a: usize, b: usize) -> Result<Option<Vec<PathStep>>> {
        let tree = self.all_edges_with_terminate(a, b)?;
        if !tree.contains_key(&b) {
            return Ok(None);
        }
        let mut steps = Vec::new();
        let mut v = b;
        while let Some(reach) = tree.get(&v) {
            let weight = match reach.predecessor {
                Some(p) => reach.distance - tree[&p].distance,
                None => 0,
            };
            steps.push(PathStep { vertex: v, weight });
            match reach.predecessor {
                Some(p) => v = p,
                None => break,
            }
        }
        steps.reverse();
        Ok(Some(steps))
    }

    /// Closest reachable vertex among `candidates`; equal distances go to
    /// the smaller vertex index.
    pub fn nearest(
        &mut self,
        source: usize,
        candidates: &[usize],
    ) -> Result<Option<(usize, Distance)>> {
        self.with_space(|graph, space| graph.nearest_in(space, source, candidates))
    }

    pub fn nearest_in(
        &self,
        space: &mut SearchSpace,
        source: usize,
        candidates: &[usize],
    ) -> Result<Option<(usize, Distance)>> {
        for &c in candidates {
            self.check_vertex(c)?;
        }
        let found = self.search(space, source, |v| candidates.contains(&v))?;
        Ok(found.map(|v| (v, space.distance[v])))
    }

    fn with_space<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Self, &mut SearchSpace) -> Result<T>,
    {
        let mut space = mem::take(&mut self.space);
        let result = f(self, &mut space);
        self.space = space;
        result
    }

    /// Dijkstra from `source`. Settles vertices in (distance, index) order
    /// and returns the first settled vertex for which `stop` holds.
    fn search<F>(&self, space: &mut SearchSpace, source: usize, stop: F) -> Result<Option<usize>>
    where
        F: Fn(usize) -> bool,
    {
        self.check_vertex(source)?;
        space.fit(self.vertices.len());
        space.begin();
        space.reach(source, 0, None);

        while let Some((u, Reverse((d, _)))) = space.queue.pop() {
            space.settled[u] = space.stamp;
            if stop(u) {
                trace!("search from {} stopped at {}", source, u);
                return Ok(Some(u));
            }
            for &(w, e) in &self.vertices[u].adjacency {
                if space.is_settled(w) {
                    continue;
                }
                let nd = d + Distance::from(self.edges[e].weight);
                if !space.is_reached(w) {
                    space.reach(w, nd, Some(u));
                    continue;
                }
                let better = match space.predecessor[w] {
                    _ if nd < space.distance[w] => true,
                    Some(p) if nd == space.distance[w] => {
                        (index_gap(w, u), u) < (index_gap(w, p), p)
                    }
                    _ => false,
                };
                if better {
                    space.reach(w, nd, Some(u));
                }
            }
        }
        Ok(None)
    }

    pub fn load_erasures(&mut self, erasures: &[(usize, usize)]) -> Result<()> {
        self.load_overlay(&Overlay {
            erasures: erasures.to_vec(),
            dynamic_weights: Vec::new(),
        })
    }

    pub fn load_dynamic_weights(&mut self, weights: &[(usize, usize, EdgeWeight)]) -> Result<()> {
        self.load_overlay(&Overlay {
            erasures: Vec::new(),
            dynamic_weights: weights.to_vec(),
        })
    }

    /// Resolves every edge of `overlay` to (edge index, new weight), in the
    /// order they would be applied, without changing anything.
    pub fn check_overlay(&self, overlay: &Overlay) -> Result<Vec<(usize, EdgeWeight)>> {
        let find = |a: usize, b: usize| -> Result<usize> {
            self.check_vertex(a)?;
            self.check_vertex(b)?;
            self.find_edge(a, b).ok_or(GraphError::UnknownEdge(a, b))
        };
        let mut changes = Vec::new();
        for &(a, b, weight) in &overlay.dynamic_weights {
            changes.push((find(a, b)?, weight));
        }
        for &(a, b) in &overlay.erasures {
            changes.push((find(a, b)?, 0));
        }
        Ok(changes)
    }

    /// Applies dynamic weights, then erasures. The whole batch is checked
    /// before any weight changes.
    pub fn load_overlay(&mut self, overlay: &Overlay) -> Result<()> {
        if !self.journal.is_empty() {
            return Err(GraphError::JournalNotEmpty(self.journal.len()));
        }
        for (e, weight) in self.check_overlay(overlay)? {
            self.journal.push(e, self.edges[e].weight);
            self.edges[e].weight = weight;
        }
        debug!(
            "overlay loaded: {} erasures, {} dynamic weights",
            overlay.erasures.len(),
            overlay.dynamic_weights.len()
        );
        Ok(())
    }

    /// Restores every weight changed since the last reset.
    pub fn reset(&mut self) {
        if self.journal.is_empty() {
            return;
        }
        let count = self.journal.len();
        while let Some(entry) = self.journal.pop() {
            self.edges[entry.edge].weight = entry.weight;
        }
        debug!("overlay reset: {} weights restored", count);
    }
}
