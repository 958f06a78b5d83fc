/* ************************************************************************* *
 *                                                                           *
 *        Copyright (c) 2019 Jilles Tjoelker <jilles@stack.nl>               *
 *                                                                           *
 *    Permission is hereby granted, free of charge, to any person obtaining  *
 *  a copy of this software and associated documentation files (the          *
 *  "Software"), to deal in the Software without restriction, including      *
 *  without limitation the rights to use, copy, modify, merge, publish,      *
 *  distribute, sublicense, and/or sell copies of the Software, and to       *
 *  permit persons to whom the Software is furnished to do so, subject to    *
 *  the following conditions:                                                *
 *                                                                           *
 *    The above copyright notice and this permission notice shall be         *
 *  included in all copies or substantial portions of the Software.          *
 *                                                                           *
 *    THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,        *
 *  EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF       *
 *  MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT.   *
 *  IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY     *
 *  CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT,     *
 *  TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE        *
 *  SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.                   *
 *                                                                           *
 * ************************************************************************* */

//! Minimum cost perfect matching in general graphs.
//!
//! This is the primal-dual blossom method due to Jack Edmonds, in the
//! formulation of Zvi Galil ("Efficient Algorithms for Finding Maximum
//! Matching in Graphs", ACM Computing Surveys, 1986), with the bookkeeping
//! ideas of H.N. Gabow's 1973 dissertation and Joris van Rantwijk's
//! implementation of it.
//!
//! Every stage grows alternating trees from all unmatched vertices at once.
//! Outer ("S") blossoms sit at even depth, inner ("T") blossoms at odd depth.
//! A tight edge between two outer blossoms either closes an odd cycle inside
//! one tree (contract a blossom) or joins two trees (augment and end the
//! stage). When no tight edge is left to follow, all trees relax their dual
//! variables by the same amount; the amount is the minimum of three edge
//! classes, each kept in an indexed priority queue.
//!
//! Dual variables are kept as exact fixed-point values with one fractional
//! bit (half units), so every quantity stays an integer. After a successful
//! solve the matching cost equals the dual objective.
//!
//! ```
//! use weightedmatch::MatchingEngine;
//!
//! let mut engine = MatchingEngine::new(4, 4);
//! engine.add_edge(0, 1, 100).unwrap();
//! engine.add_edge(2, 3, 110).unwrap();
//! engine.add_edge(0, 2, 500).unwrap();
//! engine.add_edge(1, 3, 300).unwrap();
//! engine.solve().unwrap();
//! assert_eq!(engine.get_match(0), Some(1));
//! assert_eq!(engine.compute_perfect_matching_cost(), 210);
//! ```

use std::cmp::Reverse;
use std::convert::TryFrom;
use std::mem;

use log::{debug, trace};
use priority_queue::PriorityQueue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/** The value that indicates that a minimum cost perfect match is sought. */
pub const MINIMIZE: bool = true;
/** The value that indicates that a maximum cost perfect match is sought. */
pub const MAXIMIZE: bool = false;

pub type Weight = i32;

/// Duals, slacks and queue keys, in half units.
type Dual = i64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("edge from vertex {0} to itself")]
    SelfLoop(usize),
    #[error("vertex {vertex} out of range for {vertex_count} vertices")]
    VertexOutOfRange { vertex: usize, vertex_count: usize },
    #[error("more than {0} edges")]
    TooManyEdges(usize),
    #[error("edge weight {weight} outside of +/-{bound}")]
    WeightOutOfRange { weight: i64, bound: i64 },
    #[error("edges cannot be added after solving")]
    Frozen,
    #[error("{0} vertices cannot be perfectly matched")]
    OddVertexCount(usize),
    #[error("no edge becomes tight with {unmatched} vertices unmatched")]
    Stalled { unmatched: usize },
    #[error("internal inconsistency: {0}")]
    Inconsistency(&'static str),
}

impl MatchError {
    /// Errors the caller can fix by passing different input.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            MatchError::SelfLoop(_)
                | MatchError::VertexOutOfRange { .. }
                | MatchError::TooManyEdges(_)
                | MatchError::WeightOutOfRange { .. }
                | MatchError::Frozen
        )
    }
}

pub type Result<T> = std::result::Result<T, MatchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Check complementary slackness and the dual objective after solving.
    pub verify_optimum: bool,
    /// Recompute every dual update by brute force and compare.
    pub check_delta: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            verify_optimum: true,
            check_delta: false,
        }
    }
}

/// Position of a (sub-)blossom in the alternating forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Free,
    /// Even distance from a tree root.
    Outer,
    /// Odd distance from a tree root.
    Inner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingEdge {
    pub u: usize,
    pub v: usize,
    pub cost: Weight,
}

// Slots 0..n are vertices, n..2n are blossoms. For a vertex inside an inner
// blossom, `label == Inner` means it is reachable from an outer vertex
// outside the blossom; the slot of the top-level blossom carries the real
// label.
#[derive(Debug, Clone)]
struct Node {
    label: Label,
    /// Remote endpoint of the edge through which the label was obtained.
    label_end: Option<usize>,
    parent: Option<usize>,
    /// Base vertex; `None` marks an unused blossom slot.
    base: Option<usize>,
    dual: Dual,
    /// Least-slack edge to an outer vertex (free vertex) or to another
    /// outer blossom (outer blossom).
    best_edge: Option<usize>,
    /// Root vertex of the alternating tree holding this blossom.
    tree: Option<usize>,
}

impl Node {
    fn new(base: Option<usize>) -> Self {
        Node {
            label: Label::Free,
            label_end: None,
            parent: None,
            base,
            dual: 0,
            best_edge: None,
            tree: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Blossom {
    /// Sub-blossoms in cycle order, starting with the one holding the base.
    childs: Vec<usize>,
    /// `endps[i]` is the endpoint of `childs[i]` on the edge to `childs[i + 1]`.
    endps: Vec<usize>,
    /// Least-slack edges to neighbouring outer blossoms.
    best_edges: Option<Vec<usize>>,
}

type SlackQueue = PriorityQueue<usize, Reverse<(Dual, usize)>>;

#[derive(Debug, Clone, Copy)]
enum Step {
    /// Outer vertex to free vertex.
    Grow(usize),
    /// Outer blossom to outer blossom.
    Bridge(usize),
    /// Inner blossom dual reaches zero.
    Expand(usize),
}

#[derive(Debug)]
pub struct MatchingEngine {
    vertex_count: usize,
    max_edge_count: usize,
    config: SolverConfig,
    edges: Vec<MatchingEdge>,
    solved: bool,

    /// Remote endpoints of the edges at each vertex. Endpoint `2k` is
    /// `edges[k].u`, endpoint `2k + 1` is `edges[k].v`.
    neighbours: Vec<Vec<usize>>,
    /// Remote endpoint of the matched edge.
    mate: Vec<Option<usize>>,
    /// Top-level blossom containing each vertex.
    in_blossom: Vec<usize>,
    nodes: Vec<Node>,
    blossoms: Vec<Blossom>,
    unused: Vec<usize>,
    allowed: Vec<bool>,
    /// Outer vertices waiting to be scanned.
    queue: Vec<usize>,
    crumbs: Vec<bool>,

    /// Free vertices keyed by the slack of their best edge.
    free_queue: SlackQueue,
    /// Outer blossoms keyed by the slack of their best edge.
    outer_queue: SlackQueue,
    /// Non-trivial inner blossoms keyed by their dual.
    inner_queue: SlackQueue,
    /// Total dual adjustment in the current stage; queue keys are stored
    /// relative to it.
    delta_sum: Dual,
}

impl MatchingEngine {
    pub fn new(vertex_count: usize, max_edge_count: usize) -> Self {
        Self::with_config(vertex_count, max_edge_count, SolverConfig::default())
    }

    pub fn with_config(vertex_count: usize, max_edge_count: usize, config: SolverConfig) -> Self {
        MatchingEngine {
            vertex_count,
            max_edge_count,
            config,
            edges: Vec::with_capacity(max_edge_count),
            solved: false,
            neighbours: vec![Vec::new(); vertex_count],
            mate: Vec::new(),
            in_blossom: Vec::new(),
            nodes: Vec::new(),
            blossoms: Vec::new(),
            unused: Vec::new(),
            allowed: Vec::new(),
            queue: Vec::new(),
            crumbs: Vec::new(),
            free_queue: PriorityQueue::new(),
            outer_queue: PriorityQueue::new(),
            inner_queue: PriorityQueue::new(),
            delta_sum: 0,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge(&self, edge: usize) -> Option<MatchingEdge> {
        self.edges.get(edge).copied()
    }

    /// Largest absolute edge cost for which dual sums cannot overflow.
    pub fn weight_bound(&self) -> i64 {
        i64::from(Weight::MAX) / self.vertex_count.max(1) as i64
    }

    /// Registers an undirected edge and returns its id.
    pub fn add_edge(&mut self, u: usize, v: usize, cost: Weight) -> Result<usize> {
        if self.solved {
            return Err(MatchError::Frozen);
        }
        for &vertex in &[u, v] {
            if vertex >= self.vertex_count {
                return Err(MatchError::VertexOutOfRange {
                    vertex,
                    vertex_count: self.vertex_count,
                });
            }
        }
        if u == v {
            return Err(MatchError::SelfLoop(u));
        }
        if self.edges.len() >= self.max_edge_count {
            return Err(MatchError::TooManyEdges(self.max_edge_count));
        }
        let bound = self.weight_bound();
        if i64::from(cost).abs() > bound {
            return Err(MatchError::WeightOutOfRange {
                weight: i64::from(cost),
                bound,
            });
        }
        let k = self.edges.len();
        self.edges.push(MatchingEdge { u, v, cost });
        self.neighbours[u].push(2 * k + 1);
        self.neighbours[v].push(2 * k);
        Ok(k)
    }

    /// Partner of vertex `i`, once solved.
    pub fn get_match(&self, i: usize) -> Option<usize> {
        if !self.solved {
            return None;
        }
        self.mate.get(i).copied().flatten().map(|p| self.endpoint(p))
    }

    /// Whether edge `edge` is the one realizing its endpoints' match.
    pub fn get_solution(&self, edge: usize) -> bool {
        match self.edges.get(edge) {
            Some(e) if self.solved => self.mate[e.u] == Some(2 * edge + 1),
            _ => false,
        }
    }

    pub fn compute_perfect_matching_cost(&self) -> i64 {
        (0..self.edges.len())
            .filter(|&k| self.get_solution(k))
            .map(|k| i64::from(self.edges[k].cost))
            .sum()
    }

    /// Value of the dual program: vertex duals plus blossom duals, with the
    /// blossom terms of the cut formulation folded out of the vertex duals.
    pub fn dual_objective(&self) -> i64 {
        self.dual_sum() / 2
    }

    fn dual_sum(&self) -> Dual {
        let n = self.vertex_count;
        let vertices: Dual = self.nodes.iter().take(n).map(|node| node.dual).sum();
        let blossoms: Dual = (n..self.nodes.len())
            .filter(|&b| self.nodes[b].base.is_some())
            .map(|b| self.nodes[b].dual * (self.leaves(b).len() as Dual - 1))
            .sum();
        vertices - blossoms
    }

    pub fn solve(&mut self) -> Result<()> {
        if self.solved {
            return Ok(());
        }
        let n = self.vertex_count;
        if n % 2 != 0 {
            return Err(MatchError::OddVertexCount(n));
        }
        self.initialize();

        let mut stage = 0;
        while self.mate.iter().any(Option::is_none) {
            stage += 1;
            self.run_stage(stage)?;
        }
        self.solved = true;

        let cost = self.compute_perfect_matching_cost();
        debug!(
            "solved {} vertices, {} edges in {} stages, cost {}",
            n,
            self.edges.len(),
            stage,
            cost
        );
        if self.config.verify_optimum {
            self.verify_optimum()?;
        }
        Ok(())
    }

    fn initialize(&mut self) {
        let n = self.vertex_count;
        let min_cost = self.edges.iter().map(|e| Dual::from(e.cost)).min().unwrap_or(0);
        self.mate = vec![None; n];
        self.in_blossom = (0..n).collect();
        self.nodes = (0..2 * n)
            .map(|i| Node::new(if i < n { Some(i) } else { None }))
            .collect();
        for node in self.nodes.iter_mut().take(n) {
            node.dual = min_cost;
        }
        self.blossoms = vec![Blossom::default(); n];
        self.unused = (n..2 * n).rev().collect();
        self.allowed = vec![false; self.edges.len()];
        self.crumbs = vec![false; 2 * n];
    }

    fn run_stage(&mut self, stage: usize) -> Result<()> {
        let n = self.vertex_count;
        for node in self.nodes.iter_mut() {
            node.label = Label::Free;
            node.best_edge = None;
            node.tree = None;
        }
        for blossom in self.blossoms.iter_mut() {
            blossom.best_edges = None;
        }
        for allowed in self.allowed.iter_mut() {
            *allowed = false;
        }
        self.queue.clear();
        self.free_queue.clear();
        self.outer_queue.clear();
        self.inner_queue.clear();
        self.delta_sum = 0;

        // One tree per unmatched vertex.
        for v in 0..n {
            if self.mate[v].is_none() && self.nodes[self.in_blossom[v]].label == Label::Free {
                self.assign_label(v, Label::Outer, None)?;
            }
        }
        trace!("stage {}: {} outer vertices", stage, self.queue.len());

        loop {
            if self.grow()? {
                break;
            }
            let (delta, step) = self.next_delta()?;
            self.adjust_duals(delta);
            match step {
                Step::Grow(k) => {
                    self.allowed[k] = true;
                    let MatchingEdge { u, v, .. } = self.edges[k];
                    let outer = if self.nodes[self.in_blossom[u]].label == Label::Free {
                        v
                    } else {
                        u
                    };
                    self.queue.push(outer);
                }
                Step::Bridge(k) => {
                    self.allowed[k] = true;
                    self.queue.push(self.edges[k].u);
                }
                Step::Expand(b) => self.expand_blossom(b, false)?,
            }
        }

        // Blossoms with zero dual no longer constrain anything.
        for b in n..2 * n {
            let node = &self.nodes[b];
            if node.parent.is_none()
                && node.base.is_some()
                && node.label == Label::Outer
                && node.dual == 0
            {
                self.expand_blossom(b, true)?;
            }
        }
        Ok(())
    }

    /// Scans outer vertices along tight edges. Returns true after an
    /// augmentation.
    fn grow(&mut self) -> Result<bool> {
        while let Some(v) = self.queue.pop() {
            debug_assert_eq!(self.nodes[self.in_blossom[v]].label, Label::Outer);
            for i in 0..self.neighbours[v].len() {
                let p = self.neighbours[v][i];
                let k = p / 2;
                let w = self.endpoint(p);
                let bv = self.in_blossom[v];
                let bw = self.in_blossom[w];
                if bv == bw {
                    continue;
                }
                let mut kslack = 0;
                if !self.allowed[k] {
                    kslack = self.slack(k);
                    if kslack <= 0 {
                        self.allowed[k] = true;
                    }
                }
                if self.allowed[k] {
                    let far = self.nodes[bw].label;
                    match far {
                        Label::Free => self.assign_label(w, Label::Inner, Some(p ^ 1))?,
                        Label::Outer => {
                            if self.nodes[bv].tree != self.nodes[bw].tree {
                                self.augment_matching(k)?;
                                return Ok(true);
                            }
                            let base = self
                                .scan_blossom(v, w)
                                .ok_or(MatchError::Inconsistency("odd cycle without a base"))?;
                            self.add_blossom(base, k)?;
                        }
                        Label::Inner => {
                            // Remember that w is reachable from outside its
                            // blossom, for relabeling on expansion.
                            if self.nodes[w].label == Label::Free {
                                self.nodes[w].label = Label::Inner;
                                self.nodes[w].label_end = Some(p ^ 1);
                            }
                        }
                    }
                } else if self.nodes[bw].label == Label::Outer {
                    if self.nodes[bv]
                        .best_edge
                        .map_or(true, |best| kslack < self.slack(best))
                    {
                        self.nodes[bv].best_edge = Some(k);
                        let key = kslack + 2 * self.delta_sum;
                        self.outer_queue.push(bv, Reverse((key, bv)));
                    }
                } else if self.nodes[w].label == Label::Free
                    && self.nodes[w]
                        .best_edge
                        .map_or(true, |best| kslack < self.slack(best))
                {
                    self.nodes[w].best_edge = Some(k);
                    if self.nodes[bw].label == Label::Free {
                        let key = kslack + self.delta_sum;
                        self.free_queue.push(w, Reverse((key, w)));
                    }
                }
            }
        }
        Ok(false)
    }

    fn next_delta(&self) -> Result<(Dual, Step)> {
        let mut best: Option<(Dual, Step)> = None;
        if let Some((&v, &Reverse((key, _)))) = self.free_queue.peek() {
            let k = self.nodes[v]
                .best_edge
                .ok_or(MatchError::Inconsistency("queued free vertex without edge"))?;
            best = Some((key - self.delta_sum, Step::Grow(k)));
        }
        if let Some((&b, &Reverse((key, _)))) = self.outer_queue.peek() {
            let k = self.nodes[b]
                .best_edge
                .ok_or(MatchError::Inconsistency("queued outer blossom without edge"))?;
            let slack = key - 2 * self.delta_sum;
            debug_assert_eq!(slack % 2, 0);
            let delta = slack / 2;
            if best.map_or(true, |(d, _)| delta < d) {
                best = Some((delta, Step::Bridge(k)));
            }
        }
        if let Some((&b, &Reverse((key, _)))) = self.inner_queue.peek() {
            let delta = key - self.delta_sum;
            if best.map_or(true, |(d, _)| delta < d) {
                best = Some((delta, Step::Expand(b)));
            }
        }

        if self.config.check_delta && self.brute_force_delta() != best.map(|(d, _)| d) {
            return Err(MatchError::Inconsistency("dual update disagrees with full scan"));
        }
        best.ok_or_else(|| MatchError::Stalled {
            unmatched: self.mate.iter().filter(|m| m.is_none()).count(),
        })
    }

    fn brute_force_delta(&self) -> Option<Dual> {
        let n = self.vertex_count;
        let mut best: Option<Dual> = None;
        for (k, e) in self.edges.iter().enumerate() {
            let bu = self.in_blossom[e.u];
            let bv = self.in_blossom[e.v];
            if bu == bv {
                continue;
            }
            let slack = self.slack(k);
            let delta = match (self.nodes[bu].label, self.nodes[bv].label) {
                (Label::Outer, Label::Outer) => slack / 2,
                (Label::Outer, Label::Free) | (Label::Free, Label::Outer) => slack,
                _ => continue,
            };
            best = Some(best.map_or(delta, |d| d.min(delta)));
        }
        for node in &self.nodes[n..] {
            if node.base.is_some() && node.parent.is_none() && node.label == Label::Inner {
                best = Some(best.map_or(node.dual, |d| d.min(node.dual)));
            }
        }
        best
    }

    fn adjust_duals(&mut self, delta: Dual) {
        trace!("dual update {}", delta);
        let n = self.vertex_count;
        for v in 0..n {
            let label = self.nodes[self.in_blossom[v]].label;
            match label {
                Label::Outer => self.nodes[v].dual += delta,
                Label::Inner => self.nodes[v].dual -= delta,
                Label::Free => {}
            }
        }
        for node in self.nodes[n..].iter_mut() {
            if node.base.is_some() && node.parent.is_none() {
                match node.label {
                    Label::Outer => node.dual += delta,
                    Label::Inner => node.dual -= delta,
                    Label::Free => {}
                }
            }
        }
        self.delta_sum += delta;
    }

    fn endpoint(&self, p: usize) -> usize {
        let e = &self.edges[p / 2];
        if p % 2 == 0 {
            e.u
        } else {
            e.v
        }
    }

    /// Twice the slack of edge k; not meaningful inside a blossom.
    fn slack(&self, k: usize) -> Dual {
        let e = &self.edges[k];
        2 * Dual::from(e.cost) - self.nodes[e.u].dual - self.nodes[e.v].dual
    }

    fn leaves(&self, b: usize) -> Vec<usize> {
        let mut leaves = Vec::new();
        let mut stack = vec![b];
        while let Some(t) = stack.pop() {
            if t < self.vertex_count {
                leaves.push(t);
            } else {
                stack.extend(self.blossoms[t - self.vertex_count].childs.iter().rev());
            }
        }
        leaves
    }

    /// Labels the top-level blossom containing `w`, reached through the edge
    /// with remote endpoint `p`. An inner blossom passes an outer label on
    /// to its mate.
    fn assign_label(&mut self, w: usize, label: Label, p: Option<usize>) -> Result<()> {
        let b = self.in_blossom[w];
        debug_assert!(self.nodes[w].label == Label::Free && self.nodes[b].label == Label::Free);
        let tree = match p {
            None => Some(w),
            Some(p) => self.nodes[self.in_blossom[self.endpoint(p)]].tree,
        };
        for &x in &[w, b] {
            let node = &mut self.nodes[x];
            node.label = label;
            node.label_end = p;
            node.best_edge = None;
        }
        self.nodes[b].tree = tree;
        for v in self.leaves(b) {
            self.free_queue.remove(&v);
        }
        self.outer_queue.remove(&b);

        match label {
            Label::Outer => {
                let leaves = self.leaves(b);
                self.queue.extend(leaves);
                Ok(())
            }
            Label::Inner => {
                if b >= self.vertex_count {
                    let key = self.nodes[b].dual + self.delta_sum;
                    self.inner_queue.push(b, Reverse((key, b)));
                }
                let base = self.nodes[b]
                    .base
                    .ok_or(MatchError::Inconsistency("labeled blossom without base"))?;
                let mate = self.mate[base]
                    .ok_or(MatchError::Inconsistency("inner blossom with unmatched base"))?;
                let next = self.endpoint(mate);
                self.assign_label(next, Label::Outer, Some(mate ^ 1))
            }
            Label::Free => Err(MatchError::Inconsistency("assigning the free label")),
        }
    }

    /// Traces back from two outer vertices of the same tree to their
    /// nearest common outer blossom and returns its base vertex.
    fn scan_blossom(&mut self, v: usize, w: usize) -> Option<usize> {
        let mut path = Vec::new();
        let mut base = None;
        let mut v = Some(v);
        let mut w = Some(w);
        while let Some(x) = v {
            let b = self.in_blossom[x];
            if self.crumbs[b] {
                base = self.nodes[b].base;
                break;
            }
            debug_assert_eq!(self.nodes[b].label, Label::Outer);
            path.push(b);
            self.crumbs[b] = true;
            v = match self.nodes[b].label_end {
                None => None,
                Some(p) => {
                    let t = self.in_blossom[self.endpoint(p)];
                    debug_assert_eq!(self.nodes[t].label, Label::Inner);
                    self.nodes[t].label_end.map(|q| self.endpoint(q))
                }
            };
            if w.is_some() {
                mem::swap(&mut v, &mut w);
            }
        }
        for b in path {
            self.crumbs[b] = false;
        }
        base
    }

    /// Contracts the odd cycle closed by edge k into a new outer blossom.
    fn add_blossom(&mut self, base: usize, k: usize) -> Result<()> {
        let n = self.vertex_count;
        let MatchingEdge { u, v, .. } = self.edges[k];
        let bb = self.in_blossom[base];
        let mut bv = self.in_blossom[u];
        let mut bw = self.in_blossom[v];

        let b = self
            .unused
            .pop()
            .ok_or(MatchError::Inconsistency("out of blossom slots"))?;
        self.nodes[b].base = Some(base);
        self.nodes[b].parent = None;
        self.nodes[bb].parent = Some(b);

        let mut childs = Vec::new();
        let mut endps = Vec::new();
        while bv != bb {
            self.nodes[bv].parent = Some(b);
            childs.push(bv);
            let p = self.nodes[bv]
                .label_end
                .ok_or(MatchError::Inconsistency("blossom path leaves the tree"))?;
            endps.push(p);
            bv = self.in_blossom[self.endpoint(p)];
        }
        childs.push(bb);
        childs.reverse();
        endps.reverse();
        endps.push(2 * k);
        while bw != bb {
            self.nodes[bw].parent = Some(b);
            childs.push(bw);
            let p = self.nodes[bw]
                .label_end
                .ok_or(MatchError::Inconsistency("blossom path leaves the tree"))?;
            endps.push(p ^ 1);
            bw = self.in_blossom[self.endpoint(p)];
        }
        trace!("blossom {} with base {} over {:?}", b, base, childs);

        debug_assert_eq!(self.nodes[bb].label, Label::Outer);
        self.nodes[b].label = Label::Outer;
        self.nodes[b].label_end = self.nodes[bb].label_end;
        self.nodes[b].tree = self.nodes[bb].tree;
        self.nodes[b].dual = 0;
        self.blossoms[b - n] = Blossom {
            childs: childs.clone(),
            endps,
            best_edges: None,
        };

        // Inner vertices become outer inside the new blossom.
        for x in self.leaves(b) {
            if self.nodes[self.in_blossom[x]].label == Label::Inner {
                self.queue.push(x);
            }
            self.in_blossom[x] = b;
        }

        let mut best_to: Vec<Option<usize>> = vec![None; 2 * n];
        for &c in &childs {
            let stored = if c >= n {
                self.blossoms[c - n].best_edges.take()
            } else {
                None
            };
            let candidates: Vec<usize> = match stored {
                Some(list) => list,
                None => self
                    .leaves(c)
                    .into_iter()
                    .flat_map(|x| self.neighbours[x].iter().map(|p| p / 2))
                    .collect(),
            };
            for kk in candidates {
                let e = self.edges[kk];
                let j = if self.in_blossom[e.v] == b { e.u } else { e.v };
                let bj = self.in_blossom[j];
                if bj != b
                    && self.nodes[bj].label == Label::Outer
                    && best_to[bj].map_or(true, |best| self.slack(kk) < self.slack(best))
                {
                    best_to[bj] = Some(kk);
                }
            }
            self.nodes[c].best_edge = None;
            self.outer_queue.remove(&c);
            self.inner_queue.remove(&c);
        }

        let best_edges: Vec<usize> = best_to.into_iter().flatten().collect();
        let mut best: Option<usize> = None;
        for &kk in &best_edges {
            if best.map_or(true, |be| self.slack(kk) < self.slack(be)) {
                best = Some(kk);
            }
        }
        self.blossoms[b - n].best_edges = Some(best_edges);
        self.nodes[b].best_edge = best;
        if let Some(kk) = best {
            let key = self.slack(kk) + 2 * self.delta_sum;
            self.outer_queue.push(b, Reverse((key, b)));
        }
        Ok(())
    }

    /// Dissolves top-level blossom `b` into its sub-blossoms. During a stage
    /// this only happens to inner blossoms, whose sub-blossoms then get
    /// relabeled along the even-length path through the cycle.
    fn expand_blossom(&mut self, b: usize, end_of_stage: bool) -> Result<()> {
        let n = self.vertex_count;
        trace!("expand blossom {}", b);
        let childs = self.blossoms[b - n].childs.clone();
        for &s in &childs {
            self.nodes[s].parent = None;
            if s < n {
                self.in_blossom[s] = s;
            } else if end_of_stage && self.nodes[s].dual == 0 {
                self.expand_blossom(s, end_of_stage)?;
            } else {
                for v in self.leaves(s) {
                    self.in_blossom[v] = s;
                }
            }
        }

        if !end_of_stage && self.nodes[b].label == Label::Inner {
            let endps = self.blossoms[b - n].endps.clone();
            let len = childs.len() as isize;
            let label_end = self.nodes[b]
                .label_end
                .ok_or(MatchError::Inconsistency("inner blossom without label edge"))?;
            let entry = self.in_blossom[self.endpoint(label_end ^ 1)];
            let mut j = childs
                .iter()
                .position(|&c| c == entry)
                .ok_or(MatchError::Inconsistency("entry child not in blossom"))?
                as isize;
            // Walk the even-length way round to the base.
            let (jstep, trick) = if j & 1 != 0 {
                j -= len;
                (1, 0)
            } else {
                (-1, 1)
            };

            let mut p = label_end;
            while j != 0 {
                let q = cyclic(&endps, j - trick as isize);
                let t = self.endpoint(p ^ 1);
                let s = self.endpoint(q ^ trick ^ 1);
                self.nodes[t].label = Label::Free;
                self.nodes[s].label = Label::Free;
                self.assign_label(t, Label::Inner, Some(p))?;
                self.allowed[q / 2] = true;
                j += jstep;
                p = cyclic(&endps, j - trick as isize) ^ trick;
                self.allowed[p / 2] = true;
                j += jstep;
            }

            // The base sub-blossom keeps its mate outside; label it inner
            // without passing the label on.
            let bv = cyclic(&childs, j);
            let t = self.endpoint(p ^ 1);
            for &x in &[t, bv] {
                self.nodes[x].label = Label::Inner;
                self.nodes[x].label_end = Some(p);
            }
            self.nodes[bv].tree = self.nodes[b].tree;
            self.nodes[bv].best_edge = None;
            if bv >= n {
                let key = self.nodes[bv].dual + self.delta_sum;
                self.inner_queue.push(bv, Reverse((key, bv)));
            }

            // The rest of the cycle is inner where something outside
            // already reached it, free otherwise.
            j += jstep;
            while cyclic(&childs, j) != entry {
                let bv = cyclic(&childs, j);
                j += jstep;
                if self.nodes[bv].label == Label::Outer {
                    continue;
                }
                let leaves = self.leaves(bv);
                match leaves
                    .iter()
                    .copied()
                    .find(|&v| self.nodes[v].label != Label::Free)
                {
                    Some(v) => {
                        debug_assert_eq!(self.nodes[v].label, Label::Inner);
                        debug_assert_eq!(self.in_blossom[v], bv);
                        self.nodes[v].label = Label::Free;
                        let base = self.nodes[bv]
                            .base
                            .ok_or(MatchError::Inconsistency("sub-blossom without base"))?;
                        let mate = self.mate[base]
                            .ok_or(MatchError::Inconsistency("sub-blossom base unmatched"))?;
                        let m = self.endpoint(mate);
                        self.nodes[m].label = Label::Free;
                        let end = self.nodes[v].label_end;
                        self.assign_label(v, Label::Inner, end)?;
                    }
                    None => {
                        for v in leaves {
                            if let Some(k) = self.nodes[v].best_edge {
                                let key = self.slack(k) + self.delta_sum;
                                self.free_queue.push(v, Reverse((key, v)));
                            }
                        }
                    }
                }
            }
        }

        self.inner_queue.remove(&b);
        self.outer_queue.remove(&b);
        self.nodes[b] = Node::new(None);
        self.blossoms[b - n] = Blossom::default();
        self.unused.push(b);
        Ok(())
    }

    /// Swaps matched and unmatched edges along the path inside blossom `b`
    /// from vertex `v` to the base, and makes `v` the new base.
    fn augment_blossom(&mut self, b: usize, v: usize) -> Result<()> {
        let n = self.vertex_count;
        let mut t = v;
        while self.nodes[t].parent != Some(b) {
            t = self.nodes[t]
                .parent
                .ok_or(MatchError::Inconsistency("vertex outside of blossom"))?;
        }
        if t >= n {
            self.augment_blossom(t, v)?;
        }

        let childs = self.blossoms[b - n].childs.clone();
        let endps = self.blossoms[b - n].endps.clone();
        let i = childs
            .iter()
            .position(|&c| c == t)
            .ok_or(MatchError::Inconsistency("sub-blossom not in cycle"))?;
        let mut j = i as isize;
        let (jstep, trick) = if i & 1 != 0 {
            j -= childs.len() as isize;
            (1, 0)
        } else {
            (-1, 1)
        };

        while j != 0 {
            j += jstep;
            let t = cyclic(&childs, j);
            let p = cyclic(&endps, j - trick as isize) ^ trick;
            if t >= n {
                let x = self.endpoint(p);
                self.augment_blossom(t, x)?;
            }
            j += jstep;
            let t = cyclic(&childs, j);
            if t >= n {
                let x = self.endpoint(p ^ 1);
                self.augment_blossom(t, x)?;
            }
            let x = self.endpoint(p);
            let y = self.endpoint(p ^ 1);
            self.mate[x] = Some(p ^ 1);
            self.mate[y] = Some(p);
        }

        let blossom = &mut self.blossoms[b - n];
        blossom.childs.rotate_left(i);
        blossom.endps.rotate_left(i);
        let first = blossom.childs[0];
        self.nodes[b].base = self.nodes[first].base;
        debug_assert_eq!(self.nodes[b].base, Some(v));
        Ok(())
    }

    /// Flips the augmenting path through edge k, which joins the outer
    /// blossoms of two different trees, back to both roots.
    fn augment_matching(&mut self, k: usize) -> Result<()> {
        let n = self.vertex_count;
        let MatchingEdge { u, v, .. } = self.edges[k];
        trace!("augment through {}-{}", u, v);
        for &(start, first) in &[(u, 2 * k + 1), (v, 2 * k)] {
            let mut s = start;
            let mut p = first;
            loop {
                let bs = self.in_blossom[s];
                debug_assert_eq!(self.nodes[bs].label, Label::Outer);
                if bs >= n {
                    self.augment_blossom(bs, s)?;
                }
                self.mate[s] = Some(p);
                let end = match self.nodes[bs].label_end {
                    None => break,
                    Some(end) => end,
                };
                let t = self.endpoint(end);
                let bt = self.in_blossom[t];
                debug_assert_eq!(self.nodes[bt].label, Label::Inner);
                let tend = self.nodes[bt]
                    .label_end
                    .ok_or(MatchError::Inconsistency("inner blossom without label edge"))?;
                s = self.endpoint(tend);
                let j = self.endpoint(tend ^ 1);
                if bt >= n {
                    self.augment_blossom(bt, j)?;
                }
                self.mate[j] = Some(tend);
                p = tend ^ 1;
            }
        }
        Ok(())
    }

    fn ancestors(&self, v: usize) -> Vec<usize> {
        let mut chain = vec![v];
        let mut t = v;
        while let Some(parent) = self.nodes[t].parent {
            chain.push(parent);
            t = parent;
        }
        chain.reverse();
        chain
    }

    /// Checks complementary slackness and that the matching cost equals
    /// the dual objective.
    fn verify_optimum(&self) -> Result<()> {
        let n = self.vertex_count;
        for (k, e) in self.edges.iter().enumerate() {
            let mut s = self.slack(k);
            for (bi, bj) in self.ancestors(e.u).into_iter().zip(self.ancestors(e.v)) {
                if bi != bj {
                    break;
                }
                s += 2 * self.nodes[bi].dual;
            }
            if s < 0 {
                return Err(MatchError::Inconsistency("edge with negative slack"));
            }
            let matched_u = self.mate[e.u].map(|p| p / 2) == Some(k);
            let matched_v = self.mate[e.v].map(|p| p / 2) == Some(k);
            if matched_u != matched_v {
                return Err(MatchError::Inconsistency("matched edge used by one end only"));
            }
            if matched_u && s != 0 {
                return Err(MatchError::Inconsistency("matched edge with slack"));
            }
        }
        for b in n..2 * n {
            let node = &self.nodes[b];
            if node.base.is_none() {
                continue;
            }
            if node.dual < 0 {
                return Err(MatchError::Inconsistency("negative blossom dual"));
            }
            if node.dual == 0 {
                continue;
            }
            let endps = &self.blossoms[b - n].endps;
            if endps.len() % 2 != 1 {
                return Err(MatchError::Inconsistency("even blossom cycle"));
            }
            for &p in endps.iter().skip(1).step_by(2) {
                if self.mate[self.endpoint(p)] != Some(p ^ 1) {
                    return Err(MatchError::Inconsistency("blossom not full"));
                }
            }
        }
        if 2 * self.compute_perfect_matching_cost() != self.dual_sum() {
            return Err(MatchError::Inconsistency("primal and dual objectives differ"));
        }
        Ok(())
    }
}

/// Python-style indexing that wraps negative positions.
fn cyclic(v: &[usize], index: isize) -> usize {
    v[index.rem_euclid(v.len() as isize) as usize]
}

/** Computes a perfect matching on the complete graph given by a square,
 * symmetric cost matrix.
 * @return mate such that mate[i] == j if vertex i is matched to vertex j.
 */
pub fn weightedmatch(costs: Vec<Vec<Weight>>, minimize_weight: bool) -> Result<Vec<usize>> {
    let n = costs.len();
    let cost = |i: usize, j: usize| -> Result<i64> {
        costs[i]
            .get(j)
            .map(|&c| i64::from(c))
            .ok_or(MatchError::VertexOutOfRange {
                vertex: j,
                vertex_count: costs[i].len(),
            })
    };
    let mut max_cost = 0;
    for i in 0..n {
        for j in i + 1..n {
            max_cost = max_cost.max(cost(i, j)?);
        }
    }

    let mut engine = MatchingEngine::new(n, n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in i + 1..n {
            let c = if minimize_weight {
                cost(i, j)?
            } else {
                max_cost - cost(i, j)?
            };
            let c = Weight::try_from(c).map_err(|_| MatchError::WeightOutOfRange {
                weight: c,
                bound: engine.weight_bound(),
            })?;
            engine.add_edge(i, j, c)?;
        }
    }
    engine.solve()?;
    (0..n)
        .map(|i| {
            engine
                .get_match(i)
                .ok_or(MatchError::Inconsistency("vertex left unmatched"))
        })
        .collect()
}
