//! In-memory HNSW graph for approximate nearest-neighbor search.
//!
//! Distance is `1 - cosine_similarity`. Nodes are stored in insertion order and
//! addressed by index; the string id is only used at the API boundary.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use chatvault_core::IndexConfig;

use crate::similarity::cosine_distance;

struct Node {
    id: String,
    vector: Vec<f32>,
    /// One neighbor list per layer `0..=level`.
    neighbors: Vec<Vec<usize>>,
    is_message: bool,
    is_context: bool,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    dist: f32,
    node: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| self.node.cmp(&other.node))
    }
}

struct Graph {
    nodes: Vec<Node>,
    by_id: HashMap<String, usize>,
    entry: Option<usize>,
    max_level: usize,
    rng: StdRng,
}

impl Graph {
    fn new(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            by_id: HashMap::new(),
            entry: None,
            max_level: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn distance(&self, query: &[f32], node: usize) -> f32 {
        cosine_distance(query, &self.nodes[node].vector)
    }

    fn neighbors(&self, node: usize, layer: usize) -> &[usize] {
        self.nodes[node]
            .neighbors
            .get(layer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Fair coin flips, capped at `cap`.
    fn sample_level(&mut self, cap: usize) -> usize {
        let mut level = 0;
        while level < cap && self.rng.gen::<f64>() < 0.5 {
            level += 1;
        }
        level
    }

    /// Walk layers `from..above` (descending, exclusive of `above`) moving to
    /// the closest neighbor until no neighbor improves.
    fn greedy_descent(
        &self,
        query: &[f32],
        mut cur: usize,
        from: usize,
        above: usize,
    ) -> Candidate {
        let mut cur_dist = self.distance(query, cur);
        for layer in (above + 1..=from).rev() {
            loop {
                let mut improved = false;
                for &n in self.neighbors(cur, layer) {
                    let d = self.distance(query, n);
                    if d < cur_dist {
                        cur = n;
                        cur_dist = d;
                        improved = true;
                    }
                }
                if !improved {
                    break;
                }
            }
        }
        Candidate {
            dist: cur_dist,
            node: cur,
        }
    }

    /// Beam search on one layer. All reachable nodes are traversed; only those
    /// passing `accept` are returned, nearest first, at most `ef` of them.
    fn search_layer(
        &self,
        query: &[f32],
        entries: &[usize],
        ef: usize,
        layer: usize,
        accept: impl Fn(&Node) -> bool,
    ) -> Vec<Candidate> {
        let ef = ef.max(1);
        let mut visited = HashSet::new();
        let mut candidates = BinaryHeap::new();
        let mut frontier: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut matched: BinaryHeap<Candidate> = BinaryHeap::new();

        let offer = |c: Candidate, matched: &mut BinaryHeap<Candidate>| {
            if accept(&self.nodes[c.node]) {
                matched.push(c);
                if matched.len() > ef {
                    matched.pop();
                }
            }
        };

        for &e in entries {
            if !visited.insert(e) {
                continue;
            }
            let c = Candidate {
                dist: self.distance(query, e),
                node: e,
            };
            candidates.push(Reverse(c));
            frontier.push(c);
            offer(c, &mut matched);
        }
        while frontier.len() > ef {
            frontier.pop();
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if let Some(worst) = frontier.peek() {
                if frontier.len() >= ef && current.dist > worst.dist {
                    break;
                }
            }

            for &n in self.neighbors(current.node, layer) {
                if !visited.insert(n) {
                    continue;
                }
                let c = Candidate {
                    dist: self.distance(query, n),
                    node: n,
                };
                offer(c, &mut matched);

                let admit = frontier.len() < ef || frontier.peek().is_some_and(|w| c.dist < w.dist);
                if admit {
                    candidates.push(Reverse(c));
                    frontier.push(c);
                    if frontier.len() > ef {
                        frontier.pop();
                    }
                }
            }
        }

        matched.into_sorted_vec()
    }

    /// Keep only the `cap` neighbors of `node` nearest to it.
    fn prune(&mut self, node: usize, layer: usize, cap: usize) {
        let list = std::mem::take(&mut self.nodes[node].neighbors[layer]);
        let owner = &self.nodes[node].vector;
        let mut scored: Vec<Candidate> = list
            .into_iter()
            .map(|n| Candidate {
                dist: cosine_distance(owner, &self.nodes[n].vector),
                node: n,
            })
            .collect();
        scored.sort();
        scored.truncate(cap);
        self.nodes[node].neighbors[layer] = scored.into_iter().map(|c| c.node).collect();
    }
}

/// Thread-safe HNSW index. `add` takes the write lock, `search` the read lock.
pub struct HnswIndex {
    config: IndexConfig,
    graph: RwLock<Graph>,
}

impl HnswIndex {
    pub fn new(config: IndexConfig) -> Self {
        let graph = RwLock::new(Graph::new(config.seed));
        Self { config, graph }
    }

    /// Insert a vector. Returns `false` (and changes nothing) if `id` is
    /// already present.
    pub fn add(&self, id: &str, vector: Vec<f32>, is_message: bool, is_context: bool) -> bool {
        let mut graph = self.graph.write();
        if graph.by_id.contains_key(id) {
            return false;
        }

        let level = graph.sample_level(self.config.max_level);
        let idx = graph.nodes.len();
        graph.nodes.push(Node {
            id: id.to_string(),
            vector,
            neighbors: vec![Vec::new(); level + 1],
            is_message,
            is_context,
        });
        graph.by_id.insert(id.to_string(), idx);

        let Some(entry) = graph.entry else {
            graph.entry = Some(idx);
            graph.max_level = level;
            return true;
        };

        let top = graph.max_level;
        let query = graph.nodes[idx].vector.clone();
        let start = graph.greedy_descent(&query, entry, top, level);
        let mut entries = vec![start.node];

        for layer in (0..=level.min(top)).rev() {
            let found =
                graph.search_layer(&query, &entries, self.config.ef_construction, layer, |_| true);
            let cap = self.layer_capacity(layer);
            let selected: Vec<usize> = found.iter().take(cap).map(|c| c.node).collect();

            for &n in &selected {
                graph.nodes[n].neighbors[layer].push(idx);
                if graph.nodes[n].neighbors[layer].len() > cap {
                    graph.prune(n, layer, cap);
                }
            }
            graph.nodes[idx].neighbors[layer] = selected;

            if !found.is_empty() {
                entries = found.iter().map(|c| c.node).collect();
            }
        }

        if level > top {
            graph.entry = Some(idx);
            graph.max_level = level;
        }
        true
    }

    /// Up to `k` ids by ascending distance. With `filter_context` only nodes
    /// added as context messages are returned; the rest are still traversed.
    pub fn search(&self, query: &[f32], k: usize, filter_context: bool) -> Vec<String> {
        let graph = self.graph.read();
        let Some(entry) = graph.entry else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        let start = graph.greedy_descent(query, entry, graph.max_level, 0);
        let ef = self.config.ef_search.max(k);
        graph
            .search_layer(query, &[start.node], ef, 0, |n| {
                !filter_context || (n.is_message && n.is_context)
            })
            .into_iter()
            .take(k)
            .map(|c| graph.nodes[c.node].id.clone())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.graph.read().by_id.contains_key(id)
    }

    pub fn size(&self) -> usize {
        self.graph.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Drop every node and reseed the level sampler.
    pub fn clear(&self) {
        *self.graph.write() = Graph::new(self.config.seed);
    }

    fn layer_capacity(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m * 2
        } else {
            self.config.m
        }
    }
}
