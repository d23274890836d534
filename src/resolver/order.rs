// src/resolver/order.rs

//! Ordering job units so providers are installed before consumers

use std::collections::{BTreeMap, BTreeSet};

/// Directed graph over job units, with an edge from each provider unit to
/// the units that need it
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    nodes: usize,
    edges: BTreeMap<usize, BTreeSet<usize>>,
}

impl JobGraph {
    pub fn new(nodes: usize) -> Self {
        Self {
            nodes,
            edges: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes == 0
    }

    /// `provider` has to come before `consumer`
    pub fn add_edge(&mut self, provider: usize, consumer: usize) {
        if provider != consumer && provider < self.nodes && consumer < self.nodes {
            self.edges.entry(provider).or_default().insert(consumer);
        }
    }

    fn successors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges.get(&node).into_iter().flat_map(|s| s.iter().copied())
    }

    /// Strongly connected components, each sorted, in discovery order
    fn components(&self) -> Vec<Vec<usize>> {
        let mut state = Tarjan {
            graph: self,
            index: 0,
            indices: vec![None; self.nodes],
            lowlink: vec![0; self.nodes],
            on_stack: vec![false; self.nodes],
            stack: Vec::new(),
            components: Vec::new(),
        };
        for node in 0..self.nodes {
            if state.indices[node].is_none() {
                state.visit(node);
            }
        }
        state.components
    }

    /// Units grouped and ordered so every provider precedes its consumers
    ///
    /// Units on a dependency cycle land in the same group. Among groups
    /// that are ready at the same time the one holding the smallest unit
    /// goes first, so the order is stable for a given input.
    pub fn order(&self) -> Vec<Vec<usize>> {
        let components = self.components();
        let mut owner = vec![0; self.nodes];
        for (c, members) in components.iter().enumerate() {
            for &m in members {
                owner[m] = c;
            }
        }

        let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
        let mut in_degree = vec![0usize; components.len()];
        for (from, tos) in &self.edges {
            for to in tos {
                let (a, b) = (owner[*from], owner[*to]);
                if a != b && edges[a].insert(b) {
                    in_degree[b] += 1;
                }
            }
        }

        // ready components keyed by their smallest unit
        let mut queue: BTreeSet<(usize, usize)> = BTreeSet::new();
        for (c, degree) in in_degree.iter().enumerate() {
            if *degree == 0 {
                queue.insert((components[c][0], c));
            }
        }

        let mut result = Vec::with_capacity(components.len());
        while let Some((_, c)) = queue.pop_first() {
            result.push(components[c].clone());
            for &next in &edges[c] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.insert((components[next][0], next));
                }
            }
        }
        result
    }
}

struct Tarjan<'g> {
    graph: &'g JobGraph,
    index: usize,
    indices: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    components: Vec<Vec<usize>>,
}

impl Tarjan<'_> {
    fn visit(&mut self, node: usize) {
        self.indices[node] = Some(self.index);
        self.lowlink[node] = self.index;
        self.index += 1;
        self.stack.push(node);
        self.on_stack[node] = true;

        let successors: Vec<usize> = self.graph.successors(node).collect();
        for next in successors {
            match self.indices[next] {
                None => {
                    self.visit(next);
                    self.lowlink[node] = self.lowlink[node].min(self.lowlink[next]);
                }
                Some(index) if self.on_stack[next] => {
                    self.lowlink[node] = self.lowlink[node].min(index);
                }
                Some(_) => {}
            }
        }

        if self.indices[node] == Some(self.lowlink[node]) {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack[member] = false;
                component.push(member);
                if member == node {
                    break;
                }
            }
            component.sort_unstable();
            self.components.push(component);
        }
    }
}
