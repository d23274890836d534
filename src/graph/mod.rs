// src/graph/mod.rs

//! Lazy operation graph over trove sets
//!
//! The model compiler builds a DAG of nodes. Some nodes are known up front
//! (static sets, repository search sources, the installed system); the rest
//! are delayed actions whose value is computed from their parents when the
//! graph is realized.
//!
//! Realization runs in passes. Each pass derives a topological order, takes
//! the ready layer (unrealized nodes whose parents are all realized), groups
//! it by action kind and evaluates each group. Fetch and Find groups are
//! evaluated with one call across the whole group so the trove source sees
//! bulk requests. An Include evaluation adds nodes to the graph; it reports
//! [`Evaluation::GraphChanged`] and the pass restarts from a fresh order.

mod action;
mod troveset;

pub use action::{Action, ActionKind, Evaluation};
pub use troveset::{TroveSet, WalkEntry};

use crate::cache::TroveCache;
use crate::error::{Error, Result};
use crate::flavor::FlavorSpec;
use crate::label::LabelPath;
use crate::trove::{TroveSpec, TroveTuple};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// Index of a node in an [`OperationGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Where a search node looks for troves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchSource {
    /// A repository label path
    Repository { labels: LabelPath },
    /// The installed system
    Installed,
}

/// What a node is
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Contents given at creation
    Static,
    /// A search source; its contents are whatever it holds (empty for
    /// repositories, the installed troves for the system)
    Source(SearchSource),
    /// An ordered list of search nodes, most preferred first
    SearchPath(Vec<NodeId>),
    /// Computed from the parents by an action
    Delayed(Action),
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    parents: Vec<NodeId>,
    contents: TroveSet,
    realized: bool,
}

/// Inputs shared by every action evaluation
pub struct ActionData<'c, 'a> {
    pub cache: &'c mut TroveCache<'a>,
    /// Flavor path for repository searches, most preferred first
    pub flavors: Vec<FlavorSpec>,
    /// Trove identities already included by a model
    pub included: BTreeSet<TroveTuple>,
}

impl<'c, 'a> ActionData<'c, 'a> {
    pub fn new(cache: &'c mut TroveCache<'a>, flavors: Vec<FlavorSpec>) -> Self {
        Self {
            cache,
            flavors,
            included: BTreeSet::new(),
        }
    }
}

/// A DAG of trove-set nodes
#[derive(Debug, Default)]
pub struct OperationGraph {
    nodes: Vec<Node>,
    installed: Option<NodeId>,
}

impl OperationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: NodeKind, parents: Vec<NodeId>, contents: TroveSet, realized: bool) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parents,
            contents,
            realized,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_static(&mut self, contents: TroveSet) -> NodeId {
        self.push(NodeKind::Static, Vec::new(), contents, true)
    }

    pub fn add_repository(&mut self, labels: LabelPath) -> NodeId {
        self.push(
            NodeKind::Source(SearchSource::Repository { labels }),
            Vec::new(),
            TroveSet::new(),
            true,
        )
    }

    /// The node holding the installed system; created once
    pub fn add_installed(&mut self, tuples: impl IntoIterator<Item = TroveTuple>) -> NodeId {
        if let Some(id) = self.installed {
            return id;
        }
        let id = self.push(
            NodeKind::Source(SearchSource::Installed),
            Vec::new(),
            TroveSet::from_install(tuples),
            true,
        );
        self.installed = Some(id);
        id
    }

    pub fn installed_node(&self) -> Option<NodeId> {
        self.installed
    }

    pub fn add_search_path(&mut self, elements: Vec<NodeId>) -> NodeId {
        let parents = elements.clone();
        self.push(NodeKind::SearchPath(elements), parents, TroveSet::new(), false)
    }

    /// An empty search path filled in later by an include
    pub fn add_placeholder(&mut self) -> NodeId {
        self.push(NodeKind::SearchPath(Vec::new()), Vec::new(), TroveSet::new(), false)
    }

    pub fn add_action(&mut self, action: Action, parents: &[NodeId]) -> NodeId {
        self.push(NodeKind::Delayed(action), parents.to_vec(), TroveSet::new(), false)
    }

    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) {
        let parents = &mut self.nodes[child.0].parents;
        if !parents.contains(&parent) {
            parents.push(parent);
        }
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn parents(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].parents
    }

    pub fn contents(&self, id: NodeId) -> &TroveSet {
        &self.nodes[id.0].contents
    }

    pub fn is_realized(&self, id: NodeId) -> bool {
        self.nodes[id.0].realized
    }

    // === Builders ===

    pub fn union(&mut self, parents: &[NodeId]) -> NodeId {
        self.add_action(Action::Union, parents)
    }

    pub fn remove(&mut self, base: NodeId, removed: NodeId) -> NodeId {
        self.add_action(Action::Remove, &[base, removed])
    }

    pub fn optional(&mut self, base: NodeId, offered: NodeId) -> NodeId {
        self.add_action(Action::Optional, &[base, offered])
    }

    pub fn update(&mut self, base: NodeId, updates: NodeId) -> NodeId {
        self.add_action(Action::Update, &[base, updates])
    }

    pub fn patch(&mut self, base: NodeId, patches: NodeId) -> NodeId {
        self.add_action(Action::Patch, &[base, patches])
    }

    pub fn find(&mut self, search: NodeId, specs: Vec<TroveSpec>, follow_redirects: bool) -> NodeId {
        self.add_action(
            Action::Find {
                specs,
                follow_redirects,
            },
            &[search],
        )
    }

    pub fn fetch(&mut self, node: NodeId, all: bool) -> NodeId {
        self.add_action(Action::Fetch { all }, &[node])
    }

    pub fn final_fetch(&mut self, node: NodeId) -> NodeId {
        self.add_action(Action::FinalFetch, &[node])
    }

    /// Include the model found by `spec`; `placeholder` receives the
    /// included model's search path
    ///
    /// `spec` is looked up in `working` first and on `search` when the
    /// working set has no match.
    pub fn include(
        &mut self,
        search: NodeId,
        working: NodeId,
        spec: TroveSpec,
        ancestors: Vec<String>,
        placeholder: NodeId,
    ) -> NodeId {
        let id = self.add_action(
            Action::Include {
                spec,
                ancestors,
                placeholder,
            },
            &[search, working],
        );
        self.add_edge(id, placeholder);
        id
    }

    // === Realization ===

    /// Depth-first finishing order, parents before children
    fn topological_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut state = vec![0u8; self.nodes.len()];
        for start in 0..self.nodes.len() {
            if state[start] != 0 {
                continue;
            }
            // (node, next parent index)
            let mut stack = vec![(start, 0usize)];
            state[start] = 1;
            while let Some((node, idx)) = stack.pop() {
                let parents = &self.nodes[node].parents;
                if idx < parents.len() {
                    stack.push((node, idx + 1));
                    let parent = parents[idx].0;
                    if state[parent] == 0 {
                        state[parent] = 1;
                        stack.push((parent, 0));
                    }
                } else {
                    state[node] = 2;
                    order.push(NodeId(node));
                }
            }
        }
        order
    }

    fn ready_layer(&self) -> Vec<NodeId> {
        self.topological_order()
            .into_iter()
            .filter(|id| !self.nodes[id.0].realized)
            .filter(|id| self.nodes[id.0].parents.iter().all(|p| self.nodes[p.0].realized))
            .collect()
    }

    fn kind_of(&self, id: NodeId) -> ActionKind {
        match &self.nodes[id.0].kind {
            NodeKind::Delayed(action) => action.kind(),
            NodeKind::SearchPath(_) => ActionKind::SearchPath,
            NodeKind::Static | NodeKind::Source(_) => ActionKind::Static,
        }
    }

    /// Compute every node
    pub fn realize(&mut self, data: &mut ActionData<'_, '_>) -> Result<()> {
        let mut pass = 0;
        loop {
            let ready = self.ready_layer();
            if ready.is_empty() {
                if let Some(stuck) = self.nodes.iter().position(|n| !n.realized) {
                    return Err(Error::Update(format!(
                        "operation graph has a cycle through {}",
                        NodeId(stuck)
                    )));
                }
                return Ok(());
            }
            pass += 1;

            let mut groups: BTreeMap<ActionKind, Vec<NodeId>> = BTreeMap::new();
            for id in ready {
                groups.entry(self.kind_of(id)).or_default().push(id);
            }

            let mut changed = false;
            'groups: for (kind, ids) in groups {
                debug!("pass {}: realizing {} {} node(s)", pass, ids.len(), kind);
                if kind.is_batched() {
                    self.evaluate_batch(kind, &ids, data)?;
                    for id in ids {
                        self.nodes[id.0].realized = true;
                    }
                    continue;
                }
                for id in ids {
                    match self.evaluate(id, data)? {
                        Evaluation::Done => self.nodes[id.0].realized = true,
                        Evaluation::GraphChanged => {
                            changed = true;
                            break 'groups;
                        }
                    }
                }
            }

            if changed {
                debug!("graph changed during pass {}, reordering", pass);
            }
        }
    }

    fn set_contents(&mut self, id: NodeId, contents: TroveSet) {
        self.nodes[id.0].contents = contents;
    }

    /// Search through a node for specs
    ///
    /// Repository sources honor the flavor path (the first flavor giving a
    /// match wins), the installed source matches installed troves, search
    /// paths try each element in order, and any other node searches its own
    /// walked contents.
    pub(crate) fn search_node(
        &self,
        id: NodeId,
        specs: &[TroveSpec],
        data: &mut ActionData<'_, '_>,
    ) -> Result<crate::source::FindResults> {
        let mut results: crate::source::FindResults = specs.iter().map(|s| (s.clone(), Vec::new())).collect();
        match &self.nodes[id.0].kind {
            NodeKind::Source(SearchSource::Repository { labels }) => {
                let flavors = if data.flavors.is_empty() {
                    vec![FlavorSpec::empty()]
                } else {
                    data.flavors.clone()
                };
                for flavor in &flavors {
                    let missing: Vec<TroveSpec> = results
                        .iter()
                        .filter(|(_, found)| found.is_empty())
                        .map(|(s, _)| s.clone())
                        .collect();
                    if missing.is_empty() {
                        break;
                    }
                    for (spec, found) in data.cache.find_troves(labels, &missing, flavor)? {
                        results.insert(spec, found);
                    }
                }
            }
            NodeKind::Source(SearchSource::Installed) => {
                for (spec, found) in data.cache.installed().find_installed(specs)? {
                    results.insert(spec, found);
                }
            }
            NodeKind::SearchPath(elements) => {
                for element in elements {
                    let missing: Vec<TroveSpec> = results
                        .iter()
                        .filter(|(_, found)| found.is_empty())
                        .map(|(s, _)| s.clone())
                        .collect();
                    if missing.is_empty() {
                        break;
                    }
                    for (spec, found) in self.search_node(*element, &missing, data)? {
                        if !found.is_empty() {
                            results.insert(spec, found);
                        }
                    }
                }
            }
            NodeKind::Static | NodeKind::Delayed(_) => {
                for (spec, found) in self.nodes[id.0].contents.search(data.cache, specs)? {
                    results.insert(spec, found);
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemoryDatabase, MemoryRepository};
    use crate::trove::Trove;

    fn tup(s: &str) -> TroveTuple {
        TroveTuple::parse(s).unwrap()
    }

    fn repo() -> MemoryRepository {
        let mut repo = MemoryRepository::new();
        for t in [
            "foo=/repo@rpl:2/1.0:1.0-1-1",
            "foo=/repo@rpl:2/2.0:1.1-1-1",
            "bar=/repo@rpl:2/1.0:1.0-1-1",
            "baz=/repo@rpl:1/1.0:1.0-1-1",
        ] {
            repo.add(Trove::new(tup(t)));
        }
        repo
    }

    // === Scheduling tests ===

    #[test]
    fn test_topological_order_parents_first() {
        let mut graph = OperationGraph::new();
        let a = graph.add_static(TroveSet::new());
        let b = graph.add_static(TroveSet::new());
        let u = graph.union(&[a, b]);
        let v = graph.union(&[u, a]);
        let order = graph.topological_order();
        let pos = |id: NodeId| order.iter().position(|x| *x == id).unwrap();
        assert!(pos(a) < pos(u));
        assert!(pos(b) < pos(u));
        assert!(pos(u) < pos(v));
    }

    #[test]
    fn test_cycle_stops_realization() {
        let repo = repo();
        let db = MemoryDatabase::new();
        let mut cache = TroveCache::new(&repo, &db);
        let mut graph = OperationGraph::new();

        let base = graph.add_static(TroveSet::new());
        let a = graph.union(&[base]);
        let b = graph.union(&[a]);
        graph.add_edge(b, a);

        let err = graph.realize(&mut ActionData::new(&mut cache, Vec::new())).unwrap_err();
        match err {
            Error::Update(message) => assert!(message.contains("cycle"), "unexpected message: {}", message),
            other => panic!("expected a cycle error, got {:?}", other),
        }
        assert!(graph.is_realized(base));
        assert!(!graph.is_realized(a));
    }

    #[test]
    fn test_realize_set_algebra() {
        let repo = repo();
        let db = MemoryDatabase::new();
        let mut cache = TroveCache::new(&repo, &db);
        let mut graph = OperationGraph::new();

        let foo = tup("foo=/repo@rpl:2/1.1-1-1");
        let bar = tup("bar=/repo@rpl:2/1.0-1-1");
        let a = graph.add_static(TroveSet::from_install([foo.clone(), bar.clone()]));
        let b = graph.add_static(TroveSet::from_install([bar.clone()]));
        let removed = graph.remove(a, b);
        let offered = graph.optional(removed, b);
        let unioned = graph.union(&[offered, b]);

        let mut data = ActionData::new(&mut cache, Vec::new());
        graph.realize(&mut data).unwrap();

        assert_eq!(graph.contents(removed).install, [foo.clone()].into_iter().collect());
        assert!(graph.contents(removed).optional.contains(&bar));
        assert!(graph.contents(offered).optional.contains(&bar));
        assert!(graph.contents(unioned).install.contains(&bar));
        assert!(graph.contents(unioned).optional.is_empty());
    }

    #[test]
    fn test_find_batches_and_search_path() {
        let repo = repo();
        let db = MemoryDatabase::new();
        let mut cache = TroveCache::new(&repo, &db);
        let mut graph = OperationGraph::new();

        let rpl2 = graph.add_repository(LabelPath::parse("repo@rpl:2").unwrap());
        let rpl1 = graph.add_repository(LabelPath::parse("repo@rpl:1").unwrap());
        let path = graph.add_search_path(vec![rpl2, rpl1]);
        let f1 = graph.find(path, vec![TroveSpec::new("foo")], false);
        let f2 = graph.find(path, vec![TroveSpec::new("baz")], false);

        let mut data = ActionData::new(&mut cache, Vec::new());
        graph.realize(&mut data).unwrap();

        assert_eq!(graph.contents(f1).install, [tup("foo=/repo@rpl:2/1.1-1-1")].into_iter().collect());
        assert_eq!(graph.contents(f2).install, [tup("baz=/repo@rpl:1/1.0-1-1")].into_iter().collect());
    }

    #[test]
    fn test_find_missing_spec_fails() {
        let repo = repo();
        let db = MemoryDatabase::new();
        let mut cache = TroveCache::new(&repo, &db);
        let mut graph = OperationGraph::new();
        let rpl2 = graph.add_repository(LabelPath::parse("repo@rpl:2").unwrap());
        graph.find(rpl2, vec![TroveSpec::new("nope")], false);

        let mut data = ActionData::new(&mut cache, Vec::new());
        match graph.realize(&mut data) {
            Err(Error::SpecsNotFound { specs, .. }) => assert_eq!(specs, vec!["nope".to_string()]),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_installed_source_search() {
        let repo = repo();
        let mut db = MemoryDatabase::new();
        let local = tup("foo=/local@local:COOK/1.0-1-1");
        db.add(Trove::new(local.clone()));
        let mut cache = TroveCache::new(&repo, &db);
        let mut graph = OperationGraph::new();

        let installed = graph.add_installed([local.clone()]);
        assert_eq!(graph.add_installed(Vec::new()), installed);
        let found = graph.find(installed, vec![TroveSpec::parse("foo=/local@local:COOK").unwrap()], false);

        let mut data = ActionData::new(&mut cache, Vec::new());
        graph.realize(&mut data).unwrap();
        assert!(graph.contents(found).install.contains(&local));
    }
}
