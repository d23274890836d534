// src/model/compile.rs

//! Compile a system model into operation graph nodes
//!
//! Operations are applied in declared order to a working trove set. Each
//! trove operation's matches also become a search layer for the lines
//! after it, so `install group-os` followed by `install foo` finds foo in
//! group-os first. Layers are folded into the cumulative search path
//! lazily: only when an operation named a collection, or a search line
//! was seen, is the path rebuilt before the next lookup.

use crate::error::{Error, Result};
use crate::graph::{NodeId, OperationGraph};
use crate::label::LabelPath;
use crate::model::{ModelOp, SearchItem, SystemModel, TroveOpKind};
use crate::trove::TroveSpec;
use std::collections::BTreeSet;
use tracing::debug;

/// Output of compiling one model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledModel {
    /// The working set after the last operation
    pub final_set: NodeId,
    /// Search layers the model declared, most recent first, ending with
    /// the search context it was compiled against
    pub search_path: Vec<NodeId>,
}

/// Turns model operations into graph nodes
#[derive(Debug, Clone, Default)]
pub struct ModelCompiler {
    /// Names of the troves whose models include this one
    ancestors: Vec<String>,
}

impl ModelCompiler {
    pub fn new(ancestors: Vec<String>) -> Self {
        Self { ancestors }
    }

    /// Names whose appearance in a later lookup can change what the
    /// search path exposes
    fn collections(model: &SystemModel) -> BTreeSet<String> {
        let mut collections = BTreeSet::new();
        for op in model.ops() {
            let ModelOp::Trove { kind, specs } = op else {
                continue;
            };
            for spec in specs {
                if *kind == TroveOpKind::Offer || spec.name.contains(':') {
                    let package = spec.name.split_once(':').map_or(spec.name.as_str(), |(package, _)| package);
                    collections.insert(package.to_string());
                } else if spec.name.starts_with("group-") {
                    collections.insert(spec.name.clone());
                }
            }
        }
        collections
    }

    /// Add the nodes for `model` on top of `working`
    ///
    /// `total_search` is the search context outside the model (the
    /// install label path, or the including model's search path).
    pub fn augment(
        &self,
        graph: &mut OperationGraph,
        model: &SystemModel,
        total_search: NodeId,
        working: NodeId,
    ) -> Result<CompiledModel> {
        let collections = Self::collections(model);
        let mut layers: Vec<NodeId> = Vec::new();
        let mut current = total_search;
        let mut rebuild = false;
        let mut working = working;

        for op in model.ops() {
            let (kind, specs) = match op {
                ModelOp::Search(item) => {
                    let layer = match item {
                        SearchItem::Label(label) => {
                            graph.add_repository(LabelPath::from_labels(vec![label.clone()]))
                        }
                        SearchItem::Trove(spec) => {
                            let found = graph.find(total_search, vec![spec.clone()], true);
                            graph.fetch(found, true)
                        }
                    };
                    layers.insert(0, layer);
                    rebuild = true;
                    continue;
                }
                ModelOp::Trove { kind, specs } => (*kind, specs),
                ModelOp::Version(_) | ModelOp::NoOp(_) => continue,
            };

            if kind == TroveOpKind::Erase {
                let matches = graph.find(working, specs.clone(), false);
                working = apply(graph, kind, working, matches);
                continue;
            }

            if rebuild {
                let mut path = std::mem::take(&mut layers);
                path.push(current);
                current = graph.add_search_path(path);
                rebuild = false;
                debug!("rebuilt model search path as {}", current);
            }

            if kind == TroveOpKind::Include {
                for spec in specs {
                    let placeholder = graph.add_placeholder();
                    let included = graph.include(current, working, spec.clone(), self.ancestors.clone(), placeholder);
                    working = apply(graph, kind, working, included);
                    layers.insert(0, placeholder);
                }
                rebuild = true;
                continue;
            }

            let matches = self.find_matches(graph, specs, current)?;
            working = apply(graph, kind, working, matches);
            layers.insert(0, matches);
            if specs.iter().any(|s| collections.contains(&s.name)) {
                rebuild = true;
            }
        }

        layers.push(current);
        Ok(CompiledModel {
            final_set: working,
            search_path: layers,
        })
    }

    /// Find specs on the search path, and local specs among installed troves
    fn find_matches(&self, graph: &mut OperationGraph, specs: &[TroveSpec], search: NodeId) -> Result<NodeId> {
        let (local, searchable): (Vec<TroveSpec>, Vec<TroveSpec>) = specs.iter().cloned().partition(TroveSpec::is_local);

        let mut found = Vec::new();
        if !searchable.is_empty() {
            found.push(graph.find(search, searchable, true));
        }
        if !local.is_empty() {
            let installed = graph.installed_node().ok_or_else(|| {
                Error::TroveNotFound(format!(
                    "{} (local versions need the installed system)",
                    local.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
                ))
            })?;
            found.push(graph.find(installed, local, false));
        }

        Ok(match found.as_slice() {
            [single] => *single,
            many => graph.union(many),
        })
    }
}

/// Combine the working set with an operation's matches
fn apply(graph: &mut OperationGraph, kind: TroveOpKind, working: NodeId, matches: NodeId) -> NodeId {
    match kind {
        TroveOpKind::Install | TroveOpKind::Include => graph.union(&[working, matches]),
        TroveOpKind::Offer => graph.optional(working, matches),
        TroveOpKind::Update => graph.update(working, matches),
        TroveOpKind::Patch => graph.patch(working, matches),
        TroveOpKind::Erase => graph.remove(working, matches),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TroveCache;
    use crate::graph::{ActionData, TroveSet};
    use crate::source::{MemoryDatabase, MemoryRepository};
    use crate::trove::{Trove, TroveRef, TroveTuple};

    fn tup(s: &str) -> TroveTuple {
        TroveTuple::parse(s).unwrap()
    }

    fn repo() -> MemoryRepository {
        let mut repo = MemoryRepository::new();
        let mut group = Trove::new(tup("group-os=/repo@rpl:2/1.0:1.0-1-1"));
        group.references.push(TroveRef::strong(tup("foo=/repo@rpl:2/1.0:1.0-1-1"), true));
        group.references.push(TroveRef::strong(tup("bar=/repo@rpl:2/1.0:1.0-1-1"), false));
        repo.add(group);
        for t in [
            "foo=/repo@rpl:2/1.0:1.0-1-1",
            "foo=/repo@rpl:2/2.0:2.0-1-1",
            "bar=/repo@rpl:2/1.0:1.0-1-1",
            "baz=/repo@rpl:devel/1.0:3.0-1-1",
        ] {
            repo.add(Trove::new(tup(t)));
        }
        repo
    }

    fn compile(text: &str, repo: &MemoryRepository, db: &MemoryDatabase) -> TroveSet {
        let mut cache = TroveCache::new(repo, db);
        let mut graph = OperationGraph::new();
        graph.add_installed(db.tuples().cloned());
        let search = graph.add_repository(LabelPath::parse("repo@rpl:2").unwrap());
        let working = graph.add_static(TroveSet::new());
        let model = SystemModel::parse(text).unwrap();
        let compiled = ModelCompiler::default().augment(&mut graph, &model, search, working).unwrap();
        graph.realize(&mut ActionData::new(&mut cache, Vec::new())).unwrap();
        graph.contents(compiled.final_set).clone()
    }

    // === Compile tests ===

    #[test]
    fn test_install_latest() {
        let repo = repo();
        let db = MemoryDatabase::new();
        let set = compile("install foo\n", &repo, &db);
        assert_eq!(set.install, [tup("foo=/repo@rpl:2/2.0-1-1")].into_iter().collect());
    }

    #[test]
    fn test_group_becomes_search_layer() {
        let repo = repo();
        let db = MemoryDatabase::new();
        // foo is found inside group-os, not at the newest version on the label
        let set = compile("install group-os\ninstall foo\n", &repo, &db);
        assert!(set.install.contains(&tup("foo=/repo@rpl:2/1.0-1-1")));
        assert!(!set.contains(&tup("foo=/repo@rpl:2/2.0-1-1")));
    }

    #[test]
    fn test_search_label_line() {
        let repo = repo();
        let db = MemoryDatabase::new();
        let set = compile("search repo@rpl:devel\ninstall baz\n", &repo, &db);
        assert!(set.install.contains(&tup("baz=/repo@rpl:devel/3.0-1-1")));
    }

    #[test]
    fn test_erase_and_offer() {
        let repo = repo();
        let db = MemoryDatabase::new();
        let set = compile("install foo bar\nerase foo\noffer baz=repo@rpl:devel\n", &repo, &db);
        assert_eq!(set.install, [tup("bar=/repo@rpl:2/1.0-1-1")].into_iter().collect());
        assert!(set.optional.contains(&tup("foo=/repo@rpl:2/2.0-1-1")));
        assert!(set.optional.contains(&tup("baz=/repo@rpl:devel/3.0-1-1")));
    }

    #[test]
    fn test_update_within_working_set() {
        let repo = repo();
        let db = MemoryDatabase::new();
        let set = compile("install foo=1.0\nupdate foo\n", &repo, &db);
        assert!(set.install.contains(&tup("foo=/repo@rpl:2/2.0-1-1")));
        assert!(!set.install.contains(&tup("foo=/repo@rpl:2/1.0-1-1")));
    }

    #[test]
    fn test_include_prefers_working_set_version() {
        let mut repo = repo();
        let mut old = Trove::new(tup("group-inc=/repo@rpl:2/1.0:1.0-1-1"));
        old.files.insert("/etc/conary/system-model.cml".into(), "install bar\n".into());
        repo.add(old);
        let mut new = Trove::new(tup("group-inc=/repo@rpl:2/2.0:2.0-1-1"));
        new.files.insert("/etc/conary/system-model.cml".into(), "install foo\n".into());
        repo.add(new);
        let db = MemoryDatabase::new();
        let mut cache = TroveCache::new(&repo, &db);
        let mut graph = OperationGraph::new();
        let search = graph.add_repository(LabelPath::parse("repo@rpl:2").unwrap());
        // an earlier install already selected the older group
        let working = graph.add_static(TroveSet::from_install([tup("group-inc=/repo@rpl:2/1.0-1-1")]));

        let model = SystemModel::parse("include group-inc\n").unwrap();
        let compiled = ModelCompiler::default().augment(&mut graph, &model, search, working).unwrap();
        graph.realize(&mut ActionData::new(&mut cache, Vec::new())).unwrap();

        let set = graph.contents(compiled.final_set);
        assert!(set.install.contains(&tup("bar=/repo@rpl:2/1.0-1-1")));
        assert!(!set.contains(&tup("foo=/repo@rpl:2/2.0-1-1")));
    }

    #[test]
    fn test_unknown_spec_fails() {
        let repo = repo();
        let db = MemoryDatabase::new();
        let mut cache = TroveCache::new(&repo, &db);
        let mut graph = OperationGraph::new();
        let search = graph.add_repository(LabelPath::parse("repo@rpl:2").unwrap());
        let working = graph.add_static(TroveSet::new());
        let model = SystemModel::parse("install nosuch\n").unwrap();
        ModelCompiler::default().augment(&mut graph, &model, search, working).unwrap();
        let err = graph.realize(&mut ActionData::new(&mut cache, Vec::new())).unwrap_err();
        assert!(matches!(err, Error::SpecsNotFound { .. }));
    }
}
