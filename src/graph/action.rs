// src/graph/action.rs

//! Actions computing delayed nodes

use super::{ActionData, NodeId, NodeKind, OperationGraph, TroveSet};
use crate::error::{Error, Result};
use crate::model::{ModelCompiler, SystemModel};
use crate::source::FindResults;
use crate::trove::{TroveSpec, TroveTuple, diff_troves};
use crate::update::redirect::follow_redirects;
use std::collections::{BTreeMap, BTreeSet};
use strum_macros::{Display, IntoStaticStr};
use tracing::debug;

/// How a delayed node is computed from its parents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Preload trove metadata for the parent (`all`: recursively)
    Fetch { all: bool },
    /// Preload everything the final walk will read
    FinalFetch,
    /// Search the parent for specs
    Find {
        specs: Vec<TroveSpec>,
        follow_redirects: bool,
    },
    /// Union of all parents; install wins over optional
    Union,
    /// Parent 0 with the members of parent 1 made optional
    Remove,
    /// Parent 0 with the members of parent 1 offered as optional
    Optional,
    /// Parent 0 with members replaced by name from parent 1, but only
    /// forward in time and never adding names
    Patch,
    /// Parent 0 with members replaced by name from parent 1
    Update,
    /// Compile the model shipped in the trove `spec` finds
    Include {
        spec: TroveSpec,
        ancestors: Vec<String>,
        placeholder: NodeId,
    },
}

/// Grouping key for evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    Static,
    SearchPath,
    Fetch,
    FinalFetch,
    Find,
    Union,
    Remove,
    Optional,
    Patch,
    Update,
    Include,
}

impl ActionKind {
    /// Kinds evaluated with one call across every ready node
    pub fn is_batched(&self) -> bool {
        matches!(self, ActionKind::Fetch | ActionKind::FinalFetch | ActionKind::Find)
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Fetch { .. } => ActionKind::Fetch,
            Action::FinalFetch => ActionKind::FinalFetch,
            Action::Find { .. } => ActionKind::Find,
            Action::Union => ActionKind::Union,
            Action::Remove => ActionKind::Remove,
            Action::Optional => ActionKind::Optional,
            Action::Patch => ActionKind::Patch,
            Action::Update => ActionKind::Update,
            Action::Include { .. } => ActionKind::Include,
        }
    }
}

/// Outcome of evaluating one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Done,
    /// New nodes were added; the schedule must be derived again
    GraphChanged,
}

impl OperationGraph {
    fn action_of(&self, id: NodeId) -> Option<Action> {
        match self.kind(id) {
            NodeKind::Delayed(action) => Some(action.clone()),
            _ => None,
        }
    }

    fn parent_contents(&self, id: NodeId, idx: usize) -> Result<TroveSet> {
        let parent = self
            .parents(id)
            .get(idx)
            .ok_or_else(|| Error::Update(format!("node {} is missing input {}", id, idx)))?;
        Ok(self.contents(*parent).clone())
    }

    pub(super) fn evaluate_batch(&mut self, kind: super::ActionKind, ids: &[NodeId], data: &mut ActionData<'_, '_>) -> Result<()> {
        match kind {
            ActionKind::Fetch | ActionKind::FinalFetch => self.evaluate_fetches(ids, data),
            ActionKind::Find => self.evaluate_finds(ids, data),
            _ => {
                for id in ids {
                    self.evaluate(*id, data)?;
                }
                Ok(())
            }
        }
    }

    fn evaluate_fetches(&mut self, ids: &[NodeId], data: &mut ActionData<'_, '_>) -> Result<()> {
        let mut shallow: BTreeSet<TroveTuple> = BTreeSet::new();
        let mut deep: BTreeSet<TroveTuple> = BTreeSet::new();
        for id in ids {
            let input = self.parent_contents(*id, 0)?;
            let recursive = !matches!(self.action_of(*id), Some(Action::Fetch { all: false }));
            if recursive {
                deep.extend(input.all());
            } else {
                shallow.extend(input.all());
            }
            self.set_contents(*id, input);
        }

        let first: Vec<TroveTuple> = shallow.union(&deep).cloned().collect();
        data.cache.cache_troves(&first)?;

        // one level per round for the recursive fetches
        let mut seen = deep.clone();
        let mut frontier: Vec<TroveTuple> = deep.into_iter().collect();
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for tuple in &frontier {
                if let Some(trove) = data.cache.trove(tuple) {
                    for r in trove.strong_refs() {
                        if r.tuple.is_collection() && seen.insert(r.tuple.clone()) {
                            next.push(r.tuple.clone());
                        }
                    }
                }
            }
            data.cache.cache_troves(&next)?;
            frontier = next;
        }
        Ok(())
    }

    fn evaluate_finds(&mut self, ids: &[NodeId], data: &mut ActionData<'_, '_>) -> Result<()> {
        // one search per distinct input node
        let mut by_input: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for id in ids {
            let input = *self
                .parents(*id)
                .first()
                .ok_or_else(|| Error::Update(format!("find node {} has no search input", id)))?;
            by_input.entry(input).or_default().push(*id);
        }

        for (input, nodes) in by_input {
            let mut specs: BTreeSet<TroveSpec> = BTreeSet::new();
            for id in &nodes {
                if let Some(Action::Find { specs: s, .. }) = self.action_of(*id) {
                    specs.extend(s);
                }
            }
            let specs: Vec<TroveSpec> = specs.into_iter().collect();
            let results = self.search_node(input, &specs, data)?;
            self.check_found(input, &results, data)?;

            for id in nodes {
                let Some(Action::Find {
                    specs,
                    follow_redirects: follow,
                }) = self.action_of(id)
                else {
                    continue;
                };
                let mut install = BTreeSet::new();
                for spec in &specs {
                    for tuple in results.get(spec).into_iter().flatten() {
                        if follow {
                            install.extend(follow_redirects(data.cache, tuple, &data.flavors)?);
                        } else {
                            install.insert(tuple.clone());
                        }
                    }
                }
                self.set_contents(id, TroveSet::from_install(install));
            }
        }
        Ok(())
    }

    /// Fail on specs that matched nothing, reporting alternate flavors
    fn check_found(&self, input: NodeId, results: &FindResults, data: &mut ActionData<'_, '_>) -> Result<()> {
        let missing: Vec<&TroveSpec> = results
            .iter()
            .filter(|(_, found)| found.is_empty())
            .map(|(s, _)| s)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let mut alternates = Vec::new();
        let flavored: Vec<TroveSpec> = missing
            .iter()
            .filter(|s| s.flavor.is_some())
            .map(|s| s.without_flavor())
            .collect();
        if !flavored.is_empty() {
            for (spec, found) in self.search_node(input, &flavored, data)? {
                if !found.is_empty() {
                    alternates.push((spec.to_string(), found.iter().map(|t| t.to_string()).collect()));
                }
            }
        }

        Err(Error::SpecsNotFound {
            specs: missing.iter().map(|s| s.to_string()).collect(),
            alternates,
        })
    }

    pub(super) fn evaluate(&mut self, id: NodeId, data: &mut ActionData<'_, '_>) -> Result<super::Evaluation> {
        let action = match self.kind(id) {
            NodeKind::Delayed(action) => action.clone(),
            // search paths and static nodes carry no computation
            _ => return Ok(Evaluation::Done),
        };

        let contents = match action {
            Action::Fetch { .. } | Action::FinalFetch | Action::Find { .. } => {
                self.evaluate_batch(action.kind(), &[id], data)?;
                return Ok(Evaluation::Done);
            }
            Action::Union => {
                let mut out = TroveSet::new();
                for parent in self.parents(id) {
                    out.optional.extend(self.contents(*parent).optional.iter().cloned());
                }
                for parent in self.parents(id) {
                    out.install.extend(self.contents(*parent).install.iter().cloned());
                }
                out.optional = out.optional.difference(&out.install).cloned().collect();
                out
            }
            Action::Remove => {
                let base = self.parent_contents(id, 0)?;
                let removed = self.parent_contents(id, 1)?.all();
                TroveSet {
                    install: base.install.difference(&removed).cloned().collect(),
                    optional: base.optional.union(&removed).cloned().collect(),
                }
            }
            Action::Optional => {
                let base = self.parent_contents(id, 0)?;
                let offered = self.parent_contents(id, 1)?.all();
                let optional: BTreeSet<TroveTuple> = base.optional.union(&offered).cloned().collect();
                TroveSet {
                    optional: optional.difference(&base.install).cloned().collect(),
                    install: base.install,
                }
            }
            Action::Update => {
                let base = self.parent_contents(id, 0)?;
                let updates = self.parent_contents(id, 1)?;
                let mut replacements: BTreeMap<TroveTuple, (bool, bool)> =
                    updates.optional.into_iter().map(|t| (t, (false, true))).collect();
                replacements.extend(updates.install.into_iter().map(|t| (t, (true, true))));
                replace_by_name(&base, &replacements, false, data)?
            }
            Action::Patch => {
                let base = self.parent_contents(id, 0)?;
                let patches = self.parent_contents(id, 1)?;
                let walked: BTreeMap<TroveTuple, (bool, bool)> = patches
                    .walk(data.cache, true)?
                    .into_iter()
                    .map(|e| (e.tuple, (e.in_install, e.explicit)))
                    .collect();
                replace_by_name(&base, &walked, true, data)?
            }
            Action::Include {
                spec,
                ancestors,
                placeholder,
            } => return self.evaluate_include(id, spec, ancestors, placeholder, data),
        };

        self.set_contents(id, contents);
        Ok(Evaluation::Done)
    }

    fn evaluate_include(
        &mut self,
        id: NodeId,
        spec: TroveSpec,
        ancestors: Vec<String>,
        placeholder: NodeId,
        data: &mut ActionData<'_, '_>,
    ) -> Result<Evaluation> {
        let search = *self
            .parents(id)
            .first()
            .ok_or_else(|| Error::Include(format!("include of {} has no search input", spec)))?;
        let mut results = match self.parents(id).get(1) {
            Some(&working) => self.search_node(working, std::slice::from_ref(&spec), data)?,
            None => FindResults::new(),
        };
        if results.get(&spec).is_none_or(|found| found.is_empty()) {
            results = self.search_node(search, std::slice::from_ref(&spec), data)?;
            self.check_found(search, &results, data)?;
        }
        let tuple = results
            .get(&spec)
            .and_then(|found| found.first())
            .cloned()
            .ok_or_else(|| Error::TroveNotFound(spec.to_string()))?;

        if ancestors.contains(&tuple.name) {
            return Err(Error::Include(format!(
                "Include loop detected involving {}",
                tuple.name
            )));
        }
        if !data.included.insert(tuple.clone()) {
            return Err(Error::Include(format!("{} is included more than once", tuple)));
        }

        let path = data
            .cache
            .get_trove(&tuple)?
            .files
            .keys()
            .find(|p| p.ends_with(".cml"))
            .cloned()
            .ok_or_else(|| Error::Include(format!("{} does not contain a system model", tuple)))?;
        let text = data
            .cache
            .get_file_contents(&tuple, &path)?
            .ok_or_else(|| Error::Include(format!("{} could not be read from {}", path, tuple)))?;
        let model = SystemModel::parse(&text).map_err(|e| Error::Include(format!("{} in {}: {}", path, tuple, e)))?;

        debug!("including {} from {}", path, tuple);
        let mut nested_ancestors = ancestors;
        nested_ancestors.push(tuple.name.clone());
        let working = self.add_static(TroveSet::new());
        let compiled = ModelCompiler::new(nested_ancestors).augment(self, &model, search, working)?;

        // this node becomes a union over the included final set
        self.nodes[id.0].kind = NodeKind::Delayed(Action::Union);
        self.nodes[id.0].parents = vec![compiled.final_set];

        self.nodes[placeholder.0].kind = NodeKind::SearchPath(compiled.search_path.clone());
        for layer in compiled.search_path {
            self.add_edge(layer, placeholder);
        }
        Ok(Evaluation::GraphChanged)
    }
}

/// Replace members of `base` by name with tuples from `replacements`
///
/// `replacements` maps each tuple to whether it is in its set's install
/// half and whether that set names it directly. Removed and added tuples
/// are paired by [`diff_troves`]. A paired replacement is installed when
/// what it replaces was installed, or (for updates) when it is itself an
/// explicit install; members reached through collections are masked by
/// making them optional. With `patch`, pairs moving backward in time are
/// skipped and unpaired replacements only become optional.
fn replace_by_name(
    base: &TroveSet,
    replacements: &BTreeMap<TroveTuple, (bool, bool)>,
    patch: bool,
    data: &mut ActionData<'_, '_>,
) -> Result<TroveSet> {
    let names: BTreeSet<&str> = replacements.keys().map(|t| t.name.as_str()).collect();
    let walked = base.walk(data.cache, true)?;
    let status: BTreeMap<TroveTuple, bool> = walked
        .into_iter()
        .filter(|e| names.contains(e.tuple.name.as_str()))
        .map(|e| (e.tuple, e.in_install))
        .collect();

    let mut out = base.clone();
    let diff = diff_troves(status.keys(), replacements.keys());
    for (old, new) in diff.updates {
        if patch && !new.version.is_newer_than(&old.version) {
            continue;
        }
        let was_installed = status.get(&old).copied().unwrap_or(false);
        let (in_install, explicit) = replacements.get(&new).copied().unwrap_or((false, false));
        out.install.remove(&old);
        out.optional.insert(old);
        if was_installed || (!patch && explicit && in_install) {
            out.install.insert(new.clone());
            out.optional.remove(&new);
        } else if !out.install.contains(&new) {
            out.optional.insert(new);
        }
    }
    for new in diff.installs {
        let (in_install, explicit) = replacements.get(&new).copied().unwrap_or((false, false));
        if patch {
            if !out.install.contains(&new) {
                out.optional.insert(new);
            }
        } else if explicit && in_install {
            out.optional.remove(&new);
            out.install.insert(new);
        } else if explicit && !out.install.contains(&new) {
            out.optional.insert(new);
        }
    }
    Ok(out)
}
