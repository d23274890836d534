// src/resolver/method.rs

//! Resolution methods
//!
//! A method is asked to prepare for a list of unsatisfied requirements,
//! then to produce candidate providers, then to pick among them. Methods
//! that work in rounds (one label at a time) keep their position between
//! calls and start over whenever the requirement list changes.

use super::{Requirement, SuggestionMap, Suggestions, select_resolution_trove};
use crate::cache::TroveCache;
use crate::dependencies::DependencySet;
use crate::error::Result;
use crate::flavor::FlavorSpec;
use crate::graph::TroveSet;
use crate::label::{Label, LabelPath};
use crate::trove::TroveTuple;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strum_macros::{Display, EnumString};
use tracing::{debug, warn};

/// How the install label path is walked during resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LabelPathMode {
    /// Every version on each label
    #[default]
    All,
    /// Only the newest trove of each branch, for each label, then every
    /// version for each label
    LeavesFirst,
    /// Only the newest trove of each branch
    LeavesOnly,
}

/// A strategy for finding troves that satisfy requirements
pub trait ResolveMethod {
    fn name(&self) -> String;

    /// Get ready to resolve `requirements`; false when this method has
    /// nothing left to try for them
    fn prepare_for_resolution(&mut self, requirements: &[Requirement]) -> bool;

    /// Candidate providers for the prepared requirements
    fn resolve_dependencies(&mut self, cache: &mut TroveCache<'_>) -> Result<Suggestions>;

    /// Choose troves to add from `suggestions`, recording each choice
    /// under the trove that needed it
    fn filter_suggestions(
        &mut self,
        cache: &mut TroveCache<'_>,
        requirements: &[Requirement],
        suggestions: &Suggestions,
        accumulator: &mut SuggestionMap,
        flavors: &[FlavorSpec],
    ) -> Vec<TroveTuple> {
        pick_suggestions(cache, requirements, suggestions, accumulator, flavors)
    }

    /// The methods this one is made of, in order
    fn flatten(self: Box<Self>) -> Vec<Box<dyn ResolveMethod>>;
}

/// One pick per dependency, skipping dependencies with no acceptable candidate
pub(crate) fn pick_suggestions(
    cache: &mut TroveCache<'_>,
    requirements: &[Requirement],
    suggestions: &Suggestions,
    accumulator: &mut SuggestionMap,
    flavors: &[FlavorSpec],
) -> Vec<TroveTuple> {
    let installed = cache.installed();
    let mut picked: BTreeSet<TroveTuple> = BTreeSet::new();

    for req in requirements {
        let Some(per_dep) = suggestions.get(&req.deps) else {
            continue;
        };
        for candidates in per_dep {
            let not_installed: Vec<TroveTuple> =
                candidates.iter().filter(|c| !installed.has_trove(c)).cloned().collect();
            if not_installed.len() < candidates.len() {
                // an installed provider already exists for this dependency
                continue;
            }
            let Some(choice) = select_resolution_trove(installed, &req.required_by, &not_installed, flavors) else {
                continue;
            };
            let entry = accumulator.entry(req.required_by.clone()).or_default();
            if !entry.contains(&choice) {
                entry.push(choice.clone());
            }
            picked.insert(choice);
        }
    }
    picked.into_iter().collect()
}

fn requirement_sets(requirements: &[Requirement]) -> Vec<DependencySet> {
    let sets: BTreeSet<DependencySet> = requirements.iter().map(|r| r.deps.clone()).collect();
    sets.into_iter().collect()
}

/// Merge a later round's candidates in where earlier rounds found nothing
fn merge_suggestions(into: &mut Suggestions, from: Suggestions) {
    for (deps, per_dep) in from {
        match into.get_mut(&deps) {
            None => {
                into.insert(deps, per_dep);
            }
            Some(existing) => {
                for (slot, found) in existing.iter_mut().zip(per_dep) {
                    if slot.is_empty() {
                        *slot = found;
                    }
                }
            }
        }
    }
}

/// Keep only the newest candidate from each branch
fn leaves(per_dep: Vec<Vec<TroveTuple>>) -> Vec<Vec<TroveTuple>> {
    per_dep
        .into_iter()
        .map(|candidates| {
            let mut newest: BTreeMap<(String, String, String), TroveTuple> = BTreeMap::new();
            for c in candidates {
                let key = (c.name.clone(), c.branch().to_string(), c.flavor.body());
                match newest.get(&key) {
                    Some(cur) if !c.version.is_newer_than(&cur.version) => {}
                    _ => {
                        newest.insert(key, c);
                    }
                }
            }
            newest.into_values().collect()
        })
        .collect()
}

fn query_label(
    cache: &mut TroveCache<'_>,
    label: &Label,
    requirements: &[DependencySet],
    leaves_only: bool,
) -> Result<Suggestions> {
    let found = cache.resolve_dependencies(label, requirements)?;
    Ok(requirements
        .iter()
        .cloned()
        .zip(found)
        .map(|(deps, per_dep)| (deps, if leaves_only { leaves(per_dep) } else { per_dep }))
        .collect())
}

/// Offer providers from `troves` for each dependency
fn providers_among(cache: &mut TroveCache<'_>, troves: &[TroveTuple], requirements: &[DependencySet]) -> Result<Suggestions> {
    cache.cache_troves(troves)?;
    let deps = cache.get_deps_for_trove_list(troves)?;
    let mut out = Suggestions::new();
    for req in requirements {
        let per_dep = req
            .iter()
            .map(|dep| {
                troves
                    .iter()
                    .zip(&deps)
                    .filter(|(_, (provides, _))| provides.provides(dep))
                    .map(|(t, _)| t.clone())
                    .collect()
            })
            .collect();
        out.insert(req.clone(), per_dep);
    }
    Ok(out)
}

// === BasicResolution ===

/// Search every label of the path at once, in a single round
#[derive(Debug, Clone)]
pub struct BasicResolution {
    label_path: LabelPath,
    pending: Vec<DependencySet>,
    tried: Option<Vec<DependencySet>>,
}

impl BasicResolution {
    pub fn new(label_path: LabelPath) -> Self {
        Self {
            label_path,
            pending: Vec::new(),
            tried: None,
        }
    }
}

impl ResolveMethod for BasicResolution {
    fn name(&self) -> String {
        format!("label path {}", self.label_path)
    }

    fn prepare_for_resolution(&mut self, requirements: &[Requirement]) -> bool {
        let sets = requirement_sets(requirements);
        if self.tried.as_ref() == Some(&sets) {
            return false;
        }
        self.pending = sets.clone();
        self.tried = Some(sets);
        true
    }

    fn resolve_dependencies(&mut self, cache: &mut TroveCache<'_>) -> Result<Suggestions> {
        let mut out = Suggestions::new();
        for label in &self.label_path {
            merge_suggestions(&mut out, query_label(cache, label, &self.pending, false)?);
        }
        Ok(out)
    }

    fn flatten(self: Box<Self>) -> Vec<Box<dyn ResolveMethod>> {
        vec![self]
    }
}

// === ByLabelPath ===

/// Search the install label path one label per round
#[derive(Debug, Clone)]
pub struct ByLabelPath {
    label_path: LabelPath,
    mode: LabelPathMode,
    /// (label, leaves only)
    rounds: Vec<(Label, bool)>,
    index: usize,
    pending: Vec<DependencySet>,
    last: Option<Vec<DependencySet>>,
}

impl ByLabelPath {
    pub fn new(label_path: LabelPath, mode: LabelPathMode) -> Self {
        let labels: Vec<Label> = label_path.iter().cloned().collect();
        let rounds = match mode {
            LabelPathMode::All => labels.into_iter().map(|l| (l, false)).collect(),
            LabelPathMode::LeavesOnly => labels.into_iter().map(|l| (l, true)).collect(),
            LabelPathMode::LeavesFirst => labels
                .iter()
                .map(|l| (l.clone(), true))
                .chain(labels.iter().map(|l| (l.clone(), false)))
                .collect(),
        };
        Self {
            label_path,
            mode,
            rounds,
            index: 0,
            pending: Vec::new(),
            last: None,
        }
    }
}

impl ResolveMethod for ByLabelPath {
    fn name(&self) -> String {
        format!("label path {} ({})", self.label_path, self.mode)
    }

    fn prepare_for_resolution(&mut self, requirements: &[Requirement]) -> bool {
        let sets = requirement_sets(requirements);
        if self.last.as_ref() == Some(&sets) {
            self.index += 1;
        } else {
            self.index = 0;
            self.last = Some(sets.clone());
        }
        self.pending = sets;
        self.index < self.rounds.len()
    }

    fn resolve_dependencies(&mut self, cache: &mut TroveCache<'_>) -> Result<Suggestions> {
        let Some((label, leaves_only)) = self.rounds.get(self.index).cloned() else {
            return Ok(Suggestions::new());
        };
        debug!(
            "resolving {} requirement set(s) on {}{}",
            self.pending.len(),
            label,
            if leaves_only { " (leaves)" } else { "" }
        );
        match query_label(cache, &label, &self.pending, leaves_only) {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!("dependency lookup on {} failed: {}", label, e);
                Ok(Suggestions::new())
            }
        }
    }

    fn flatten(self: Box<Self>) -> Vec<Box<dyn ResolveMethod>> {
        vec![self]
    }
}

// === ByTroveList ===

/// Resolve only against an explicit list of troves
#[derive(Debug, Clone)]
pub struct ByTroveList {
    troves: Vec<TroveTuple>,
    pending: Vec<DependencySet>,
    tried: Option<Vec<DependencySet>>,
}

impl ByTroveList {
    pub fn new(troves: Vec<TroveTuple>) -> Self {
        Self {
            troves,
            pending: Vec::new(),
            tried: None,
        }
    }
}

impl ResolveMethod for ByTroveList {
    fn name(&self) -> String {
        format!("list of {} trove(s)", self.troves.len())
    }

    fn prepare_for_resolution(&mut self, requirements: &[Requirement]) -> bool {
        let sets = requirement_sets(requirements);
        if self.troves.is_empty() || self.tried.as_ref() == Some(&sets) {
            return false;
        }
        self.pending = sets.clone();
        self.tried = Some(sets);
        true
    }

    fn resolve_dependencies(&mut self, cache: &mut TroveCache<'_>) -> Result<Suggestions> {
        providers_among(cache, &self.troves, &self.pending)
    }

    fn flatten(self: Box<Self>) -> Vec<Box<dyn ResolveMethod>> {
        vec![self]
    }
}

// === ByTroveSet ===

/// Resolve against the members of a trove set, remembering solutions
/// under the set's signature
#[derive(Debug, Clone)]
pub struct ByTroveSet {
    set: TroveSet,
    signature: String,
    pending: Vec<DependencySet>,
    tried: Option<Vec<DependencySet>>,
}

impl ByTroveSet {
    pub fn new(set: TroveSet) -> Self {
        let signature = set.signature();
        Self {
            set,
            signature,
            pending: Vec::new(),
            tried: None,
        }
    }
}

impl ResolveMethod for ByTroveSet {
    fn name(&self) -> String {
        format!("trove set {}", &self.signature[..12.min(self.signature.len())])
    }

    fn prepare_for_resolution(&mut self, requirements: &[Requirement]) -> bool {
        let sets = requirement_sets(requirements);
        if self.set.is_empty() || self.tried.as_ref() == Some(&sets) {
            return false;
        }
        self.pending = sets.clone();
        self.tried = Some(sets);
        true
    }

    fn resolve_dependencies(&mut self, cache: &mut TroveCache<'_>) -> Result<Suggestions> {
        let mut out = Suggestions::new();
        let mut unsolved = Vec::new();
        for req in &self.pending {
            match cache.get_dep_solution(&self.signature, req) {
                Some(solution) => {
                    out.insert(req.clone(), solution.clone());
                }
                None => unsolved.push(req.clone()),
            }
        }
        if unsolved.is_empty() {
            return Ok(out);
        }

        let members: Vec<TroveTuple> = self.set.walk(cache, true)?.into_iter().map(|e| e.tuple).collect();
        for (req, solution) in providers_among(cache, &members, &unsolved)? {
            cache.add_dep_solution(&self.signature, req.clone(), solution.clone());
            out.insert(req, solution);
        }
        Ok(out)
    }

    fn flatten(self: Box<Self>) -> Vec<Box<dyn ResolveMethod>> {
        vec![self]
    }
}

// === ResolutionStack ===

/// Methods tried in order; a later method only runs once every earlier
/// one has nothing left to try for the current requirements
pub struct ResolutionStack {
    methods: Vec<Box<dyn ResolveMethod>>,
    current: usize,
    last: Option<Vec<DependencySet>>,
}

impl ResolutionStack {
    pub fn new(methods: Vec<Box<dyn ResolveMethod>>) -> Self {
        Self {
            methods: methods.into_iter().flat_map(|m| m.flatten()).collect(),
            current: 0,
            last: None,
        }
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl ResolveMethod for ResolutionStack {
    fn name(&self) -> String {
        let names: Vec<String> = self.methods.iter().map(|m| m.name()).collect();
        format!("stack [{}]", names.join(", "))
    }

    fn prepare_for_resolution(&mut self, requirements: &[Requirement]) -> bool {
        let sets = requirement_sets(requirements);
        if self.last.as_ref() != Some(&sets) {
            self.current = 0;
            self.last = Some(sets);
        }
        while let Some(method) = self.methods.get_mut(self.current) {
            if method.prepare_for_resolution(requirements) {
                return true;
            }
            self.current += 1;
        }
        false
    }

    fn resolve_dependencies(&mut self, cache: &mut TroveCache<'_>) -> Result<Suggestions> {
        match self.methods.get_mut(self.current) {
            Some(method) => method.resolve_dependencies(cache),
            None => Ok(Suggestions::new()),
        }
    }

    fn filter_suggestions(
        &mut self,
        cache: &mut TroveCache<'_>,
        requirements: &[Requirement],
        suggestions: &Suggestions,
        accumulator: &mut SuggestionMap,
        flavors: &[FlavorSpec],
    ) -> Vec<TroveTuple> {
        match self.methods.get_mut(self.current) {
            Some(method) => method.filter_suggestions(cache, requirements, suggestions, accumulator, flavors),
            None => Vec::new(),
        }
    }

    fn flatten(self: Box<Self>) -> Vec<Box<dyn ResolveMethod>> {
        self.methods
    }
}
