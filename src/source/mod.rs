// src/source/mod.rs

//! Trove sources and installed state
//!
//! The planner never talks to a repository or a database directly. It
//! consumes two capabilities:
//!
//! - [`TroveSource`]: something that can hand out trove metadata, search
//!   for trove specs on a label path and list troves providing dependencies
//!   (a repository, a changeset, a stack of those)
//! - [`InstalledState`]: the local system's view of installed troves,
//!   containment, pins and file path hashes
//!
//! [`SourceStack`] composes several trove sources, trying them in order.

pub mod memory;

pub use memory::{MemoryDatabase, MemoryRepository};

use crate::dependencies::DependencySet;
use crate::error::Result;
use crate::flavor::FlavorSpec;
use crate::label::{Label, LabelPath};
use crate::trove::{PathHashes, Trove, TroveSpec, TroveTuple};
use std::collections::{BTreeMap, BTreeSet};

/// Results of a find: every requested spec maps to its matches (possibly none)
pub type FindResults = BTreeMap<TroveSpec, Vec<TroveTuple>>;

/// Results of a dependency search: for each requirement set, one list of
/// providing troves per dependency in the set (in set order)
pub type ResolveResults = BTreeMap<DependencySet, Vec<Vec<TroveTuple>>>;

/// (provides, requires) for one trove
pub type DepPair = (DependencySet, DependencySet);

/// Read access to trove metadata
pub trait TroveSource {
    /// Fetch troves; missing ones are `None`
    fn get_troves(&self, tuples: &[TroveTuple]) -> Result<Vec<Option<Trove>>>;

    fn has_troves(&self, tuples: &[TroveTuple]) -> Result<Vec<bool>> {
        Ok(self.get_troves(tuples)?.iter().map(Option::is_some).collect())
    }

    /// Provided and required dependencies of each tuple
    fn get_deps_for_trove_list(&self, tuples: &[TroveTuple]) -> Result<Vec<DepPair>> {
        Ok(self
            .get_troves(tuples)?
            .into_iter()
            .map(|t| match t {
                Some(trv) => (trv.effective_provides(), trv.requires),
                None => (DependencySet::new(), DependencySet::new()),
            })
            .collect())
    }

    /// Search for each spec on the label path, filtered by `flavor`
    fn find_troves(&self, label_path: &LabelPath, specs: &[TroveSpec], flavor: &FlavorSpec) -> Result<FindResults>;

    /// Troves on `label` providing each dependency of each requirement set
    fn resolve_dependencies(&self, label: &Label, requirements: &[DependencySet]) -> Result<ResolveResults>;

    /// Contents of a text file shipped in a trove
    fn get_file_contents(&self, tuple: &TroveTuple, path: &str) -> Result<Option<String>> {
        Ok(self
            .get_troves(std::slice::from_ref(tuple))?
            .into_iter()
            .next()
            .flatten()
            .and_then(|trv| trv.files.get(path).cloned()))
    }
}

/// Installed troves partitioned by how collections reference them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompleteTroveSet {
    /// Installed, and no installed collection references them
    pub installed_not_referenced: BTreeSet<TroveTuple>,
    /// Installed and referenced by an installed collection
    pub installed_and_referenced: BTreeSet<TroveTuple>,
    /// Strongly referenced by an installed collection but not installed
    pub referenced_strong: BTreeSet<TroveTuple>,
    /// Only weakly referenced and not installed
    pub referenced_weak: BTreeSet<TroveTuple>,
}

impl CompleteTroveSet {
    pub fn is_referenced_not_installed(&self, tuple: &TroveTuple) -> bool {
        self.referenced_strong.contains(tuple) || self.referenced_weak.contains(tuple)
    }
}

/// The installed system
pub trait InstalledState {
    /// Every installed tuple, with its pin flag
    fn iter_all_troves(&self) -> Vec<(TroveTuple, bool)>;

    fn get_troves(&self, tuples: &[TroveTuple]) -> Result<Vec<Option<Trove>>>;

    /// Installed collections that include each tuple
    fn get_trove_containers(&self, tuples: &[TroveTuple]) -> Vec<Vec<TroveTuple>>;

    fn get_path_hashes_for_trove_list(&self, tuples: &[TroveTuple]) -> Vec<PathHashes>;

    fn troves_are_pinned(&self, tuples: &[TroveTuple]) -> Vec<bool>;

    /// Partition everything named `names` (installed or referenced)
    fn get_complete_trove_set(&self, names: &[String]) -> CompleteTroveSet;

    fn troves_by_name(&self, name: &str) -> Vec<TroveTuple> {
        self.iter_all_troves()
            .into_iter()
            .map(|(t, _)| t)
            .filter(|t| t.name == name)
            .collect()
    }

    fn has_trove(&self, tuple: &TroveTuple) -> bool {
        self.iter_all_troves().iter().any(|(t, _)| t == tuple)
    }

    fn get_deps_for_trove_list(&self, tuples: &[TroveTuple]) -> Result<Vec<DepPair>> {
        Ok(self
            .get_troves(tuples)?
            .into_iter()
            .map(|t| match t {
                Some(trv) => (trv.effective_provides(), trv.requires),
                None => (DependencySet::new(), DependencySet::new()),
            })
            .collect())
    }

    /// Installed troves matching each spec; label paths do not apply
    fn find_installed(&self, specs: &[TroveSpec]) -> Result<FindResults> {
        let all = self.iter_all_troves();
        let mut results = FindResults::new();
        for spec in specs {
            let selector = spec.selector()?;
            let matches: Vec<TroveTuple> = all
                .iter()
                .map(|(t, _)| t)
                .filter(|t| t.name == spec.name)
                .filter(|t| selector.matches(&t.version, t.version.trailing_label()))
                .filter(|t| spec.flavor.as_ref().is_none_or(|f| f.is_empty() || f.satisfies(&t.flavor)))
                .cloned()
                .collect();
            results.insert(spec.clone(), matches);
        }
        Ok(results)
    }
}

/// An ordered list of trove sources, tried first to last
#[derive(Default)]
pub struct SourceStack {
    sources: Vec<Box<dyn TroveSource>>,
}

impl SourceStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: Box<dyn TroveSource>) {
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl TroveSource for SourceStack {
    fn get_troves(&self, tuples: &[TroveTuple]) -> Result<Vec<Option<Trove>>> {
        let mut results: Vec<Option<Trove>> = vec![None; tuples.len()];
        for source in &self.sources {
            let missing: Vec<usize> = (0..tuples.len()).filter(|i| results[*i].is_none()).collect();
            if missing.is_empty() {
                break;
            }
            let wanted: Vec<TroveTuple> = missing.iter().map(|i| tuples[*i].clone()).collect();
            for (idx, trv) in missing.into_iter().zip(source.get_troves(&wanted)?) {
                results[idx] = trv;
            }
        }
        Ok(results)
    }

    fn find_troves(&self, label_path: &LabelPath, specs: &[TroveSpec], flavor: &FlavorSpec) -> Result<FindResults> {
        let mut results: FindResults = specs.iter().map(|s| (s.clone(), Vec::new())).collect();
        for source in &self.sources {
            let missing: Vec<TroveSpec> = results
                .iter()
                .filter(|(_, found)| found.is_empty())
                .map(|(spec, _)| spec.clone())
                .collect();
            if missing.is_empty() {
                break;
            }
            for (spec, found) in source.find_troves(label_path, &missing, flavor)? {
                if !found.is_empty() {
                    results.insert(spec, found);
                }
            }
        }
        Ok(results)
    }

    fn resolve_dependencies(&self, label: &Label, requirements: &[DependencySet]) -> Result<ResolveResults> {
        let mut results = ResolveResults::new();
        for source in &self.sources {
            let missing: Vec<DependencySet> = requirements
                .iter()
                .filter(|r| !results.contains_key(*r))
                .cloned()
                .collect();
            if missing.is_empty() {
                break;
            }
            for (req, providers) in source.resolve_dependencies(label, &missing)? {
                if providers.iter().any(|p| !p.is_empty()) {
                    results.insert(req, providers);
                }
            }
        }
        Ok(results)
    }

    fn get_file_contents(&self, tuple: &TroveTuple, path: &str) -> Result<Option<String>> {
        for source in &self.sources {
            if let Some(contents) = source.get_file_contents(tuple, path)? {
                return Ok(Some(contents));
            }
        }
        Ok(None)
    }
}
