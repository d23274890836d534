// src/source/memory.rs

//! In-memory trove source and installed database
//!
//! Both load from JSON snapshots, which is how the CLI and the tests feed
//! the planner. The repository answers finds the way a network repository
//! does: the first label on the search path with a match wins, the latest
//! version on that label is chosen and the best scoring flavor of that
//! version is returned.

use super::{CompleteTroveSet, FindResults, InstalledState, ResolveResults, TroveSource};
use crate::dependencies::DependencySet;
use crate::error::{Error, Result};
use crate::flavor::FlavorSpec;
use crate::label::{Label, LabelPath};
use crate::trove::{JobTuple, PathHashes, Trove, TroveSpec, TroveTuple};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    troves: Vec<Trove>,
    #[serde(default)]
    pinned: Vec<TroveTuple>,
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Newest first; equal timestamps fall back to version order
fn newest_first(tuples: &mut [&TroveTuple]) {
    tuples.sort_by(|a, b| {
        b.version
            .timestamp()
            .cmp(&a.version.timestamp())
            .then_with(|| b.version.cmp(&a.version))
            .then_with(|| a.flavor.cmp(&b.flavor))
    });
}

/// A repository held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    troves: BTreeMap<TroveTuple, Trove>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, trove: Trove) {
        self.troves.insert(trove.tuple.clone(), trove);
    }

    pub fn len(&self) -> usize {
        self.troves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.troves.is_empty()
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(text)?;
        Ok(Self::from_troves(snapshot.troves))
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_troves(read_snapshot(path)?.troves))
    }

    fn from_troves(troves: Vec<Trove>) -> Self {
        let mut repo = Self::new();
        for trove in troves {
            repo.add(trove);
        }
        repo
    }

    fn find_one(&self, label_path: &LabelPath, spec: &TroveSpec, flavor: &FlavorSpec) -> Result<Vec<TroveTuple>> {
        let selector = spec.selector()?;
        let effective = match &spec.flavor {
            Some(requested) => flavor.override_with(requested),
            None => flavor.clone(),
        };

        for label in selector.labels(label_path)? {
            let mut candidates: Vec<&TroveTuple> = self
                .troves
                .keys()
                .filter(|t| t.name == spec.name)
                .filter(|t| selector.matches(&t.version, &label))
                .filter(|t| effective.is_empty() || effective.satisfies(&t.flavor))
                .collect();
            if candidates.is_empty() {
                continue;
            }

            newest_first(&mut candidates);
            let latest = candidates[0].version.clone();
            let same_version: Vec<(FlavorSpec, &TroveTuple)> = candidates
                .into_iter()
                .filter(|t| t.version == latest)
                .map(|t| (t.flavor.clone(), t))
                .collect();

            let chosen = if effective.is_empty() {
                same_version.first().map(|(_, t)| *t)
            } else {
                effective.select_best(&same_version).copied()
            };
            return Ok(chosen.into_iter().cloned().collect());
        }
        Ok(Vec::new())
    }
}

impl TroveSource for MemoryRepository {
    fn get_troves(&self, tuples: &[TroveTuple]) -> Result<Vec<Option<Trove>>> {
        Ok(tuples.iter().map(|t| self.troves.get(t).cloned()).collect())
    }

    fn find_troves(&self, label_path: &LabelPath, specs: &[TroveSpec], flavor: &FlavorSpec) -> Result<FindResults> {
        let mut results = FindResults::new();
        for spec in specs {
            let found = self.find_one(label_path, spec, flavor)?;
            debug!("find {} on {}: {} match(es)", spec, label_path, found.len());
            results.insert(spec.clone(), found);
        }
        Ok(results)
    }

    fn resolve_dependencies(&self, label: &Label, requirements: &[DependencySet]) -> Result<ResolveResults> {
        let on_label: Vec<&Trove> = self
            .troves
            .values()
            .filter(|t| t.tuple.version.trailing_label() == label)
            .collect();

        let mut results = ResolveResults::new();
        for req in requirements {
            let mut per_dep = Vec::with_capacity(req.len());
            for dep in req.iter() {
                // latest version of each (name, flavor) providing dep
                let mut latest: BTreeMap<(String, FlavorSpec), &TroveTuple> = BTreeMap::new();
                for trove in on_label.iter().filter(|t| t.effective_provides().provides(dep)) {
                    let key = (trove.tuple.name.clone(), trove.tuple.flavor.clone());
                    let tuple = &trove.tuple;
                    latest
                        .entry(key)
                        .and_modify(|cur| {
                            if tuple.version.is_newer_than(&cur.version) {
                                *cur = tuple;
                            }
                        })
                        .or_insert(tuple);
                }
                per_dep.push(latest.into_values().cloned().collect());
            }
            results.insert(req.clone(), per_dep);
        }
        Ok(results)
    }
}

/// An installed-trove database held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    troves: BTreeMap<TroveTuple, Trove>,
    pinned: BTreeSet<TroveTuple>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, trove: Trove) {
        self.troves.insert(trove.tuple.clone(), trove);
    }

    pub fn pin(&mut self, tuple: &TroveTuple) {
        self.pinned.insert(tuple.clone());
    }

    pub fn unpin(&mut self, tuple: &TroveTuple) {
        self.pinned.remove(tuple);
    }

    pub fn len(&self) -> usize {
        self.troves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.troves.is_empty()
    }

    pub fn tuples(&self) -> impl Iterator<Item = &TroveTuple> {
        self.troves.keys()
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(text)?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_snapshot(read_snapshot(path)?))
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut db = Self::new();
        for trove in snapshot.troves {
            db.add(trove);
        }
        db.pinned = snapshot.pinned.into_iter().collect();
        db
    }

    /// Apply a job, reading new troves from `source`
    pub fn apply_jobs(&mut self, jobs: &[JobTuple], source: &dyn TroveSource) -> Result<()> {
        for job in jobs {
            if let Some(old) = job.old_tuple() {
                self.troves.remove(&old);
                self.pinned.remove(&old);
            }
        }
        let new: Vec<TroveTuple> = jobs.iter().filter_map(JobTuple::new_tuple).collect();
        for (tuple, trove) in new.iter().zip(source.get_troves(&new)?) {
            let trove = trove.ok_or_else(|| Error::TroveNotFound(tuple.to_string()))?;
            self.add(trove);
        }
        Ok(())
    }

    fn is_referenced(&self, tuple: &TroveTuple) -> bool {
        self.troves.values().any(|t| t.includes_trove(tuple))
    }
}

impl InstalledState for MemoryDatabase {
    fn iter_all_troves(&self) -> Vec<(TroveTuple, bool)> {
        self.troves
            .keys()
            .map(|t| (t.clone(), self.pinned.contains(t)))
            .collect()
    }

    fn get_troves(&self, tuples: &[TroveTuple]) -> Result<Vec<Option<Trove>>> {
        Ok(tuples.iter().map(|t| self.troves.get(t).cloned()).collect())
    }

    fn get_trove_containers(&self, tuples: &[TroveTuple]) -> Vec<Vec<TroveTuple>> {
        tuples
            .iter()
            .map(|tuple| {
                self.troves
                    .values()
                    .filter(|t| t.includes_trove(tuple))
                    .map(|t| t.tuple.clone())
                    .collect()
            })
            .collect()
    }

    fn get_path_hashes_for_trove_list(&self, tuples: &[TroveTuple]) -> Vec<PathHashes> {
        tuples
            .iter()
            .map(|t| self.troves.get(t).map(|trv| trv.path_hashes.clone()).unwrap_or_default())
            .collect()
    }

    fn troves_are_pinned(&self, tuples: &[TroveTuple]) -> Vec<bool> {
        tuples.iter().map(|t| self.pinned.contains(t)).collect()
    }

    fn get_complete_trove_set(&self, names: &[String]) -> CompleteTroveSet {
        let names: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        let mut set = CompleteTroveSet::default();

        for tuple in self.troves.keys().filter(|t| names.contains(t.name.as_str())) {
            if self.is_referenced(tuple) {
                set.installed_and_referenced.insert(tuple.clone());
            } else {
                set.installed_not_referenced.insert(tuple.clone());
            }
        }

        for trove in self.troves.values() {
            for r in &trove.references {
                if !names.contains(r.tuple.name.as_str()) || self.troves.contains_key(&r.tuple) {
                    continue;
                }
                if r.strong {
                    set.referenced_weak.remove(&r.tuple);
                    set.referenced_strong.insert(r.tuple.clone());
                } else if !set.referenced_strong.contains(&r.tuple) {
                    set.referenced_weak.insert(r.tuple.clone());
                }
            }
        }
        set
    }
}
