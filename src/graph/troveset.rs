// src/graph/troveset.rs

//! Trove sets: the values flowing through the operation graph
//!
//! A trove set holds two disjoint sets of tuples: those to install and
//! those merely made available (optional). Walking a set expands
//! collections into their members, which inherit the install flag of the
//! collection combined with the by-default flag of the reference.

use crate::cache::TroveCache;
use crate::error::Result;
use crate::label::Label;
use crate::source::FindResults;
use crate::trove::{TroveSpec, TroveTuple, VersionSelector};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Install and optional members of a graph node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TroveSet {
    pub install: BTreeSet<TroveTuple>,
    pub optional: BTreeSet<TroveTuple>,
}

/// One tuple produced by [`TroveSet::walk`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub tuple: TroveTuple,
    pub in_install: bool,
    /// Named directly by the set rather than reached through a collection
    pub explicit: bool,
}

impl TroveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_install<I: IntoIterator<Item = TroveTuple>>(tuples: I) -> Self {
        Self {
            install: tuples.into_iter().collect(),
            optional: BTreeSet::new(),
        }
    }

    /// Install and optional members together
    pub fn all(&self) -> BTreeSet<TroveTuple> {
        self.install.union(&self.optional).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.install.is_empty() && self.optional.is_empty()
    }

    pub fn contains(&self, tuple: &TroveTuple) -> bool {
        self.install.contains(tuple) || self.optional.contains(tuple)
    }

    /// Hash of the explicit install members
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        for tuple in &self.install {
            hasher.update(tuple.freeze().as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Expand collections into their members
    ///
    /// Explicit members keep their own flag. A reached member inherits
    /// `in_install && by_default` from its collection; when a tuple is
    /// reachable several ways the shallowest path wins and equally deep
    /// paths OR their install flags. Without `recurse` only the direct
    /// references of explicit members are expanded.
    pub fn walk(&self, cache: &mut TroveCache<'_>, recurse: bool) -> Result<Vec<WalkEntry>> {
        // tuple -> (depth, in_install, explicit)
        let mut best: BTreeMap<TroveTuple, (usize, bool, bool)> = BTreeMap::new();
        let mut queue: VecDeque<(TroveTuple, usize)> = VecDeque::new();

        for tuple in &self.optional {
            best.insert(tuple.clone(), (0, false, true));
        }
        for tuple in &self.install {
            best.insert(tuple.clone(), (0, true, true));
        }
        queue.extend(best.keys().map(|t| (t.clone(), 0)));

        while let Some((tuple, depth)) = queue.pop_front() {
            let Some(&(seen_depth, in_install, _)) = best.get(&tuple) else {
                continue;
            };
            if seen_depth != depth || !tuple.is_collection() || (depth > 0 && !recurse) {
                continue;
            }

            let trove = cache.get_trove(&tuple)?;
            let refs: Vec<(TroveTuple, bool)> = if recurse {
                trove.strong_refs().map(|r| (r.tuple.clone(), r.by_default)).collect()
            } else {
                trove.references.iter().map(|r| (r.tuple.clone(), r.by_default)).collect()
            };

            for (child, by_default) in refs {
                let child_install = in_install && by_default;
                let child_depth = depth + 1;
                match best.get_mut(&child) {
                    None => {
                        best.insert(child.clone(), (child_depth, child_install, false));
                        queue.push_back((child, child_depth));
                    }
                    Some((_, _, true)) => {}
                    Some(entry) if child_depth < entry.0 => {
                        *entry = (child_depth, child_install, false);
                        queue.push_back((child, child_depth));
                    }
                    Some(entry) if child_depth == entry.0 => entry.1 |= child_install,
                    Some(_) => {}
                }
            }
        }

        Ok(best
            .into_iter()
            .map(|(tuple, (_, in_install, explicit))| WalkEntry {
                tuple,
                in_install,
                explicit,
            })
            .collect())
    }

    /// Search the walked contents of this set
    ///
    /// Every match is returned, not just the newest, since a set can hold
    /// several versions or flavors of a name side by side.
    pub fn search(&self, cache: &mut TroveCache<'_>, specs: &[TroveSpec]) -> Result<FindResults> {
        let walked = self.walk(cache, true)?;
        let mut results = FindResults::new();
        for spec in specs {
            let selector = spec.selector()?;
            let matches: Vec<TroveTuple> = walked
                .iter()
                .map(|e| &e.tuple)
                .filter(|t| t.name == spec.name)
                .filter(|t| selector_matches(&selector, t))
                .filter(|t| {
                    spec.flavor
                        .as_ref()
                        .is_none_or(|f| f.is_empty() || f.satisfies(&t.flavor))
                })
                .cloned()
                .collect();
            results.insert(spec.clone(), matches);
        }
        Ok(results)
    }
}

/// Match a selector against a tuple found inside a set
fn selector_matches(selector: &VersionSelector, tuple: &TroveTuple) -> bool {
    let label = tuple.version.trailing_label();
    match selector {
        VersionSelector::Label(partial) | VersionSelector::LabelRevision(partial, _) => {
            let wanted = Label::complete(partial, label).ok();
            wanted.as_ref() == Some(label) && selector.matches(&tuple.version, label)
        }
        _ => selector.matches(&tuple.version, label),
    }
}
