// src/trove/diff.rs

//! Name-based trove diffing
//!
//! Given an old and a new set of trove tuples, pair up removed and added
//! tuples of the same name so they become updates instead of an erase plus
//! an install. Pairing is done by flavor first, then by version:
//!
//! 1. Flavors are paired greedily by compatibility score, first only where
//!    an old and a new tuple share a branch, then across branches. Empty
//!    flavors only pair with empty flavors.
//! 2. Within a flavor pair, versions are matched on the same branch
//!    (newest old first), then by branch closeness, then newest with newest.
//!
//! Whatever is left over becomes a fresh install or an erase.

use super::{JobTuple, TroveTuple};
use crate::flavor::FlavorSpec;
use std::collections::{BTreeMap, BTreeSet};

/// Result of diffing two trove sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TroveDiff {
    /// (old, new) pairs of the same name
    pub updates: Vec<(TroveTuple, TroveTuple)>,
    pub installs: Vec<TroveTuple>,
    pub erases: Vec<TroveTuple>,
}

impl TroveDiff {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.installs.is_empty() && self.erases.is_empty()
    }
}

/// Diff two collections of tuples; tuples present on both sides are ignored
pub fn diff_troves<'a, O, N>(old: O, new: N) -> TroveDiff
where
    O: IntoIterator<Item = &'a TroveTuple>,
    N: IntoIterator<Item = &'a TroveTuple>,
{
    let old: BTreeSet<&TroveTuple> = old.into_iter().collect();
    let new: BTreeSet<&TroveTuple> = new.into_iter().collect();

    let mut by_name: BTreeMap<&str, (Vec<TroveTuple>, Vec<TroveTuple>)> = BTreeMap::new();
    for t in old.difference(&new) {
        by_name.entry(t.name.as_str()).or_default().0.push((*t).clone());
    }
    for t in new.difference(&old) {
        by_name.entry(t.name.as_str()).or_default().1.push((*t).clone());
    }

    let mut diff = TroveDiff::default();
    for (_, (olds, news)) in by_name {
        if olds.is_empty() {
            diff.installs.extend(news);
        } else if news.is_empty() {
            diff.erases.extend(olds);
        } else {
            pair_by_flavor(olds, news, &mut diff);
        }
    }
    diff
}

/// Diff two sets into jobs
///
/// With `absolute`, install sides are marked absolute.
pub fn diff_jobs<'a, O, N>(old: O, new: N, absolute: bool) -> Vec<JobTuple>
where
    O: IntoIterator<Item = &'a TroveTuple>,
    N: IntoIterator<Item = &'a TroveTuple>,
{
    let diff = diff_troves(old, new);
    let mut jobs = Vec::with_capacity(diff.updates.len() + diff.installs.len() + diff.erases.len());
    for (o, n) in &diff.updates {
        let mut job = JobTuple::update(o, n);
        job.absolute = absolute;
        jobs.push(job);
    }
    jobs.extend(diff.installs.iter().map(|t| JobTuple::install(t, absolute)));
    jobs.extend(diff.erases.iter().map(JobTuple::erase));
    jobs.sort();
    jobs
}

fn distinct_flavors(troves: &[TroveTuple]) -> BTreeSet<FlavorSpec> {
    troves.iter().map(|t| t.flavor.clone()).collect()
}

fn share_branch(olds: &[TroveTuple], old_flavor: &FlavorSpec, news: &[TroveTuple], new_flavor: &FlavorSpec) -> bool {
    olds.iter().filter(|o| &o.flavor == old_flavor).any(|o| {
        news.iter()
            .filter(|n| &n.flavor == new_flavor)
            .any(|n| n.branch() == o.branch())
    })
}

fn pair_by_flavor(mut olds: Vec<TroveTuple>, mut news: Vec<TroveTuple>, diff: &mut TroveDiff) {
    for same_branch_only in [true, false] {
        let mut used: BTreeSet<(FlavorSpec, FlavorSpec)> = BTreeSet::new();
        loop {
            let mut best: Option<(i32, FlavorSpec, FlavorSpec)> = None;
            for old_flavor in distinct_flavors(&olds) {
                for new_flavor in distinct_flavors(&news) {
                    if used.contains(&(old_flavor.clone(), new_flavor.clone())) {
                        continue;
                    }
                    if same_branch_only && !share_branch(&olds, &old_flavor, &news, &new_flavor) {
                        continue;
                    }
                    let Some(score) = old_flavor.pair_score(&new_flavor) else {
                        continue;
                    };
                    if best.as_ref().is_none_or(|(s, _, _)| score > *s) {
                        best = Some((score, old_flavor.clone(), new_flavor.clone()));
                    }
                }
            }

            let Some((_, old_flavor, new_flavor)) = best else {
                break;
            };
            used.insert((old_flavor.clone(), new_flavor.clone()));

            let (old_group, old_rest): (Vec<_>, Vec<_>) = olds.into_iter().partition(|t| t.flavor == old_flavor);
            let (new_group, new_rest): (Vec<_>, Vec<_>) = news.into_iter().partition(|t| t.flavor == new_flavor);

            let (pairs, old_left, new_left) = version_match(old_group, new_group, !same_branch_only);
            diff.updates.extend(pairs);

            olds = old_rest;
            olds.extend(old_left);
            news = new_rest;
            news.extend(new_left);

            if olds.is_empty() || news.is_empty() {
                break;
            }
        }
    }

    diff.erases.extend(olds);
    diff.installs.extend(news);
}

type Pairs = Vec<(TroveTuple, TroveTuple)>;

fn newest_first(troves: &mut [TroveTuple]) {
    troves.sort_by(|a, b| {
        b.version
            .timestamp()
            .cmp(&a.version.timestamp())
            .then_with(|| b.version.cmp(&a.version))
    });
}

fn take_newest(olds: &mut Vec<TroveTuple>, pred: impl Fn(&TroveTuple) -> bool) -> Option<TroveTuple> {
    // olds is sorted newest first
    let idx = olds.iter().position(pred)?;
    Some(olds.remove(idx))
}

/// Match versions within one flavor pair
fn version_match(mut olds: Vec<TroveTuple>, mut news: Vec<TroveTuple>, full: bool) -> (Pairs, Vec<TroveTuple>, Vec<TroveTuple>) {
    newest_first(&mut olds);
    newest_first(&mut news);
    let mut pairs = Vec::new();

    // same branch, newest old revision first
    let mut unmatched = Vec::new();
    for new in news {
        match take_newest(&mut olds, |o| o.branch() == new.branch()) {
            Some(old) => pairs.push((old, new)),
            None => unmatched.push(new),
        }
    }
    news = unmatched;

    if !full {
        return (pairs, olds, news);
    }

    // across branches by closeness
    let mut unmatched = Vec::new();
    for new in news {
        let best = olds
            .iter()
            .enumerate()
            .map(|(i, o)| (o.branch().closeness(new.branch()), i))
            .filter(|(closeness, _)| *closeness > 0)
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)));
        match best {
            Some((_, idx)) => pairs.push((olds.remove(idx), new)),
            None => unmatched.push(new),
        }
    }
    news = unmatched;

    // newest left with newest left
    let n = olds.len().min(news.len());
    let old_left = olds.split_off(n);
    let new_left = news.split_off(n);
    pairs.extend(olds.into_iter().zip(news));

    (pairs, old_left, new_left)
}
