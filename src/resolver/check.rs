// src/resolver/check.rs

//! Dependency closure check over a job
//!
//! The state after a job is the installed set minus the old side of every
//! job plus the new side. Two kinds of problem are reported:
//!
//! - requirements of troves the job adds that nothing in the final state
//!   provides
//! - requirements of troves that stay installed which were met before the
//!   job and are not met after it (these come with the removed troves
//!   that used to provide them)
//!
//! The check also groups jobs that have to be applied together and orders
//! the groups into sub-jobs.

use super::{BrokenRequirement, JobGraph, Requirement};
use crate::cache::TroveCache;
use crate::dependencies::{DependencyClass, DependencySet};
use crate::error::Result;
use crate::trove::{JobTuple, PathHashes, TroveTuple};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Knobs for [`check_dependencies`]
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// Dependency classes left out of the check
    pub ignore_dep_classes: Vec<DependencyClass>,
    /// Troves whose update should be applied on its own, before the rest
    pub critical_troves: Vec<Regex>,
    /// Troves applied after everything else
    pub final_troves: Vec<Regex>,
    /// Largest number of jobs merged into one sub-job (0 keeps everything
    /// in a single sub-job)
    pub update_threshold: usize,
}

impl CheckOptions {
    fn is_critical(&self, name: &str) -> bool {
        self.critical_troves.iter().any(|re| re.is_match(name))
    }

    fn is_final(&self, name: &str) -> bool {
        self.final_troves.iter().any(|re| re.is_match(name))
    }
}

/// Result of [`check_dependencies`]
#[derive(Debug, Clone, Default)]
pub struct DependencyCheck {
    pub unsatisfied: Vec<Requirement>,
    pub unresolvable: Vec<BrokenRequirement>,
    /// The job in application order
    pub split: Vec<Vec<JobTuple>>,
    /// Indices into `split` of sub-jobs holding critical updates
    pub critical: Vec<usize>,
    /// Groups of more than one job that must be applied together
    pub linked: Vec<Vec<JobTuple>>,
}

impl DependencyCheck {
    pub fn is_closed(&self) -> bool {
        self.unsatisfied.is_empty() && self.unresolvable.is_empty()
    }
}

/// Minimal union-find over job indices
struct Links {
    parent: Vec<usize>,
}

impl Links {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn join(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parent[a.max(b)] = a.min(b);
        }
    }
}

/// Check `jobs` against the installed state behind `cache`
pub fn check_dependencies(cache: &mut TroveCache<'_>, jobs: &[JobTuple], options: &CheckOptions) -> Result<DependencyCheck> {
    let installed: BTreeSet<TroveTuple> = cache.installed().iter_all_troves().into_iter().map(|(t, _)| t).collect();
    let olds: BTreeSet<TroveTuple> = jobs.iter().filter_map(JobTuple::old_tuple).collect();
    let news: BTreeSet<TroveTuple> = jobs.iter().filter_map(JobTuple::new_tuple).collect();

    let new_list: Vec<TroveTuple> = news.iter().cloned().collect();
    cache.cache_troves(&new_list)?;

    let final_set: BTreeSet<TroveTuple> = installed.difference(&olds).chain(news.iter()).cloned().collect();
    let final_state: Vec<TroveTuple> = final_set.into_iter().collect();
    let final_deps = cache.get_deps_for_trove_list(&final_state)?;
    let mut final_provides = DependencySet::new();
    for (provides, _) in &final_deps {
        final_provides.extend(provides);
    }

    let mut result = DependencyCheck::default();

    // new troves
    for (tuple, (_, requires)) in final_state.iter().zip(&final_deps) {
        if !news.contains(tuple) {
            continue;
        }
        let missing = requires.without_classes(&options.ignore_dep_classes).unsatisfied_by(&final_provides);
        if !missing.is_empty() {
            result.unsatisfied.push(Requirement {
                required_by: tuple.clone(),
                deps: missing,
            });
        }
    }

    // troves staying installed
    let removed: Vec<TroveTuple> = olds.iter().filter(|t| installed.contains(*t) && !news.contains(*t)).cloned().collect();
    if !removed.is_empty() {
        let removed_deps = cache.get_deps_for_trove_list(&removed)?;
        for (tuple, (_, requires)) in final_state.iter().zip(&final_deps) {
            if news.contains(tuple) {
                continue;
            }
            let missing = requires.without_classes(&options.ignore_dep_classes).unsatisfied_by(&final_provides);
            if missing.is_empty() {
                continue;
            }
            let mut broken = DependencySet::new();
            let mut provided_by = Vec::new();
            for (old, (provides, _)) in removed.iter().zip(&removed_deps) {
                let lost: DependencySet = missing.iter().filter(|dep| provides.provides(dep)).cloned().collect();
                if !lost.is_empty() {
                    broken.extend(&lost);
                    provided_by.push(old.clone());
                }
            }
            // requirements that were already broken before the job are not ours
            if !broken.is_empty() {
                result.unresolvable.push(BrokenRequirement {
                    required_by: tuple.clone(),
                    deps: broken,
                    provided_by,
                });
            }
        }
    }

    let units = link_jobs(cache, jobs);
    result.linked = units
        .iter()
        .filter(|unit| unit.len() > 1)
        .map(|unit| unit.iter().map(|&i| jobs[i].clone()).collect())
        .collect();

    let ordered = order_units(cache, jobs, &units)?;
    let (split, critical) = split_units(jobs, ordered, options);
    result.split = split;
    result.critical = critical;

    debug!(
        "dependency check: {} unsatisfied, {} unresolvable, {} sub-job(s)",
        result.unsatisfied.len(),
        result.unresolvable.len(),
        result.split.len()
    );
    Ok(result)
}

/// Group job indices that must be applied together: changes to the same
/// package, and jobs whose new troves take over paths an old trove of
/// another job owns
fn link_jobs(cache: &TroveCache<'_>, jobs: &[JobTuple]) -> Vec<Vec<usize>> {
    let mut links = Links::new(jobs.len());

    let mut by_package: BTreeMap<String, usize> = BTreeMap::new();
    for (i, job) in jobs.iter().enumerate() {
        let package = job
            .name
            .split_once(':')
            .map_or(job.name.as_str(), |(package, _)| package)
            .to_string();
        match by_package.get(&package) {
            Some(&first) => links.join(first, i),
            None => {
                by_package.insert(package, i);
            }
        }
    }

    let olds: Vec<TroveTuple> = jobs.iter().filter_map(JobTuple::old_tuple).collect();
    let old_hashes: Vec<(usize, PathHashes)> = jobs
        .iter()
        .enumerate()
        .filter(|(_, job)| job.old.is_some())
        .map(|(i, _)| i)
        .zip(cache.installed().get_path_hashes_for_trove_list(&olds))
        .collect();

    for (i, job) in jobs.iter().enumerate() {
        let Some(new) = job.new_tuple() else {
            continue;
        };
        let Some(trove) = cache.trove(&new) else {
            continue;
        };
        if trove.path_hashes.is_empty() {
            continue;
        }
        for (j, hashes) in &old_hashes {
            if *j != i && trove.path_hashes.overlaps(hashes) {
                links.join(i, *j);
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..jobs.len() {
        let root = links.find(i);
        groups.entry(root).or_default().push(i);
    }
    groups.into_values().collect()
}

/// Order units so a unit installing a provider precedes the units whose
/// new troves need it
fn order_units(cache: &mut TroveCache<'_>, jobs: &[JobTuple], units: &[Vec<usize>]) -> Result<Vec<Vec<usize>>> {
    let mut unit_of = vec![0; jobs.len()];
    for (u, members) in units.iter().enumerate() {
        for &m in members {
            unit_of[m] = u;
        }
    }

    let installs: Vec<(usize, TroveTuple)> = jobs
        .iter()
        .enumerate()
        .filter_map(|(i, job)| job.new_tuple().map(|t| (i, t)))
        .collect();
    let tuples: Vec<TroveTuple> = installs.iter().map(|(_, t)| t.clone()).collect();
    let deps = cache.get_deps_for_trove_list(&tuples)?;

    let mut graph = JobGraph::new(units.len());
    for ((consumer, _), (_, requires)) in installs.iter().zip(&deps) {
        for ((provider, _), (provides, _)) in installs.iter().zip(&deps) {
            if provider != consumer && requires.iter().any(|dep| provides.provides(dep)) {
                graph.add_edge(unit_of[*provider], unit_of[*consumer]);
            }
        }
    }

    Ok(graph
        .order()
        .into_iter()
        .map(|group| {
            let mut members: Vec<usize> = group.iter().flat_map(|&u| units[u].iter().copied()).collect();
            members.sort_unstable();
            members
        })
        .collect())
}

/// Pack ordered groups into sub-jobs
fn split_units(jobs: &[JobTuple], ordered: Vec<Vec<usize>>, options: &CheckOptions) -> (Vec<Vec<JobTuple>>, Vec<usize>) {
    let (finals, ordered): (Vec<Vec<usize>>, Vec<Vec<usize>>) = ordered
        .into_iter()
        .partition(|group| group.iter().any(|&i| options.is_final(&jobs[i].name)));

    let mut split: Vec<Vec<JobTuple>> = Vec::new();
    let mut critical = Vec::new();
    let mut current: Vec<JobTuple> = Vec::new();

    let flush = |current: &mut Vec<JobTuple>, split: &mut Vec<Vec<JobTuple>>| {
        if !current.is_empty() {
            split.push(std::mem::take(current));
        }
    };

    for group in ordered {
        let is_critical = group.iter().any(|&i| options.is_critical(&jobs[i].name) && jobs[i].new.is_some());
        if is_critical {
            flush(&mut current, &mut split);
            critical.push(split.len());
            split.push(group.iter().map(|&i| jobs[i].clone()).collect());
            continue;
        }
        if options.update_threshold > 0 && !current.is_empty() && current.len() + group.len() > options.update_threshold {
            flush(&mut current, &mut split);
        }
        current.extend(group.iter().map(|&i| jobs[i].clone()));
    }
    flush(&mut current, &mut split);

    let last: Vec<JobTuple> = finals.into_iter().flatten().map(|i| jobs[i].clone()).collect();
    if !last.is_empty() {
        split.push(last);
    }
    (split, critical)
}
