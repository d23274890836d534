// src/update/resolve.rs

//! Closing a job over its dependencies
//!
//! The job is checked, then troves that stay installed but lose a provider
//! are dealt with first: the trove needing the provider is updated to a
//! version that no longer needs it, or the provider is kept, or (with
//! `keep_required`) its erase is dropped. Requirements of new troves are
//! then handed to the resolution method stack and the picks are merged
//! into the job. This repeats until nothing is missing, or the methods
//! run dry.

use super::config::UpdateConfig;
use super::merge::{DecisionRecord, MergeOptions, Reconciler, remove_duplicate_additions};
use crate::cache::TroveCache;
use crate::dependencies::DependencySet;
use crate::error::{DependencyFailure, DependencyReport, Result};
use crate::flavor::FlavorSpec;
use crate::resolver::{CheckOptions, DependencyCheck, ResolveMethod, SuggestionMap, check_dependencies};
use crate::trove::{JobTuple, TroveSpec, TroveTuple};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Upper bound on resolution rounds
const MAX_ROUNDS: usize = 64;

/// An erase dropped because something that stays needs it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeptErase {
    pub job: JobTuple,
    pub required_by: TroveTuple,
    pub deps: DependencySet,
}

/// Result of [`DependencyLoop::run`]
#[derive(Debug, Clone, Default)]
pub struct ResolveOutcome {
    pub jobs: Vec<JobTuple>,
    pub check: DependencyCheck,
    pub suggestions: SuggestionMap,
    pub keep_list: Vec<KeptErase>,
    /// Decisions made while merging resolved troves
    pub decisions: Vec<DecisionRecord>,
}

pub struct DependencyLoop<'p> {
    config: &'p UpdateConfig,
    check_options: CheckOptions,
    /// Erases the request named directly
    primary_erases: BTreeSet<TroveTuple>,
    /// Troves already updated to fix an erase; never tried twice
    updated_for_erase: BTreeSet<TroveTuple>,
}

impl<'p> DependencyLoop<'p> {
    pub fn new(config: &'p UpdateConfig, primary_erases: BTreeSet<TroveTuple>) -> Result<Self> {
        Ok(Self {
            config,
            check_options: config.check_options()?,
            primary_erases,
            updated_for_erase: BTreeSet::new(),
        })
    }

    fn flavor(&self) -> FlavorSpec {
        self.config.flavor.first().cloned().unwrap_or_else(FlavorSpec::empty)
    }

    fn report(check: &DependencyCheck, suggestions: &SuggestionMap) -> DependencyReport {
        DependencyReport {
            unsatisfied: check.unsatisfied.clone(),
            unresolvable: check.unresolvable.clone(),
            suggestions: suggestions.clone(),
            split_job: check.split.clone(),
        }
    }

    /// Resolve `jobs` with `methods` until the job is closed
    pub fn run(
        &mut self,
        cache: &mut TroveCache<'_>,
        jobs: Vec<JobTuple>,
        methods: &mut dyn ResolveMethod,
    ) -> Result<ResolveOutcome> {
        let mut outcome = ResolveOutcome {
            jobs,
            ..Default::default()
        };

        for round in 1..=MAX_ROUNDS {
            let check = self.check_with_erase_resolution(cache, &mut outcome)?;
            if !check.unresolvable.is_empty() {
                return Err(DependencyFailure::EraseDep(Self::report(&check, &outcome.suggestions)).into());
            }
            if check.unsatisfied.is_empty() {
                outcome.check = check;
                return Ok(outcome);
            }
            if self.keep_erased_providers(cache, &mut outcome, &check)? {
                continue;
            }

            if !methods.prepare_for_resolution(&check.unsatisfied) {
                return Err(DependencyFailure::DepResolution(Self::report(&check, &outcome.suggestions)).into());
            }
            let raw = methods.resolve_dependencies(cache)?;
            let picked = methods.filter_suggestions(
                cache,
                &check.unsatisfied,
                &raw,
                &mut outcome.suggestions,
                &self.config.flavor,
            );
            let being_installed: BTreeSet<TroveTuple> = outcome.jobs.iter().filter_map(JobTuple::new_tuple).collect();
            let picked: Vec<TroveTuple> = picked.into_iter().filter(|t| !being_installed.contains(t)).collect();
            info!(
                "resolution round {} with {}: {} requirement(s), {} new trove(s)",
                round,
                methods.name(),
                check.unsatisfied.len(),
                picked.len()
            );
            if picked.is_empty() {
                continue;
            }
            if !self.config.auto_resolve {
                return Err(DependencyFailure::NeededTroves(Self::report(&check, &outcome.suggestions)).into());
            }
            self.add_resolved(cache, &mut outcome, picked)?;
        }

        let check = check_dependencies(cache, &outcome.jobs, &self.check_options)?;
        warn!("dependency resolution stopped after {} rounds", MAX_ROUNDS);
        Err(DependencyFailure::DepResolution(Self::report(&check, &outcome.suggestions)).into())
    }

    /// Merge troves picked by the resolver into the job
    fn add_resolved(&self, cache: &mut TroveCache<'_>, outcome: &mut ResolveOutcome, picked: Vec<TroveTuple>) -> Result<()> {
        let installed = cache.installed();
        let mut wanted: BTreeSet<TroveTuple> = picked.iter().cloned().collect();
        let being_installed: BTreeSet<TroveTuple> = outcome.jobs.iter().filter_map(JobTuple::new_tuple).collect();

        if self.config.auto_resolve_packages {
            let packages: Vec<TroveTuple> = picked
                .iter()
                .filter_map(TroveTuple::package_tuple)
                .filter(|p| !being_installed.contains(p) && !installed.has_trove(p))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let exists = cache.source().has_troves(&packages)?;
            wanted.extend(packages.into_iter().zip(exists).filter(|(_, e)| *e).map(|(p, _)| p));
        }

        let primary: Vec<JobTuple> = wanted.iter().map(|t| JobTuple::install(t, true)).collect();
        let options = MergeOptions {
            recurse: false,
            locked: outcome.jobs.iter().filter_map(JobTuple::old_tuple).collect(),
            forced: wanted.clone(),
            flavors: self.config.flavor.clone(),
            ..Default::default()
        };
        let merged = Reconciler::new(cache, options).merge(&primary)?;

        for job in merged.jobs {
            if let Some(job) = self.cross_branch_filter(cache, job)? {
                outcome.jobs.push(job);
            }
        }
        outcome.decisions.extend(merged.decisions);
        remove_duplicate_additions(&mut outcome.jobs)
    }

    /// Drop erases of troves that provide what new troves are missing
    fn keep_erased_providers(
        &self,
        cache: &mut TroveCache<'_>,
        outcome: &mut ResolveOutcome,
        check: &DependencyCheck,
    ) -> Result<bool> {
        let erased: Vec<TroveTuple> = outcome
            .jobs
            .iter()
            .filter(|j| j.is_erase())
            .filter_map(JobTuple::old_tuple)
            .filter(|t| self.config.keep_required || !self.primary_erases.contains(t))
            .collect();
        if erased.is_empty() {
            return Ok(false);
        }
        let erased_deps = cache.get_deps_for_trove_list(&erased)?;

        let mut changed = false;
        for requirement in &check.unsatisfied {
            for (provider, (provides, _)) in erased.iter().zip(&erased_deps) {
                if !requirement.deps.iter().any(|dep| provides.provides(dep)) {
                    continue;
                }
                let mut kept = vec![provider.clone()];
                kept.extend(provider.package_tuple());
                for old in kept {
                    let Some(pos) = outcome
                        .jobs
                        .iter()
                        .position(|j| j.is_erase() && j.old_tuple().as_ref() == Some(&old))
                    else {
                        continue;
                    };
                    let job = outcome.jobs.remove(pos);
                    info!("not erasing {}: required by {}", old, requirement.required_by);
                    outcome.keep_list.push(KeptErase {
                        job,
                        required_by: requirement.required_by.clone(),
                        deps: requirement.deps.clone(),
                    });
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    /// Resolved troves never move an installed trove to another branch;
    /// they go next to it when their paths allow, otherwise they are dropped
    fn cross_branch_filter(&self, cache: &mut TroveCache<'_>, job: JobTuple) -> Result<Option<JobTuple>> {
        let (Some(old), Some(new)) = (job.old_tuple(), job.new_tuple()) else {
            return Ok(Some(job));
        };
        if old.branch() == new.branch() {
            return Ok(Some(job));
        }
        if paths_compatible(cache, &old, &new)? {
            debug!("installing {} next to {} instead of switching branch", new, old);
            return Ok(Some(JobTuple::install(&new, false)));
        }
        debug!("dropping {}: it would move {} to another branch", new, old);
        Ok(None)
    }

    fn check_with_erase_resolution(&mut self, cache: &mut TroveCache<'_>, outcome: &mut ResolveOutcome) -> Result<DependencyCheck> {
        loop {
            let check = check_dependencies(cache, &outcome.jobs, &self.check_options)?;
            if check.unresolvable.is_empty() {
                return Ok(check);
            }
            if self.config.resolve_level >= 2 && self.erase_by_updating(cache, &mut outcome.jobs, &check)? {
                continue;
            }
            if self.erase_by_keeping(cache, &mut outcome.jobs, &check)? {
                continue;
            }
            if self.config.keep_required && self.keep_required(&mut outcome.jobs, &check, &mut outcome.keep_list) {
                continue;
            }
            return Ok(check);
        }
    }

    /// Update troves that need something being erased
    fn erase_by_updating(&mut self, cache: &mut TroveCache<'_>, jobs: &mut Vec<JobTuple>, check: &DependencyCheck) -> Result<bool> {
        let installed = cache.installed();
        let touched: BTreeSet<TroveTuple> = jobs.iter().filter_map(JobTuple::old_tuple).collect();

        for broken in &check.unresolvable {
            // update the whole package when a component is what breaks
            let target = broken
                .required_by
                .package_tuple()
                .filter(|p| installed.has_trove(p))
                .unwrap_or_else(|| broken.required_by.clone());
            if touched.contains(&target) || !self.updated_for_erase.insert(target.clone()) {
                continue;
            }

            let spec = TroveSpec::new(target.name.clone()).with_version(target.branch().to_string());
            let found = cache
                .find_troves(&self.config.install_label_path, std::slice::from_ref(&spec), &self.flavor())?
                .remove(&spec)
                .unwrap_or_default();
            let Some(newest) = found
                .into_iter()
                .filter(|t| t.flavor == target.flavor && t.version.is_newer_than(&target.version))
                .max_by(|a, b| a.version.cmp(&b.version))
            else {
                continue;
            };

            let options = MergeOptions {
                locked: touched.clone(),
                flavors: self.config.flavor.clone(),
                ..Default::default()
            };
            let merged = Reconciler::new(cache, options).merge(&[JobTuple::update(&target, &newest)])?;
            let mut tentative = jobs.clone();
            tentative.extend(merged.jobs);
            tentative.extend(merged.implied_erases.iter().map(JobTuple::erase));
            remove_duplicate_additions(&mut tentative)?;

            let recheck = check_dependencies(cache, &tentative, &self.check_options)?;
            if recheck.unresolvable != check.unresolvable {
                info!("updating {} to {} to keep its requirements", target, newest);
                *jobs = tentative;
                return Ok(true);
            }
            debug!("updating {} does not help", target);
        }
        Ok(false)
    }

    /// Keep providers whose removal was only implied
    fn erase_by_keeping(&self, cache: &mut TroveCache<'_>, jobs: &mut Vec<JobTuple>, check: &DependencyCheck) -> Result<bool> {
        let mut changed = false;
        for provider in check.unresolvable.iter().flat_map(|b| b.provided_by.iter()) {
            if self.primary_erases.contains(provider) {
                continue;
            }
            let mut restore = vec![provider.clone()];
            if self.config.auto_resolve_packages
                && let Some(package) = provider.package_tuple()
            {
                restore.push(package);
            }
            for old in &restore {
                let Some(pos) = jobs.iter().position(|j| j.old_tuple().as_ref() == Some(old)) else {
                    continue;
                };
                let job = jobs[pos].clone();
                match job.new_tuple() {
                    None => {
                        debug!("keeping {}: something that stays needs it", old);
                        jobs.remove(pos);
                        changed = true;
                    }
                    Some(new) if paths_compatible(cache, old, &new)? => {
                        debug!("installing {} next to {}", new, old);
                        jobs[pos] = JobTuple::install(&new, false);
                        changed = true;
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(changed)
    }

    /// Drop erases of troves something that stays requires
    fn keep_required(&self, jobs: &mut Vec<JobTuple>, check: &DependencyCheck, keep_list: &mut Vec<KeptErase>) -> bool {
        let mut changed = false;
        for broken in &check.unresolvable {
            for provider in &broken.provided_by {
                let mut kept = vec![provider.clone()];
                kept.extend(provider.package_tuple());
                for old in kept {
                    let Some(pos) = jobs.iter().position(|j| j.is_erase() && j.old_tuple().as_ref() == Some(&old)) else {
                        continue;
                    };
                    let job = jobs.remove(pos);
                    info!("not erasing {}: required by {}", old, broken.required_by);
                    keep_list.push(KeptErase {
                        job,
                        required_by: broken.required_by.clone(),
                        deps: broken.deps.clone(),
                    });
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Old (installed) and new install disjoint paths
pub(crate) fn paths_compatible(cache: &mut TroveCache<'_>, old: &TroveTuple, new: &TroveTuple) -> Result<bool> {
    let old_paths = cache
        .installed()
        .get_path_hashes_for_trove_list(std::slice::from_ref(old))
        .into_iter()
        .next()
        .unwrap_or_default();
    Ok(old_paths.compatible_with(&cache.get_trove(new)?.path_hashes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependencies::Dependency;
    use crate::error::Error;
    use crate::resolver::{ByLabelPath, LabelPathMode, ResolutionStack};
    use crate::source::{MemoryDatabase, MemoryRepository};
    use crate::trove::Trove;

    fn tup(s: &str) -> TroveTuple {
        TroveTuple::parse(s).unwrap()
    }

    fn trove(t: &str, provides: &[&str], requires: &[&str]) -> Trove {
        let mut trv = Trove::new(tup(t));
        for p in provides {
            trv.provides.insert(Dependency::parse(p).unwrap());
        }
        for r in requires {
            trv.requires.insert(Dependency::parse(r).unwrap());
        }
        trv
    }

    fn config() -> UpdateConfig {
        UpdateConfig {
            install_label_path: crate::label::LabelPath::parse("repo@rpl:2").unwrap(),
            ..Default::default()
        }
    }

    fn stack(config: &UpdateConfig) -> ResolutionStack {
        let methods: Vec<Box<dyn ResolveMethod>> =
            vec![Box::new(ByLabelPath::new(config.install_label_path.clone(), LabelPathMode::All))];
        ResolutionStack::new(methods)
    }

    fn run(
        repo: &MemoryRepository,
        db: &MemoryDatabase,
        config: &UpdateConfig,
        jobs: Vec<JobTuple>,
        primary_erases: BTreeSet<TroveTuple>,
    ) -> Result<ResolveOutcome> {
        let mut cache = TroveCache::new(repo, db);
        let mut methods = stack(config);
        DependencyLoop::new(config, primary_erases)?.run(&mut cache, jobs, &mut methods)
    }

    // === Resolution tests ===

    #[test]
    fn test_adds_provider_and_package() {
        let mut repo = MemoryRepository::new();
        repo.add(trove("app=/repo@rpl:2/1.0-1-1", &[], &["soname: libfoo.so.1"]));
        repo.add(trove("libfoo:lib=/repo@rpl:2/1.0-1-1", &["soname: libfoo.so.1"], &[]));
        let mut pkg = Trove::new(tup("libfoo=/repo@rpl:2/1.0-1-1"));
        pkg.references.push(crate::trove::TroveRef::strong(tup("libfoo:lib=/repo@rpl:2/1.0-1-1"), true));
        repo.add(pkg);
        let db = MemoryDatabase::new();

        let config = config();
        let outcome = run(&repo, &db, &config, vec![JobTuple::install(&tup("app=/repo@rpl:2/1.0-1-1"), true)], BTreeSet::new()).unwrap();
        let news: BTreeSet<TroveTuple> = outcome.jobs.iter().filter_map(JobTuple::new_tuple).collect();
        assert!(news.contains(&tup("libfoo:lib=/repo@rpl:2/1.0-1-1")));
        assert!(news.contains(&tup("libfoo=/repo@rpl:2/1.0-1-1")));
        assert_eq!(
            outcome.suggestions.get(&tup("app=/repo@rpl:2/1.0-1-1")),
            Some(&vec![tup("libfoo:lib=/repo@rpl:2/1.0-1-1")])
        );
        assert!(outcome.check.is_closed());
    }

    #[test]
    fn test_needed_troves_without_auto_resolve() {
        let mut repo = MemoryRepository::new();
        repo.add(trove("app=/repo@rpl:2/1.0-1-1", &[], &["soname: libfoo.so.1"]));
        repo.add(trove("libfoo=/repo@rpl:2/1.0-1-1", &["soname: libfoo.so.1"], &[]));
        let db = MemoryDatabase::new();

        let config = UpdateConfig {
            auto_resolve: false,
            ..config()
        };
        let err = run(&repo, &db, &config, vec![JobTuple::install(&tup("app=/repo@rpl:2/1.0-1-1"), true)], BTreeSet::new())
            .unwrap_err();
        let Error::Dependency(DependencyFailure::NeededTroves(report)) = err else {
            panic!("expected needed troves, got {err:?}");
        };
        assert_eq!(report.suggestions.len(), 1);
    }

    #[test]
    fn test_unresolvable_requirement_fails() {
        let mut repo = MemoryRepository::new();
        repo.add(trove("app=/repo@rpl:2/1.0-1-1", &[], &["soname: libmissing.so.1"]));
        let db = MemoryDatabase::new();

        let err = run(&repo, &db, &config(), vec![JobTuple::install(&tup("app=/repo@rpl:2/1.0-1-1"), true)], BTreeSet::new())
            .unwrap_err();
        let Error::Dependency(DependencyFailure::DepResolution(report)) = err else {
            panic!("expected dep resolution failure, got {err:?}");
        };
        assert_eq!(report.unsatisfied[0].required_by, tup("app=/repo@rpl:2/1.0-1-1"));
    }

    // === Erase conflict tests ===

    #[test]
    fn test_keep_required_drops_erase() {
        let repo = MemoryRepository::new();
        let mut db = MemoryDatabase::new();
        db.add(trove("foo=/repo@rpl:2/1.0-1-1", &["soname: libfoo.so.1"], &[]));
        db.add(trove("bar=/repo@rpl:2/1.0-1-1", &[], &["soname: libfoo.so.1"]));

        let erase = JobTuple::erase(&tup("foo=/repo@rpl:2/1.0-1-1"));
        let primary: BTreeSet<TroveTuple> = [tup("foo=/repo@rpl:2/1.0-1-1")].into_iter().collect();
        let outcome = run(&repo, &db, &config(), vec![erase.clone()], primary.clone()).unwrap();
        assert!(outcome.jobs.is_empty());
        assert_eq!(outcome.keep_list[0].job, erase);
        assert_eq!(outcome.keep_list[0].required_by, tup("bar=/repo@rpl:2/1.0-1-1"));

        let config = UpdateConfig {
            keep_required: false,
            ..config()
        };
        let err = run(&repo, &db, &config, vec![erase], primary).unwrap_err();
        assert!(matches!(err, Error::Dependency(DependencyFailure::EraseDep(_))));
    }

    #[test]
    fn test_erased_provider_kept_for_new_trove() {
        let mut repo = MemoryRepository::new();
        repo.add(trove("app=/repo@rpl:2/2.0-1-1", &[], &["soname: libfoo.so.1"]));
        let mut db = MemoryDatabase::new();
        db.add(trove("foo=/repo@rpl:2/1.0-1-1", &["soname: libfoo.so.1"], &[]));
        db.add(trove("app=/repo@rpl:2/1.0-1-1", &[], &[]));

        let update = JobTuple::update(&tup("app=/repo@rpl:2/1.0-1-1"), &tup("app=/repo@rpl:2/2.0-1-1"));
        let erase = JobTuple::erase(&tup("foo=/repo@rpl:2/1.0-1-1"));
        let outcome = run(&repo, &db, &config(), vec![update.clone(), erase.clone()], BTreeSet::new()).unwrap();
        assert_eq!(outcome.jobs, vec![update]);
        assert_eq!(outcome.keep_list[0].job, erase);
        assert_eq!(outcome.keep_list[0].required_by, tup("app=/repo@rpl:2/2.0-1-1"));
    }

    #[test]
    fn test_implied_erase_restored() {
        let repo = MemoryRepository::new();
        let mut db = MemoryDatabase::new();
        db.add(trove("foo=/repo@rpl:2/1.0-1-1", &["soname: libfoo.so.1"], &[]));
        db.add(trove("bar=/repo@rpl:2/1.0-1-1", &[], &["soname: libfoo.so.1"]));

        let config = UpdateConfig {
            keep_required: false,
            ..config()
        };
        let outcome = run(&repo, &db, &config, vec![JobTuple::erase(&tup("foo=/repo@rpl:2/1.0-1-1"))], BTreeSet::new()).unwrap();
        assert!(outcome.jobs.is_empty());
        assert!(outcome.keep_list.is_empty());
    }

    #[test]
    fn test_erase_fixed_by_updating_requirer() {
        let mut repo = MemoryRepository::new();
        repo.add(trove("bar=/repo@rpl:2/2.0-1-1", &[], &[]));
        let mut db = MemoryDatabase::new();
        db.add(trove("foo=/repo@rpl:2/1.0-1-1", &["soname: libfoo.so.1"], &[]));
        db.add(trove("bar=/repo@rpl:2/1.0-1-1", &[], &["soname: libfoo.so.1"]));

        let erase = JobTuple::erase(&tup("foo=/repo@rpl:2/1.0-1-1"));
        let primary: BTreeSet<TroveTuple> = [tup("foo=/repo@rpl:2/1.0-1-1")].into_iter().collect();
        let outcome = run(&repo, &db, &config(), vec![erase.clone()], primary).unwrap();
        assert!(outcome.jobs.contains(&erase));
        assert!(outcome.jobs.contains(&JobTuple::update(&tup("bar=/repo@rpl:2/1.0-1-1"), &tup("bar=/repo@rpl:2/2.0-1-1"))));
    }
}
