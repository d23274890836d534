// src/update/merge.rs

//! Reconciling requested jobs with the installed system
//!
//! Primary jobs are expanded through the strong references of collections,
//! depth first. Each trove reached is a candidate; [`decide`] settles what
//! happens to it and the outcome is recorded. When a collection is
//! installed or replaced, its old and new references are paired by name
//! and the pairs become candidates in turn, carrying what the parent did
//! (switched branch or flavor, came in through a weak reference) and the
//! by-default flags of the nearest primary.
//!
//! Nothing is erased here. Removals are collected as candidates and left
//! to [`find_erasures`](super::find_erasures).

use super::decision::{CandidateContext, Decision, ParentState, ReplacementCandidate, Rule, decide};
use super::erasures::ErasureInput;
use super::redirect::follow_redirects;
use crate::cache::TroveCache;
use crate::error::{Error, Result};
use crate::flavor::FlavorSpec;
use crate::trove::{JobTuple, PathHashes, TroveTuple, diff_troves};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use tracing::{debug, warn};

/// Knobs for one reconciliation pass
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Follow strong references of collections
    pub recurse: bool,
    /// Names never installed through a collection
    pub exclude: Vec<Regex>,
    /// Troves that may not be installed
    pub ineligible: BTreeSet<TroveTuple>,
    /// Installed troves that may not be replaced
    pub locked: BTreeSet<TroveTuple>,
    /// Troves installed even when the system only references them
    pub forced: BTreeSet<TroveTuple>,
    /// Allow primary jobs to erase or replace pinned troves
    pub ignore_primary_pins: bool,
    /// Flavor path used to pick redirect targets
    pub flavors: Vec<FlavorSpec>,
    /// When set, members of collections outside it are not installed
    pub target: Option<BTreeSet<TroveTuple>>,
    /// Drop primary erases of troves the reconciler decided to keep
    pub keep_wins: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            recurse: true,
            exclude: Vec::new(),
            ineligible: BTreeSet::new(),
            locked: BTreeSet::new(),
            forced: BTreeSet::new(),
            ignore_primary_pins: false,
            flavors: Vec::new(),
            target: None,
            keep_wins: false,
        }
    }
}

/// One recorded decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionRecord {
    pub tuple: TroveTuple,
    pub primary: bool,
    pub decision: Decision,
    pub rule: Rule,
}

/// Output of [`Reconciler::merge`]
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    /// Installs and updates
    pub jobs: Vec<JobTuple>,
    pub primary_erases: Vec<TroveTuple>,
    pub implied_erases: Vec<TroveTuple>,
    /// Installed troves that have to stay
    pub kept: BTreeSet<TroveTuple>,
    /// Everything referenced by collections being installed or kept
    pub referenced: BTreeSet<TroveTuple>,
    /// (pinned old, new) pairs where the pin held the old trove in place
    pub pin_mappings: Vec<(TroveTuple, TroveTuple)>,
    /// Redirect troves replaced by their targets
    pub redirects: BTreeSet<TroveTuple>,
    pub decisions: Vec<DecisionRecord>,
}

impl MergeResult {
    pub fn erasure_input(&self) -> ErasureInput {
        ErasureInput {
            primary: self.primary_erases.clone(),
            implied: self.implied_erases.clone(),
            updated: self.jobs.iter().filter(|j| j.is_update()).filter_map(JobTuple::old_tuple).collect(),
            kept: self.kept.clone(),
            referenced: self.referenced.clone(),
        }
    }

    pub fn decision_for(&self, tuple: &TroveTuple) -> Option<&DecisionRecord> {
        self.decisions.iter().find(|d| &d.tuple == tuple)
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    new: Option<TroveTuple>,
    /// What the job, or the old version of the parent, says is replaced
    old: Option<TroveTuple>,
    primary: bool,
    /// Look for an installed trove of the same name to replace
    pair_installed: bool,
    ignore_pins: bool,
    by_default: bool,
    parent: ParentState,
    /// By-default flags of the nearest primary collection
    defaults: Rc<BTreeMap<TroveTuple, bool>>,
}

impl Candidate {
    fn primary(job: &JobTuple, ignore_pins: bool) -> Self {
        Self {
            new: job.new_tuple(),
            old: job.old_tuple(),
            primary: true,
            pair_installed: job.absolute,
            ignore_pins,
            by_default: true,
            parent: ParentState::default(),
            defaults: Rc::new(BTreeMap::new()),
        }
    }
}

/// Walks primary jobs through the installed system
pub struct Reconciler<'c, 'a> {
    cache: &'c mut TroveCache<'a>,
    options: MergeOptions,
    result: MergeResult,
    /// New tuples already decided
    seen: BTreeSet<TroveTuple>,
    erase_seen: BTreeSet<TroveTuple>,
    /// Old tuples already claimed by an update
    consumed: BTreeSet<TroveTuple>,
}

impl<'c, 'a> Reconciler<'c, 'a> {
    pub fn new(cache: &'c mut TroveCache<'a>, options: MergeOptions) -> Self {
        Self {
            cache,
            options,
            result: MergeResult::default(),
            seen: BTreeSet::new(),
            erase_seen: BTreeSet::new(),
            consumed: BTreeSet::new(),
        }
    }

    /// Reconcile `primary_jobs`
    ///
    /// Primary erases are considered after everything else so an erase of
    /// a trove that some update already replaces is dropped.
    pub fn merge(mut self, primary_jobs: &[JobTuple]) -> Result<MergeResult> {
        let news: Vec<TroveTuple> = primary_jobs.iter().filter_map(JobTuple::new_tuple).collect();
        self.cache.cache_troves(&news)?;

        let ignore = self.options.ignore_primary_pins;
        let (erases, others): (Vec<&JobTuple>, Vec<&JobTuple>) = primary_jobs.iter().partition(|j| j.is_erase());

        self.drain(others.iter().map(|j| Candidate::primary(j, ignore)).collect())?;
        for job in erases {
            let candidate = Candidate::primary(job, ignore);
            if candidate.old.as_ref().is_some_and(|o| self.consumed.contains(o)) {
                continue;
            }
            self.drain(vec![candidate])?;
        }

        debug!(
            "reconciled {} primary job(s) into {} job(s), {} erase candidate(s)",
            primary_jobs.len(),
            self.result.jobs.len(),
            self.result.primary_erases.len() + self.result.implied_erases.len()
        );
        Ok(self.result)
    }

    /// Process candidates depth first, in order
    fn drain(&mut self, mut pending: Vec<Candidate>) -> Result<()> {
        pending.reverse();
        while let Some(candidate) = pending.pop() {
            let mut children = match candidate.new.clone() {
                Some(new) => self.install_candidate(candidate, new)?,
                None => self.erase_candidate(candidate)?,
            };
            children.reverse();
            pending.extend(children);
        }
        Ok(())
    }

    fn record(&mut self, tuple: &TroveTuple, primary: bool, decision: Decision, rule: Rule) {
        if decision.is_skip() {
            debug!("skipping {}: {} ({})", tuple, decision, rule);
        }
        self.result.decisions.push(DecisionRecord {
            tuple: tuple.clone(),
            primary,
            decision,
            rule,
        });
    }

    fn is_pinned(&self, tuple: &TroveTuple) -> bool {
        self.cache
            .installed()
            .troves_are_pinned(std::slice::from_ref(tuple))
            .first()
            .copied()
            .unwrap_or(false)
    }

    fn replaceable(&self, tuple: &TroveTuple) -> bool {
        self.cache.installed().has_trove(tuple) && !self.options.locked.contains(tuple) && !self.consumed.contains(tuple)
    }

    /// The installed trove `new` would take the place of
    fn find_replacement(&self, candidate: &Candidate, new: &TroveTuple, same_name: &[TroveTuple]) -> Option<TroveTuple> {
        if let Some(old) = &candidate.old
            && self.replaceable(old)
            && old.name == new.name
        {
            return Some(old.clone());
        }
        if candidate.primary && !candidate.pair_installed {
            return None;
        }
        let available: Vec<&TroveTuple> = same_name.iter().filter(|t| self.replaceable(t)).collect();
        let diff = diff_troves(available, std::iter::once(new));
        diff.updates.into_iter().next().map(|(old, _)| old)
    }

    /// Path hashes of a trove, or of the members of a collection
    fn path_hashes(&mut self, tuple: &TroveTuple, installed: bool) -> Result<PathHashes> {
        let installed_state = self.cache.installed();
        let trove = if installed {
            installed_state.get_troves(std::slice::from_ref(tuple))?.into_iter().flatten().next()
        } else {
            Some(self.cache.get_trove(tuple)?.clone())
        };
        let Some(trove) = trove else {
            return Ok(PathHashes::new());
        };
        if !tuple.is_collection() || tuple.name.starts_with("fileset-") {
            return Ok(trove.path_hashes);
        }

        let members: Vec<TroveTuple> = trove.strong_refs().map(|r| r.tuple.clone()).collect();
        let mut hashes = trove.path_hashes.clone();
        if installed {
            for member in installed_state.get_path_hashes_for_trove_list(&members) {
                hashes.extend(&member);
            }
        } else {
            self.cache.cache_troves(&members)?;
            for member in &members {
                if let Some(trv) = self.cache.trove(member) {
                    hashes.extend(&trv.path_hashes);
                }
            }
        }
        Ok(hashes)
    }

    fn install_candidate(&mut self, candidate: Candidate, new: TroveTuple) -> Result<Vec<Candidate>> {
        if !self.seen.insert(new.clone()) {
            return Ok(Vec::new());
        }
        let installed = self.cache.installed();

        let is_redirect = match self.cache.get_trove(&new) {
            Ok(trove) => trove.is_redirect(),
            // only an erased reference can be missing everywhere
            Err(Error::TroveNotFound(_)) if !installed.has_trove(&new) => false,
            Err(e) => return Err(e),
        };
        if is_redirect {
            return self.redirect_candidate(candidate, new);
        }

        let complete = installed.get_complete_trove_set(std::slice::from_ref(&new.name));
        let same_name = installed.troves_by_name(&new.name);
        let mut ctx = CandidateContext::new(new.clone());
        ctx.primary = candidate.primary;
        ctx.installed = installed.has_trove(&new);
        ctx.ineligible = self.options.ineligible.contains(&new);
        ctx.forced = self.options.forced.contains(&new);
        ctx.excluded = self.options.exclude.iter().any(|re| re.is_match(&new.name));
        ctx.by_default = candidate.by_default;
        ctx.parent = candidate.parent;

        let replacement = if ctx.installed {
            None
        } else {
            self.find_replacement(&candidate, &new, &same_name)
        };

        // the collection's old member is gone and nothing took its place:
        // the user erased it
        let erased_locally = candidate.old.as_ref().is_some_and(|o| {
            !installed.has_trove(o) && complete.is_referenced_not_installed(o) && replacement.is_none()
        });
        ctx.referenced_not_installed = complete.is_referenced_not_installed(&new) || erased_locally;

        if let Some(old) = &replacement {
            let same_branch = old.branch() == new.branch();
            let parent_ref = candidate.old.as_ref().filter(|o| *o != old);
            let pinned = !candidate.ignore_pins && self.is_pinned(old);
            let paths_compatible = if pinned {
                let old_paths = self.path_hashes(old, true)?;
                let new_paths = self.path_hashes(&new, false)?;
                old_paths.compatible_with(&new_paths)
            } else {
                false
            };
            let flavor_compatible = old.flavor.is_compatible_with(&new.flavor);
            if !candidate.primary && !same_branch && !flavor_compatible {
                warn!(
                    "{} would move {} to another branch and an incompatible flavor; both must be allowed",
                    new, old
                );
            }
            ctx.replacement = Some(ReplacementCandidate {
                old: old.clone(),
                pinned,
                same_branch,
                downgrade: same_branch && old.version.is_newer_than(&new.version),
                local_branch_switch: parent_ref.is_some_and(|o| o.branch() != old.branch()),
                flavor_compatible,
                local_flavor_switch: parent_ref.is_some_and(|o| o.flavor != old.flavor),
                paths_compatible,
            });
        }

        let (decision, rule) = decide(&ctx);
        self.record(&new, candidate.primary, decision.clone(), rule);

        let was_weak = complete.referenced_weak.contains(&new);
        match decision {
            Decision::SkipAlreadyInstalled => {
                self.result.kept.insert(new.clone());
                self.children(&candidate, &new, Some(&new), ParentState::default())
            }
            Decision::InstallFresh => {
                self.result.jobs.push(JobTuple::install(&new, false));
                if let Some(old) = &ctx.replacement {
                    // pinned, installed next to it
                    self.result.kept.insert(old.old.clone());
                    self.result.pin_mappings.push((old.old.clone(), new.clone()));
                }
                let parent = ParentState {
                    installed_via_weak: candidate.parent.installed_via_weak || was_weak,
                    ..ParentState::default()
                };
                self.children(&candidate, &new, None, parent)
            }
            Decision::Replace(old) => {
                self.result.jobs.push(JobTuple::update(&old, &new));
                self.consumed.insert(old.clone());
                let parent = ParentState {
                    switched_branch: old.branch() != new.branch(),
                    switched_flavor: old.flavor != new.flavor,
                    installed_via_weak: candidate.parent.installed_via_weak || was_weak,
                };
                self.children(&candidate, &new, Some(&old), parent)
            }
            _ => {
                if let Some(old) = &ctx.replacement {
                    self.result.kept.insert(old.old.clone());
                    if rule == Rule::PinnedReplacement {
                        self.result.pin_mappings.push((old.old.clone(), new.clone()));
                    }
                }
                Ok(Vec::new())
            }
        }
    }

    fn redirect_candidate(&mut self, candidate: Candidate, redirect: TroveTuple) -> Result<Vec<Candidate>> {
        let targets = follow_redirects(self.cache, &redirect, &self.options.flavors)?;
        debug!("{} is a redirect to {} trove(s)", redirect, targets.len());
        self.result.redirects.insert(redirect.clone());

        let installed = self.cache.installed();
        let source = match &candidate.old {
            Some(old) if installed.has_trove(old) => Some(old.clone()),
            _ => installed
                .troves_by_name(&redirect.name)
                .into_iter()
                .find(|t| t.branch() == redirect.branch()),
        };
        if let Some(source) = source
            && self.erase_seen.insert(source.clone())
        {
            self.result.implied_erases.push(source);
        }

        Ok(targets
            .into_iter()
            .map(|target| Candidate {
                new: Some(target),
                old: None,
                pair_installed: true,
                ..candidate.clone()
            })
            .collect())
    }

    fn erase_candidate(&mut self, candidate: Candidate) -> Result<Vec<Candidate>> {
        let Some(old) = candidate.old.clone() else {
            return Ok(Vec::new());
        };
        let installed = self.cache.installed();
        if !installed.has_trove(&old) || !self.erase_seen.insert(old.clone()) {
            return Ok(Vec::new());
        }

        let pinned = self.is_pinned(&old);
        if candidate.primary {
            if self.options.keep_wins && self.result.kept.contains(&old) {
                debug!("not erasing {}: kept by the update", old);
                return Ok(Vec::new());
            }
            if pinned && !candidate.ignore_pins {
                return Err(Error::PinConflict(old.to_string()));
            }
            self.result.primary_erases.push(old.clone());
        } else if pinned && !candidate.ignore_pins {
            debug!("keeping pinned {}", old);
            self.result.kept.insert(old);
            return Ok(Vec::new());
        } else {
            self.result.implied_erases.push(old.clone());
        }

        if !self.options.recurse || !old.is_collection() {
            return Ok(Vec::new());
        }
        let members: Vec<TroveTuple> = installed
            .get_troves(std::slice::from_ref(&old))?
            .into_iter()
            .flatten()
            .flat_map(|t| t.strong_refs().map(|r| r.tuple.clone()).collect::<Vec<_>>())
            .collect();
        Ok(members
            .into_iter()
            .map(|member| Candidate {
                new: None,
                old: Some(member),
                primary: false,
                pair_installed: false,
                ignore_pins: false,
                by_default: true,
                parent: ParentState::default(),
                defaults: candidate.defaults.clone(),
            })
            .collect())
    }

    /// Candidates for the members of collection `new`, paired with the
    /// members of `old` (the installed collection it replaces)
    fn children(
        &mut self,
        candidate: &Candidate,
        new: &TroveTuple,
        old: Option<&TroveTuple>,
        parent: ParentState,
    ) -> Result<Vec<Candidate>> {
        if !new.is_collection() {
            return Ok(Vec::new());
        }
        let trove = self.cache.get_trove(new)?.clone();
        self.result.referenced.extend(trove.references.iter().map(|r| r.tuple.clone()));
        if !self.options.recurse {
            return Ok(Vec::new());
        }

        let defaults = if candidate.primary {
            Rc::new(trove.references.iter().map(|r| (r.tuple.clone(), r.by_default)).collect())
        } else {
            candidate.defaults.clone()
        };
        let by_default = |tuple: &TroveTuple| {
            defaults
                .get(tuple)
                .copied()
                .or_else(|| trove.by_default(tuple))
                .unwrap_or(true)
        };

        let new_refs: BTreeSet<TroveTuple> = trove.strong_refs().map(|r| r.tuple.clone()).collect();
        let old_refs: BTreeSet<TroveTuple> = match old {
            Some(old) => self
                .cache
                .installed()
                .get_troves(std::slice::from_ref(old))?
                .into_iter()
                .flatten()
                .flat_map(|t| t.strong_refs().map(|r| r.tuple.clone()).collect::<Vec<_>>())
                .collect(),
            None => BTreeSet::new(),
        };

        let child = |new: Option<TroveTuple>, old: Option<TroveTuple>| Candidate {
            by_default: new.as_ref().is_none_or(&by_default),
            new,
            old,
            primary: false,
            pair_installed: true,
            ignore_pins: false,
            parent,
            defaults: defaults.clone(),
        };

        let diff = diff_troves(&old_refs, &new_refs);
        let mut children: Vec<Candidate> = Vec::new();
        for tuple in old_refs.intersection(&new_refs) {
            children.push(child(Some(tuple.clone()), Some(tuple.clone())));
        }
        for (o, n) in diff.updates {
            children.push(child(Some(n), Some(o)));
        }
        for n in diff.installs {
            children.push(child(Some(n), None));
        }
        if let Some(target) = &self.options.target {
            children.retain(|c| c.new.as_ref().is_none_or(|n| target.contains(n)));
        }
        for o in diff.erases {
            children.push(child(None, Some(o)));
        }
        Ok(children)
    }
}

/// When several updates replace one old trove, keep the best pairing as
/// the update and install the others alongside
pub fn remove_duplicate_erasures(jobs: &mut Vec<JobTuple>) {
    let mut by_old: BTreeMap<TroveTuple, Vec<TroveTuple>> = BTreeMap::new();
    for job in jobs.iter().filter(|j| j.is_update()) {
        if let (Some(old), Some(new)) = (job.old_tuple(), job.new_tuple()) {
            by_old.entry(old).or_default().push(new);
        }
    }
    for (old, news) in by_old.into_iter().filter(|(_, news)| news.len() > 1) {
        let keep = diff_troves(std::iter::once(&old), &news).updates.into_iter().next().map(|(_, n)| n);
        jobs.retain(|j| j.old_tuple().as_ref() != Some(&old) || j.new_tuple() == keep);
        for new in news.iter().filter(|n| Some(*n) != keep.as_ref()) {
            jobs.push(JobTuple::install(new, false));
        }
        if keep.is_some() {
            // the update removes it already
            jobs.retain(|j| !(j.is_erase() && j.old_tuple().as_ref() == Some(&old)));
        }
    }
}

/// A trove installed by several jobs keeps only the job with an old side
pub fn remove_duplicate_additions(jobs: &mut Vec<JobTuple>) -> Result<()> {
    let mut by_new: BTreeMap<TroveTuple, Vec<usize>> = BTreeMap::new();
    for (i, job) in jobs.iter().enumerate() {
        if let Some(new) = job.new_tuple() {
            by_new.entry(new).or_default().push(i);
        }
    }

    let mut dropped: BTreeSet<usize> = BTreeSet::new();
    for (new, indices) in by_new.into_iter().filter(|(_, v)| v.len() > 1) {
        let (fresh, relative): (Vec<usize>, Vec<usize>) = indices.into_iter().partition(|&i| jobs[i].old.is_none());
        if relative.len() > 1 {
            return Err(Error::Update(format!("Multiple relative updates install {}", new)));
        }
        let keep_first_fresh = relative.is_empty();
        dropped.extend(fresh.into_iter().skip(usize::from(keep_first_fresh)));
    }

    let mut i = 0;
    jobs.retain(|_| {
        let keep = !dropped.contains(&i);
        i += 1;
        keep
    });
    Ok(())
}

/// Pair leftover fresh installs with erases of the same name into updates
pub fn match_relative_updates(jobs: &mut Vec<JobTuple>) {
    let installs: Vec<TroveTuple> = jobs
        .iter()
        .filter(|j| j.is_fresh_install() && !j.absolute)
        .filter_map(JobTuple::new_tuple)
        .collect();
    let erases: Vec<TroveTuple> = jobs.iter().filter(|j| j.is_erase()).filter_map(JobTuple::old_tuple).collect();
    if installs.is_empty() || erases.is_empty() {
        return;
    }

    let diff = diff_troves(&erases, &installs);
    for (old, new) in diff.updates {
        jobs.retain(|j| {
            let erases_old = j.is_erase() && j.old_tuple().as_ref() == Some(&old);
            let installs_new = j.is_fresh_install() && j.new_tuple().as_ref() == Some(&new);
            !(erases_old || installs_new)
        });
        jobs.push(JobTuple::update(&old, &new));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemoryDatabase, MemoryRepository};
    use crate::trove::{Trove, TroveRef};

    fn tup(s: &str) -> TroveTuple {
        TroveTuple::parse(s).unwrap()
    }

    fn group(name: &str, members: &[(&str, bool)]) -> Trove {
        let mut trv = Trove::new(tup(name));
        for (m, by_default) in members {
            trv.references.push(TroveRef::strong(tup(m), *by_default));
        }
        trv
    }

    fn merge(repo: &MemoryRepository, db: &MemoryDatabase, jobs: &[JobTuple]) -> Result<MergeResult> {
        let mut cache = TroveCache::new(repo, db);
        Reconciler::new(&mut cache, MergeOptions::default()).merge(jobs)
    }

    // === Primary tests ===

    #[test]
    fn test_absolute_install_replaces_same_name() {
        let mut repo = MemoryRepository::new();
        repo.add(Trove::new(tup("foo=/repo@rpl:2/2.0-1-1")));
        let mut db = MemoryDatabase::new();
        db.add(Trove::new(tup("foo=/repo@rpl:2/1.0-1-1")));

        let result = merge(&repo, &db, &[JobTuple::install(&tup("foo=/repo@rpl:2/2.0-1-1"), true)]).unwrap();
        assert_eq!(
            result.jobs,
            vec![JobTuple::update(&tup("foo=/repo@rpl:2/1.0-1-1"), &tup("foo=/repo@rpl:2/2.0-1-1"))]
        );
        assert_eq!(result.decisions[0].rule, Rule::Replace);
    }

    #[test]
    fn test_relative_install_goes_alongside() {
        let mut repo = MemoryRepository::new();
        repo.add(Trove::new(tup("foo=/repo@rpl:2/2.0-1-1")));
        let mut db = MemoryDatabase::new();
        db.add(Trove::new(tup("foo=/repo@rpl:2/1.0-1-1")));

        let result = merge(&repo, &db, &[JobTuple::install(&tup("foo=/repo@rpl:2/2.0-1-1"), false)]).unwrap();
        assert_eq!(result.jobs, vec![JobTuple::install(&tup("foo=/repo@rpl:2/2.0-1-1"), false)]);
    }

    #[test]
    fn test_pinned_primary_erase_conflicts() {
        let repo = MemoryRepository::new();
        let mut db = MemoryDatabase::new();
        db.add(Trove::new(tup("foo=/repo@rpl:2/1.0-1-1")));
        db.pin(&tup("foo=/repo@rpl:2/1.0-1-1"));

        let err = merge(&repo, &db, &[JobTuple::erase(&tup("foo=/repo@rpl:2/1.0-1-1"))]).unwrap_err();
        assert!(matches!(err, Error::PinConflict(_)));

        let mut cache = TroveCache::new(&repo, &db);
        let options = MergeOptions {
            ignore_primary_pins: true,
            ..Default::default()
        };
        let result = Reconciler::new(&mut cache, options)
            .merge(&[JobTuple::erase(&tup("foo=/repo@rpl:2/1.0-1-1"))])
            .unwrap();
        assert_eq!(result.primary_erases, vec![tup("foo=/repo@rpl:2/1.0-1-1")]);
    }

    #[test]
    fn test_pinned_replacement_side_by_side() {
        let mut repo = MemoryRepository::new();
        let mut new = Trove::new(tup("kernel=/repo@rpl:2/2.0-1-1"));
        new.path_hashes = PathHashes::from_paths(["/boot/vmlinuz-2.0"]);
        repo.add(new);
        let mut db = MemoryDatabase::new();
        let mut old = Trove::new(tup("kernel=/repo@rpl:2/1.0-1-1"));
        old.path_hashes = PathHashes::from_paths(["/boot/vmlinuz-1.0"]);
        db.add(old);
        db.pin(&tup("kernel=/repo@rpl:2/1.0-1-1"));

        let result = merge(&repo, &db, &[JobTuple::install(&tup("kernel=/repo@rpl:2/2.0-1-1"), true)]).unwrap();
        assert_eq!(result.jobs, vec![JobTuple::install(&tup("kernel=/repo@rpl:2/2.0-1-1"), false)]);
        assert!(result.kept.contains(&tup("kernel=/repo@rpl:2/1.0-1-1")));
        assert_eq!(result.decisions[0].rule, Rule::PinnedReplacement);
    }

    // === Collection tests ===

    #[test]
    fn test_group_update_walks_members() {
        let mut repo = MemoryRepository::new();
        repo.add(group(
            "group-os=/repo@rpl:2/2.0-1-1",
            &[("foo=/repo@rpl:2/2.0-1-1", true), ("extra=/repo@rpl:2/1.0-1-1", false), ("new=/repo@rpl:2/1.0-1-1", true)],
        ));
        for t in ["foo=/repo@rpl:2/2.0-1-1", "extra=/repo@rpl:2/1.0-1-1", "new=/repo@rpl:2/1.0-1-1"] {
            repo.add(Trove::new(tup(t)));
        }
        let mut db = MemoryDatabase::new();
        db.add(group(
            "group-os=/repo@rpl:2/1.0-1-1",
            &[("foo=/repo@rpl:2/1.0-1-1", true), ("old=/repo@rpl:2/1.0-1-1", true)],
        ));
        db.add(Trove::new(tup("foo=/repo@rpl:2/1.0-1-1")));
        db.add(Trove::new(tup("old=/repo@rpl:2/1.0-1-1")));

        let result = merge(&repo, &db, &[JobTuple::install(&tup("group-os=/repo@rpl:2/2.0-1-1"), true)]).unwrap();
        let jobs: BTreeSet<JobTuple> = result.jobs.iter().cloned().collect();
        assert!(jobs.contains(&JobTuple::update(&tup("group-os=/repo@rpl:2/1.0-1-1"), &tup("group-os=/repo@rpl:2/2.0-1-1"))));
        assert!(jobs.contains(&JobTuple::update(&tup("foo=/repo@rpl:2/1.0-1-1"), &tup("foo=/repo@rpl:2/2.0-1-1"))));
        assert!(jobs.contains(&JobTuple::install(&tup("new=/repo@rpl:2/1.0-1-1"), false)));
        assert_eq!(jobs.len(), 3);
        assert_eq!(result.implied_erases, vec![tup("old=/repo@rpl:2/1.0-1-1")]);
        assert_eq!(
            result.decision_for(&tup("extra=/repo@rpl:2/1.0-1-1")).map(|d| d.rule),
            Some(Rule::NotByDefault)
        );
    }

    #[test]
    fn test_user_erased_member_stays_erased() {
        let mut repo = MemoryRepository::new();
        repo.add(group("group-os=/repo@rpl:2/2.0-1-1", &[("foo=/repo@rpl:2/2.0-1-1", true)]));
        repo.add(Trove::new(tup("foo=/repo@rpl:2/2.0-1-1")));
        let mut db = MemoryDatabase::new();
        // foo 1.0 was erased by the user after installing the group
        db.add(group("group-os=/repo@rpl:2/1.0-1-1", &[("foo=/repo@rpl:2/1.0-1-1", true)]));

        let result = merge(&repo, &db, &[JobTuple::install(&tup("group-os=/repo@rpl:2/2.0-1-1"), true)]).unwrap();
        assert_eq!(result.jobs.len(), 1);
        assert_eq!(
            result.decision_for(&tup("foo=/repo@rpl:2/2.0-1-1")).map(|d| d.decision.clone()),
            Some(Decision::SkipAlreadyReferenced)
        );
    }

    #[test]
    fn test_local_update_not_downgraded() {
        let mut repo = MemoryRepository::new();
        repo.add(group("group-os=/repo@rpl:2/2.0-1-1", &[("foo=/repo@rpl:2/2.0-1-1", true)]));
        repo.add(Trove::new(tup("foo=/repo@rpl:2/2.0-1-1")));
        let mut db = MemoryDatabase::new();
        db.add(group("group-os=/repo@rpl:2/1.0-1-1", &[("foo=/repo@rpl:2/1.0-1-1", true)]));
        // user updated foo past what the new group carries
        db.add(Trove::new(tup("foo=/repo@rpl:2/3.0-1-1")));

        let result = merge(&repo, &db, &[JobTuple::install(&tup("group-os=/repo@rpl:2/2.0-1-1"), true)]).unwrap();
        let record = result.decision_for(&tup("foo=/repo@rpl:2/2.0-1-1")).unwrap();
        assert_eq!(record.rule, Rule::BranchAffinity);
        assert!(result.kept.contains(&tup("foo=/repo@rpl:2/3.0-1-1")));
    }

    #[test]
    fn test_excluded_member_skipped() {
        let mut repo = MemoryRepository::new();
        repo.add(group("group-os=/repo@rpl:2/1.0-1-1", &[("foo:debuginfo=/repo@rpl:2/1.0-1-1", true)]));
        repo.add(Trove::new(tup("foo:debuginfo=/repo@rpl:2/1.0-1-1")));
        let db = MemoryDatabase::new();
        let mut cache = TroveCache::new(&repo, &db);
        let options = MergeOptions {
            exclude: vec![Regex::new(".*:debuginfo").unwrap()],
            ..Default::default()
        };
        let result = Reconciler::new(&mut cache, options)
            .merge(&[JobTuple::install(&tup("group-os=/repo@rpl:2/1.0-1-1"), true)])
            .unwrap();
        assert_eq!(result.jobs.len(), 1);
        assert_eq!(result.decisions[1].decision, Decision::SkipExcludedByPolicy);
    }

    // === Normalization tests ===

    #[test]
    fn test_duplicate_additions_prefer_relative() {
        let old = tup("foo=/repo@rpl:2/1.0-1-1");
        let new = tup("foo=/repo@rpl:2/2.0-1-1");
        let mut jobs = vec![JobTuple::install(&new, false), JobTuple::update(&old, &new)];
        remove_duplicate_additions(&mut jobs).unwrap();
        assert_eq!(jobs, vec![JobTuple::update(&old, &new)]);
    }

    #[test]
    fn test_duplicate_erasures_split() {
        let old = tup("foo=/repo@rpl:2/1.0-1-1");
        let a = tup("foo=/repo@rpl:2/2.0-1-1");
        let b = tup("foo=/repo@rpl:3/2.0-1-1");
        let mut jobs = vec![JobTuple::update(&old, &a), JobTuple::update(&old, &b)];
        remove_duplicate_erasures(&mut jobs);
        assert!(jobs.contains(&JobTuple::update(&old, &a)));
        assert!(jobs.contains(&JobTuple::install(&b, false)));
        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn test_relative_updates_matched() {
        let old = tup("foo=/repo@rpl:2/1.0-1-1");
        let new = tup("foo=/repo@rpl:2/2.0-1-1");
        let mut jobs = vec![JobTuple::erase(&old), JobTuple::install(&new, false)];
        match_relative_updates(&mut jobs);
        assert_eq!(jobs, vec![JobTuple::update(&old, &new)]);
    }
}
