// src/update/mod.rs

//! Update planning
//!
//! [`UpdatePlanner`] turns a desired state (a system model, or an explicit
//! list of primary jobs) into a closed, ordered job against the installed
//! system:
//!
//! 1. the model is compiled and realized into its target trove set
//! 2. primary jobs install the target and erase what it leaves out
//! 3. redirects are replaced by their targets
//! 4. the reconciler decides every candidate ([`Reconciler`])
//! 5. the erasure pass picks what is actually removed ([`find_erasures`])
//! 6. the dependency loop closes the job ([`DependencyLoop`])
//! 7. path conflicts and duplicate identities are rejected

mod config;
mod decision;
mod erasures;
mod merge;
pub mod redirect;
mod resolve;

pub use config::UpdateConfig;
pub use decision::{CandidateContext, Decision, ParentState, ReplacementCandidate, Rule, decide};
pub use erasures::{ErasureInput, ErasurePlan, find_erasures};
pub use merge::{
    DecisionRecord, MergeOptions, MergeResult, Reconciler, match_relative_updates, remove_duplicate_additions,
    remove_duplicate_erasures,
};
pub use redirect::{RedirectResult, follow_redirects, process_redirects};
pub use resolve::{DependencyLoop, KeptErase, ResolveOutcome};

use crate::cache::TroveCache;
use crate::error::{Error, Result};
use crate::graph::{ActionData, OperationGraph, TroveSet};
use crate::model::{ModelCompiler, SystemModel};
use crate::resolver::{ByTroveSet, ResolutionStack, ResolveMethod, SuggestionMap};
use crate::trove::{JobTuple, TroveTuple, check_job_uniqueness};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// A planned update
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdatePlan {
    /// Every job, sorted
    pub jobs: Vec<JobTuple>,
    /// The jobs in application order
    pub split: Vec<Vec<JobTuple>>,
    /// Indices into `split` of sub-jobs holding critical updates
    pub critical: Vec<usize>,
    /// Troves added for dependencies, keyed by the trove needing them
    pub suggestions: SuggestionMap,
    pub decisions: Vec<DecisionRecord>,
    /// Erases dropped because something that stays needs them
    pub keep_list: Vec<KeptErase>,
    /// Redirects replaced by their targets
    pub redirects: BTreeSet<TroveTuple>,
    /// (pinned old, new) pairs installed side by side
    pub pin_mappings: Vec<(TroveTuple, TroveTuple)>,
}

impl UpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Plans updates against the installed state behind a trove cache
pub struct UpdatePlanner<'c, 'a> {
    cache: &'c mut TroveCache<'a>,
    config: UpdateConfig,
    /// Resolution methods tried before the install label path
    methods: Vec<Box<dyn ResolveMethod>>,
}

impl<'c, 'a> UpdatePlanner<'c, 'a> {
    pub fn new(cache: &'c mut TroveCache<'a>, config: UpdateConfig) -> Self {
        Self {
            cache,
            config,
            methods: Vec::new(),
        }
    }

    /// Try `method` for dependencies before the install label path
    pub fn with_method(mut self, method: Box<dyn ResolveMethod>) -> Self {
        self.methods.push(method);
        self
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Plan the update that makes the system match `model`
    pub fn plan_model(&mut self, model: &SystemModel) -> Result<UpdatePlan> {
        let installed = self.cache.installed();
        let mut graph = OperationGraph::new();
        graph.add_installed(installed.iter_all_troves().into_iter().map(|(t, _)| t));
        let search = graph.add_repository(self.config.install_label_path.clone());
        let working = graph.add_static(TroveSet::new());
        let compiled = ModelCompiler::default().augment(&mut graph, model, search, working)?;
        let final_set = graph.final_fetch(compiled.final_set);
        graph.realize(&mut ActionData::new(&mut *self.cache, self.config.flavor.clone()))?;
        let target = graph.contents(final_set).clone();

        let walked = target.walk(self.cache, true)?;
        let wanted: BTreeSet<TroveTuple> = walked.iter().filter(|e| e.in_install).map(|e| e.tuple.clone()).collect();
        let mut primary: Vec<JobTuple> = walked
            .iter()
            .filter(|e| e.explicit && e.in_install)
            .map(|e| JobTuple::install(&e.tuple, true))
            .collect();

        for (tuple, pinned) in installed.iter_all_troves() {
            if wanted.contains(&tuple) {
                continue;
            }
            if pinned {
                debug!("{} is pinned and stays installed", tuple);
                continue;
            }
            primary.push(JobTuple::erase(&tuple));
        }
        info!("model target holds {} trove(s), {} primary job(s)", wanted.len(), primary.len());

        let model_methods: Vec<Box<dyn ResolveMethod>> = vec![Box::new(ByTroveSet::new(target))];
        self.plan(primary, Some(wanted), model_methods)
    }

    /// Plan the update for an explicit list of primary jobs
    pub fn plan_jobs(&mut self, primary: &[JobTuple]) -> Result<UpdatePlan> {
        self.plan(primary.to_vec(), None, Vec::new())
    }

    fn plan(
        &mut self,
        primary: Vec<JobTuple>,
        target: Option<BTreeSet<TroveTuple>>,
        first_methods: Vec<Box<dyn ResolveMethod>>,
    ) -> Result<UpdatePlan> {
        let installed = self.cache.installed();
        let redirected = process_redirects(self.cache, &primary, &self.config.flavor)?;

        let keep_wins = target.is_some();
        let options = MergeOptions {
            exclude: self.config.exclude_patterns()?,
            flavors: self.config.flavor.clone(),
            target,
            keep_wins,
            ..Default::default()
        };
        let merged = Reconciler::new(self.cache, options).merge(&redirected.jobs)?;

        let erasures = find_erasures(installed, &merged.erasure_input());
        let mut jobs = merged.jobs.clone();
        jobs.extend(erasures.erase.iter().map(JobTuple::erase));
        remove_duplicate_erasures(&mut jobs);
        remove_duplicate_additions(&mut jobs)?;
        match_relative_updates(&mut jobs);

        let mut methods = first_methods;
        methods.append(&mut self.methods);
        methods.push(Box::new(self.config.resolution_stack()));
        let mut stack = ResolutionStack::new(methods);

        let primary_erases: BTreeSet<TroveTuple> = merged.primary_erases.iter().cloned().collect();
        let outcome = DependencyLoop::new(&self.config, primary_erases)?.run(self.cache, jobs, &mut stack)?;

        if self.config.check_path_conflicts {
            check_path_conflicts(self.cache, &outcome.jobs)?;
        }
        check_job_uniqueness(&outcome.jobs)?;

        let mut jobs = outcome.jobs;
        jobs.sort();
        let mut redirects = merged.redirects;
        redirects.extend(redirected.redirects);
        let mut decisions = merged.decisions;
        decisions.extend(outcome.decisions);

        info!("planned {} job(s) in {} sub-job(s)", jobs.len(), outcome.check.split.len());
        Ok(UpdatePlan {
            jobs,
            split: outcome.check.split,
            critical: outcome.check.critical,
            suggestions: outcome.suggestions,
            decisions,
            keep_list: outcome.keep_list,
            redirects,
            pin_mappings: merged.pin_mappings,
        })
    }
}

/// Reject jobs leaving two troves of one name and branch with
/// overlapping paths
fn check_path_conflicts(cache: &mut TroveCache<'_>, jobs: &[JobTuple]) -> Result<()> {
    let installed = cache.installed();
    let olds: BTreeSet<TroveTuple> = jobs.iter().filter_map(JobTuple::old_tuple).collect();
    let news: Vec<TroveTuple> = jobs.iter().filter_map(JobTuple::new_tuple).collect();
    cache.cache_troves(&news)?;

    let mut conflicts = Vec::new();
    for new in &news {
        let Some(new_paths) = cache.trove(new).map(|t| t.path_hashes.clone()) else {
            continue;
        };
        if new_paths.is_empty() {
            continue;
        }

        let staying: Vec<TroveTuple> = installed
            .troves_by_name(&new.name)
            .into_iter()
            .filter(|t| !olds.contains(t) && t.branch() == new.branch())
            .collect();
        let paths = installed.get_path_hashes_for_trove_list(&staying);
        let mut clashing: Vec<String> = staying
            .iter()
            .zip(&paths)
            .filter(|(_, p)| p.overlaps(&new_paths))
            .map(|(t, _)| t.to_string())
            .collect();

        for other in news.iter().filter(|o| *o != new && o.name == new.name && o.branch() == new.branch()) {
            if cache.trove(other).is_some_and(|t| t.path_hashes.overlaps(&new_paths)) {
                clashing.push(other.to_string());
            }
        }
        if !clashing.is_empty() {
            clashing.insert(0, new.to_string());
            conflicts.push((new.name.clone(), clashing));
        }
    }

    if conflicts.is_empty() {
        return Ok(());
    }
    // two new troves clashing report the same group twice
    let mut by_name: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (name, troves) in conflicts {
        by_name.entry(name).or_default().extend(troves);
    }
    Err(Error::InstallPathConflicts(
        by_name.into_iter().map(|(name, troves)| (name, troves.into_iter().collect())).collect(),
    ))
}
