// src/update/redirect.rs

//! Redirect resolution
//!
//! A redirect trove points at other troves by name and branch. Following
//! one replaces it with the latest matching target; targets that are
//! redirects themselves are followed in turn. A redirect with no targets
//! means the trove was removed upstream, so it resolves to nothing.

use crate::cache::TroveCache;
use crate::error::{Error, Result};
use crate::flavor::FlavorSpec;
use crate::label::LabelPath;
use crate::trove::{JobTuple, TroveSpec, TroveTuple};
use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

/// Resolve `tuple` through any chain of redirects
pub fn follow_redirects(cache: &mut TroveCache<'_>, tuple: &TroveTuple, flavors: &[FlavorSpec]) -> Result<Vec<TroveTuple>> {
    let mut resolved = Vec::new();
    let mut visited: Vec<TroveTuple> = Vec::new();
    let mut queue = VecDeque::from([tuple.clone()]);

    while let Some(current) = queue.pop_front() {
        let trove = cache.get_trove(&current)?;
        let Some(targets) = trove.redirects.clone() else {
            resolved.push(current);
            continue;
        };

        if visited.contains(&current) {
            let mut names: Vec<String> = visited.iter().map(|t| t.name.clone()).collect();
            names.sort();
            names.dedup();
            return Err(Error::RedirectLoop(names));
        }
        visited.push(current.clone());

        if targets.is_empty() {
            debug!("{} redirects to nothing", current);
        }
        for target in targets {
            let spec = TroveSpec {
                name: target.name.clone(),
                version: Some(target.branch.to_string()),
                flavor: Some(target.flavor.clone().unwrap_or_else(|| current.flavor.clone())),
                pinned: false,
            };
            let labels = LabelPath::from_labels(vec![target.branch.trailing_label().clone()]);
            let found = find_target(cache, &labels, &spec, flavors)?;
            if found.is_empty() {
                return Err(Error::SpecsNotFound {
                    specs: vec![spec.to_string()],
                    alternates: Vec::new(),
                });
            }
            debug!("{} redirects to {}", current, found.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", "));
            queue.extend(found);
        }
    }
    Ok(resolved)
}

fn find_target(cache: &mut TroveCache<'_>, labels: &LabelPath, spec: &TroveSpec, flavors: &[FlavorSpec]) -> Result<Vec<TroveTuple>> {
    let empty = [FlavorSpec::empty()];
    let flavors = if flavors.is_empty() { &empty[..] } else { flavors };
    for flavor in flavors {
        let found = cache
            .find_troves(labels, std::slice::from_ref(spec), flavor)?
            .remove(spec)
            .unwrap_or_default();
        if !found.is_empty() {
            return Ok(found);
        }
    }
    Ok(Vec::new())
}

/// Jobs with redirects replaced by their targets
#[derive(Debug, Clone, Default)]
pub struct RedirectResult {
    pub jobs: Vec<JobTuple>,
    /// Redirect troves that were replaced
    pub redirects: BTreeSet<TroveTuple>,
}

/// Replace every job installing a redirect with jobs installing its targets
///
/// When the job replaced an installed trove, that trove is erased, since
/// the redirect source is going away. The redirect itself never appears in
/// the result.
pub fn process_redirects(cache: &mut TroveCache<'_>, jobs: &[JobTuple], flavors: &[FlavorSpec]) -> Result<RedirectResult> {
    let new: Vec<TroveTuple> = jobs.iter().filter_map(JobTuple::new_tuple).collect();
    cache.cache_troves(&new)?;

    let mut result = RedirectResult::default();
    for job in jobs {
        let Some(new) = job.new_tuple() else {
            result.jobs.push(job.clone());
            continue;
        };
        if !cache.get_trove(&new)?.is_redirect() {
            result.jobs.push(job.clone());
            continue;
        }

        result.redirects.insert(new.clone());
        for target in follow_redirects(cache, &new, flavors)? {
            result.jobs.push(JobTuple::install(&target, job.absolute));
        }
        if let Some(old) = job.old_tuple() {
            result.jobs.push(JobTuple::erase(&old));
        }
    }
    Ok(result)
}
