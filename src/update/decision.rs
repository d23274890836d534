// src/update/decision.rs

//! Per-candidate decisions of the reconciler
//!
//! Every trove the reconciler reaches gets exactly one [`Decision`],
//! computed by [`decide`] from a [`CandidateContext`]. The checks run in a
//! fixed order and the first one that applies names the [`Rule`] recorded
//! with the decision:
//!
//! 1. already installed
//! 2. ineligible
//! 3. referenced by the installed system but not installed
//! 4. excluded by policy (not for primaries)
//! 5. not installed by default (not for primaries, only when nothing of
//!    that name is installed)
//! 6. no installed trove to replace: fresh install
//! 7. branch affinity
//! 8. flavor affinity
//! 9. pinned replacement
//! 10. replace

use crate::trove::TroveTuple;
use serde::Serialize;
use strum_macros::{Display, IntoStaticStr};

/// Outcome for one candidate trove
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    SkipAlreadyInstalled,
    SkipIneligible,
    SkipAlreadyReferenced,
    InstallFresh,
    Replace(TroveTuple),
    SkipExcludedByPolicy,
    SkipNotByDefault,
}

impl Decision {
    pub fn is_skip(&self) -> bool {
        !matches!(self, Decision::InstallFresh | Decision::Replace(_))
    }
}

/// The check that produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    AlreadyInstalled,
    Ineligible,
    AlreadyReferenced,
    ExcludedByPolicy,
    NotByDefault,
    BranchAffinity,
    FlavorAffinity,
    PinnedReplacement,
    Fresh,
    Replace,
}

/// What the reconciler knows about the collection a candidate came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParentState {
    /// The parent moved to another branch in this job
    pub switched_branch: bool,
    /// The parent moved to another flavor in this job
    pub switched_flavor: bool,
    /// Some ancestor is being installed although the system only
    /// referenced it weakly
    pub installed_via_weak: bool,
}

/// The installed trove a candidate would replace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementCandidate {
    pub old: TroveTuple,
    pub pinned: bool,
    /// Old and new are on the same branch
    pub same_branch: bool,
    /// Same branch and the new version is older
    pub downgrade: bool,
    /// Some installed trove of this name is already on the new branch
    pub local_branch_switch: bool,
    pub flavor_compatible: bool,
    /// Some installed trove of this name already has the new flavor
    pub local_flavor_switch: bool,
    /// Old and new install disjoint paths
    pub paths_compatible: bool,
}

/// Everything [`decide`] looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateContext {
    pub tuple: TroveTuple,
    /// Named by the request itself rather than reached through a collection
    pub primary: bool,
    pub installed: bool,
    pub ineligible: bool,
    /// An installed collection references this trove but it is not installed
    pub referenced_not_installed: bool,
    /// The caller asked for this trove explicitly
    pub forced: bool,
    pub excluded: bool,
    pub by_default: bool,
    pub parent: ParentState,
    pub replacement: Option<ReplacementCandidate>,
}

impl CandidateContext {
    pub fn new(tuple: TroveTuple) -> Self {
        Self {
            tuple,
            primary: false,
            installed: false,
            ineligible: false,
            referenced_not_installed: false,
            forced: false,
            excluded: false,
            by_default: true,
            parent: ParentState::default(),
            replacement: None,
        }
    }
}

/// Pick the outcome for one candidate
pub fn decide(ctx: &CandidateContext) -> (Decision, Rule) {
    if ctx.installed {
        return (Decision::SkipAlreadyInstalled, Rule::AlreadyInstalled);
    }
    if ctx.ineligible {
        return (Decision::SkipIneligible, Rule::Ineligible);
    }
    if ctx.referenced_not_installed && !(ctx.primary || ctx.parent.installed_via_weak || ctx.forced) {
        return (Decision::SkipAlreadyReferenced, Rule::AlreadyReferenced);
    }
    if !ctx.primary && ctx.excluded {
        return (Decision::SkipExcludedByPolicy, Rule::ExcludedByPolicy);
    }

    let Some(old) = &ctx.replacement else {
        if !ctx.primary && !ctx.by_default {
            return (Decision::SkipNotByDefault, Rule::NotByDefault);
        }
        return (Decision::InstallFresh, Rule::Fresh);
    };

    if !ctx.primary {
        let branch_ok = if old.same_branch {
            !old.downgrade
        } else {
            ctx.parent.switched_branch || old.local_branch_switch
        };
        if !branch_ok {
            return (Decision::SkipIneligible, Rule::BranchAffinity);
        }
        let flavor_ok = old.flavor_compatible || ctx.parent.switched_flavor || old.local_flavor_switch;
        if !flavor_ok {
            return (Decision::SkipIneligible, Rule::FlavorAffinity);
        }
    }

    if old.pinned {
        if old.paths_compatible {
            return (Decision::InstallFresh, Rule::PinnedReplacement);
        }
        return (Decision::SkipIneligible, Rule::PinnedReplacement);
    }

    (Decision::Replace(old.old.clone()), Rule::Replace)
}
