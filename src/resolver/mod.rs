// src/resolver/mod.rs

//! Dependency resolution and job ordering
//!
//! Checking a job computes which requirements of the troves it installs
//! are left unsatisfied, which requirements of troves that stay installed
//! it breaks, and how the job splits into ordered sub-jobs. Resolution
//! methods then look for troves providing what is missing; they are tried
//! one after another until one of them makes progress.

mod check;
mod method;
mod order;
mod select;

pub use check::{CheckOptions, DependencyCheck, check_dependencies};
pub use method::{
    BasicResolution, ByLabelPath, ByTroveList, ByTroveSet, LabelPathMode, ResolutionStack, ResolveMethod,
};
pub use order::JobGraph;
pub use select::select_resolution_trove;

use crate::dependencies::DependencySet;
use crate::trove::TroveTuple;
use std::collections::BTreeMap;
use std::fmt;

/// Requirements of one trove that nothing in the final state provides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub required_by: TroveTuple,
    pub deps: DependencySet,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} requires {}", self.required_by, self.deps)
    }
}

/// Requirements of a trove that stays installed, broken by the job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenRequirement {
    pub required_by: TroveTuple,
    pub deps: DependencySet,
    /// Troves being removed that provided the requirement
    pub provided_by: Vec<TroveTuple>,
}

/// Troves added to the job, keyed by the trove that needed them
pub type SuggestionMap = BTreeMap<TroveTuple, Vec<TroveTuple>>;

/// Candidate providers per requirement set, one list per dependency
pub type Suggestions = BTreeMap<DependencySet, Vec<Vec<TroveTuple>>>;
