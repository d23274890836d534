// src/lib.rs

//! Conary update planner
//!
//! Plans updates of a system built from troves: named, versioned and
//! flavored units living on branches of repository labels. A system model
//! describes the desired state; the planner compiles it into a lazy graph
//! of trove sets, realizes the graph against a trove source, reconciles
//! the result with what is installed and closes the job over dependencies.
//!
//! # Architecture
//!
//! - Identity: [`label`], [`version`], [`flavor`] and [`trove`] tuples
//! - Sources: [`source`] capabilities for repositories and the installed
//!   database, memoized by the [`cache`]
//! - Graph: [`graph`] nodes computed in batched layers
//! - Model: [`model`] parsing, formatting and compilation
//! - Planning: [`update`] reconciliation and [`resolver`] dependency closure

pub mod cache;
pub mod dependencies;
mod error;
pub mod flavor;
pub mod graph;
pub mod label;
pub mod model;
pub mod resolver;
pub mod source;
pub mod trove;
pub mod update;
pub mod version;

pub use cache::TroveCache;
pub use dependencies::{Dependency, DependencyClass, DependencySet};
pub use error::{DependencyFailure, DependencyReport, Error, Result};
pub use flavor::FlavorSpec;
pub use graph::{OperationGraph, TroveSet};
pub use label::{Label, LabelPath};
pub use model::{ModelFile, SystemModel};
pub use source::{InstalledState, MemoryDatabase, MemoryRepository, TroveSource};
pub use trove::{JobTuple, SavedJob, Trove, TroveSpec, TroveTuple};
pub use update::{UpdateConfig, UpdatePlan, UpdatePlanner};
pub use version::{Branch, Version};
