// src/dependencies/mod.rs

//! Dependencies and dependency sets
//!
//! Troves provide and require sets of typed dependencies:
//! - `trove: bash:runtime` - another trove
//! - `soname: ELF64/libssl.so.3(OPENSSL_3.0.0)` - a shared library
//! - `file: /usr/bin/python3` - a file path
//! - `python: requests` - a language module
//!
//! # Example
//!
//! ```ignore
//! use conary_planner::dependencies::{Dependency, DependencySet};
//!
//! let provides: DependencySet = ["soname: libz.so.1"].iter().map(|s| s.parse().unwrap()).collect();
//! let requires: DependencySet = ["soname: libz.so.1"].iter().map(|s| s.parse().unwrap()).collect();
//! assert!(requires.unsatisfied_by(&provides).is_empty());
//! ```

mod classes;

pub use classes::{Dependency, DependencyClass};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// An ordered set of dependencies
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencySet {
    deps: BTreeSet<Dependency>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dep: Dependency) -> bool {
        self.deps.insert(dep)
    }

    pub fn extend(&mut self, other: &DependencySet) {
        self.deps.extend(other.deps.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.deps.iter()
    }

    /// True if some dependency in this set satisfies `required`
    pub fn provides(&self, required: &Dependency) -> bool {
        self.deps.iter().any(|d| d.satisfies(required))
    }

    /// Requirements in this set that `provided` does not satisfy
    pub fn unsatisfied_by(&self, provided: &DependencySet) -> DependencySet {
        self.deps.iter().filter(|d| !provided.provides(d)).cloned().collect()
    }

    /// Drop dependencies of the given classes
    pub fn without_classes(&self, classes: &[DependencyClass]) -> DependencySet {
        self.deps
            .iter()
            .filter(|d| !classes.contains(&d.class))
            .cloned()
            .collect()
    }
}

impl FromIterator<Dependency> for DependencySet {
    fn from_iter<I: IntoIterator<Item = Dependency>>(iter: I) -> Self {
        Self {
            deps: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for DependencySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let deps: Vec<String> = self.deps.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", deps.join(", "))
    }
}
