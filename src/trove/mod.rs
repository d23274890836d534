// src/trove/mod.rs

//! Troves and trove identities
//!
//! A trove is identified by a `(name, version, flavor)` tuple. Troves come
//! in a few kinds, derived from the name:
//!
//! - **Group**: `group-*`, a collection of packages and other groups
//! - **Fileset**: `fileset-*`, a collection of files from other troves
//! - **Package**: a plain name, a collection of its components
//! - **Component**: `package:component`, the unit that owns files
//! - **Redirect**: any collection whose contents point at other troves
//!
//! Collections reference their members strongly (direct members) or weakly
//! (members of members). Each reference carries a by-default flag saying
//! whether installing the collection installs that member.

mod diff;
mod job;
mod spec;

pub use diff::{TroveDiff, diff_jobs, diff_troves};
pub use job::{JobTuple, SavedJob, SavedJobEntry, check_job_uniqueness};
pub use spec::{TroveSpec, VersionSelector};

use crate::dependencies::{Dependency, DependencySet};
use crate::error::{Error, Result};
use crate::flavor::FlavorSpec;
use crate::version::{Branch, Version};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use xxhash_rust::xxh3::xxh3_64;

/// Unique identity of a trove
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TroveTuple {
    pub name: String,
    pub version: Version,
    pub flavor: FlavorSpec,
}

impl TroveTuple {
    pub fn new(name: impl Into<String>, version: Version, flavor: FlavorSpec) -> Self {
        Self {
            name: name.into(),
            version,
            flavor,
        }
    }

    /// Parse `name=version[flavor]`; the version may be frozen
    pub fn parse(s: &str) -> Result<Self> {
        let (name, rest) = s
            .split_once('=')
            .ok_or_else(|| Error::ParseError(format!("Trove '{}' has no version", s)))?;
        let (version, flavor) = split_flavor(rest)?;
        Ok(Self::new(name, Version::parse(version)?, flavor))
    }

    pub fn is_component(&self) -> bool {
        self.name.contains(':')
    }

    /// Groups, filesets and packages all reference other troves
    pub fn is_collection(&self) -> bool {
        !self.is_component()
    }

    pub fn is_group(&self) -> bool {
        self.name.starts_with("group-")
    }

    /// The package a component belongs to (or the name itself)
    pub fn package_name(&self) -> &str {
        self.name.split_once(':').map_or(self.name.as_str(), |(package, _)| package)
    }

    /// The tuple of the package owning this component
    pub fn package_tuple(&self) -> Option<TroveTuple> {
        if self.is_component() {
            Some(Self::new(self.package_name(), self.version.clone(), self.flavor.clone()))
        } else {
            None
        }
    }

    pub fn branch(&self) -> &Branch {
        self.version.branch()
    }

    /// Text form keeping the version timestamp
    pub fn freeze(&self) -> String {
        format!("{}={}{}", self.name, self.version.freeze(), self.flavor_suffix())
    }

    fn flavor_suffix(&self) -> String {
        format!("[{}]", self.flavor.body())
    }
}

/// Split `version[flavor]` into its parts
pub(crate) fn split_flavor(s: &str) -> Result<(&str, FlavorSpec)> {
    match s.find('[') {
        Some(open) => {
            if !s.ends_with(']') {
                return Err(Error::ParseError(format!("Unterminated flavor in '{}'", s)));
            }
            Ok((&s[..open], FlavorSpec::parse(&s[open..])?))
        }
        None => Ok((s, FlavorSpec::empty())),
    }
}

impl fmt::Display for TroveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}{}", self.name, self.version, self.flavor_suffix())
    }
}

impl FromStr for TroveTuple {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TroveTuple::parse(s)
    }
}

impl Serialize for TroveTuple {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.freeze())
    }
}

impl<'de> Deserialize<'de> for TroveTuple {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TroveTuple::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Kind of trove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TroveKind {
    Group,
    Fileset,
    Package,
    Component,
    Redirect,
}

impl TroveKind {
    /// Kind implied by a trove name
    pub fn of_name(name: &str) -> Self {
        if name.contains(':') {
            TroveKind::Component
        } else if name.starts_with("group-") {
            TroveKind::Group
        } else if name.starts_with("fileset-") {
            TroveKind::Fileset
        } else {
            TroveKind::Package
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TroveKind::Group => "group",
            TroveKind::Fileset => "fileset",
            TroveKind::Package => "package",
            TroveKind::Component => "component",
            TroveKind::Redirect => "redirect",
        }
    }
}

impl FromStr for TroveKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "group" => Ok(TroveKind::Group),
            "fileset" => Ok(TroveKind::Fileset),
            "package" => Ok(TroveKind::Package),
            "component" => Ok(TroveKind::Component),
            "redirect" => Ok(TroveKind::Redirect),
            _ => Err(format!("Invalid trove kind: {s}")),
        }
    }
}

/// A containment entry of a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TroveRef {
    pub tuple: TroveTuple,
    #[serde(default = "default_true")]
    pub by_default: bool,
    #[serde(default = "default_true")]
    pub strong: bool,
}

fn default_true() -> bool {
    true
}

impl TroveRef {
    pub fn strong(tuple: TroveTuple, by_default: bool) -> Self {
        Self {
            tuple,
            by_default,
            strong: true,
        }
    }

    pub fn weak(tuple: TroveTuple, by_default: bool) -> Self {
        Self {
            tuple,
            by_default,
            strong: false,
        }
    }
}

/// Where a redirect points: a name on a branch, optionally reflavored
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RedirectTarget {
    pub name: String,
    pub branch: Branch,
    #[serde(default)]
    pub flavor: Option<FlavorSpec>,
}

/// Set of hashed file paths a trove installs
///
/// Two troves can be installed side by side when their path hash sets
/// do not overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathHashes(BTreeSet<u64>);

impl PathHashes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(paths.into_iter().map(|p| hash_path(p.as_ref())).collect())
    }

    pub fn insert_path(&mut self, path: &str) {
        self.0.insert(hash_path(path));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn overlaps(&self, other: &PathHashes) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    pub fn compatible_with(&self, other: &PathHashes) -> bool {
        !self.overlaps(other)
    }

    pub fn extend(&mut self, other: &PathHashes) {
        self.0.extend(other.0.iter().copied());
    }
}

/// Hash a path into the 64-bit form stored in [`PathHashes`]
pub fn hash_path(path: &str) -> u64 {
    xxh3_64(path.as_bytes())
}

/// Trove metadata as a source or the installed database reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trove {
    pub tuple: TroveTuple,
    #[serde(default)]
    pub references: Vec<TroveRef>,
    /// Present only for redirects; an empty list redirects to nothing
    #[serde(default)]
    pub redirects: Option<Vec<RedirectTarget>>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub provides: DependencySet,
    #[serde(default)]
    pub requires: DependencySet,
    #[serde(default)]
    pub path_hashes: PathHashes,
    /// Contents of small text files (system model includes)
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl Trove {
    pub fn new(tuple: TroveTuple) -> Self {
        Self {
            tuple,
            references: Vec::new(),
            redirects: None,
            source_name: None,
            provides: DependencySet::new(),
            requires: DependencySet::new(),
            path_hashes: PathHashes::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.tuple.name
    }

    pub fn kind(&self) -> TroveKind {
        if self.is_redirect() {
            TroveKind::Redirect
        } else {
            TroveKind::of_name(&self.tuple.name)
        }
    }

    pub fn is_redirect(&self) -> bool {
        self.redirects.is_some()
    }

    pub fn is_collection(&self) -> bool {
        self.tuple.is_collection()
    }

    /// Iterate referenced troves, filtered by strength
    pub fn iter_trove_list(&self, strong: bool, weak: bool) -> impl Iterator<Item = &TroveRef> {
        self.references
            .iter()
            .filter(move |r| (r.strong && strong) || (!r.strong && weak))
    }

    pub fn strong_refs(&self) -> impl Iterator<Item = &TroveRef> {
        self.iter_trove_list(true, false)
    }

    pub fn includes_trove(&self, tuple: &TroveTuple) -> bool {
        self.references.iter().any(|r| &r.tuple == tuple)
    }

    /// By-default flag of a referenced trove, `None` if not referenced
    pub fn by_default(&self, tuple: &TroveTuple) -> Option<bool> {
        self.references.iter().find(|r| &r.tuple == tuple).map(|r| r.by_default)
    }

    /// Provisions including the implicit `trove: <name>`
    pub fn effective_provides(&self) -> DependencySet {
        let mut provides = self.provides.clone();
        provides.insert(Dependency::trove(self.tuple.name.clone()));
        provides
    }

    /// Requirements with the trove's own provisions removed
    pub fn external_requires(&self) -> DependencySet {
        self.requires.unsatisfied_by(&self.effective_provides())
    }
}
