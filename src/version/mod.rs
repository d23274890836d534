// src/version/mod.rs

//! Branch-aware trove versions
//!
//! A version places a revision on a branch. A branch is a lineage of
//! labels: the first label is where the trove was created and each
//! further label is a shadow of the lineage before it. Text forms:
//!
//! - `/conary.example.com@rpl:devel/1.0-1-1` - revision 1.0-1-1 on a branch
//! - `/conary.example.com@rpl:devel//rpl:2/1.0-1.1-1` - the same line shadowed
//!   onto `rpl:2` (partial labels after `//` inherit the previous host)
//! - `/conary.example.com@rpl:devel/1700000000.000:1.0-1-1` - frozen form,
//!   carrying the commit timestamp
//!
//! Equality, hashing and ordering ignore the timestamp. "Which of two
//! versions is newer" uses the timestamps when both carry distinct ones
//! and falls back to the branch-then-revision ordering otherwise.

use crate::error::{Error, Result};
use crate::label::Label;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Upstream version plus source and build counts
///
/// Format: `upstream-source[-build]`
/// Examples:
/// - "1.0-1-1" → upstream="1.0", source="1", build=Some("1")
/// - "2.4.1-3" → upstream="2.4.1", source="3", build=None
/// - "1.0-1.2-1" → a shadowed source count
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Revision {
    pub upstream: String,
    pub source_count: String,
    pub build_count: Option<String>,
}

impl Revision {
    pub fn new(upstream: impl Into<String>, source_count: impl Into<String>, build_count: Option<&str>) -> Self {
        Self {
            upstream: upstream.into(),
            source_count: source_count.into(),
            build_count: build_count.map(str::to_string),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split('-');
        let upstream = parts.next().unwrap_or_default();
        let source = parts
            .next()
            .ok_or_else(|| Error::ParseError(format!("Revision '{}' is missing a source count", s)))?;
        let build = parts.next();
        if parts.next().is_some() {
            return Err(Error::ParseError(format!("Too many '-' in revision '{}'", s)));
        }

        if upstream.is_empty() || upstream.contains(['/', ':', '@']) {
            return Err(Error::ParseError(format!("Invalid upstream version in '{}'", s)));
        }
        let valid_count = |c: &str| !c.is_empty() && c.split('.').all(|p| !p.is_empty() && p.chars().all(|ch| ch.is_ascii_digit()));
        if !valid_count(source) {
            return Err(Error::ParseError(format!("Invalid source count in '{}'", s)));
        }
        if let Some(b) = build
            && !valid_count(b)
        {
            return Err(Error::ParseError(format!("Invalid build count in '{}'", s)));
        }

        Ok(Self::new(upstream, source, build))
    }

    /// True when `spec` (an upstream version or a full revision) names this revision
    pub fn matches_spec(&self, spec: &str) -> bool {
        if spec.contains('-') {
            self.to_string() == spec
                || (self.build_count.is_some() && format!("{}-{}", self.upstream, self.source_count) == spec)
        } else {
            self.upstream == spec
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.upstream, self.source_count)?;
        if let Some(build) = &self.build_count {
            write!(f, "-{}", build)?;
        }
        Ok(())
    }
}

/// A lineage of labels; every label after the first is a shadow
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Branch {
    labels: Vec<Label>,
}

impl Branch {
    pub fn new(label: Label) -> Self {
        Self { labels: vec![label] }
    }

    /// Build a branch from an explicit label lineage
    pub fn from_labels(labels: Vec<Label>) -> Result<Self> {
        let mut iter = labels.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| Error::BranchStructure("a branch needs at least one label".to_string()))?;
        let mut branch = Self::new(first);
        for label in iter {
            branch = branch.shadow(label)?;
        }
        Ok(branch)
    }

    /// Parse `/label[//label...]`
    pub fn parse(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix('/')
            .ok_or_else(|| Error::ParseError(format!("Branch '{}' must start with '/'", s)))?;
        let mut labels: Vec<Label> = Vec::new();
        for part in body.split("//") {
            let label = match labels.last() {
                Some(prev) => Label::complete(part, prev)?,
                None => Label::parse(part)?,
            };
            labels.push(label);
        }
        Self::from_labels(labels)
    }

    /// Shadow this branch onto `label`
    ///
    /// Fails when `label` already occurs in the lineage: a shadow can never
    /// point back at a label its own history came from.
    pub fn shadow(&self, label: Label) -> Result<Self> {
        if self.labels.contains(&label) {
            return Err(Error::BranchStructure(format!(
                "cannot shadow {} onto {}: label is already part of its lineage",
                self, label
            )));
        }
        let mut labels = self.labels.clone();
        labels.push(label);
        Ok(Self { labels })
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn trailing_label(&self) -> &Label {
        // labels is never empty
        &self.labels[self.labels.len() - 1]
    }

    pub fn is_shadow(&self) -> bool {
        self.labels.len() > 1
    }

    /// The branch this one shadows, if any
    pub fn parent_branch(&self) -> Option<Branch> {
        if self.is_shadow() {
            Some(Self {
                labels: self.labels[..self.labels.len() - 1].to_vec(),
            })
        } else {
            None
        }
    }

    /// Number of leading labels the two lineages share
    pub fn closeness(&self, other: &Branch) -> usize {
        self.labels
            .iter()
            .zip(other.labels.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, label) in self.labels.iter().enumerate() {
            if i == 0 {
                write!(f, "/{}", label)?;
            } else {
                write!(f, "//{}", label)?;
            }
        }
        Ok(())
    }
}

/// A revision on a branch, with the commit timestamp in milliseconds
#[derive(Debug, Clone)]
pub struct Version {
    branch: Branch,
    revision: Revision,
    timestamp: u64,
}

impl Version {
    pub fn new(branch: Branch, revision: Revision, timestamp: u64) -> Self {
        Self {
            branch,
            revision,
            timestamp,
        }
    }

    /// Parse `/branch/revision` or the frozen `/branch/secs.millis:revision`
    pub fn parse(s: &str) -> Result<Self> {
        let slash = s
            .rfind('/')
            .ok_or_else(|| Error::ParseError(format!("Version '{}' must start with '/'", s)))?;
        if slash == 0 {
            return Err(Error::ParseError(format!("Version '{}' has no revision", s)));
        }
        let branch = Branch::parse(&s[..slash])?;
        let rest = &s[slash + 1..];

        let (timestamp, revision) = match rest.split_once(':') {
            Some((ts, rev)) => (parse_timestamp(ts)?, rev),
            None => (0, rest),
        };

        Ok(Self::new(branch, Revision::parse(revision)?, timestamp))
    }

    pub fn branch(&self) -> &Branch {
        &self.branch
    }

    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    pub fn trailing_label(&self) -> &Label {
        self.branch.trailing_label()
    }

    pub fn trailing_revision(&self) -> &Revision {
        &self.revision
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_newer_than(&self, other: &Version) -> bool {
        if self.timestamp != 0 && other.timestamp != 0 && self.timestamp != other.timestamp {
            return self.timestamp > other.timestamp;
        }
        self.cmp(other) == Ordering::Greater
    }

    pub fn is_on_local_host(&self) -> bool {
        self.trailing_label().is_local()
    }

    pub fn is_in_local_namespace(&self) -> bool {
        self.trailing_label().namespace == crate::label::LOCAL_HOST
    }

    pub fn is_shadow(&self) -> bool {
        self.branch.is_shadow()
    }

    /// The version this shadow was created from
    pub fn parent_version(&self) -> Option<Version> {
        self.branch.parent_branch().map(|branch| Self {
            branch,
            revision: self.revision.clone(),
            timestamp: self.timestamp,
        })
    }

    /// Shadow this version onto `label`, keeping its revision
    pub fn shadow(&self, label: Label) -> Result<Version> {
        Ok(Self {
            branch: self.branch.shadow(label)?,
            revision: self.revision.clone(),
            timestamp: self.timestamp,
        })
    }

    /// Frozen text form, including the timestamp
    pub fn freeze(&self) -> String {
        format!(
            "{}/{}.{:03}:{}",
            self.branch,
            self.timestamp / 1000,
            self.timestamp % 1000,
            self.revision
        )
    }
}

fn parse_timestamp(s: &str) -> Result<u64> {
    let (secs, millis) = s.split_once('.').unwrap_or((s, "0"));
    let secs: u64 = secs
        .parse()
        .map_err(|e| Error::ParseError(format!("Invalid timestamp '{}': {}", s, e)))?;
    let millis: u64 = format!("{:0<3}", millis)[..3]
        .parse()
        .map_err(|e| Error::ParseError(format!("Invalid timestamp '{}': {}", s, e)))?;
    Ok(secs * 1000 + millis)
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.branch == other.branch && self.revision == other.revision
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.branch.hash(state);
        self.revision.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.branch
            .cmp(&other.branch)
            .then_with(|| self.revision.cmp(&other.revision))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.branch, self.revision)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.freeze())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl FromStr for Branch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Branch::parse(s)
    }
}

impl Serialize for Branch {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Branch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Branch::parse(&s).map_err(serde::de::Error::custom)
    }
}
