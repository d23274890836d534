// src/label.rs

//! Labels and label paths
//!
//! Labels identify a line of development inside a repository using the
//! format `host@namespace:tag`.
//!
//! Examples:
//! - `conary.example.com@rpl:2` - rPath Linux 2 from conary.example.com
//! - `contrib.example.com@rpl:devel` - a contributed development line
//! - `local@local:COOK` - troves built locally, never present in a repository
//!
//! # Label Components
//!
//! - **Host**: The repository hostname the label lives on
//! - **Namespace**: A grouping within the repository (e.g., project name)
//! - **Tag**: The branch or release identifier
//!
//! # Partial Labels
//!
//! Trove specs and model lines may name a label relative to a default one:
//! `@ns:tag` and `ns:tag` keep the default host, `:tag` keeps host and
//! namespace. [`Label::complete`] fills in the missing parts.
//!
//! # Label Path
//!
//! A label path is an ordered list of labels that defines the search order
//! when resolving troves and dependencies. Earlier labels are searched first.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Host name used for troves that exist only on the local system
pub const LOCAL_HOST: &str = "local";

/// A Conary label `host@namespace:tag`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    /// Repository hostname
    pub host: String,
    /// Namespace within the repository
    pub namespace: String,
    /// Branch or release tag
    pub tag: String,
}

impl Label {
    /// Create a new label
    pub fn new(host: impl Into<String>, namespace: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            namespace: namespace.into(),
            tag: tag.into(),
        }
    }

    /// Parse a label from string format `host@namespace:tag`
    pub fn parse(s: &str) -> Result<Self, LabelParseError> {
        let at_pos = s.find('@').ok_or_else(|| LabelParseError::MissingAt(s.to_string()))?;

        let colon_pos = s[at_pos..]
            .find(':')
            .map(|p| at_pos + p)
            .ok_or_else(|| LabelParseError::MissingColon(s.to_string()))?;

        let label = Self {
            host: s[..at_pos].to_string(),
            namespace: s[at_pos + 1..colon_pos].to_string(),
            tag: s[colon_pos + 1..].to_string(),
        };
        label.validate(s)?;
        Ok(label)
    }

    /// Complete a partial label against `default`
    ///
    /// Accepts full labels as well as `@ns:tag`, `ns:tag` and `:tag`.
    pub fn complete(partial: &str, default: &Label) -> Result<Self, LabelParseError> {
        let label = if let Some(rest) = partial.strip_prefix(':') {
            Self::new(default.host.clone(), default.namespace.clone(), rest)
        } else if let Some(rest) = partial.strip_prefix('@') {
            let (ns, tag) = rest
                .split_once(':')
                .ok_or_else(|| LabelParseError::MissingColon(partial.to_string()))?;
            Self::new(default.host.clone(), ns, tag)
        } else if partial.contains('@') {
            return Self::parse(partial);
        } else {
            let (ns, tag) = partial
                .split_once(':')
                .ok_or_else(|| LabelParseError::MissingColon(partial.to_string()))?;
            Self::new(default.host.clone(), ns, tag)
        };
        label.validate(partial)?;
        Ok(label)
    }

    fn validate(&self, original: &str) -> Result<(), LabelParseError> {
        if self.host.is_empty() {
            return Err(LabelParseError::EmptyHost(original.to_string()));
        }
        if self.namespace.is_empty() {
            return Err(LabelParseError::EmptyNamespace(original.to_string()));
        }
        if self.tag.is_empty() {
            return Err(LabelParseError::EmptyTag(original.to_string()));
        }

        let valid_chars = |c: char| c.is_alphanumeric() || c == '.' || c == '-' || c == '_';

        if !self.host.chars().all(valid_chars) {
            return Err(LabelParseError::InvalidHost(self.host.clone()));
        }
        if !self.namespace.chars().all(valid_chars) {
            return Err(LabelParseError::InvalidNamespace(self.namespace.clone()));
        }
        if !self.tag.chars().all(valid_chars) {
            return Err(LabelParseError::InvalidTag(self.tag.clone()));
        }
        Ok(())
    }

    /// True for labels on the `local` pseudo-host
    pub fn is_local(&self) -> bool {
        self.host == LOCAL_HOST
    }

    /// True when both labels share host and namespace
    pub fn same_namespace(&self, other: &Label) -> bool {
        self.host == other.host && self.namespace == other.namespace
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.host, self.namespace, self.tag)
    }
}

impl FromStr for Label {
    type Err = LabelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::parse(s)
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Label::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when parsing a label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelParseError {
    /// Missing @ separator
    MissingAt(String),
    /// Missing : separator
    MissingColon(String),
    /// Empty host component
    EmptyHost(String),
    /// Empty namespace component
    EmptyNamespace(String),
    /// Empty tag component
    EmptyTag(String),
    /// Invalid characters in host
    InvalidHost(String),
    /// Invalid characters in namespace
    InvalidNamespace(String),
    /// Invalid characters in tag
    InvalidTag(String),
}

impl fmt::Display for LabelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelParseError::MissingAt(s) => write!(f, "Missing '@' in label: {}", s),
            LabelParseError::MissingColon(s) => write!(f, "Missing ':' in label: {}", s),
            LabelParseError::EmptyHost(s) => write!(f, "Empty host in label: {}", s),
            LabelParseError::EmptyNamespace(s) => write!(f, "Empty namespace in label: {}", s),
            LabelParseError::EmptyTag(s) => write!(f, "Empty tag in label: {}", s),
            LabelParseError::InvalidHost(s) => write!(f, "Invalid host name: {}", s),
            LabelParseError::InvalidNamespace(s) => write!(f, "Invalid namespace: {}", s),
            LabelParseError::InvalidTag(s) => write!(f, "Invalid tag: {}", s),
        }
    }
}

impl std::error::Error for LabelParseError {}

/// A label path defines the search order for trove and dependency lookups
///
/// Labels earlier in the path have higher priority. A label appears at
/// most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelPath {
    /// Ordered list of labels (highest priority first)
    labels: Vec<Label>,
}

impl LabelPath {
    /// Create a new empty label path
    pub fn new() -> Self {
        Self { labels: Vec::new() }
    }

    /// Create a label path from a list of labels, dropping repeats
    pub fn from_labels(labels: Vec<Label>) -> Self {
        let mut path = Self::new();
        for label in labels {
            path.push(label);
        }
        path
    }

    /// Add a label to the end of the path (lowest priority)
    pub fn push(&mut self, label: Label) {
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
    }

    /// Add a label to the front of the path (highest priority)
    pub fn prepend(&mut self, label: Label) {
        self.remove(&label);
        self.labels.insert(0, label);
    }

    /// Remove a label from the path
    pub fn remove(&mut self, label: &Label) -> bool {
        if let Some(pos) = self.labels.iter().position(|l| l == label) {
            self.labels.remove(pos);
            true
        } else {
            false
        }
    }

    /// Get the labels in order
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.labels.iter()
    }

    /// Check if the path contains a label
    pub fn contains(&self, label: &Label) -> bool {
        self.labels.contains(label)
    }

    /// Get the priority of a label (0 = highest, None = not found)
    pub fn priority(&self, label: &Label) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Check if the path is empty
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Get the number of labels in the path
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Parse a label path separated by whitespace or commas
    ///
    /// Example: `repo1@ns:tag1 repo2@ns:tag2`
    pub fn parse(s: &str) -> Result<Self, LabelParseError> {
        let mut path = Self::new();
        for item in s.split(|c: char| c.is_whitespace() || c == ',') {
            if item.is_empty() {
                continue;
            }
            path.push(Label::parse(item)?);
        }
        Ok(path)
    }
}

impl fmt::Display for LabelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<String> = self.labels.iter().map(|l| l.to_string()).collect();
        write!(f, "{}", labels.join(" "))
    }
}

impl<'a> IntoIterator for &'a LabelPath {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.labels.iter()
    }
}

impl Serialize for LabelPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.labels.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LabelPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let labels = Vec::<Label>::deserialize(deserializer)?;
        Ok(Self::from_labels(labels))
    }
}
