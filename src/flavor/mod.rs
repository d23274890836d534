// src/flavor/mod.rs
//! Flavor specification parsing, scoring and merging
//!
//! Flavors describe a build variant: use flags and architectures.
//! Syntax follows Conary: `[ssl, !debug, ~vmware, is: x86_64]`
//!
//! The same type is used for two roles. A *trove flavor* describes how a
//! trove was built; an *install flavor* (usually full of `~` preferences)
//! describes what the system wants. [`FlavorSpec::score`] rates a trove
//! flavor against an install flavor and answers `None` when the trove can
//! not be installed at all.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Flavor operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlavorOp {
    /// Required: built with this feature (no prefix)
    Required,
    /// Not: built without this feature (! prefix)
    Not,
    /// Prefers: soft preference for the feature (~ prefix)
    Prefers,
    /// PrefersNot: soft preference against the feature (~! prefix)
    PrefersNot,
}

impl FlavorOp {
    /// Get the string prefix for this operator
    pub fn as_prefix(&self) -> &'static str {
        match self {
            Self::Required => "",
            Self::Not => "!",
            Self::Prefers => "~",
            Self::PrefersNot => "~!",
        }
    }

    /// Parse an operator and name from a string
    /// Returns (operator, remaining name)
    pub fn parse_with_name(s: &str) -> Result<(Self, &str)> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::ParseError("Empty flavor item".to_string()));
        }

        let (op, rest) = if let Some(rest) = s.strip_prefix("~!") {
            (Self::PrefersNot, rest)
        } else if let Some(rest) = s.strip_prefix('~') {
            (Self::Prefers, rest)
        } else if let Some(rest) = s.strip_prefix('!') {
            (Self::Not, rest)
        } else {
            (Self::Required, s)
        };

        let name = rest.trim();
        if name.is_empty() {
            return Err(Error::ParseError(format!(
                "Missing name after {} operator",
                op.as_prefix()
            )));
        }
        if !name.chars().all(|c| c.is_alphanumeric() || "._-".contains(c)) {
            return Err(Error::ParseError(format!("Invalid flavor flag '{}'", name)));
        }
        Ok((op, name))
    }

    /// The soft form of this operator
    pub fn as_preference(&self) -> Self {
        match self {
            Self::Required | Self::Prefers => Self::Prefers,
            Self::Not | Self::PrefersNot => Self::PrefersNot,
        }
    }

    fn is_strong(&self) -> bool {
        matches!(self, Self::Required | Self::Not)
    }
}

/// Score of a trove flag (`trove`) against the install flavor's
/// treatment of the same flag (`install`, `None` when not mentioned)
fn flag_score(install: Option<FlavorOp>, trove: FlavorOp) -> Option<i32> {
    use FlavorOp::*;
    match (trove, install) {
        (Required, Some(Required)) => Some(4),
        (Required, Some(Prefers)) => Some(2),
        (Required, Some(PrefersNot)) => Some(-2),
        (Required, Some(Not)) | (Required, None) => None,

        (Not, Some(Required)) => None,
        (Not, Some(Prefers)) => Some(-2),
        (Not, Some(PrefersNot)) => Some(2),
        (Not, Some(Not)) => Some(4),
        (Not, None) => Some(0),

        (Prefers, Some(Required)) => Some(2),
        (Prefers, Some(Prefers)) => Some(1),
        (Prefers, Some(PrefersNot)) => Some(-1),
        (Prefers, Some(Not)) => Some(-2),

        (PrefersNot, Some(Required)) => Some(-2),
        (PrefersNot, Some(Prefers)) => Some(-1),
        (PrefersNot, Some(PrefersNot)) => Some(1),
        (PrefersNot, Some(Not)) => Some(2),

        (Prefers, None) | (PrefersNot, None) => Some(0),
    }
}

/// A single flavor item with operator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlavorItem {
    pub name: String,
    pub op: FlavorOp,
}

impl FlavorItem {
    /// Create a new flavor item
    pub fn new(op: FlavorOp, name: impl Into<String>) -> Self {
        Self { op, name: name.into() }
    }

    /// Parse a flavor item from a string like "ssl", "!debug", "~vmware", "~!xen"
    pub fn parse(s: &str) -> Result<Self> {
        let (op, name) = FlavorOp::parse_with_name(s)?;
        Ok(Self {
            op,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for FlavorItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_prefix(), self.name)
    }
}

/// Architecture specification (is: x86 x86_64)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ArchSpec {
    pub architectures: Vec<String>,
}

impl ArchSpec {
    /// Create a new architecture spec
    pub fn new(architectures: Vec<String>) -> Self {
        Self { architectures }
    }

    /// Check if this spec includes the given architecture
    pub fn contains(&self, arch: &str) -> bool {
        self.architectures.iter().any(|a| a == arch)
    }

    /// True when every architecture of `other` is also in this spec
    pub fn covers(&self, other: &ArchSpec) -> bool {
        other.architectures.iter().all(|a| self.contains(a))
    }
}

impl fmt::Display for ArchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "is: {}", self.architectures.join(" "))
    }
}

/// Complete flavor specification like [ssl, !debug, is: x86_64]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FlavorSpec {
    pub items: Vec<FlavorItem>,
    pub arch: Option<ArchSpec>,
}

impl FlavorSpec {
    /// Create an empty flavor spec
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a new flavor spec
    pub fn new(items: Vec<FlavorItem>, arch: Option<ArchSpec>) -> Self {
        let mut spec = Self { items, arch };
        spec.canonicalize();
        spec
    }

    /// Check if this flavor spec is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.arch.is_none()
    }

    /// Canonicalize for consistent hashing and comparison
    pub fn canonicalize(&mut self) {
        self.items.sort_by(|a, b| a.name.cmp(&b.name));
        // Last mention of a flag wins
        let mut deduped: Vec<FlavorItem> = Vec::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            match deduped.last_mut() {
                Some(last) if last.name == item.name => *last = item,
                _ => deduped.push(item),
            }
        }
        self.items = deduped;

        if let Some(arch) = &mut self.arch {
            arch.architectures.sort();
            arch.architectures.dedup();
        }
    }

    /// Parse a flavor specification string
    ///
    /// Examples:
    /// - `[ssl, !debug, is: x86_64]`
    /// - `ssl, !debug` (without brackets)
    /// - `[]` (empty)
    /// - `[is: x86 x86_64]` (arch only)
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        let inner = if s.starts_with('[') && s.ends_with(']') {
            &s[1..s.len() - 1]
        } else {
            s
        };

        if inner.trim().is_empty() {
            return Ok(Self::empty());
        }

        let mut items = Vec::new();
        let mut arch = None;

        for part in inner.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some(arch_str) = part.strip_prefix("is:") {
                let architectures: Vec<String> =
                    arch_str.split_whitespace().map(|s| s.to_string()).collect();
                if architectures.is_empty() {
                    return Err(Error::ParseError(
                        "Empty architecture specification after 'is:'".to_string(),
                    ));
                }
                arch = Some(ArchSpec { architectures });
            } else {
                items.push(FlavorItem::parse(part)?);
            }
        }

        Ok(Self::new(items, arch))
    }

    fn op_for(&self, name: &str) -> Option<FlavorOp> {
        self.items.iter().find(|i| i.name == name).map(|i| i.op)
    }

    /// Rate `trove` against this install flavor
    ///
    /// Returns `None` when the trove flavor is incompatible: it requires a
    /// flag this flavor does not allow, lacks a flag this flavor requires,
    /// or is built for an architecture this flavor does not include.
    /// Higher scores are better matches.
    pub fn score(&self, trove: &FlavorSpec) -> Option<i32> {
        let mut score = 0;

        if let Some(trove_arch) = &trove.arch {
            let install_arch = self.arch.as_ref()?;
            if !install_arch.covers(trove_arch) {
                return None;
            }
            score += 4 * trove_arch.architectures.len() as i32;
        }

        for item in &trove.items {
            score += flag_score(self.op_for(&item.name), item.op)?;
        }

        // Strong requirements of the install flavor must be met
        for item in &self.items {
            if item.op == FlavorOp::Required && trove.op_for(&item.name).is_none() {
                return None;
            }
        }

        Some(score)
    }

    /// True when `trove` can be installed under this flavor
    pub fn satisfies(&self, trove: &FlavorSpec) -> bool {
        self.score(trove).is_some()
    }

    /// Symmetric compatibility score of two trove flavors
    ///
    /// Empty flavors only pair with empty flavors.
    pub fn pair_score(&self, other: &FlavorSpec) -> Option<i32> {
        match (self.is_empty(), other.is_empty()) {
            (true, true) => return Some(i32::MAX),
            (true, false) | (false, true) => return None,
            _ => {}
        }
        match (self.score(other), other.score(self)) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }

    /// True when two trove flavors describe interchangeable builds
    pub fn is_compatible_with(&self, other: &FlavorSpec) -> bool {
        self.pair_score(other).is_some()
    }

    /// Replace flags and architecture of this flavor with those `other` names
    pub fn override_with(&self, other: &FlavorSpec) -> FlavorSpec {
        let mut items: Vec<FlavorItem> = self
            .items
            .iter()
            .filter(|i| other.op_for(&i.name).is_none())
            .cloned()
            .collect();
        items.extend(other.items.iter().cloned());
        let arch = other.arch.clone().or_else(|| self.arch.clone());
        Self::new(items, arch)
    }

    /// Merge `affinity` into this install flavor as soft preferences
    ///
    /// Strong flags of this flavor are left alone. The second value is true
    /// when the affinity flavor names an architecture this flavor lacks.
    pub fn merge_preferences(&self, affinity: &FlavorSpec) -> (FlavorSpec, bool) {
        let mut items = self.items.clone();
        for item in &affinity.items {
            match items.iter_mut().find(|i| i.name == item.name) {
                Some(existing) if existing.op.is_strong() => {}
                Some(existing) => existing.op = item.op.as_preference(),
                None => items.push(FlavorItem::new(item.op.as_preference(), item.name.clone())),
            }
        }

        let drops_arch = match (&self.arch, &affinity.arch) {
            (Some(mine), Some(theirs)) => !mine.covers(theirs),
            (None, Some(_)) => true,
            _ => false,
        };

        (Self::new(items, self.arch.clone()), drops_arch)
    }

    /// Select the best matching candidate for this install flavor
    pub fn select_best<'a, T>(&self, candidates: &'a [(FlavorSpec, T)]) -> Option<&'a T> {
        candidates
            .iter()
            .filter_map(|(spec, item)| self.score(spec).map(|score| (score, item)))
            .max_by_key(|(score, _)| *score)
            .map(|(_, item)| item)
    }

    /// The flavor text without surrounding brackets
    pub fn body(&self) -> String {
        let mut parts: Vec<String> = self.items.iter().map(|item| item.to_string()).collect();
        if let Some(ref arch) = self.arch {
            parts.push(arch.to_string());
        }
        parts.join(", ")
    }
}

impl fmt::Display for FlavorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        write!(f, "[{}]", self.body())
    }
}

impl FromStr for FlavorSpec {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        FlavorSpec::parse(s)
    }
}

impl Serialize for FlavorSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.body())
    }
}

impl<'de> Deserialize<'de> for FlavorSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FlavorSpec::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(s: &str) -> FlavorSpec {
        FlavorSpec::parse(s).unwrap()
    }

    // === FlavorOp tests ===

    #[test]
    fn test_flavor_op_parse_required() {
        let (op, name) = FlavorOp::parse_with_name("ssl").unwrap();
        assert_eq!(op, FlavorOp::Required);
        assert_eq!(name, "ssl");
    }

    #[test]
    fn test_flavor_op_parse_prefers_not() {
        let (op, name) = FlavorOp::parse_with_name("  ~! xen  ").unwrap();
        assert_eq!(op, FlavorOp::PrefersNot);
        assert_eq!(name, "xen");
    }

    #[test]
    fn test_flavor_op_parse_errors() {
        assert!(FlavorOp::parse_with_name("").is_err());
        assert!(FlavorOp::parse_with_name("!").is_err());
        assert!(FlavorOp::parse_with_name("~!").is_err());
        assert!(FlavorOp::parse_with_name("a b").is_err());
    }

    // === FlavorSpec parsing tests ===

    #[test]
    fn test_flavor_spec_parse_empty() {
        assert!(f("[]").is_empty());
        assert!(f("").is_empty());
        assert_eq!(f("").to_string(), "");
    }

    #[test]
    fn test_flavor_spec_parse_mixed() {
        let spec = f("[ssl, !debug, is: x86_64]");
        assert_eq!(spec.items.len(), 2);
        assert_eq!(spec.items[0].name, "debug");
        assert_eq!(spec.items[0].op, FlavorOp::Not);
        assert_eq!(spec.items[1].name, "ssl");
        assert_eq!(spec.arch.as_ref().unwrap().architectures, vec!["x86_64".to_string()]);
        assert_eq!(spec.to_string(), "[!debug, ssl, is: x86_64]");
        assert_eq!(spec.body(), "!debug, ssl, is: x86_64");
    }

    #[test]
    fn test_flavor_spec_canonical_equality() {
        assert_eq!(f("[ssl, !debug]"), f("!debug, ssl"));
        assert_eq!(f("[is: x86_64 x86]"), f("[is: x86 x86_64]"));
        // later mention wins
        assert_eq!(f("[ssl, !ssl]"), f("[!ssl]"));
    }

    #[test]
    fn test_flavor_spec_parse_empty_arch_error() {
        assert!(FlavorSpec::parse("[is:]").is_err());
    }

    // === Scoring tests ===

    #[test]
    fn test_score_arch() {
        let install = f("[~ssl, is: x86 x86_64]");
        assert!(install.score(&f("[is: x86_64]")).is_some());
        assert!(install.score(&f("[is: ppc]")).is_none());
        assert!(f("[~ssl]").score(&f("[is: x86]")).is_none());
    }

    #[test]
    fn test_score_prefers_matching_flags() {
        let install = f("[~ssl, ~!debug, is: x86_64]");
        let with_ssl = install.score(&f("[ssl, is: x86_64]")).unwrap();
        let without_ssl = install.score(&f("[!ssl, is: x86_64]")).unwrap();
        assert!(with_ssl > without_ssl);
        let debug = install.score(&f("[debug, is: x86_64]")).unwrap();
        assert!(debug < with_ssl);
    }

    #[test]
    fn test_score_incompatible() {
        let install = f("[!ssl, is: x86_64]");
        assert!(install.score(&f("[ssl, is: x86_64]")).is_none());
        // required flag unknown to the install flavor
        assert!(f("[is: x86_64]").score(&f("[ssl, is: x86_64]")).is_none());
        // install flavor insists on a flag the trove lacks
        assert!(f("[ssl]").score(&f("")).is_none());
        assert_eq!(f("").score(&f("")), Some(0));
    }

    #[test]
    fn test_pair_score() {
        assert_eq!(f("").pair_score(&f("")), Some(i32::MAX));
        assert!(f("").pair_score(&f("[is: x86]")).is_none());
        assert!(f("[is: x86]").pair_score(&f("[is: x86]")).is_some());
        assert!(f("[is: x86]").pair_score(&f("[is: x86_64]")).is_none());
        assert!(f("[ssl, is: x86]").is_compatible_with(&f("[~ssl, is: x86]")));
        assert!(!f("[ssl, is: x86]").is_compatible_with(&f("[!ssl, is: x86]")));
    }

    // === Merge tests ===

    #[test]
    fn test_override_with() {
        let install = f("[~ssl, ~!debug, is: x86_64]");
        let merged = install.override_with(&f("[debug]"));
        assert_eq!(merged, f("[debug, ~ssl, is: x86_64]"));
    }

    #[test]
    fn test_merge_preferences() {
        let install = f("[~ssl, !debug, is: x86_64]");
        let (merged, drops_arch) = install.merge_preferences(&f("[!ssl, debug, is: x86_64]"));
        assert_eq!(merged, f("[~!ssl, !debug, is: x86_64]"));
        assert!(!drops_arch);

        let (_, drops_arch) = install.merge_preferences(&f("[is: x86]"));
        assert!(drops_arch);
    }

    #[test]
    fn test_select_best() {
        let install = f("[~ssl, is: x86_64]");
        let candidates = vec![(f("[!ssl, is: x86_64]"), "nossl"), (f("[ssl, is: x86_64]"), "ssl"), (f("[is: ppc]"), "ppc")];
        assert_eq!(install.select_best(&candidates), Some(&"ssl"));
    }
}
