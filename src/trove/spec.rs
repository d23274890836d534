// src/trove/spec.rs

//! Partial trove specifications
//!
//! A trove spec names troves the way a user writes them: a name, an
//! optional version part and an optional flavor.
//!
//! - `foo` - latest foo on the search path
//! - `foo=1.2` - upstream version 1.2
//! - `foo=:devel` / `foo=rpl:devel` / `foo=repo@rpl:devel` - on a label
//! - `foo=/repo@rpl:devel` - on a branch
//! - `foo=/repo@rpl:devel/1.2-1-1` - an exact version
//! - `foo==1.2` - pinned rather than floating
//! - `foo[ssl]` - with a flavor requirement

use super::split_flavor;
use crate::error::{Error, Result};
use crate::flavor::FlavorSpec;
use crate::label::{Label, LabelPath};
use crate::version::{Branch, Version};
use std::fmt;
use std::str::FromStr;

/// A partial trove specification
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TroveSpec {
    pub name: String,
    pub version: Option<String>,
    pub flavor: Option<FlavorSpec>,
    /// `==` was used instead of `=`
    pub pinned: bool,
}

impl TroveSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            flavor: None,
            pinned: false,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_flavor(mut self, flavor: FlavorSpec) -> Self {
        self.flavor = Some(flavor);
        self
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (body, flavor) = if s.contains('[') {
            let (body, flavor) = split_flavor(s)?;
            (body, Some(flavor))
        } else {
            (s, None)
        };

        let (name, version, pinned) = match body.split_once('=') {
            Some((name, rest)) => match rest.strip_prefix('=') {
                Some(version) => (name, Some(version), true),
                None => (name, Some(rest), false),
            },
            None => (body, None, false),
        };

        if name.is_empty() {
            return Err(Error::ParseError(format!("Trove spec '{}' has no name", s)));
        }
        if name.chars().any(|c| c.is_whitespace() || "=[]/".contains(c)) {
            return Err(Error::ParseError(format!("Invalid trove name in spec '{}'", s)));
        }
        if let Some(v) = version
            && v.is_empty()
        {
            return Err(Error::ParseError(format!("Empty version in trove spec '{}'", s)));
        }

        Ok(Self {
            name: name.to_string(),
            version: version.map(str::to_string),
            flavor,
            pinned,
        })
    }

    /// Exact spec naming one tuple
    pub fn from_tuple(tuple: &super::TroveTuple) -> Self {
        Self {
            name: tuple.name.clone(),
            version: Some(tuple.version.to_string()),
            flavor: Some(tuple.flavor.clone()),
            pinned: false,
        }
    }

    pub fn selector(&self) -> Result<VersionSelector> {
        VersionSelector::parse(self.version.as_deref())
    }

    /// A spec naming an explicit branch or version in the local namespace
    pub fn is_local(&self) -> bool {
        match self.selector() {
            Ok(VersionSelector::Version(v)) => v.is_in_local_namespace(),
            Ok(VersionSelector::Branch(b)) => b.trailing_label().namespace == crate::label::LOCAL_HOST,
            _ => false,
        }
    }

    /// The same spec with the flavor cleared
    pub fn without_flavor(&self) -> Self {
        Self {
            flavor: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for TroveSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            let sep = if self.pinned { "==" } else { "=" };
            write!(f, "{}{}", sep, version)?;
        }
        if let Some(flavor) = &self.flavor {
            write!(f, "[{}]", flavor.body())?;
        }
        Ok(())
    }
}

impl FromStr for TroveSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TroveSpec::parse(s)
    }
}

/// The version part of a trove spec, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    /// No version given
    Any,
    /// A full or partial label
    Label(String),
    /// An explicit branch
    Branch(Branch),
    /// An explicit version
    Version(Version),
    /// An upstream version or revision on the search path
    Revision(String),
    /// A revision on a full or partial label
    LabelRevision(String, String),
}

impl VersionSelector {
    pub fn parse(version: Option<&str>) -> Result<Self> {
        let Some(v) = version else {
            return Ok(Self::Any);
        };

        if v.starts_with('/') {
            if let Ok(version) = Version::parse(v) {
                return Ok(Self::Version(version));
            }
            return Ok(Self::Branch(Branch::parse(v)?));
        }

        if v.contains('@') || v.contains(':') {
            return match v.split_once('/') {
                Some((label, revision)) => Ok(Self::LabelRevision(label.to_string(), revision.to_string())),
                None => Ok(Self::Label(v.to_string())),
            };
        }

        Ok(Self::Revision(v.to_string()))
    }

    /// Labels to search, given the default search path
    pub fn labels(&self, path: &LabelPath) -> Result<Vec<Label>> {
        let mut labels = LabelPath::new();
        match self {
            Self::Any | Self::Revision(_) => return Ok(path.labels().to_vec()),
            Self::Branch(b) => labels.push(b.trailing_label().clone()),
            Self::Version(v) => labels.push(v.trailing_label().clone()),
            Self::Label(partial) | Self::LabelRevision(partial, _) => {
                if partial.contains('@') && !partial.starts_with('@') {
                    labels.push(Label::parse(partial)?);
                } else {
                    for default in path {
                        labels.push(Label::complete(partial, default)?);
                    }
                }
            }
        }
        Ok(labels.labels().to_vec())
    }

    /// True when `version`, found on `label`, is selected
    pub fn matches(&self, version: &Version, label: &Label) -> bool {
        match self {
            Self::Any | Self::Label(_) => version.trailing_label() == label,
            Self::Branch(b) => version.branch() == b,
            Self::Version(v) => version == v,
            Self::Revision(r) | Self::LabelRevision(_, r) => {
                version.trailing_label() == label && version.revision().matches_spec(r)
            }
        }
    }

    /// True for selectors naming a single branch or version
    pub fn is_absolute(&self) -> bool {
        matches!(self, Self::Branch(_) | Self::Version(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // === TroveSpec tests ===

    #[test]
    fn test_spec_parse_forms() {
        let s = TroveSpec::parse("foo").unwrap();
        assert_eq!(s, TroveSpec::new("foo"));

        let s = TroveSpec::parse("foo=1.2").unwrap();
        assert_eq!(s.version.as_deref(), Some("1.2"));
        assert!(!s.pinned);

        let s = TroveSpec::parse("foo==1.2").unwrap();
        assert_eq!(s.version.as_deref(), Some("1.2"));
        assert!(s.pinned);

        let s = TroveSpec::parse("foo:runtime=:devel[ssl]").unwrap();
        assert_eq!(s.name, "foo:runtime");
        assert_eq!(s.version.as_deref(), Some(":devel"));
        assert_eq!(s.flavor, Some(FlavorSpec::parse("ssl").unwrap()));
    }

    #[test]
    fn test_spec_display_roundtrip() {
        for text in ["foo", "foo=1.2", "foo==1.2", "foo=:devel[ssl]", "foo[]", "group-os=repo@rpl:2/1.0"] {
            assert_eq!(TroveSpec::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_spec_parse_errors() {
        assert!(TroveSpec::parse("").is_err());
        assert!(TroveSpec::parse("=1.0").is_err());
        assert!(TroveSpec::parse("foo=").is_err());
        assert!(TroveSpec::parse("foo[ssl").is_err());
    }

    #[test]
    fn test_spec_is_local() {
        assert!(TroveSpec::parse("foo=/local@local:COOK/1.0-1-1").unwrap().is_local());
        assert!(TroveSpec::parse("foo=/local@local:COOK").unwrap().is_local());
        assert!(!TroveSpec::parse("foo=/repo@rpl:devel/1.0-1-1").unwrap().is_local());
        assert!(!TroveSpec::parse("foo=1.0").unwrap().is_local());
    }

    // === VersionSelector tests ===

    #[test]
    fn test_selector_classification() {
        assert_eq!(VersionSelector::parse(None).unwrap(), VersionSelector::Any);
        assert!(matches!(VersionSelector::parse(Some("1.0")).unwrap(), VersionSelector::Revision(_)));
        assert!(matches!(VersionSelector::parse(Some(":devel")).unwrap(), VersionSelector::Label(_)));
        assert!(matches!(
            VersionSelector::parse(Some("repo@rpl:2/1.0")).unwrap(),
            VersionSelector::LabelRevision(_, _)
        ));
        assert!(matches!(
            VersionSelector::parse(Some("/repo@rpl:devel")).unwrap(),
            VersionSelector::Branch(_)
        ));
        assert!(matches!(
            VersionSelector::parse(Some("/repo@rpl:devel/1.0-1-1")).unwrap(),
            VersionSelector::Version(_)
        ));
        assert!(matches!(
            VersionSelector::parse(Some("/repo@rpl:devel//rpl:2")).unwrap(),
            VersionSelector::Branch(_)
        ));
    }

    #[test]
    fn test_selector_labels() {
        let path = LabelPath::parse("repo@rpl:2 other@contrib:2").unwrap();
        let any = VersionSelector::Any.labels(&path).unwrap();
        assert_eq!(any.len(), 2);

        let devel = VersionSelector::parse(Some(":devel")).unwrap().labels(&path).unwrap();
        assert_eq!(devel[0].to_string(), "repo@rpl:devel");
        assert_eq!(devel[1].to_string(), "other@contrib:devel");

        let full = VersionSelector::parse(Some("x@y:z")).unwrap().labels(&path).unwrap();
        assert_eq!(full.len(), 1);
    }

    #[test]
    fn test_selector_matches() {
        let label = Label::parse("repo@rpl:devel").unwrap();
        let v = Version::parse("/repo@rpl:devel/1.0-2-1").unwrap();
        assert!(VersionSelector::Any.matches(&v, &label));
        assert!(VersionSelector::Revision("1.0".into()).matches(&v, &label));
        assert!(!VersionSelector::Revision("1.1".into()).matches(&v, &label));
        assert!(VersionSelector::parse(Some("/repo@rpl:devel")).unwrap().matches(&v, &label));
        assert!(
            VersionSelector::parse(Some("/repo@rpl:devel/1.0-2-1"))
                .unwrap()
                .matches(&v, &label)
        );
    }
}
