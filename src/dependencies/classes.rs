// src/dependencies/classes.rs

//! Dependency class definitions
//!
//! Every dependency belongs to a class (`trove`, `soname`, `file`, ...).
//! The text form is `class: name(flag flag)`, for example
//! `soname: ELF64/libc.so.6(GLIBC_2.2.5 x86_64)` or `trove: bash:runtime`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Dependency classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyClass {
    /// Another trove must be installed
    /// Example: trove: bash:runtime
    Trove,

    /// Shared library dependency
    /// Example: soname: ELF64/libssl.so.3(OPENSSL_3.0.0)
    Soname,

    /// A specific file must exist
    /// Example: file: /usr/bin/python3
    File,

    /// ABI compatibility tag
    Abi,

    /// Python module
    Python,

    /// Perl module
    Perl,

    /// Ruby gem
    Ruby,

    /// Java package
    Java,

    /// .NET/Mono CIL assembly
    Cil,

    /// A system user must exist
    UserInfo,

    /// A system group must exist
    GroupInfo,
}

impl DependencyClass {
    /// Get the string prefix for this dependency class
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Trove => "trove",
            Self::Soname => "soname",
            Self::File => "file",
            Self::Abi => "abi",
            Self::Python => "python",
            Self::Perl => "perl",
            Self::Ruby => "ruby",
            Self::Java => "java",
            Self::Cil => "cil",
            Self::UserInfo => "userinfo",
            Self::GroupInfo => "groupinfo",
        }
    }

    /// Parse a dependency class from its prefix
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_lowercase().as_str() {
            "trove" => Some(Self::Trove),
            "soname" => Some(Self::Soname),
            "file" => Some(Self::File),
            "abi" => Some(Self::Abi),
            "python" => Some(Self::Python),
            "perl" => Some(Self::Perl),
            "ruby" => Some(Self::Ruby),
            "java" => Some(Self::Java),
            "cil" => Some(Self::Cil),
            "userinfo" => Some(Self::UserInfo),
            "groupinfo" => Some(Self::GroupInfo),
            _ => None,
        }
    }

    /// Return all dependency classes
    pub fn all() -> &'static [DependencyClass] {
        &[
            Self::Trove,
            Self::Soname,
            Self::File,
            Self::Abi,
            Self::Python,
            Self::Perl,
            Self::Ruby,
            Self::Java,
            Self::Cil,
            Self::UserInfo,
            Self::GroupInfo,
        ]
    }

    /// Get a human-readable description of this dependency class
    pub fn description(&self) -> &'static str {
        match self {
            Self::Trove => "Trove",
            Self::Soname => "Shared library (soname)",
            Self::File => "File path",
            Self::Abi => "ABI compatibility",
            Self::Python => "Python module",
            Self::Perl => "Perl module",
            Self::Ruby => "Ruby gem",
            Self::Java => "Java package",
            Self::Cil => ".NET/Mono assembly",
            Self::UserInfo => "System user",
            Self::GroupInfo => "System group",
        }
    }
}

impl fmt::Display for DependencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// A single dependency: class, name and required flags
///
/// A provided dependency satisfies a required one when class and name
/// match and the provider carries every flag the requirement names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dependency {
    pub class: DependencyClass,
    pub name: String,
    pub flags: BTreeSet<String>,
}

impl Dependency {
    pub fn new(class: DependencyClass, name: impl Into<String>) -> Self {
        Self {
            class,
            name: name.into(),
            flags: BTreeSet::new(),
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }

    /// `trove: <name>`
    pub fn trove(name: impl Into<String>) -> Self {
        Self::new(DependencyClass::Trove, name)
    }

    /// Parse `class: name(flag flag)`
    pub fn parse(s: &str) -> Result<Self> {
        let (prefix, rest) = s
            .split_once(':')
            .ok_or_else(|| Error::ParseError(format!("Dependency '{}' has no class", s)))?;
        let class = DependencyClass::from_prefix(prefix.trim())
            .ok_or_else(|| Error::ParseError(format!("Unknown dependency class '{}'", prefix.trim())))?;
        let rest = rest.trim();

        let (name, flags) = match rest.find('(') {
            Some(open) if rest.ends_with(')') => {
                let flags = rest[open + 1..rest.len() - 1]
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                (rest[..open].trim(), flags)
            }
            Some(_) => {
                return Err(Error::ParseError(format!("Unbalanced flags in dependency '{}'", s)));
            }
            None => (rest, BTreeSet::new()),
        };

        if name.is_empty() {
            return Err(Error::ParseError(format!("Dependency '{}' has no name", s)));
        }

        Ok(Self {
            class,
            name: name.to_string(),
            flags,
        })
    }

    /// Check if this (provided) dependency satisfies `required`
    pub fn satisfies(&self, required: &Dependency) -> bool {
        self.class == required.class && self.name == required.name && required.flags.is_subset(&self.flags)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.name)?;
        if !self.flags.is_empty() {
            let flags: Vec<&str> = self.flags.iter().map(String::as_str).collect();
            write!(f, "({})", flags.join(" "))?;
        }
        Ok(())
    }
}

impl FromStr for Dependency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Dependency::parse(s)
    }
}

impl Serialize for Dependency {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Dependency {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Dependency::parse(&s).map_err(serde::de::Error::custom)
    }
}
