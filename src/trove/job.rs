// src/trove/job.rs

//! Job tuples and saved jobs
//!
//! A job is one atomic instruction: install a trove, erase a trove, or
//! replace one version/flavor of a name with another. The text form is
//! `name=oldVersion[oldFlavor]--newVersion[newFlavor]`, with an empty side
//! for installs (`name=--1.0[...]`) and erasures (`name=1.0[...]--`).
//! Versions are written in frozen form so timestamps survive a restart.

use super::{TroveTuple, split_flavor};
use crate::error::{Error, Result};
use crate::flavor::FlavorSpec;
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// One side of a job
pub type JobSide = Option<(Version, FlavorSpec)>;

/// An install, erase or update instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobTuple {
    pub name: String,
    pub old: JobSide,
    pub new: JobSide,
    /// Install side only; an installed trove of the same name is found
    /// and replaced
    pub absolute: bool,
}

impl JobTuple {
    pub fn install(tuple: &TroveTuple, absolute: bool) -> Self {
        Self {
            name: tuple.name.clone(),
            old: None,
            new: Some((tuple.version.clone(), tuple.flavor.clone())),
            absolute,
        }
    }

    pub fn erase(tuple: &TroveTuple) -> Self {
        Self {
            name: tuple.name.clone(),
            old: Some((tuple.version.clone(), tuple.flavor.clone())),
            new: None,
            absolute: false,
        }
    }

    pub fn update(old: &TroveTuple, new: &TroveTuple) -> Self {
        Self {
            name: new.name.clone(),
            old: Some((old.version.clone(), old.flavor.clone())),
            new: Some((new.version.clone(), new.flavor.clone())),
            absolute: false,
        }
    }

    pub fn old_tuple(&self) -> Option<TroveTuple> {
        self.old
            .as_ref()
            .map(|(v, f)| TroveTuple::new(self.name.clone(), v.clone(), f.clone()))
    }

    pub fn new_tuple(&self) -> Option<TroveTuple> {
        self.new
            .as_ref()
            .map(|(v, f)| TroveTuple::new(self.name.clone(), v.clone(), f.clone()))
    }

    pub fn is_erase(&self) -> bool {
        self.new.is_none()
    }

    pub fn is_fresh_install(&self) -> bool {
        self.old.is_none() && self.new.is_some()
    }

    pub fn is_update(&self) -> bool {
        self.old.is_some() && self.new.is_some()
    }

    /// Text form used to persist a job
    pub fn format(&self) -> String {
        let side = |s: &JobSide| match s {
            Some((v, f)) => format!("{}[{}]", v.freeze(), f.body()),
            None => String::new(),
        };
        format!("{}={}--{}", self.name, side(&self.old), side(&self.new))
    }

    /// Parse the text form written by [`JobTuple::format`]
    pub fn parse(s: &str, absolute: bool) -> Result<Self> {
        let (name, rest) = s
            .split_once('=')
            .ok_or_else(|| Error::ParseError(format!("Job '{}' has no '='", s)))?;
        if name.is_empty() {
            return Err(Error::ParseError(format!("Job '{}' has no name", s)));
        }

        let (old_text, new_text) = if let Some(new) = rest.strip_prefix("--") {
            ("", new)
        } else {
            let end = rest
                .find("]--")
                .ok_or_else(|| Error::ParseError(format!("Job '{}' is missing '--'", s)))?;
            (&rest[..=end], &rest[end + 3..])
        };

        let side = |text: &str| -> Result<JobSide> {
            if text.is_empty() {
                return Ok(None);
            }
            let (version, flavor) = split_flavor(text)?;
            Ok(Some((Version::parse(version)?, flavor)))
        };

        let job = Self {
            name: name.to_string(),
            old: side(old_text)?,
            new: side(new_text)?,
            absolute,
        };
        if job.old.is_none() && job.new.is_none() {
            return Err(Error::ParseError(format!("Job '{}' is empty", s)));
        }
        Ok(job)
    }
}

impl fmt::Display for JobTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.old, &self.new) {
            (None, Some((v, fl))) => write!(f, "Install {}={}{}", self.name, v, fl),
            (Some((v, fl)), None) => write!(f, "Erase   {}={}{}", self.name, v, fl),
            (Some((ov, ofl)), Some((nv, nfl))) => {
                write!(f, "Update  {} ({}{} -> {}{})", self.name, ov, ofl, nv, nfl)
            }
            (None, None) => write!(f, "{}", self.name),
        }
    }
}

impl Serialize for JobTuple {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.format())
    }
}

/// Verify no two jobs share a non-null old or new identity
pub fn check_job_uniqueness<'a>(jobs: impl IntoIterator<Item = &'a JobTuple>) -> Result<()> {
    let mut olds = HashSet::new();
    let mut news = HashSet::new();
    for job in jobs {
        if let Some(old) = job.old_tuple()
            && !olds.insert(old.clone())
        {
            return Err(Error::Update(format!("{} is removed by more than one job", old)));
        }
        if let Some(new) = job.new_tuple()
            && !news.insert(new.clone())
        {
            return Err(Error::Update(format!("{} is installed by more than one job", new)));
        }
    }
    Ok(())
}

/// A job in persisted form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedJobEntry {
    pub job: String,
    #[serde(default)]
    pub absolute: bool,
}

/// A split job saved across a restart
///
/// `applied` counts the leading sub-jobs already applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedJob {
    pub saved_at: DateTime<Utc>,
    pub split: Vec<Vec<SavedJobEntry>>,
    #[serde(default)]
    pub applied: usize,
}

impl SavedJob {
    pub fn new(split: &[Vec<JobTuple>]) -> Self {
        Self {
            saved_at: Utc::now(),
            split: split
                .iter()
                .map(|sub| {
                    sub.iter()
                        .map(|job| SavedJobEntry {
                            job: job.format(),
                            absolute: job.absolute,
                        })
                        .collect()
                })
                .collect(),
            applied: 0,
        }
    }

    pub fn mark_applied(&mut self, count: usize) {
        self.applied = (self.applied + count).min(self.split.len());
    }

    /// Sub-jobs not applied yet
    pub fn remaining(&self) -> Result<Vec<Vec<JobTuple>>> {
        self.split[self.applied.min(self.split.len())..]
            .iter()
            .map(|sub| {
                sub.iter()
                    .map(|entry| JobTuple::parse(&entry.job, entry.absolute))
                    .collect()
            })
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tup(s: &str) -> TroveTuple {
        TroveTuple::parse(s).unwrap()
    }

    // === Text form tests ===

    #[test]
    fn test_job_format() {
        let old = tup("foo=/repo@rpl:devel/1.0:1.0-1-1[is: x86]");
        let new = tup("foo=/repo@rpl:devel/2.0:1.1-1-1[is: x86]");
        let job = JobTuple::update(&old, &new);
        assert_eq!(
            job.format(),
            "foo=/repo@rpl:devel/1.000:1.0-1-1[is: x86]--/repo@rpl:devel/2.000:1.1-1-1[is: x86]"
        );

        assert_eq!(JobTuple::install(&new, true).format(), "foo=--/repo@rpl:devel/2.000:1.1-1-1[is: x86]");
        assert_eq!(JobTuple::erase(&old).format(), "foo=/repo@rpl:devel/1.000:1.0-1-1[is: x86]--");
    }

    #[test]
    fn test_job_parse() {
        let job = JobTuple::parse("foo=/repo@rpl:devel/1.000:1.0-1-1[]--/repo@rpl:devel/2.000:1.1-1-1[ssl]", false)
            .unwrap();
        assert!(job.is_update());
        assert_eq!(job.old_tuple().unwrap().version.timestamp(), 1000);
        assert_eq!(job.new_tuple().unwrap().flavor, FlavorSpec::parse("ssl").unwrap());

        let install = JobTuple::parse("foo=--/repo@rpl:devel/1.0-1-1[]", true).unwrap();
        assert!(install.is_fresh_install());
        assert!(install.absolute);

        let erase = JobTuple::parse("foo:lib=/repo@rpl:devel//rpl:2/1.0-1-1[]--", false).unwrap();
        assert!(erase.is_erase());
    }

    #[test]
    fn test_job_parse_errors() {
        assert!(JobTuple::parse("foo", false).is_err());
        assert!(JobTuple::parse("foo=--", false).is_err());
        assert!(JobTuple::parse("foo=/repo@rpl:devel/1.0-1-1[]", false).is_err());
        assert!(JobTuple::parse("=--/repo@rpl:devel/1.0-1-1[]", false).is_err());
    }

    // === Uniqueness tests ===

    #[test]
    fn test_uniqueness_check() {
        let a = tup("foo=/repo@rpl:devel/1.0-1-1");
        let b = tup("foo=/repo@rpl:devel/1.1-1-1");
        let c = tup("foo=/repo@rpl:devel/1.2-1-1");
        let ok = vec![JobTuple::update(&a, &b), JobTuple::install(&c, false)];
        assert!(check_job_uniqueness(&ok).is_ok());

        let dup_old = vec![JobTuple::update(&a, &b), JobTuple::erase(&a)];
        assert!(check_job_uniqueness(&dup_old).is_err());

        let dup_new = vec![JobTuple::update(&a, &b), JobTuple::install(&b, true)];
        assert!(check_job_uniqueness(&dup_new).is_err());
    }

    // === Saved job tests ===

    #[test]
    fn test_saved_job_resume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        let a = tup("foo=/repo@rpl:devel/5.0:1.0-1-1");
        let b = tup("bar=/repo@rpl:devel/6.0:1.0-1-1");
        let split = vec![vec![JobTuple::install(&a, true)], vec![JobTuple::erase(&b)]];

        let mut saved = SavedJob::new(&split);
        saved.mark_applied(1);
        saved.save(&path).unwrap();

        let loaded = SavedJob::load(&path).unwrap();
        let remaining = loaded.remaining().unwrap();
        assert_eq!(remaining, vec![vec![JobTuple::erase(&b)]]);
        assert_eq!(remaining[0][0].old_tuple().unwrap().version.timestamp(), 6000);
    }
}
