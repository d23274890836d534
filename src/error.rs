// src/error.rs

//! Error types for the update planner

use crate::label::LabelParseError;
use crate::resolver::{BrokenRequirement, Requirement, SuggestionMap};
use crate::trove::JobTuple;
use std::fmt;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing models, building the operation graph
/// and planning an update
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed version, flavor, spec or job text
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Malformed label
    #[error("Label error: {0}")]
    Label(#[from] LabelParseError),

    /// Malformed system model line (1-based line number)
    #[error("{message}")]
    ModelParse { line: usize, message: String },

    /// A named trove does not exist in any source
    #[error("Trove not found: {0}")]
    TroveNotFound(String),

    /// One or more trove specs matched nothing
    #[error("{}", format_specs_not_found(.specs, .alternates))]
    SpecsNotFound {
        specs: Vec<String>,
        /// Matches found with the flavor cleared, per trove spec
        alternates: Vec<(String, Vec<String>)>,
    },

    /// Dependency closure could not be reached
    #[error(transparent)]
    Dependency(#[from] DependencyFailure),

    /// Attempted erase or replacement of a pinned trove
    #[error("Trove {0} is pinned; unpin it before removing it")]
    PinConflict(String),

    /// Malformed or cyclic include
    #[error("Include error: {0}")]
    Include(String),

    /// Branch or shadow structure violated
    #[error("Branch structure error: {0}")]
    BranchStructure(String),

    /// Redirects visited the same trove twice
    #[error("Redirect loop found which includes troves {}", .0.join(", "))]
    RedirectLoop(Vec<String>),

    /// Troves on the same branch would install conflicting paths
    #[error("Troves being installed appear to conflict: {}", format_conflicts(.0))]
    InstallPathConflicts(Vec<(String, Vec<String>)>),

    /// Generic update planning failure
    #[error("Update error: {0}")]
    Update(String),

    /// Failure reported by an external trove source
    #[error("Trove source error: {0}")]
    Source(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

fn format_specs_not_found(specs: &[String], alternates: &[(String, Vec<String>)]) -> String {
    let mut out = format!("No troves found matching: {}", specs.join(", "));
    for (spec, alts) in alternates {
        if !alts.is_empty() {
            out.push_str(&format!("\n  {} is available as: {}", spec, alts.join(", ")));
        }
    }
    out
}

fn format_conflicts(conflicts: &[(String, Vec<String>)]) -> String {
    conflicts
        .iter()
        .map(|(name, troves)| format!("{} ({})", name, troves.join(" vs ")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Everything a caller needs to report a failed resolution or retry it
/// under a different policy
#[derive(Debug, Clone, Default)]
pub struct DependencyReport {
    /// Requirements of new troves nothing provides
    pub unsatisfied: Vec<Requirement>,
    /// Requirements of kept troves broken by erasures
    pub unresolvable: Vec<BrokenRequirement>,
    /// Troves that were (or would have been) added to satisfy requirements
    pub suggestions: SuggestionMap,
    /// The job split computed before failing
    pub split_job: Vec<Vec<JobTuple>>,
}

impl fmt::Display for DependencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for req in &self.unsatisfied {
            writeln!(f, "    {} requires:", req.required_by)?;
            for dep in req.deps.iter() {
                writeln!(f, "\t{}", dep)?;
            }
        }
        for broken in &self.unresolvable {
            let providers: Vec<String> = broken.provided_by.iter().map(|t| t.to_string()).collect();
            writeln!(
                f,
                "    {} requires {} which is provided by {}",
                broken.required_by,
                broken.deps,
                providers.join(", ")
            )?;
        }
        for (required_by, suggested) in &self.suggestions {
            let troves: Vec<String> = suggested.iter().map(|t| t.to_string()).collect();
            writeln!(f, "    {} -> {}", required_by, troves.join(", "))?;
        }
        Ok(())
    }
}

/// Dependency failures surfaced after the resolution loop gives up
#[derive(Debug, Clone, Error)]
pub enum DependencyFailure {
    /// Requirements remain that no resolution method could satisfy
    #[error("The following dependencies could not be resolved:\n{0}")]
    DepResolution(DependencyReport),

    /// Resolution found troves but automatic resolution is disabled
    #[error("The following troves are needed to satisfy dependencies:\n{0}")]
    NeededTroves(DependencyReport),

    /// Erasing troves breaks requirements of troves that stay installed
    #[error("Troves being removed create unresolved dependencies:\n{0}")]
    EraseDep(DependencyReport),
}

impl DependencyFailure {
    pub fn report(&self) -> &DependencyReport {
        match self {
            DependencyFailure::DepResolution(r)
            | DependencyFailure::NeededTroves(r)
            | DependencyFailure::EraseDep(r) => r,
        }
    }
}
