// src/update/config.rs

//! Update planner configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is a
//! valid configuration:
//!
//! ```toml
//! install_label_path = ["conary.example.com@rpl:2", "conary.example.com@rpl:devel"]
//! flavor = ["ssl, !debug, is: x86_64"]
//! exclude_troves = [".*:debuginfo"]
//! keep_required = true
//! resolve_mode = "leaves_first"
//! ```

use crate::dependencies::DependencyClass;
use crate::error::Result;
use crate::flavor::FlavorSpec;
use crate::label::LabelPath;
use crate::resolver::{ByLabelPath, CheckOptions, LabelPathMode, ResolutionStack, ResolveMethod};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Policy knobs for planning an update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Labels searched for troves and dependency providers, in order
    #[serde(default)]
    pub install_label_path: LabelPath,

    /// Flavor path, most preferred first
    #[serde(default)]
    pub flavor: Vec<FlavorSpec>,

    /// Regexes of trove names never installed through a collection
    #[serde(default)]
    pub exclude_troves: Vec<String>,

    /// Keep troves whose removal would break something that stays
    #[serde(default = "default_true")]
    pub keep_required: bool,

    /// Add dependency providers to the job instead of failing
    #[serde(default = "default_true")]
    pub auto_resolve: bool,

    /// 2 and above also updates troves that need something being erased
    #[serde(default = "default_resolve_level")]
    pub resolve_level: u8,

    /// Install the package along with a component picked for a dependency
    #[serde(default = "default_true")]
    pub auto_resolve_packages: bool,

    /// Regexes of troves updated in a sub-job of their own
    #[serde(default)]
    pub critical_troves: Vec<String>,

    /// Regexes of troves applied last
    #[serde(default)]
    pub final_troves: Vec<String>,

    #[serde(default)]
    pub ignore_dep_classes: Vec<DependencyClass>,

    /// Largest sub-job size; 0 keeps the job in one piece
    #[serde(default)]
    pub update_threshold: usize,

    /// Refuse jobs installing two troves of one branch with
    /// overlapping paths
    #[serde(default = "default_true")]
    pub check_path_conflicts: bool,

    #[serde(default)]
    pub resolve_mode: LabelPathMode,
}

fn default_true() -> bool {
    true
}

fn default_resolve_level() -> u8 {
    2
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            install_label_path: LabelPath::new(),
            flavor: Vec::new(),
            exclude_troves: Vec::new(),
            keep_required: true,
            auto_resolve: true,
            resolve_level: default_resolve_level(),
            auto_resolve_packages: true,
            critical_troves: Vec::new(),
            final_troves: Vec::new(),
            ignore_dep_classes: Vec::new(),
            update_threshold: 0,
            check_path_conflicts: true,
            resolve_mode: LabelPathMode::default(),
        }
    }
}

impl UpdateConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("loading update configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: UpdateConfig = toml::from_str(content)?;
        // surface bad patterns at load time
        config.exclude_patterns()?;
        config.check_options()?;
        Ok(config)
    }

    pub fn exclude_patterns(&self) -> Result<Vec<Regex>> {
        compile_patterns(&self.exclude_troves)
    }

    /// Options for the dependency check of planned jobs
    pub fn check_options(&self) -> Result<CheckOptions> {
        Ok(CheckOptions {
            ignore_dep_classes: self.ignore_dep_classes.clone(),
            critical_troves: compile_patterns(&self.critical_troves)?,
            final_troves: compile_patterns(&self.final_troves)?,
            update_threshold: self.update_threshold,
        })
    }

    /// The default resolution method: the install label path
    pub fn resolution_stack(&self) -> ResolutionStack {
        let methods: Vec<Box<dyn ResolveMethod>> =
            vec![Box::new(ByLabelPath::new(self.install_label_path.clone(), self.resolve_mode))];
        ResolutionStack::new(methods)
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Ok(Regex::new(&format!("^(?:{})$", p))?))
        .collect()
}
