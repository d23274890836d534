// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use conary_planner::trove::{PathHashes, RedirectTarget, TroveRef};
use conary_planner::{
    Branch, Dependency, DependencySet, JobTuple, LabelPath, MemoryDatabase, MemoryRepository, Result,
    SystemModel, Trove, TroveCache, TroveTuple, UpdateConfig, UpdatePlan, UpdatePlanner,
};

pub const LABEL: &str = "repo@rpl:2";

/// Parse a frozen tuple such as `foo=/repo@rpl:2/1.0:1.0-1-1`
pub fn tup(s: &str) -> TroveTuple {
    TroveTuple::parse(s).unwrap()
}

/// Tuple of `name` on the test label; `version` includes the timestamp
pub fn at(name: &str, version: &str) -> TroveTuple {
    tup(&format!("{}=/{}/{}", name, LABEL, version))
}

pub fn deps(specs: &[&str]) -> DependencySet {
    specs.iter().map(|s| Dependency::parse(s).unwrap()).collect()
}

/// Builder for test troves
pub struct TroveBuilder {
    trove: Trove,
}

impl TroveBuilder {
    pub fn new(tuple: TroveTuple) -> Self {
        Self {
            trove: Trove::new(tuple),
        }
    }

    pub fn provides(mut self, specs: &[&str]) -> Self {
        self.trove.provides.extend(&deps(specs));
        self
    }

    pub fn requires(mut self, specs: &[&str]) -> Self {
        self.trove.requires.extend(&deps(specs));
        self
    }

    pub fn contains(mut self, tuple: &TroveTuple) -> Self {
        self.trove.references.push(TroveRef::strong(tuple.clone(), true));
        self
    }

    pub fn offers(mut self, tuple: &TroveTuple) -> Self {
        self.trove.references.push(TroveRef::strong(tuple.clone(), false));
        self
    }

    pub fn paths(mut self, paths: &[&str]) -> Self {
        self.trove.path_hashes = PathHashes::from_paths(paths.iter().copied());
        self
    }

    pub fn redirect_to(mut self, name: &str) -> Self {
        self.trove.redirects.get_or_insert_with(Vec::new).push(RedirectTarget {
            name: name.to_string(),
            branch: Branch::parse(&format!("/{}", LABEL)).unwrap(),
            flavor: None,
        });
        self
    }

    pub fn build(self) -> Trove {
        self.trove
    }
}

pub fn trove(tuple: &TroveTuple) -> TroveBuilder {
    TroveBuilder::new(tuple.clone())
}

/// A repository and an installed database side by side
#[derive(Default)]
pub struct Fixture {
    pub repo: MemoryRepository,
    pub db: MemoryDatabase,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a trove available in the repository
    pub fn publish(&mut self, trove: Trove) -> TroveTuple {
        let tuple = trove.tuple.clone();
        self.repo.add(trove);
        tuple
    }

    /// Publish a trove and install it
    pub fn install(&mut self, trove: Trove) -> TroveTuple {
        let tuple = trove.tuple.clone();
        self.db.add(trove.clone());
        self.repo.add(trove);
        tuple
    }

    /// Publish a package with a single `:runtime` component
    pub fn publish_package(&mut self, name: &str, version: &str, provides: &[&str], requires: &[&str]) -> TroveTuple {
        let component = at(&format!("{}:runtime", name), version);
        self.publish(trove(&component).provides(provides).requires(requires).build());
        self.publish(trove(&at(name, version)).contains(&component).build())
    }

    pub fn plan_model(&self, text: &str) -> Result<UpdatePlan> {
        self.plan_model_with(text, config())
    }

    pub fn plan_model_with(&self, text: &str, config: UpdateConfig) -> Result<UpdatePlan> {
        let model = SystemModel::parse(text)?;
        let mut cache = TroveCache::new(&self.repo, &self.db);
        UpdatePlanner::new(&mut cache, config).plan_model(&model)
    }

    pub fn plan_jobs(&self, jobs: &[JobTuple]) -> Result<UpdatePlan> {
        let mut cache = TroveCache::new(&self.repo, &self.db);
        UpdatePlanner::new(&mut cache, config()).plan_jobs(jobs)
    }

    /// Apply a plan to the installed database
    pub fn apply(&mut self, plan: &UpdatePlan) {
        self.db.apply_jobs(&plan.jobs, &self.repo).unwrap();
    }
}

/// Planner configuration searching the test label
pub fn config() -> UpdateConfig {
    UpdateConfig {
        install_label_path: LabelPath::parse(LABEL).unwrap(),
        ..Default::default()
    }
}

/// Names touched by a job list, old or new side
pub fn job_names(jobs: &[JobTuple]) -> Vec<&str> {
    jobs.iter().map(|j| j.name.as_str()).collect()
}
