// src/cache/mod.rs

//! Memoizing trove cache
//!
//! Every read the planner makes goes through [`TroveCache`]. It batches
//! uncached tuples into one call to the trove source, keeps dependency
//! pairs, find results, dependency solutions and model-include file
//! contents, and can be saved to and restored from a JSON snapshot so a
//! later planning pass starts warm.
//!
//! The cache only memoizes. It never decides anything; dropping it changes
//! performance, not results.

use crate::dependencies::{Dependency, DependencySet};
use crate::error::{Error, Result};
use crate::flavor::FlavorSpec;
use crate::label::{Label, LabelPath};
use crate::source::{DepPair, FindResults, InstalledState, TroveSource};
use crate::trove::{Trove, TroveSpec, TroveTuple};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info};

/// Cache of trove metadata shared across planning passes
pub struct TroveCache<'a> {
    source: &'a dyn TroveSource,
    installed: &'a dyn InstalledState,
    troves: HashMap<TroveTuple, Trove>,
    deps: HashMap<TroveTuple, DepPair>,
    /// (search fingerprint, spec) -> matches
    finds: HashMap<(String, TroveSpec), Vec<TroveTuple>>,
    /// (label, requirement) -> providers per dependency
    resolutions: HashMap<(String, DependencySet), Vec<Vec<TroveTuple>>>,
    /// (trove set signature, requirement) -> chosen solution
    solutions: HashMap<(String, DependencySet), Vec<Vec<TroveTuple>>>,
    file_contents: HashMap<(TroveTuple, String), Option<String>>,
    /// package -> components
    components: BTreeMap<TroveTuple, BTreeSet<TroveTuple>>,
    modified: bool,
}

impl<'a> TroveCache<'a> {
    pub fn new(source: &'a dyn TroveSource, installed: &'a dyn InstalledState) -> Self {
        Self {
            source,
            installed,
            troves: HashMap::new(),
            deps: HashMap::new(),
            finds: HashMap::new(),
            resolutions: HashMap::new(),
            solutions: HashMap::new(),
            file_contents: HashMap::new(),
            components: BTreeMap::new(),
            modified: false,
        }
    }

    pub fn source(&self) -> &'a dyn TroveSource {
        self.source
    }

    pub fn installed(&self) -> &'a dyn InstalledState {
        self.installed
    }

    pub fn is_cached(&self, tuple: &TroveTuple) -> bool {
        self.troves.contains_key(tuple)
    }

    pub fn len(&self) -> usize {
        self.troves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.troves.is_empty()
    }

    /// True when something was added since the last save or load
    pub fn modified(&self) -> bool {
        self.modified
    }

    fn insert_trove(&mut self, trove: Trove) {
        if trove.tuple.is_collection() {
            let components: BTreeSet<TroveTuple> = trove
                .strong_refs()
                .filter(|r| r.tuple.is_component() && r.tuple.package_name() == trove.tuple.name)
                .map(|r| r.tuple.clone())
                .collect();
            if !components.is_empty() {
                self.components.insert(trove.tuple.clone(), components);
            }
        }
        self.troves.insert(trove.tuple.clone(), trove);
        self.modified = true;
    }

    /// Load every uncached tuple with as few source calls as possible
    ///
    /// Local-host troves only exist on the system, so they are read from the
    /// installed state. Anything the source lacks falls back to the installed
    /// state as well.
    pub fn cache_troves(&mut self, tuples: &[TroveTuple]) -> Result<()> {
        let wanted: BTreeSet<&TroveTuple> = tuples.iter().filter(|t| !self.troves.contains_key(*t)).collect();
        if wanted.is_empty() {
            return Ok(());
        }

        let (local, remote): (Vec<TroveTuple>, Vec<TroveTuple>) =
            wanted.into_iter().cloned().partition(|t| t.version.is_on_local_host());

        let mut missing = local;
        if !remote.is_empty() {
            debug!("fetching {} trove(s) from source", remote.len());
            for (tuple, trove) in remote.iter().zip(self.source.get_troves(&remote)?) {
                match trove {
                    Some(trove) => self.insert_trove(trove),
                    None => missing.push(tuple.clone()),
                }
            }
        }

        if !missing.is_empty() {
            for trove in self.installed.get_troves(&missing)?.into_iter().flatten() {
                self.insert_trove(trove);
            }
        }
        Ok(())
    }

    /// A cached trove, loading it if needed
    pub fn get_trove(&mut self, tuple: &TroveTuple) -> Result<&Trove> {
        self.cache_troves(std::slice::from_ref(tuple))?;
        self.troves
            .get(tuple)
            .ok_or_else(|| Error::TroveNotFound(tuple.to_string()))
    }

    /// An already cached trove
    pub fn trove(&self, tuple: &TroveTuple) -> Option<&Trove> {
        self.troves.get(tuple)
    }

    /// Load and clone troves; every tuple must exist
    pub fn get_troves(&mut self, tuples: &[TroveTuple]) -> Result<Vec<Trove>> {
        self.cache_troves(tuples)?;
        tuples
            .iter()
            .map(|t| {
                self.troves
                    .get(t)
                    .cloned()
                    .ok_or_else(|| Error::TroveNotFound(t.to_string()))
            })
            .collect()
    }

    /// Provides and requires of each tuple
    ///
    /// Packages also provide `trove: <component>` for each cached component.
    pub fn get_deps_for_trove_list(&mut self, tuples: &[TroveTuple]) -> Result<Vec<DepPair>> {
        // installed troves may be missing from the source
        let installed: Vec<TroveTuple> = tuples
            .iter()
            .filter(|t| !self.deps.contains_key(*t) && self.installed.has_trove(t))
            .cloned()
            .collect();
        self.cache_troves(&installed)?;

        let uncached: Vec<TroveTuple> = tuples
            .iter()
            .filter(|t| !self.deps.contains_key(*t) && !self.troves.contains_key(*t))
            .cloned()
            .collect();

        if !uncached.is_empty() {
            debug!("fetching dependencies for {} trove(s)", uncached.len());
            let pairs = self.source.get_deps_for_trove_list(&uncached)?;
            for (tuple, pair) in uncached.into_iter().zip(pairs) {
                self.deps.insert(tuple, pair);
            }
            self.modified = true;
        }

        let mut result = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            let (mut provides, requires) = match self.troves.get(tuple) {
                Some(trv) => (trv.effective_provides(), trv.requires.clone()),
                None => self.deps.get(tuple).cloned().unwrap_or_default(),
            };
            if let Some(components) = self.components.get(tuple) {
                for comp in components {
                    provides.insert(Dependency::trove(comp.name.clone()));
                }
            }
            result.push((provides, requires));
        }
        Ok(result)
    }

    /// Search a repository, memoizing per (search path, flavor, spec)
    pub fn find_troves(&mut self, label_path: &LabelPath, specs: &[TroveSpec], flavor: &FlavorSpec) -> Result<FindResults> {
        let fingerprint = format!("{}|{}", label_path, flavor.body());
        let mut results = FindResults::new();
        let mut uncached = Vec::new();
        for spec in specs {
            match self.finds.get(&(fingerprint.clone(), spec.clone())) {
                Some(found) => {
                    results.insert(spec.clone(), found.clone());
                }
                None => uncached.push(spec.clone()),
            }
        }

        if !uncached.is_empty() {
            debug!("finding {} spec(s) on {}", uncached.len(), label_path);
            for (spec, found) in self.source.find_troves(label_path, &uncached, flavor)? {
                self.finds.insert((fingerprint.clone(), spec.clone()), found.clone());
                results.insert(spec, found);
            }
            self.modified = true;
        }

        for spec in uncached {
            results.entry(spec).or_default();
        }
        Ok(results)
    }

    /// Providers on `label` for each dependency of `requirement`
    pub fn resolve_dependencies(&mut self, label: &Label, requirements: &[DependencySet]) -> Result<Vec<Vec<Vec<TroveTuple>>>> {
        let key_label = label.to_string();
        let uncached: Vec<DependencySet> = requirements
            .iter()
            .filter(|r| !self.resolutions.contains_key(&(key_label.clone(), (*r).clone())))
            .cloned()
            .collect();

        if !uncached.is_empty() {
            let found = self.source.resolve_dependencies(label, &uncached)?;
            for req in uncached {
                let providers = found
                    .get(&req)
                    .cloned()
                    .unwrap_or_else(|| vec![Vec::new(); req.len()]);
                self.resolutions.insert((key_label.clone(), req), providers);
            }
            self.modified = true;
        }

        Ok(requirements
            .iter()
            .map(|r| {
                self.resolutions
                    .get(&(key_label.clone(), r.clone()))
                    .cloned()
                    .unwrap_or_default()
            })
            .collect())
    }

    /// A solution previously recorded for a trove set
    pub fn get_dep_solution(&self, signature: &str, requirement: &DependencySet) -> Option<&Vec<Vec<TroveTuple>>> {
        self.solutions.get(&(signature.to_string(), requirement.clone()))
    }

    pub fn add_dep_solution(&mut self, signature: &str, requirement: DependencySet, solution: Vec<Vec<TroveTuple>>) {
        self.solutions.insert((signature.to_string(), requirement), solution);
        self.modified = true;
    }

    /// Contents of a text file in a trove
    pub fn get_file_contents(&mut self, tuple: &TroveTuple, path: &str) -> Result<Option<String>> {
        let key = (tuple.clone(), path.to_string());
        if let Some(contents) = self.file_contents.get(&key) {
            return Ok(contents.clone());
        }
        let contents = match self.troves.get(tuple) {
            Some(trv) if trv.files.contains_key(path) => trv.files.get(path).cloned(),
            _ => self.source.get_file_contents(tuple, path)?,
        };
        self.file_contents.insert(key, contents.clone());
        self.modified = true;
        Ok(contents)
    }

    /// Components of a package, as far as the cache knows them
    pub fn components(&self, package: &TroveTuple) -> Vec<TroveTuple> {
        self.components
            .get(package)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Save a JSON snapshot of everything cached
    pub fn save(&mut self, path: &Path) -> Result<()> {
        let snapshot = CacheSnapshot {
            troves: self.troves.values().cloned().collect(),
            deps: self
                .deps
                .iter()
                .map(|(t, (p, r))| (t.clone(), p.clone(), r.clone()))
                .collect(),
            finds: self
                .finds
                .iter()
                .map(|((fp, spec), found)| (fp.clone(), spec.to_string(), found.clone()))
                .collect(),
            file_contents: self
                .file_contents
                .iter()
                .map(|((t, p), c)| (t.clone(), p.clone(), c.clone()))
                .collect(),
        };
        std::fs::write(path, serde_json::to_string(&snapshot)?)?;
        info!("saved trove cache with {} troves to {}", snapshot.troves.len(), path.display());
        self.modified = false;
        Ok(())
    }

    /// Merge a snapshot written by [`TroveCache::save`]
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        let snapshot: CacheSnapshot = serde_json::from_str(&text)?;
        let count = snapshot.troves.len();
        for trove in snapshot.troves {
            self.insert_trove(trove);
        }
        for (tuple, provides, requires) in snapshot.deps {
            self.deps.insert(tuple, (provides, requires));
        }
        for (fingerprint, spec, found) in snapshot.finds {
            self.finds.insert((fingerprint, TroveSpec::parse(&spec)?), found);
        }
        for (tuple, path, contents) in snapshot.file_contents {
            self.file_contents.insert((tuple, path), contents);
        }
        info!("loaded trove cache with {} troves from {}", count, path.display());
        self.modified = false;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct CacheSnapshot {
    troves: Vec<Trove>,
    deps: Vec<(TroveTuple, DependencySet, DependencySet)>,
    finds: Vec<(String, String, Vec<TroveTuple>)>,
    file_contents: Vec<(TroveTuple, String, Option<String>)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemoryDatabase, MemoryRepository};
    use crate::trove::TroveRef;
    use std::cell::Cell;

    fn tup(s: &str) -> TroveTuple {
        TroveTuple::parse(s).unwrap()
    }

    /// Counts get_troves calls
    struct Counting {
        inner: MemoryRepository,
        calls: Cell<usize>,
    }

    impl TroveSource for Counting {
        fn get_troves(&self, tuples: &[TroveTuple]) -> Result<Vec<Option<Trove>>> {
            self.calls.set(self.calls.get() + 1);
            self.inner.get_troves(tuples)
        }

        fn find_troves(&self, label_path: &LabelPath, specs: &[TroveSpec], flavor: &FlavorSpec) -> Result<FindResults> {
            self.calls.set(self.calls.get() + 1);
            self.inner.find_troves(label_path, specs, flavor)
        }

        fn resolve_dependencies(
            &self,
            label: &Label,
            requirements: &[DependencySet],
        ) -> Result<crate::source::ResolveResults> {
            self.inner.resolve_dependencies(label, requirements)
        }
    }

    fn counting_repo() -> Counting {
        let mut repo = MemoryRepository::new();
        let mut pkg = Trove::new(tup("foo=/repo@rpl:2/1.0-1-1"));
        pkg.references.push(TroveRef::strong(tup("foo:runtime=/repo@rpl:2/1.0-1-1"), true));
        pkg.files.insert("/etc/foo.cml".into(), "install bar\n".into());
        repo.add(pkg);
        repo.add(Trove::new(tup("foo:runtime=/repo@rpl:2/1.0-1-1")));
        repo.add(Trove::new(tup("bar=/repo@rpl:2/1.0:1.0-1-1")));
        Counting {
            inner: repo,
            calls: Cell::new(0),
        }
    }

    // === Trove cache tests ===

    #[test]
    fn test_cache_batches_and_memoizes() {
        let repo = counting_repo();
        let db = MemoryDatabase::new();
        let mut cache = TroveCache::new(&repo, &db);

        let tuples = vec![tup("foo=/repo@rpl:2/1.0-1-1"), tup("foo:runtime=/repo@rpl:2/1.0-1-1")];
        cache.cache_troves(&tuples).unwrap();
        assert_eq!(repo.calls.get(), 1);
        cache.cache_troves(&tuples).unwrap();
        assert_eq!(repo.calls.get(), 1);
        assert!(cache.get_trove(&tuples[0]).is_ok());
        assert_eq!(repo.calls.get(), 1);

        assert!(cache.get_trove(&tup("nope=/repo@rpl:2/1.0-1-1")).is_err());
    }

    #[test]
    fn test_local_troves_come_from_installed_state() {
        let repo = counting_repo();
        let mut db = MemoryDatabase::new();
        let local = tup("foo=/local@local:COOK/1.0-1-1");
        db.add(Trove::new(local.clone()));
        let mut cache = TroveCache::new(&repo, &db);

        cache.cache_troves(std::slice::from_ref(&local)).unwrap();
        assert_eq!(repo.calls.get(), 0);
        assert!(cache.is_cached(&local));
    }

    #[test]
    fn test_package_provides_components() {
        let repo = counting_repo();
        let db = MemoryDatabase::new();
        let mut cache = TroveCache::new(&repo, &db);
        let foo = tup("foo=/repo@rpl:2/1.0-1-1");
        cache.cache_troves(std::slice::from_ref(&foo)).unwrap();

        let deps = cache.get_deps_for_trove_list(std::slice::from_ref(&foo)).unwrap();
        assert!(deps[0].0.provides(&Dependency::trove("foo")));
        assert!(deps[0].0.provides(&Dependency::trove("foo:runtime")));
        assert_eq!(cache.components(&foo), vec![tup("foo:runtime=/repo@rpl:2/1.0-1-1")]);
    }

    #[test]
    fn test_find_memoized() {
        let repo = counting_repo();
        let db = MemoryDatabase::new();
        let mut cache = TroveCache::new(&repo, &db);
        let path = LabelPath::parse("repo@rpl:2").unwrap();
        let spec = TroveSpec::new("bar");

        let first = cache.find_troves(&path, std::slice::from_ref(&spec), &FlavorSpec::empty()).unwrap();
        let second = cache.find_troves(&path, std::slice::from_ref(&spec), &FlavorSpec::empty()).unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.calls.get(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cache.json");
        let repo = counting_repo();
        let db = MemoryDatabase::new();

        let mut cache = TroveCache::new(&repo, &db);
        let foo = tup("foo=/repo@rpl:2/1.0-1-1");
        cache.cache_troves(std::slice::from_ref(&foo)).unwrap();
        assert_eq!(
            cache.get_file_contents(&foo, "/etc/foo.cml").unwrap().as_deref(),
            Some("install bar\n")
        );
        assert!(cache.modified());
        cache.save(&file).unwrap();
        assert!(!cache.modified());

        let mut warm = TroveCache::new(&repo, &db);
        warm.load(&file).unwrap();
        assert!(warm.is_cached(&foo));
        assert!(!warm.modified());
        assert_eq!(repo.calls.get(), 1);
    }
}
