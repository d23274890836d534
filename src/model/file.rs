// src/model/file.rs

//! System model files and their snapshots
//!
//! While a model is being applied the target state lives in a snapshot
//! next to the model file (`system-model.next`). Reading prefers the
//! snapshot so an interrupted update resumes toward the same target.

use super::{SNAPSHOT_SUFFIX, SystemModel};
use crate::error::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A system model bound to its file
#[derive(Debug, Clone)]
pub struct ModelFile {
    path: PathBuf,
    snapshot: PathBuf,
    pub model: SystemModel,
}

impl ModelFile {
    /// Bind to `path` and parse it (or its snapshot) when it exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut snapshot = path.clone().into_os_string();
        snapshot.push(SNAPSHOT_SUFFIX);
        let mut file = Self {
            path,
            snapshot: PathBuf::from(snapshot),
            model: SystemModel::new(),
        };
        if file.exists() || file.snapshot_exists() {
            file.model = file.read()?;
        }
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn snapshot_exists(&self) -> bool {
        self.snapshot.exists()
    }

    /// Parse the snapshot if present, otherwise the model file
    pub fn read(&self) -> Result<SystemModel> {
        let source = if self.snapshot_exists() { &self.snapshot } else { &self.path };
        debug!("reading system model from {}", source.display());
        let text = fs::read_to_string(source)?;
        SystemModel::parse(&text)
    }

    /// Replace the model file with the current model
    pub fn write(&self) -> Result<()> {
        write_atomic(&self.path, &self.model.format())
    }

    /// Record the current model as the target of an update in progress
    pub fn write_snapshot(&self) -> Result<()> {
        write_atomic(&self.snapshot, &self.model.format())
    }

    /// The update finished: the snapshot becomes the model file
    pub fn close_snapshot(&self) -> Result<()> {
        if self.snapshot_exists() {
            fs::rename(&self.snapshot, &self.path)?;
            info!("applied system model snapshot to {}", self.path.display());
        }
        Ok(())
    }

    /// The update was abandoned: drop the snapshot
    pub fn delete_snapshot(&self) -> Result<()> {
        if self.snapshot_exists() {
            fs::remove_file(&self.snapshot)?;
            info!("discarded system model snapshot {}", self.snapshot.display());
        }
        Ok(())
    }
}

/// Write through a temp file in the same directory, then rename
fn write_atomic(path: &Path, text: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new().prefix("system-model").tempfile_in(dir)?;
    tmp.write_all(text.as_bytes())?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions())?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
