//! Backup manifest: the root index mapping document ids to local paths
//!
//! Stored as `info.json` at the top of the backup tree, read back on the
//! next run. The id->path map is bidirectional in memory so collision
//! checks by path are cheap; only the forward map is persisted.

use crate::fsio;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the manifest inside the backup root
pub const MANIFEST_FILE: &str = "info.json";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The persisted state of a backup tree
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Pattern the tree was built with; wins over a differing configured
    /// pattern on later runs
    pub pattern: String,
    /// End time of the last completed run
    pub last_sync: Option<DateTime<Utc>>,
    /// Document id -> path relative to the backup root
    documents: BTreeMap<String, String>,
    #[serde(skip)]
    path_owner: HashMap<String, String>,
    #[serde(skip)]
    dirty: bool,
}

impl BackupManifest {
    /// Fresh manifest for a new backup tree
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            last_sync: None,
            documents: BTreeMap::new(),
            path_owner: HashMap::new(),
            dirty: true,
        }
    }

    /// Load the manifest from `dir/info.json`
    pub fn load(dir: &Path) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        let data = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        let mut manifest: BackupManifest =
            serde_json::from_str(&data).map_err(|source| ManifestError::Parse {
                path: path.clone(),
                source,
            })?;
        manifest.path_owner = manifest
            .documents
            .iter()
            .map(|(id, path)| (path.clone(), id.clone()))
            .collect();
        manifest.dirty = false;
        Ok(manifest)
    }

    /// Whether the manifest differs from what is on disk
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Save the manifest atomically to `dir/info.json`
    pub fn save(&self, dir: &Path) -> Result<(), ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        let data = serde_json::to_string_pretty(self).map_err(|source| ManifestError::Parse {
            path: path.clone(),
            source,
        })?;
        fsio::write_atomic(&path, data.as_bytes())
            .map_err(|source| ManifestError::Io { path, source })
    }

    pub fn document_path(&self, id: &str) -> Option<&str> {
        self.documents.get(id).map(String::as_str)
    }

    pub fn document_ids(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Record (or update) a document's path, keeping the inverse map in step
    pub fn set_path(&mut self, id: &str, path: &Path) {
        let path = path.to_string_lossy().into_owned();
        if self.documents.get(id) == Some(&path) {
            return;
        }
        if let Some(old) = self.documents.insert(id.to_string(), path.clone()) {
            if self.path_owner.get(&old).map(String::as_str) == Some(id) {
                self.path_owner.remove(&old);
            }
        }
        self.path_owner.insert(path, id.to_string());
        self.dirty = true;
    }

    /// Drop a document, returning its former path
    pub fn remove(&mut self, id: &str) -> Option<String> {
        let path = self.documents.remove(id)?;
        if self.path_owner.get(&path).map(String::as_str) == Some(id) {
            self.path_owner.remove(&path);
        }
        self.dirty = true;
        Some(path)
    }

    /// The document currently occupying `path`, if any
    pub fn owner_of(&self, path: &Path) -> Option<&str> {
        self.path_owner
            .get(path.to_string_lossy().as_ref())
            .map(String::as_str)
    }

    /// Whether `path` is claimed by a document other than `id`
    pub fn used_by_other(&self, id: &str, path: &Path) -> bool {
        matches!(self.owner_of(path), Some(owner) if owner != id)
    }

    /// Whether any recorded document lives underneath `dir`
    pub fn contains_documents(&self, dir: &Path) -> bool {
        self.documents
            .values()
            .any(|path| Path::new(path).starts_with(dir))
    }
}
