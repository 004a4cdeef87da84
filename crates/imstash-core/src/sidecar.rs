//! Per-document sidecar: metadata snapshot plus the synced-file ledger
//!
//! Each document directory carries an `info.json` recording the metadata,
//! the revision marker and the id -> {name, hash} map of its files at the
//! time of the last successful sync. Reading it back is what makes repeat
//! runs cheap: matching revisions skip the document entirely.

use crate::domain::DocumentMeta;
use crate::fsio;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the sidecar inside a document directory
pub const SIDECAR_FILE: &str = "info.json";

#[derive(Error, Debug)]
pub enum SidecarError {
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

/// Ledger entry for one synced file
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub file_name: String,
    /// Content hash as declared by the remote when the file was synced
    pub filehash: Option<String>,
}

/// On-disk snapshot of one document's synced state
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentSidecar {
    /// Revision marker at the time of the last successful sync
    pub revision: String,
    /// Resolved path relative to the backup root
    pub path: String,
    /// Full metadata snapshot
    pub document: DocumentMeta,
    /// File id -> ledger entry
    pub files: BTreeMap<String, FileRecord>,
}

impl DocumentSidecar {
    pub fn new(document: DocumentMeta, path: &Path) -> Self {
        Self {
            revision: document.last_modified.clone(),
            path: path.to_string_lossy().into_owned(),
            document,
            files: BTreeMap::new(),
        }
    }

    /// Load the sidecar from `dir/info.json`. `Ok(None)` means no sidecar
    /// exists; a parse error is returned so the caller can degrade to
    /// treating the document as new.
    pub fn load(dir: &Path) -> Result<Option<Self>, SidecarError> {
        let path = dir.join(SIDECAR_FILE);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SidecarError::Io { path, source }),
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|source| SidecarError::Parse { path, source })
    }

    /// Save the sidecar atomically to `dir/info.json`
    pub fn save(&self, dir: &Path) -> Result<(), SidecarError> {
        let path = dir.join(SIDECAR_FILE);
        let data = serde_json::to_string_pretty(self).map_err(|source| SidecarError::Parse {
            path: path.clone(),
            source,
        })?;
        fsio::write_atomic(&path, data.as_bytes())
            .map_err(|source| SidecarError::Io { path, source })
    }

    /// Whether `file_name` is already recorded under a different file id
    pub fn name_used_by_other(files: &BTreeMap<String, FileRecord>, id: &str, file_name: &str) -> bool {
        files
            .iter()
            .any(|(other, record)| other != id && record.file_name == file_name)
    }

    /// The recorded file names, for sweeping unaccounted entries
    pub fn known_names(&self) -> impl Iterator<Item = &str> {
        self.files.values().map(|record| record.file_name.as_str())
    }
}
