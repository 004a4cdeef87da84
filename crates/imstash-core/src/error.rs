//! Error types for imstash-core

use crate::manifest::ManifestError;
use crate::naming::PatternError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for whole-run operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Fatal errors that abort a sync run. Nothing has been modified when a
/// listing or pattern error is returned.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote document list could not be obtained
    #[error("failed to list remote documents: {0}")]
    Listing(String),

    /// The naming pattern cannot produce valid paths
    #[error("invalid naming pattern: {0}")]
    Pattern(#[from] PatternError),

    /// The backup manifest could not be read or written
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// The backup location itself is unusable
    #[error("backup location error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-document errors. These mark a single document as failed and are
/// aggregated into the run report; they never abort the run.
#[derive(Error, Debug)]
pub enum DocumentError {
    /// A file download failed
    #[error("failed to download file {file_id}: {message}")]
    Download { file_id: String, message: String },

    /// A filesystem write, rename or removal failed
    #[error("filesystem error at {path}: {source}")]
    LocalWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document sidecar could not be written
    #[error(transparent)]
    Sidecar(#[from] crate::sidecar::SidecarError),
}

impl DocumentError {
    pub(crate) fn local(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DocumentError::LocalWrite {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by a remote library session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("listing failed: {0}")]
    Listing(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("rate limited by the remote API")]
    RateLimited,
    #[error("not authorized")]
    Unauthorized,
}
