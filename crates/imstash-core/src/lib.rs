//! imstash-core: one-way mirror of a remote reference library
//!
//! This library provides the pieces the imstash CLI is built from:
//! - Naming resolver: pattern string + document metadata -> local path,
//!   with deterministic collision handling
//! - Sync engine: incremental reconciliation of the remote library
//!   against the local backup tree
//! - Manifest and per-document sidecars: the persisted state that makes
//!   repeat runs cheap
//! - The `RemoteLibrary` session trait the engine depends on
//!
//! Local changes are never uploaded; the remote library is the single
//! source of truth.

pub mod domain;
pub mod error;
pub mod fsio;
pub mod manifest;
pub mod naming;
pub mod session;
pub mod sidecar;
pub mod sync;

// Re-export main types for convenience
pub use domain::{DocumentMeta, Person, RemoteDocument, RemoteFile};
pub use error::{DocumentError, Result, SessionError, SyncError};
pub use manifest::{BackupManifest, ManifestError, MANIFEST_FILE};
pub use naming::{format_authors, Pattern, PatternError};
pub use session::RemoteLibrary;
pub use sidecar::{DocumentSidecar, FileRecord, SidecarError, SIDECAR_FILE};
pub use sync::{SyncAction, SyncEngine, SyncOptions, SyncReport};
