//! Document and attached-file models

use super::Person;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata of one document in the remote library.
///
/// This is also the snapshot written into the per-document sidecar, so every
/// field is serializable. `last_modified` doubles as the revision marker: the
/// remote bumps it whenever the document's metadata or files change.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DocumentMeta {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub authors: Vec<Person>,
    #[serde(default)]
    pub identifiers: BTreeMap<String, String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    /// Revision marker, RFC 3339. Opaque to the engine: only compared for
    /// equality against the sidecar snapshot.
    #[serde(default)]
    pub last_modified: String,
}

impl DocumentMeta {
    /// Create a document with required fields
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            doc_type: None,
            source: None,
            year: None,
            authors: Vec::new(),
            identifiers: BTreeMap::new(),
            keywords: Vec::new(),
            abstract_text: None,
            created: None,
            last_modified: String::new(),
        }
    }
}

/// One file attached to a remote document
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemoteFile {
    pub id: String,
    pub file_name: String,
    /// SHA-1 of the file content as reported by the remote
    pub filehash: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
}

impl RemoteFile {
    pub fn new(id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            filehash: None,
            mime_type: None,
            size: None,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.filehash = Some(hash.into());
        self
    }
}

/// A document plus its attached files, as fetched fresh on every run
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemoteDocument {
    pub meta: DocumentMeta,
    pub files: Vec<RemoteFile>,
}

impl RemoteDocument {
    pub fn new(meta: DocumentMeta) -> Self {
        Self {
            meta,
            files: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn revision(&self) -> &str {
        &self.meta.last_modified
    }
}
