//! In-memory fake of the remote library for sync tests

use async_trait::async_trait;
use bytes::Bytes;
use imstash_core::{
    fsio, DocumentMeta, Person, RemoteDocument, RemoteFile, RemoteLibrary, SessionError,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// A scriptable remote library. Documents and file contents are mutated
/// between runs to simulate remote changes; download calls are counted so
/// tests can assert that unchanged files are never re-fetched.
#[derive(Default)]
pub struct FakeLibrary {
    documents: Mutex<Vec<RemoteDocument>>,
    contents: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_files: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
    downloads: AtomicUsize,
}

impl FakeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document, replacing any existing one with the same id
    pub fn put_document(&self, doc: RemoteDocument) {
        let mut documents = self.documents.lock().unwrap();
        if let Some(existing) = documents.iter_mut().find(|d| d.id() == doc.id()) {
            *existing = doc;
        } else {
            documents.push(doc);
        }
    }

    pub fn remove_document(&self, id: &str) {
        self.documents.lock().unwrap().retain(|d| d.id() != id);
    }

    /// Fetch a copy of a document for mutation via `put_document`
    pub fn document(&self, id: &str) -> RemoteDocument {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id() == id)
            .cloned()
            .expect("unknown document id")
    }

    pub fn set_content(&self, file_id: &str, content: &[u8]) {
        self.contents
            .lock()
            .unwrap()
            .insert(file_id.to_string(), content.to_vec());
    }

    pub fn fail_file(&self, file_id: &str) {
        self.failing_files
            .lock()
            .unwrap()
            .insert(file_id.to_string());
    }

    pub fn unfail_file(&self, file_id: &str) {
        self.failing_files.lock().unwrap().remove(file_id);
    }

    pub fn fail_listing(&self) {
        self.fail_listing.store(true, Ordering::SeqCst);
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteLibrary for FakeLibrary {
    async fn list_documents(&self) -> Result<Vec<RemoteDocument>, SessionError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(SessionError::Listing("injected listing failure".to_string()));
        }
        Ok(self.documents.lock().unwrap().clone())
    }

    async fn download_file(
        &self,
        _document_id: &str,
        file_id: &str,
    ) -> Result<Bytes, SessionError> {
        if self.failing_files.lock().unwrap().contains(file_id) {
            return Err(SessionError::Download("injected download failure".to_string()));
        }
        let content = self
            .contents
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| SessionError::Download(format!("unknown file {}", file_id)))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(content))
    }
}

/// Build a document with the given naming inputs and revision marker
pub fn document(
    id: &str,
    title: &str,
    authors: &[&str],
    year: Option<i32>,
    revision: &str,
) -> RemoteDocument {
    let mut meta = DocumentMeta::new(id, title);
    meta.year = year;
    meta.authors = authors.iter().map(|name| Person::new(*name)).collect();
    meta.last_modified = revision.to_string();
    RemoteDocument::new(meta)
}

/// Attach a file to a document and register its content with the library
pub fn attach(
    library: &FakeLibrary,
    doc: &mut RemoteDocument,
    file_id: &str,
    file_name: &str,
    content: &[u8],
) {
    doc.files
        .push(RemoteFile::new(file_id, file_name).with_hash(fsio::sha1_hex(content)));
    library.set_content(file_id, content);
}
