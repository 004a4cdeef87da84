//! Remote library session abstraction
//!
//! The sync engine depends on this minimal capability set instead of any
//! concrete API client; the binary provides an adapter over the real client.

use crate::domain::RemoteDocument;
use crate::error::SessionError;
use async_trait::async_trait;
use bytes::Bytes;

/// An authenticated session against the remote reference library
#[async_trait]
pub trait RemoteLibrary: Send + Sync {
    /// List every document in the library, with metadata and attached-file
    /// descriptors. Pagination, if any, is the implementer's concern.
    async fn list_documents(&self) -> Result<Vec<RemoteDocument>, SessionError>;

    /// Download the content of one attached file
    async fn download_file(
        &self,
        document_id: &str,
        file_id: &str,
    ) -> Result<Bytes, SessionError>;
}
