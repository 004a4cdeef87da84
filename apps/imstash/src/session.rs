//! Adapter exposing the Mendeley client as a `RemoteLibrary` session
//!
//! The files endpoint is flat, so one listing call fetches every attached
//! file and the adapter groups them by document before handing the engine
//! its combined view.

use async_trait::async_trait;
use bytes::Bytes;
use imstash_core::{
    DocumentMeta, Person, RemoteDocument, RemoteFile, RemoteLibrary, SessionError,
};
use mendeley_client::{ApiPerson, ClientError, DocumentFile, MendeleyClient, UserDocument};
use std::collections::HashMap;

pub struct MendeleySession {
    client: MendeleyClient,
}

impl MendeleySession {
    pub fn new(client: MendeleyClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteLibrary for MendeleySession {
    async fn list_documents(&self) -> Result<Vec<RemoteDocument>, SessionError> {
        let documents = self.client.list_documents().await.map_err(listing_error)?;
        let files = self.client.list_files().await.map_err(listing_error)?;

        let mut by_document: HashMap<String, Vec<RemoteFile>> = HashMap::new();
        for file in files {
            by_document
                .entry(file.document_id.clone())
                .or_default()
                .push(convert_file(file));
        }

        Ok(documents
            .into_iter()
            .map(|doc| {
                let files = by_document.remove(&doc.id).unwrap_or_default();
                RemoteDocument {
                    meta: convert_document(doc),
                    files,
                }
            })
            .collect())
    }

    async fn download_file(
        &self,
        _document_id: &str,
        file_id: &str,
    ) -> Result<Bytes, SessionError> {
        self.client.download_file(file_id).await.map_err(|err| match err {
            ClientError::RateLimited => SessionError::RateLimited,
            ClientError::Unauthorized => SessionError::Unauthorized,
            other => SessionError::Download(other.to_string()),
        })
    }
}

fn listing_error(err: ClientError) -> SessionError {
    match err {
        ClientError::RateLimited => SessionError::RateLimited,
        ClientError::Unauthorized => SessionError::Unauthorized,
        other => SessionError::Listing(other.to_string()),
    }
}

fn convert_document(doc: UserDocument) -> DocumentMeta {
    let created = doc.created;
    DocumentMeta {
        id: doc.id,
        title: doc.title.unwrap_or_default(),
        doc_type: doc.doc_type,
        source: doc.source,
        year: doc.year,
        authors: doc.authors.into_iter().map(convert_person).collect(),
        identifiers: doc.identifiers,
        keywords: doc.keywords,
        abstract_text: doc.abstract_text,
        last_modified: doc
            .last_modified
            .clone()
            .or_else(|| created.clone())
            .unwrap_or_default(),
        created,
    }
}

fn convert_person(person: ApiPerson) -> Person {
    let last_name = person
        .last_name
        .or_else(|| person.first_name.clone())
        .unwrap_or_else(|| "Unknown".to_string());
    Person {
        first_name: person.first_name,
        last_name,
    }
}

fn convert_file(file: DocumentFile) -> RemoteFile {
    RemoteFile {
        id: file.id,
        file_name: file.file_name.unwrap_or_default(),
        filehash: file.filehash,
        mime_type: file.mime_type,
        size: file.size,
    }
}
