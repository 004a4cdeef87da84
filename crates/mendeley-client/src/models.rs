//! Wire types for the Mendeley REST API

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An author as returned by the documents endpoint
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ApiPerson {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// One entry of `GET /documents?view=all`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserDocument {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub authors: Vec<ApiPerson>,
    #[serde(default)]
    pub identifiers: BTreeMap<String, String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

/// One entry of `GET /files`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentFile {
    pub id: String,
    pub document_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    /// SHA-1 of the file content
    #[serde(default)]
    pub filehash: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
}
