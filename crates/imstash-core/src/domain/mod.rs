//! Remote library data model

mod document;
mod person;

pub use document::{DocumentMeta, RemoteDocument, RemoteFile};
pub use person::Person;
