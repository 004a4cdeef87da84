//! mendeley-client: Rust client for the Mendeley REST API
//!
//! Covers exactly what a library mirror needs:
//! - OAuth2 login (implicit and authorization-code flows) with a localhost
//!   redirect catcher and token-file persistence
//! - Paginated listing of the user's documents and attached files
//! - File content download
//!
//! Everything else the API offers (groups, annotations, write access) is
//! out of scope here.

pub mod client;
pub mod error;
pub mod models;
pub mod oauth;

pub use client::{MendeleyClient, DEFAULT_API_BASE};
pub use error::ClientError;
pub use models::{ApiPerson, DocumentFile, UserDocument};
pub use oauth::{authorization_code_flow, implicit_flow, OAuthToken};
