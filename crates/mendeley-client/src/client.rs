//! Authenticated Mendeley API client

use crate::error::ClientError;
use crate::models::{DocumentFile, UserDocument};
use crate::oauth::{self, OAuthToken};
use bytes::Bytes;
use reqwest::header::{HeaderMap, ACCEPT, LINK};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.mendeley.com";

const DOCUMENTS_ACCEPT: &str = "application/vnd.mendeley-document.1+json";
const FILES_ACCEPT: &str = "application/vnd.mendeley-file.1+json";
const PAGE_SIZE: u32 = 500;

struct Credentials {
    client_id: String,
    client_secret: String,
}

/// Client over an authenticated Mendeley session.
///
/// When client credentials are configured, an expired or rejected access
/// token is refreshed transparently and re-persisted to the token file.
pub struct MendeleyClient {
    http: reqwest::Client,
    base_url: Url,
    token: Mutex<OAuthToken>,
    credentials: Option<Credentials>,
    token_file: Option<PathBuf>,
}

impl MendeleyClient {
    pub fn new(token: OAuthToken) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(concat!("imstash/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http,
            base_url: Url::parse(DEFAULT_API_BASE).expect("valid API base URL"),
            token: Mutex::new(token),
            credentials: None,
            token_file: None,
        }
    }

    /// Point the client at a different API root (tests, proxies)
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    /// Enable token refresh with registered application credentials
    pub fn with_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        });
        self
    }

    /// Re-persist the token here whenever it is refreshed
    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }

    /// All documents in the user's library, with the full metadata view
    pub async fn list_documents(&self) -> Result<Vec<UserDocument>, ClientError> {
        let url = self.endpoint("documents", &[("view", "all")])?;
        self.list_paginated(url, DOCUMENTS_ACCEPT).await
    }

    /// All attached files across the library
    pub async fn list_files(&self) -> Result<Vec<DocumentFile>, ClientError> {
        let url = self.endpoint("files", &[])?;
        self.list_paginated(url, FILES_ACCEPT).await
    }

    /// Download one file's content. The API answers with a redirect to the
    /// actual content URL, which reqwest follows.
    pub async fn download_file(&self, file_id: &str) -> Result<Bytes, ClientError> {
        let url = self.endpoint(&format!("files/{}", file_id), &[])?;
        let response = self.get(url, "*/*").await?;
        Ok(response.bytes().await?)
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, ClientError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|err| ClientError::Parse(err.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
            query.append_pair("limit", &PAGE_SIZE.to_string());
        }
        Ok(url)
    }

    async fn list_paginated<T: DeserializeOwned>(
        &self,
        first: Url,
        accept: &str,
    ) -> Result<Vec<T>, ClientError> {
        let mut out = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next {
            let response = self.get(url, accept).await?;
            next = match next_link(response.headers()) {
                Some(link) => {
                    Some(Url::parse(&link).map_err(|err| ClientError::Parse(err.to_string()))?)
                }
                None => None,
            };
            let mut page: Vec<T> = response.json().await?;
            out.append(&mut page);
            debug!(total = out.len(), "fetched listing page");
        }
        Ok(out)
    }

    async fn get(&self, url: Url, accept: &str) -> Result<reqwest::Response, ClientError> {
        for attempt in 0..2 {
            let access_token = self.current_access_token(attempt > 0).await?;
            let response = self
                .http
                .get(url.clone())
                .bearer_auth(&access_token)
                .header(ACCEPT, accept)
                .send()
                .await?;
            match response.status() {
                StatusCode::UNAUTHORIZED if attempt == 0 && self.can_refresh() => {
                    debug!("access token rejected; refreshing");
                    continue;
                }
                StatusCode::UNAUTHORIZED => return Err(ClientError::Unauthorized),
                StatusCode::TOO_MANY_REQUESTS => return Err(ClientError::RateLimited),
                status if !status.is_success() => {
                    let message = response.text().await.unwrap_or_default();
                    return Err(ClientError::Status {
                        status: status.as_u16(),
                        message,
                    });
                }
                _ => return Ok(response),
            }
        }
        Err(ClientError::Unauthorized)
    }

    fn can_refresh(&self) -> bool {
        self.credentials.is_some()
    }

    /// The access token to use, refreshing first when it is (or was just
    /// proven) stale.
    async fn current_access_token(&self, force_refresh: bool) -> Result<String, ClientError> {
        let mut token = self.token.lock().await;
        if force_refresh || token.is_expired() {
            let Some(credentials) = &self.credentials else {
                return if force_refresh {
                    Err(ClientError::Unauthorized)
                } else {
                    // Let the request proceed; the server has the last word.
                    Ok(token.access_token.clone())
                };
            };
            let Some(refresh_token) = token.refresh_token.clone() else {
                return Err(ClientError::Unauthorized);
            };
            let mut refreshed = oauth::refresh(
                &self.http,
                &credentials.client_id,
                &credentials.client_secret,
                &refresh_token,
            )
            .await?;
            // Some token endpoints omit the refresh token on renewal.
            if refreshed.refresh_token.is_none() {
                refreshed.refresh_token = Some(refresh_token);
            }
            if let Some(path) = &self.token_file {
                if let Err(err) = refreshed.save(path) {
                    warn!(path = %path.display(), %err, "failed to re-persist refreshed token");
                }
            }
            *token = refreshed;
        }
        Ok(token.access_token.clone())
    }
}

/// Extract the `rel="next"` target from a Link header
fn next_link(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(LINK) {
        let value = value.to_str().ok()?;
        for part in value.split(',') {
            let mut sections = part.split(';');
            let target = sections.next()?.trim();
            let is_next = sections
                .any(|attr| attr.trim().eq_ignore_ascii_case("rel=\"next\""));
            if is_next && target.starts_with('<') && target.ends_with('>') {
                return Some(target[1..target.len() - 1].to_string());
            }
        }
    }
    None
}
