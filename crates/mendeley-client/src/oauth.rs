//! OAuth2 login flows for the Mendeley API
//!
//! Both flows open a one-shot HTTP catcher on the (http-only, localhost)
//! redirect URI and wait for the browser to come back. The implicit flow
//! needs one extra hop: the token arrives in the URL fragment, which the
//! browser never sends to a server, so the catcher serves a tiny page whose
//! script echoes the fragment back as a query string.

use crate::error::ClientError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

pub const AUTHORIZE_URL: &str = "https://api.mendeley.com/oauth/authorize";
pub const TOKEN_URL: &str = "https://api.mendeley.com/oauth/token";
const SCOPE: &str = "all";

/// Refresh slightly before the server-side expiry
const EXPIRY_MARGIN_SECS: i64 = 60;

/// A bearer token, persisted between runs when a token file is configured
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthToken {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= expires_at,
            None => false,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Load a saved token; `Ok(None)` when the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>, ClientError> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Persist the token, creating parent directories as needed.
    /// Store the token file in a secure location.
    pub fn save(&self, path: &Path) -> Result<(), ClientError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl From<TokenResponse> for OAuthToken {
    fn from(response: TokenResponse) -> Self {
        OAuthToken {
            access_token: response.access_token,
            token_type: response.token_type.unwrap_or_else(|| "bearer".to_string()),
            refresh_token: response.refresh_token,
            expires_at: response
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        }
    }
}

/// Login URL the user opens in a browser
pub fn login_url(client_id: &str, redirect_uri: &str, response_type: &str) -> Result<Url, ClientError> {
    Url::parse_with_params(
        AUTHORIZE_URL,
        &[
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", response_type),
            ("scope", SCOPE),
        ],
    )
    .map_err(|err| ClientError::Parse(err.to_string()))
}

/// Implicit grant: the token comes straight out of the redirect, no client
/// secret involved, but it cannot be refreshed.
pub async fn implicit_flow(client_id: &str, redirect_uri: &str) -> Result<OAuthToken, ClientError> {
    let redirect = parse_redirect_uri(redirect_uri)?;
    let url = login_url(client_id, redirect_uri, "token")?;
    announce_login(&url);

    let query = wait_for_redirect(&redirect, true).await?;
    token_from_fragment_query(&query)
}

/// Authorization-code grant: exchanges the redirect code for a refreshable
/// token. A saved token with a refresh token short-circuits the browser
/// round trip entirely.
pub async fn authorization_code_flow(
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
    saved: Option<OAuthToken>,
) -> Result<OAuthToken, ClientError> {
    if let Some(token) = saved {
        if token.can_refresh() {
            return Ok(token);
        }
    }

    let redirect = parse_redirect_uri(redirect_uri)?;
    let url = login_url(client_id, redirect_uri, "code")?;
    announce_login(&url);

    let query = wait_for_redirect(&redirect, false).await?;
    let code = query_param(&query, "code")
        .ok_or_else(|| ClientError::Authorization("redirect carried no code".to_string()))?;

    let http = reqwest::Client::new();
    exchange(
        &http,
        client_id,
        client_secret,
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", redirect_uri),
        ],
    )
    .await
}

/// Trade a refresh token for a fresh access token
pub(crate) async fn refresh(
    http: &reqwest::Client,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<OAuthToken, ClientError> {
    exchange(
        http,
        client_id,
        client_secret,
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ],
    )
    .await
}

async fn exchange(
    http: &reqwest::Client,
    client_id: &str,
    client_secret: &str,
    form: &[(&str, &str)],
) -> Result<OAuthToken, ClientError> {
    let response = http
        .post(TOKEN_URL)
        .basic_auth(client_id, Some(client_secret))
        .form(form)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ClientError::Authorization(format!(
            "token endpoint answered {}: {}",
            status, message
        )));
    }
    let token: TokenResponse = response.json().await?;
    Ok(token.into())
}

fn parse_redirect_uri(redirect_uri: &str) -> Result<Url, ClientError> {
    let url =
        Url::parse(redirect_uri).map_err(|err| ClientError::InvalidRedirect(err.to_string()))?;
    if url.scheme() != "http" {
        return Err(ClientError::InvalidRedirect(
            "redirect URI must be http".to_string(),
        ));
    }
    Ok(url)
}

fn announce_login(url: &Url) {
    println!("Open this URL in a browser to log in to Mendeley:");
    println!("  {}", url);
    println!("The program will continue once the login completes.");
}

/// Accept connections on the redirect address until one carries the
/// credentials (or an error) in its query string.
async fn wait_for_redirect(redirect: &Url, implicit: bool) -> Result<String, ClientError> {
    let host = redirect.host_str().unwrap_or("localhost").to_string();
    let port = redirect.port().unwrap_or(80);
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .map_err(|err| ClientError::Authorization(format!("cannot listen on {}: {}", host, err)))?;

    loop {
        let (mut stream, _) = listener
            .accept()
            .await
            .map_err(|err| ClientError::Authorization(err.to_string()))?;
        let Some(query) = read_request_query(&mut stream).await else {
            respond(&mut stream, 200, &success_page(implicit)).await;
            continue;
        };
        if let Some(error) = query_param(&query, "error") {
            let description =
                query_param(&query, "error_description").unwrap_or_else(|| "login failed".into());
            respond(&mut stream, 500, &error_page(&error, &description)).await;
            return Err(ClientError::Authorization(format!("{}: {}", error, description)));
        }
        let expected = if implicit { "access_token" } else { "code" };
        if query_param(&query, expected).is_some() {
            respond(&mut stream, 200, &success_page(false)).await;
            return Ok(query);
        }
        respond(&mut stream, 200, &success_page(implicit)).await;
    }
}

/// Read one HTTP request head and return the query string of its target
async fn read_request_query(stream: &mut TcpStream) -> Option<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() > 16 * 1024 {
            break;
        }
    }
    let head = String::from_utf8_lossy(&buffer);
    let request_line = head.lines().next()?;
    let target = request_line.split_whitespace().nth(1)?;
    let (_, query) = target.split_once('?')?;
    if query.is_empty() {
        None
    } else {
        Some(query.to_string())
    }
}

async fn respond(stream: &mut TcpStream, status: u16, body: &str) {
    let reason = if status == 200 { "OK" } else { "Internal Server Error" };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn success_page(with_fragment_relay: bool) -> String {
    let relay = if with_fragment_relay {
        // Echo the URL fragment back as a query string; the fragment itself
        // never reaches the server.
        "<script>\n\
         if (window.location.hash != '') {\n\
           const xhttp = new XMLHttpRequest();\n\
           xhttp.open(\"GET\", \"oauth?\" + window.location.hash.slice(1));\n\
           xhttp.send();\n\
         }\n\
         </script>"
    } else {
        ""
    };
    format!(
        "<html><body><h1>Successfully logged in!</h1>\
         <p>You can close this tab</p>{}</body></html>",
        relay
    )
}

fn error_page(error: &str, description: &str) -> String {
    format!(
        "<html><body><h1>Failed to log in!</h1><p>{}: {}</p></body></html>",
        error, description
    )
}

fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn token_from_fragment_query(query: &str) -> Result<OAuthToken, ClientError> {
    let access_token = query_param(query, "access_token")
        .ok_or_else(|| ClientError::Authorization("redirect carried no token".to_string()))?;
    let expires_at = query_param(query, "expires_in")
        .and_then(|secs| secs.parse::<i64>().ok())
        .map(|secs| Utc::now() + Duration::seconds(secs));
    Ok(OAuthToken {
        access_token,
        token_type: query_param(query, "token_type").unwrap_or_else(|| "bearer".to_string()),
        refresh_token: None,
        expires_at,
    })
}
