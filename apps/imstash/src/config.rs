//! Configuration file loading and defaults
//!
//! The TOML configuration mirrors the command line: a `[backup]` section
//! for the mirror itself and a `[login]` section for the OAuth method.
//! Command-line options always win over the file.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PROGRAM_NAME: &str = "imstash";
pub const CONFIG_FILE_NAME: &str = "imstash.toml";

/// Client id of the shared imstash application; used for the implicit flow
/// when the user has not registered their own application.
pub const DEFAULT_CLIENT_ID: &str = "15049";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:5000/oauth";
pub const DEFAULT_OUTPUT_DIR: &str = "backup";
pub const DEFAULT_PATTERN: &str = "%author/%year - %title";
const DEFAULT_TOKEN_FILE: &str = "token.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FileConfig {
    pub backup: BackupSection,
    pub login: LoginSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BackupSection {
    pub output_dir: Option<PathBuf>,
    pub pattern: Option<String>,
    pub concurrency: Option<usize>,
    pub prune: Option<bool>,
    pub verify: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoginSection {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub token_file: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Default configuration file location under the user config directory
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(PROGRAM_NAME).join(CONFIG_FILE_NAME))
}

/// Resolve the token file: relative paths are interpreted under the user
/// cache directory, like the rest of the token plumbing.
pub fn resolve_token_file(configured: Option<PathBuf>) -> Option<PathBuf> {
    let cache = dirs::cache_dir().map(|dir| dir.join(PROGRAM_NAME));
    match configured {
        Some(path) if path.is_absolute() => Some(path),
        Some(path) => cache.map(|dir| dir.join(path)),
        None => cache.map(|dir| dir.join(DEFAULT_TOKEN_FILE)),
    }
}
