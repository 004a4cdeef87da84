//! imstash binary
//!
//! Logs in to Mendeley, builds the session adapter and runs one sync of the
//! library into the local backup tree.

mod config;
mod session;

use clap::Parser;
use config::{ConfigError, FileConfig};
use imstash_core::{SyncEngine, SyncOptions, SyncReport};
use mendeley_client::{authorization_code_flow, implicit_flow, MendeleyClient, OAuthToken};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Create a local mirror of your Mendeley library.
#[derive(Parser, Debug)]
#[command(name = config::PROGRAM_NAME, version, about)]
struct Cli {
    /// Path to the configuration file. Without this option the default
    /// location is used if it exists.
    #[arg(short = 'c', long, value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Directory of the local backup
    #[arg(short = 'o', long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Naming pattern for the backup's directory structure; recognizes
    /// %author, %title and %year. If the backup already exists, the pattern
    /// it was created with wins over this option.
    #[arg(short = 'p', long, value_name = "PATTERN")]
    pattern: Option<String>,

    /// Maximum number of documents processed concurrently
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Delete local copies of documents that were removed remotely
    #[arg(long)]
    prune: bool,

    /// Re-hash local files instead of trusting the recorded state
    #[arg(long)]
    verify: bool,

    /// Exit with an error when any document fails to sync
    #[arg(long)]
    strict: bool,

    /// Cancel the run after this many seconds; in-flight documents finish
    /// cleanly
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Client ID of an application registered on the Mendeley developer
    /// portal
    #[arg(short = 'i', long, value_name = "ID")]
    client_id: Option<String>,

    /// Client secret of the registered application. Without it, a browser
    /// login is required on every run.
    #[arg(short = 's', long, value_name = "SECRET")]
    client_secret: Option<String>,

    /// Redirect URI of the registered application
    #[arg(short = 'r', long, value_name = "URI")]
    redirect_uri: Option<String>,

    /// File where the OAuth token is stored when a client secret is
    /// provided. Relative paths are resolved under the user cache
    /// directory. Always store this file in a secure location!
    #[arg(short = 't', long, value_name = "FILE")]
    token_file: Option<PathBuf>,
}

/// Settings after merging CLI options, the configuration file and defaults
struct Settings {
    output_dir: PathBuf,
    pattern: String,
    concurrency: Option<usize>,
    prune: bool,
    verify: bool,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    token_file: Option<PathBuf>,
}

fn resolve_settings(args: &Cli, file: FileConfig) -> Settings {
    Settings {
        output_dir: args
            .output_dir
            .clone()
            .or(file.backup.output_dir)
            .unwrap_or_else(|| PathBuf::from(config::DEFAULT_OUTPUT_DIR)),
        pattern: args
            .pattern
            .clone()
            .or(file.backup.pattern)
            .unwrap_or_else(|| config::DEFAULT_PATTERN.to_string()),
        concurrency: args.concurrency.or(file.backup.concurrency),
        prune: args.prune || file.backup.prune.unwrap_or(false),
        verify: args.verify || file.backup.verify.unwrap_or(false),
        client_id: args
            .client_id
            .clone()
            .or(file.login.client_id)
            .unwrap_or_else(|| config::DEFAULT_CLIENT_ID.to_string()),
        client_secret: args.client_secret.clone().or(file.login.client_secret),
        redirect_uri: args
            .redirect_uri
            .clone()
            .or(file.login.redirect_uri)
            .unwrap_or_else(|| config::DEFAULT_REDIRECT_URI.to_string()),
        token_file: config::resolve_token_file(args.token_file.clone().or(file.login.token_file)),
    }
}

fn load_config(args: &Cli) -> Result<FileConfig, ConfigError> {
    match &args.config_file {
        Some(path) => FileConfig::load(path),
        None => match config::default_config_file() {
            Some(path) if path.exists() => FileConfig::load(&path),
            _ => Ok(FileConfig::default()),
        },
    }
}

/// Log in with the configured method and build the API client
async fn login(settings: &Settings) -> Result<MendeleyClient, Box<dyn std::error::Error>> {
    let Some(client_secret) = &settings.client_secret else {
        let token = implicit_flow(&settings.client_id, &settings.redirect_uri).await?;
        return Ok(MendeleyClient::new(token));
    };

    let saved = match &settings.token_file {
        Some(path) => OAuthToken::load(path)?,
        None => None,
    };
    let had_saved = saved.is_some();
    let token = authorization_code_flow(
        &settings.client_id,
        client_secret,
        &settings.redirect_uri,
        saved,
    )
    .await?;
    if !had_saved {
        if let Some(path) = &settings.token_file {
            token.save(path)?;
        }
    }

    let mut client =
        MendeleyClient::new(token).with_credentials(&settings.client_id, client_secret);
    if let Some(path) = &settings.token_file {
        client = client.with_token_file(path);
    }
    Ok(client)
}

async fn run(args: Cli) -> Result<SyncReport, Box<dyn std::error::Error>> {
    let settings = resolve_settings(&args, load_config(&args)?);

    let client = login(&settings).await?;
    let session = session::MendeleySession::new(client);

    let mut options = SyncOptions::new(&settings.output_dir, &settings.pattern);
    if let Some(concurrency) = settings.concurrency {
        options.concurrency = concurrency;
    }
    options.prune = settings.prune;
    options.verify = settings.verify;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; letting in-flight documents finish");
                cancel.cancel();
            }
        });
    }
    if let Some(secs) = args.timeout_secs {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!("timeout reached; cancelling the run");
            cancel.cancel();
        });
    }

    let report = SyncEngine::new(options).run(&session, cancel).await?;
    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Cli::parse();
    let strict = args.strict;
    match run(args).await {
        Ok(report) => {
            println!("{}", report.format_summary());
            if strict && report.has_failures() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("imstash: {}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("imstash").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults_without_config() {
        let settings = resolve_settings(&cli(&[]), FileConfig::default());
        assert_eq!(settings.output_dir, PathBuf::from("backup"));
        assert_eq!(settings.pattern, "%author/%year - %title");
        assert_eq!(settings.client_id, config::DEFAULT_CLIENT_ID);
        assert!(settings.client_secret.is_none());
        assert!(!settings.prune);
    }

    #[test]
    fn test_cli_wins_over_config_file() {
        let file: FileConfig = toml::from_str(
            r#"
            [backup]
            output-dir = "/from/file"
            pattern = "%title"
            "#,
        )
        .unwrap();
        let settings = resolve_settings(&cli(&["-o", "/from/cli"]), file);
        assert_eq!(settings.output_dir, PathBuf::from("/from/cli"));
        // Unset CLI options still come from the file.
        assert_eq!(settings.pattern, "%title");
    }

    #[test]
    fn test_boolean_options_combine() {
        let file: FileConfig = toml::from_str("[backup]\nprune = true").unwrap();
        let settings = resolve_settings(&cli(&["--verify"]), file);
        assert!(settings.prune);
        assert!(settings.verify);
    }
}
