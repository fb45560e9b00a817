#![forbid(unsafe_code)]

//! Mirrors exported reels onto YouTube, a bounded batch at a time.
//!
//! Every run reads the export, skips whatever the history already lists,
//! and downloads/uploads the rest until the batch size is reached. Failures
//! land in the error log and are retried by the next run.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use reelmirror_tools::{
    auth::{AccessTokenSource, Authenticator, ClientSecrets},
    config::{self, MirrorConfig},
    error::ConfigError,
    error_log::ErrorLog,
    fetch::{FfprobeProbe, HttpFetcher},
    history::HistoryStore,
    logging,
    metadata::PrivacyStatus,
    orchestrator::{BatchReport, BatchSettings, ItemState, Orchestrator, count_unrecorded},
    source,
    upload::UploadClient,
    youtube::YoutubeSession,
};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about = "Mirror exported reels onto YouTube.")]
struct Cli {
    #[arg(
        long = "config",
        value_name = "PATH",
        help = "TOML settings file (default mirror.toml when present)"
    )]
    config: Option<PathBuf>,
    #[arg(long = "source", value_name = "PATH", help = "Exported post list")]
    source: Option<PathBuf>,
    #[arg(long = "history", value_name = "PATH", help = "Upload history file")]
    history: Option<PathBuf>,
    #[arg(long = "error-log", value_name = "PATH", help = "Append-only failure log")]
    error_log: Option<PathBuf>,
    #[arg(
        long = "client-secrets",
        value_name = "PATH",
        help = "OAuth client secrets downloaded from the API console"
    )]
    client_secrets: Option<PathBuf>,
    #[arg(long = "token", value_name = "PATH", help = "Cached OAuth token")]
    token: Option<PathBuf>,
    #[arg(long = "temp-dir", value_name = "PATH", help = "Scratch directory for downloads")]
    temp_dir: Option<PathBuf>,
    #[arg(long = "batch-size", value_name = "N", help = "Uploads to commit per run")]
    batch_size: Option<usize>,
    #[arg(long = "max-attempts", value_name = "N", help = "Items to try per run")]
    max_attempts: Option<usize>,
    #[arg(long = "privacy", value_enum, help = "Visibility of uploaded videos")]
    privacy: Option<PrivacyStatus>,
    #[arg(long = "category-id", value_name = "ID", help = "Destination category id")]
    category_id: Option<String>,
    #[arg(short = 'v', long = "verbose", help = "Log debug output")]
    verbose: bool,
}

impl Cli {
    fn resolve_config(&self) -> Result<MirrorConfig> {
        let mut config = match &self.config {
            Some(path) => config::load_config_from(path, true)?,
            None => config::load_config_from(config::DEFAULT_CONFIG_PATH, false)?,
        };

        if let Some(path) = &self.source {
            config.source_list = path.clone();
        }
        if let Some(path) = &self.history {
            config.history_file = path.clone();
        }
        if let Some(path) = &self.error_log {
            config.error_log = path.clone();
        }
        if let Some(path) = &self.client_secrets {
            config.client_secrets = path.clone();
        }
        if let Some(path) = &self.token {
            config.token_file = path.clone();
        }
        if let Some(path) = &self.temp_dir {
            config.temp_dir = path.clone();
        }
        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        if self.max_attempts.is_some() {
            config.max_attempts = self.max_attempts;
        }
        if let Some(privacy) = self.privacy {
            config.privacy_status = privacy;
        }
        if let Some(category) = &self.category_id {
            config.category_id = category.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let config = cli.resolve_config()?;

    ensure_input(&config.source_list, "source list")?;
    ensure_input(&config.client_secrets, "client secrets")?;

    let entries = source::load_source_list(&config.source_list)?;
    let history = HistoryStore::load(&config.history_file)?;
    let error_log = ErrorLog::open(&config.error_log)
        .with_context(|| format!("opening error log {}", config.error_log.display()))?;

    println!("===================================");
    println!("Reel Mirror");
    println!("===================================");
    println!("Source: {} ({} entries)", config.source_list.display(), entries.len());
    println!(
        "History: {} ({} uploaded)",
        config.history_file.display(),
        history.len()
    );
    let outstanding = count_unrecorded(&entries, &history);
    println!("Not yet uploaded: {outstanding}");
    println!("Batch size: {}", config.batch_size);
    println!();

    let secrets = ClientSecrets::load(&config.client_secrets)?;
    let mut authenticator = Authenticator::new(secrets, &config.token_file);
    authorize_if_needed(&mut authenticator, outstanding)?;

    let session =
        YoutubeSession::new(authenticator).with_chunk_bytes(config.chunk_size_bytes());
    let mut orchestrator = Orchestrator::new(
        BatchSettings::from(&config),
        history,
        error_log,
        HttpFetcher::new(config.connect_timeout),
        FfprobeProbe::default(),
        UploadClient::new(session),
    );

    let report = orchestrator.run(&entries)?;
    print_summary(&report, orchestrator.error_log().path());
    Ok(())
}

fn ensure_input(path: &Path, what: &'static str) -> Result<(), ConfigError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigError::MissingFile {
            what,
            path: path.to_path_buf(),
        })
    }
}

/// Gets a token up front so consent happens before the first download, but
/// only when something is left to upload.
fn authorize_if_needed(tokens: &mut impl AccessTokenSource, outstanding: usize) -> Result<()> {
    if outstanding == 0 {
        info!("everything is already uploaded, skipping authorization");
        return Ok(());
    }
    tokens
        .access_token()
        .context("authorizing against the upload API")?;
    info!("authorized for uploads");
    Ok(())
}

fn print_summary(report: &BatchReport, error_log: &Path) {
    let failed = report.count(ItemState::FetchFailed) + report.count(ItemState::UploadFailed);

    println!();
    println!("===================================");
    println!("Batch complete!");
    println!("===================================");
    println!("Committed: {}", report.committed());
    println!("Skipped (already uploaded): {}", report.count(ItemState::Skipped));
    println!("Download failures: {}", report.count(ItemState::FetchFailed));
    println!("Upload failures: {}", report.count(ItemState::UploadFailed));
    println!("Left for next run: {}", report.pending);
    if failed > 0 {
        println!("Failure details: {}", error_log.display());
    }
}
