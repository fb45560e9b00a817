use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::metadata::{DEFAULT_CATEGORY_ID, PrivacyStatus};

pub const DEFAULT_CONFIG_PATH: &str = "mirror.toml";
pub const DEFAULT_SOURCE_LIST: &str = "reelsData.json";
pub const DEFAULT_HISTORY_FILE: &str = "upload_history.json";
pub const DEFAULT_ERROR_LOG: &str = "upload_errors.log";
pub const DEFAULT_CLIENT_SECRETS: &str = "client_secrets.json";
pub const DEFAULT_TOKEN_FILE: &str = "token.json";
pub const DEFAULT_TEMP_DIR: &str = "downloads";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_CHUNK_SIZE_MB: usize = 8;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_SHORT_THRESHOLD_SECS: f64 = 60.0;

/// Raw contents of the optional TOML file. Every key may be left out.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub source_list: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    pub error_log: Option<PathBuf>,
    pub client_secrets: Option<PathBuf>,
    pub token_file: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub max_attempts: Option<usize>,
    pub privacy_status: Option<PrivacyStatus>,
    pub category_id: Option<String>,
    pub chunk_size_mb: Option<usize>,
    pub connect_timeout_secs: Option<u64>,
    pub short_threshold_secs: Option<f64>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub source_list: PathBuf,
    pub history_file: PathBuf,
    pub error_log: PathBuf,
    pub client_secrets: PathBuf,
    pub token_file: PathBuf,
    pub temp_dir: PathBuf,
    pub batch_size: usize,
    pub max_attempts: Option<usize>,
    pub privacy_status: PrivacyStatus,
    pub category_id: String,
    pub chunk_size_mb: usize,
    pub connect_timeout: Duration,
    pub short_threshold_secs: f64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        MirrorConfig::from_file_config(FileConfig::default())
    }
}

impl MirrorConfig {
    pub fn from_file_config(cfg: FileConfig) -> Self {
        Self {
            source_list: cfg
                .source_list
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_LIST)),
            history_file: cfg
                .history_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_FILE)),
            error_log: cfg
                .error_log
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ERROR_LOG)),
            client_secrets: cfg
                .client_secrets
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIENT_SECRETS)),
            token_file: cfg
                .token_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE)),
            temp_dir: cfg
                .temp_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMP_DIR)),
            batch_size: cfg.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            max_attempts: cfg.max_attempts,
            privacy_status: cfg.privacy_status.unwrap_or_default(),
            category_id: cfg
                .category_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CATEGORY_ID.to_string()),
            chunk_size_mb: cfg.chunk_size_mb.unwrap_or(DEFAULT_CHUNK_SIZE_MB),
            connect_timeout: Duration::from_secs(
                cfg.connect_timeout_secs
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
            short_threshold_secs: cfg
                .short_threshold_secs
                .unwrap_or(DEFAULT_SHORT_THRESHOLD_SECS),
        }
    }

    /// Rejects values that would make the batch do nothing or misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.max_attempts == Some(0) {
            bail!("max_attempts must be at least 1 when set");
        }
        if self.chunk_size_mb == 0 {
            bail!("chunk_size_mb must be at least 1");
        }
        if self.connect_timeout.is_zero() {
            bail!("connect_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_size_mb * 1024 * 1024
    }
}

pub fn read_file_config(path: &Path) -> Result<Option<FileConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let cfg: FileConfig =
        toml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))?;
    Ok(Some(cfg))
}

/// Loads settings from `path`, falling back to defaults when the file is
/// absent. An explicitly requested file that does not exist is an error.
pub fn load_config_from(path: impl AsRef<Path>, required: bool) -> Result<MirrorConfig> {
    let path = path.as_ref();
    let cfg = match read_file_config(path)? {
        Some(cfg) => cfg,
        None if required => bail!("Missing config file at {}", path.display()),
        None => FileConfig::default(),
    };
    Ok(MirrorConfig::from_file_config(cfg))
}
