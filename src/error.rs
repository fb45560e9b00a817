#![forbid(unsafe_code)]

//! Closed error taxonomy for the mirror pipeline.
//!
//! Only [`ConfigError`] is allowed to stop a run. Everything else is raised
//! for a single source item and folded into [`ItemError`] so the orchestrator
//! can decide what to log and where the item ends up.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Problems detected before the batch loop starts. Fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{what} not found at {}", path.display())]
    MissingFile { what: &'static str, path: PathBuf },

    #[error("source list {} is unusable: {reason}", path.display())]
    InvalidSourceList { path: PathBuf, reason: String },

    #[error("history file {} is unusable: {reason}", path.display())]
    InvalidHistory { path: PathBuf, reason: String },

    #[error("client secrets {} are unusable: {reason}", path.display())]
    InvalidSecrets { path: PathBuf, reason: String },

    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },
}

/// A source entry that does not have the shape we need.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("entry is not a JSON object")]
    NotAnObject,

    #[error("missing media_details[0].url")]
    MissingMediaUrl,

    #[error("post_info.caption is not a string")]
    InvalidCaption,
}

/// Failure while pulling the source video down to local disk.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} timed out")]
    Timeout { url: String },

    #[error("GET {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure reported by the upload API or the transport underneath it.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("upload transport failed: {0}")]
    Transport(String),

    #[error("unexpected upload response: {0}")]
    Protocol(String),

    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("authorization failed: {0}")]
    Auth(String),
}

/// Failure to update the durable history.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("{key} is already recorded in history")]
    AlreadyRecorded { key: String },

    #[error("persisting history to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("serializing history: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A temporary file that could not be removed. Never blocks progress.
#[derive(Debug, Error)]
#[error("could not remove {}: {source}", path.display())]
pub struct CleanupWarning {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Everything that can go wrong for one item inside the batch loop.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("uploaded as {destination_id} but history was not updated: {source}")]
    History {
        destination_id: String,
        #[source]
        source: HistoryError,
    },
}
