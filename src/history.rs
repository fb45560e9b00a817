//! Durable record of which source items already made it to the destination.
//!
//! The file is a single JSON object keyed by source key. An entry is written
//! only after the destination confirmed an upload, so the mere presence of a
//! key is what makes reruns skip an item. Entries left behind by older tools
//! may carry other fields; they are kept byte-for-byte equivalent on rewrite.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde_json::{Map, Value, json};
use tempfile::NamedTempFile;

use crate::error::{ConfigError, HistoryError};

#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl HistoryStore {
    /// Reads the history at `path`. A missing file is an empty history; a file
    /// that exists but is not a JSON object is refused so it never gets
    /// clobbered by the next write.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let invalid = |reason: String| ConfigError::InvalidHistory {
            path: path.clone(),
            reason,
        };

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("no history at {}, starting fresh", path.display());
                return Ok(Self {
                    path,
                    entries: Map::new(),
                });
            }
            Err(err) => return Err(invalid(err.to_string())),
        };

        if content.trim().is_empty() {
            return Ok(Self {
                path,
                entries: Map::new(),
            });
        }

        let entries = match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(entries)) => entries,
            Ok(_) => return Err(invalid("top-level value is not an object".to_string())),
            Err(err) => return Err(invalid(err.to_string())),
        };

        Ok(Self { path, entries })
    }

    pub fn contains(&self, source_key: &str) -> bool {
        self.entries.contains_key(source_key)
    }

    pub fn destination_id(&self, source_key: &str) -> Option<&str> {
        self.entries
            .get(source_key)?
            .get("destination_id")?
            .as_str()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds `source_key → destination_id` and rewrites the whole file before
    /// returning. If the write fails the entry is dropped again, keeping memory
    /// and disk in agreement.
    pub fn record(&mut self, source_key: &str, destination_id: &str) -> Result<(), HistoryError> {
        if self.contains(source_key) {
            return Err(HistoryError::AlreadyRecorded {
                key: source_key.to_string(),
            });
        }

        self.entries.insert(
            source_key.to_string(),
            json!({ "destination_id": destination_id }),
        );

        if let Err(err) = self.persist() {
            self.entries.remove(source_key);
            return Err(err);
        }
        Ok(())
    }

    /// Writes to a sibling temp file, syncs it and renames it over the
    /// history so readers never observe a half-written file.
    fn persist(&self) -> Result<(), HistoryError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let persist_err = |source: io::Error| HistoryError::Persist {
            path: self.path.clone(),
            source,
        };

        fs::create_dir_all(dir).map_err(persist_err)?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(persist_err)?;
        serde_json::to_writer_pretty(&mut tmp, &self.entries)?;
        tmp.write_all(b"\n").map_err(persist_err)?;
        tmp.as_file().sync_all().map_err(persist_err)?;
        tmp.persist(&self.path)
            .map_err(|err| persist_err(err.error))?;
        Ok(())
    }
}
