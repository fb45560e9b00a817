//! Append-only failure log.
//!
//! One line per failed item: `<timestamp>\t<source key>\t<message>`. Nothing
//! in the pipeline reads it back; it exists for whoever runs the batch.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use log::warn;

#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    file: File,
}

impl ErrorLog {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record. A failing write is reported on the console and
    /// otherwise ignored so the batch keeps going.
    pub fn record(&mut self, source_key: &str, message: &str) {
        let line = format_line(
            &Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            source_key,
            message,
        );
        match self
            .file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
        {
            Ok(()) => {}
            Err(err) => warn!(
                "could not append to error log {}: {err}",
                self.path.display()
            ),
        }
    }
}

fn format_line(timestamp: &str, source_key: &str, message: &str) -> String {
    // Keep one record per line whatever the message contains.
    let flatten = |text: &str| text.replace(['\r', '\n', '\t'], " ");
    format!(
        "{timestamp}\t{}\t{}\n",
        flatten(source_key),
        flatten(message)
    )
}
