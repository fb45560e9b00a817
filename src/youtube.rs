//! YouTube Data API v3 resumable uploads over `ureq`.
//!
//! The protocol takes two kinds of round-trip:
//!
//! 1. `POST` the video resource with `uploadType=resumable`; the `Location`
//!    header of the answer is the session URI.
//! 2. `PUT` the file in chunks with a `Content-Range` header. While bytes are
//!    missing the API answers `308` with a `Range` header describing what it
//!    holds; the last chunk gets `200`/`201` and the video resource.
//!
//! No read timeout is configured: a chunk blocks until the API answers.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::debug;
use serde_json::Value;

use crate::auth::AccessTokenSource;
use crate::error::UploadError;
use crate::upload::{ChunkStatus, ChunkedUpload, UploadSession, VideoResource};

pub const UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
/// Chunk sizes must be a multiple of this, except for the final chunk.
pub const CHUNK_ALIGNMENT: usize = 256 * 1024;
pub const DEFAULT_CHUNK_BYTES: usize = 32 * CHUNK_ALIGNMENT;
/// Consecutive `308` answers without new bytes acknowledged before giving up.
const MAX_STALLED_CHUNKS: u32 = 5;

pub struct YoutubeSession<T> {
    agent: ureq::Agent,
    tokens: T,
    endpoint: String,
    chunk_bytes: usize,
}

impl<T: AccessTokenSource> YoutubeSession<T> {
    pub fn new(tokens: T) -> Self {
        // Redirects stay off so `308 Resume Incomplete` reaches us untouched.
        let agent = ureq::AgentBuilder::new().redirects(0).build();
        Self {
            agent,
            tokens,
            endpoint: UPLOAD_ENDPOINT.to_string(),
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Rounds `bytes` down to the protocol's alignment, never below one unit.
    pub fn with_chunk_bytes(mut self, bytes: usize) -> Self {
        self.chunk_bytes = (bytes / CHUNK_ALIGNMENT).max(1) * CHUNK_ALIGNMENT;
        self
    }
}

impl<T: AccessTokenSource> UploadSession for YoutubeSession<T> {
    fn insert(
        &mut self,
        resource: &VideoResource,
        file: &Path,
    ) -> Result<Box<dyn ChunkedUpload>, UploadError> {
        let io_err = |source: io::Error| UploadError::Io {
            path: file.to_path_buf(),
            source,
        };
        let total = fs::metadata(file).map_err(io_err)?.len();
        let handle = File::open(file).map_err(io_err)?;
        let token = self.tokens.access_token()?;

        let url = format!("{}?uploadType=resumable&part=snippet,status", self.endpoint);
        let response = self
            .agent
            .post(&url)
            .set("Authorization", &format!("Bearer {token}"))
            .set("X-Upload-Content-Length", &total.to_string())
            .set("X-Upload-Content-Type", "video/*")
            .send_json(resource)
            .map_err(api_error)?;

        let session_uri = response
            .header("Location")
            .map(str::to_string)
            .ok_or_else(|| UploadError::Protocol("no Location header on upload session".into()))?;
        debug!("opened upload session for {} ({total} bytes)", file.display());

        Ok(Box::new(ResumableUpload {
            agent: self.agent.clone(),
            token,
            session_uri,
            path: file.to_path_buf(),
            file: handle,
            total,
            offset: 0,
            chunk_bytes: self.chunk_bytes,
            stalled: 0,
        }))
    }
}

struct ResumableUpload {
    agent: ureq::Agent,
    token: String,
    session_uri: String,
    path: PathBuf,
    file: File,
    total: u64,
    offset: u64,
    chunk_bytes: usize,
    stalled: u32,
}

impl ResumableUpload {
    fn read_chunk(&mut self) -> io::Result<Vec<u8>> {
        let len = (self.total - self.offset).min(self.chunk_bytes as u64) as usize;
        let mut chunk = vec![0u8; len];
        self.file.seek(SeekFrom::Start(self.offset))?;
        self.file.read_exact(&mut chunk)?;
        Ok(chunk)
    }
}

impl ChunkedUpload for ResumableUpload {
    fn next_chunk(&mut self) -> Result<ChunkStatus, UploadError> {
        let chunk = self.read_chunk().map_err(|source| UploadError::Io {
            path: self.path.clone(),
            source,
        })?;
        let content_range = if chunk.is_empty() {
            format!("bytes */{}", self.total)
        } else {
            format!(
                "bytes {}-{}/{}",
                self.offset,
                self.offset + chunk.len() as u64 - 1,
                self.total
            )
        };

        let response = self
            .agent
            .put(&self.session_uri)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Content-Range", &content_range)
            .send_bytes(&chunk)
            .map_err(api_error)?;

        match response.status() {
            200 | 201 => {
                let body: Value = response
                    .into_json()
                    .map_err(|err| UploadError::Protocol(format!("unreadable video resource: {err}")))?;
                body.get("id")
                    .and_then(Value::as_str)
                    .map(|id| ChunkStatus::Complete(id.to_string()))
                    .ok_or_else(|| UploadError::Protocol("video resource has no id".into()))
            }
            308 => {
                let acknowledged = response.header("Range").and_then(parse_range_end);
                let next_offset = acknowledged.map(|end| end + 1).unwrap_or(0);
                if next_offset <= self.offset {
                    self.stalled += 1;
                    if self.stalled >= MAX_STALLED_CHUNKS {
                        return Err(UploadError::Protocol(format!(
                            "upload stalled at byte {}",
                            self.offset
                        )));
                    }
                } else {
                    self.stalled = 0;
                }
                self.offset = next_offset.min(self.total);
                let fraction = if self.total == 0 {
                    0.0
                } else {
                    self.offset as f64 / self.total as f64
                };
                Ok(ChunkStatus::Progress(fraction))
            }
            status => Err(UploadError::Api {
                status,
                body: response.into_string().unwrap_or_default(),
            }),
        }
    }
}

/// `bytes=0-524287` → `524287`.
fn parse_range_end(header: &str) -> Option<u64> {
    header
        .trim()
        .strip_prefix("bytes=")?
        .split_once('-')?
        .1
        .trim()
        .parse()
        .ok()
}

fn api_error(err: ureq::Error) -> UploadError {
    match err {
        ureq::Error::Status(status, response) => UploadError::Api {
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => UploadError::Transport(transport.to_string()),
    }
}
