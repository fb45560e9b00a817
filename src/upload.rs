//! Upload client: turns an [`UploadRequest`] into a destination video id.
//!
//! The transfer itself is delegated to an [`UploadSession`], which hands back
//! a [`ChunkedUpload`] that is pumped until the destination answers with the
//! final resource. Keeping the session behind a trait lets the batch run
//! against a fake in tests and against [`crate::youtube::YoutubeSession`] for
//! real.

use std::path::{Path, PathBuf};

use log::error;
use serde::Serialize;

use crate::error::UploadError;
use crate::metadata::{DerivedMetadata, PrivacyStatus};

/// Everything needed to upload one file. Built once per item and handed over
/// by value.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub file: PathBuf,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub privacy: PrivacyStatus,
    pub category_id: String,
}

impl UploadRequest {
    pub fn from_metadata(
        file: PathBuf,
        metadata: DerivedMetadata,
        privacy: PrivacyStatus,
        category_id: impl Into<String>,
    ) -> Self {
        Self {
            file,
            title: metadata.title,
            description: metadata.description,
            tags: metadata.tags,
            privacy,
            category_id: category_id.into(),
        }
    }
}

/// JSON body of a `videos.insert` call. Optional snippet fields are left out
/// entirely when they have no value.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VideoResource {
    pub snippet: Snippet,
    pub status: VideoStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatus {
    pub privacy_status: PrivacyStatus,
}

impl VideoResource {
    pub fn from_request(request: &UploadRequest) -> Self {
        let non_empty = |value: &str| (!value.is_empty()).then(|| value.to_string());
        Self {
            snippet: Snippet {
                title: request.title.clone(),
                description: non_empty(&request.description),
                tags: (!request.tags.is_empty()).then(|| request.tags.clone()),
                category_id: non_empty(&request.category_id),
            },
            status: VideoStatus {
                privacy_status: request.privacy,
            },
        }
    }
}

/// Outcome of pushing one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkStatus {
    /// Fraction of the file the destination has acknowledged so far.
    Progress(f64),
    /// The upload finished; carries the destination video id.
    Complete(String),
}

/// An upload in flight.
pub trait ChunkedUpload {
    fn next_chunk(&mut self) -> Result<ChunkStatus, UploadError>;
}

/// Authenticated connection to the destination.
pub trait UploadSession {
    fn insert(
        &mut self,
        resource: &VideoResource,
        file: &Path,
    ) -> Result<Box<dyn ChunkedUpload>, UploadError>;
}

/// What the batch needs from an uploader.
pub trait Uploader {
    /// Uploads the file, calling `on_progress` with a percentage after every
    /// acknowledged chunk, and returns the destination id.
    fn upload(
        &mut self,
        request: UploadRequest,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<String, UploadError>;
}

pub struct UploadClient<S> {
    session: S,
}

impl<S: UploadSession> UploadClient<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }

    fn transfer(
        &mut self,
        request: &UploadRequest,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<String, UploadError> {
        let resource = VideoResource::from_request(request);
        let mut upload = self.session.insert(&resource, &request.file)?;
        loop {
            match upload.next_chunk()? {
                ChunkStatus::Progress(fraction) => on_progress(to_percent(fraction)),
                ChunkStatus::Complete(video_id) => return Ok(video_id),
            }
        }
    }
}

impl<S: UploadSession> Uploader for UploadClient<S> {
    fn upload(
        &mut self,
        request: UploadRequest,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<String, UploadError> {
        let result = self.transfer(&request, on_progress);
        if let Err(err) = &result {
            error!("upload of {} failed: {err}", request.file.display());
        }
        result
    }
}

fn to_percent(fraction: f64) -> u8 {
    (fraction.clamp(0.0, 1.0) * 100.0) as u8
}
