#![forbid(unsafe_code)]

//! Shared pieces of the reel mirroring tools.
//!
//! The `mirror_batch` binary wires these together into one bounded pass over
//! an exported post list; `upload_video` reuses the upload half for a single
//! file.

pub mod auth;
pub mod config;
pub mod error;
pub mod error_log;
pub mod fetch;
pub mod filename;
pub mod history;
pub mod logging;
pub mod metadata;
pub mod orchestrator;
pub mod source;
pub mod upload;
pub mod youtube;

#[cfg(test)]
mod test_support;
