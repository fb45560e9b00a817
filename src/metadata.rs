//! Upload metadata derived from a source caption.
//!
//! Captions on the source platform are free text sprinkled with hashtags. The
//! destination wants a short title, a long description and a bounded tag list,
//! so this module turns one into the other. Everything here is pure and total:
//! any caption, including the empty string, produces usable metadata.

use std::fmt;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Longest title the destination accepts, counted in characters.
pub const MAX_TITLE_CHARS: usize = 100;
/// Upper bound on the number of tags sent with a video.
pub const MAX_TAGS: usize = 30;
/// Used whenever the caption has nothing left after trimming.
pub const FALLBACK_TITLE: &str = "Untitled video";
/// "People & Blogs", the destination's default category.
pub const DEFAULT_CATEGORY_ID: &str = "22";

static HASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(\w+)").expect("hashtag pattern is valid"));

/// Visibility of the uploaded video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    Public,
    #[default]
    Private,
    Unlisted,
}

impl PrivacyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PrivacyStatus::Public => "public",
            PrivacyStatus::Private => "private",
            PrivacyStatus::Unlisted => "unlisted",
        }
    }
}

impl fmt::Display for PrivacyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Title, description and tags computed from one caption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Turns a caption into upload metadata.
///
/// * `tags` are the hashtag words (without `#`) in first-seen order, without
///   duplicates, at most [`MAX_TAGS`] of them.
/// * `title` is the trimmed caption cut to [`MAX_TITLE_CHARS`] characters, or
///   [`FALLBACK_TITLE`] when nothing remains.
/// * `description` is the caption as-is.
pub fn derive(caption: &str) -> DerivedMetadata {
    DerivedMetadata {
        title: derive_title(caption),
        description: caption.to_string(),
        tags: extract_hashtags(caption),
    }
}

fn derive_title(caption: &str) -> String {
    let title: String = caption.trim().chars().take(MAX_TITLE_CHARS).collect();
    if title.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        title
    }
}

/// Collects unique hashtag words, keeping the order they first appear in.
pub fn extract_hashtags(caption: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for capture in HASHTAG.captures_iter(caption) {
        if tags.len() == MAX_TAGS {
            break;
        }
        let word = &capture[1];
        if !tags.iter().any(|existing| existing == word) {
            tags.push(word.to_string());
        }
    }
    tags
}
