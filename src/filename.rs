//! Maps source keys onto scratch filenames inside the download directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

const MAX_STEM_CHARS: usize = 80;
const VIDEO_EXTENSION: &str = "mp4";
const FALLBACK_STEM: &str = "video";
const HASH_SUFFIX_CHARS: usize = 8;

/// Hands out download paths that never clash with a file already on disk or
/// with a path this allocator issued earlier in the run.
///
/// The result only depends on the source key, the files present in the
/// directory and what was issued before, so reruns over the same directory
/// pick the same names.
#[derive(Debug)]
pub struct FilenameAllocator {
    dir: PathBuf,
    issued: HashSet<PathBuf>,
}

impl FilenameAllocator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            issued: HashSet::new(),
        }
    }

    pub fn allocate(&mut self, source_key: &str) -> PathBuf {
        let stem = sanitize_stem(source_key);
        let mut candidate = self.path_for(&stem);

        if self.is_taken(&candidate) {
            let hashed = format!("{stem}_{}", short_hash(source_key));
            candidate = self.path_for(&hashed);
            let mut counter = 1u32;
            while self.is_taken(&candidate) {
                candidate = self.path_for(&format!("{hashed}_{counter}"));
                counter += 1;
            }
        }

        self.issued.insert(candidate.clone());
        candidate
    }

    fn path_for(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.{VIDEO_EXTENSION}"))
    }

    fn is_taken(&self, path: &Path) -> bool {
        self.issued.contains(path) || path.exists()
    }
}

/// Reduces a source key to `[A-Za-z0-9_-]`, collapsing everything else into
/// single underscores.
pub fn sanitize_stem(source_key: &str) -> String {
    let mut stem = String::with_capacity(source_key.len().min(MAX_STEM_CHARS));
    for ch in source_key.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' {
            stem.push(ch);
        } else if !stem.ends_with('_') {
            stem.push('_');
        }
    }

    let trimmed: String = stem.trim_matches('_').chars().take(MAX_STEM_CHARS).collect();
    let trimmed = trimmed.trim_end_matches('_');
    if trimmed.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        trimmed.to_string()
    }
}

fn short_hash(source_key: &str) -> String {
    let hex = blake3::hash(source_key.as_bytes()).to_hex();
    hex.as_str()[..HASH_SUFFIX_CHARS].to_string()
}
