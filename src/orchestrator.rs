//! The batch loop: one pass over the source list, one item at a time.
//!
//! For every entry the orchestrator decides between skipping (already in
//! history), failing (bad entry, download error, upload error) and committing
//! (uploaded and recorded). A failure only ever ends its own item; the loop
//! stops early solely because of the per-run bounds checked between items.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::MirrorConfig;
use crate::error::{CleanupWarning, ConfigError, ItemError};
use crate::error_log::ErrorLog;
use crate::fetch::{ClipDuration, DurationProbe, VideoFetcher};
use crate::filename::FilenameAllocator;
use crate::history::HistoryStore;
use crate::metadata::{self, PrivacyStatus};
use crate::source::SourceEntry;
use crate::upload::{UploadRequest, Uploader};

/// Per-run knobs handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Stop once this many items were committed in this run.
    pub batch_size: usize,
    /// Stop once this many items were attempted (skips excluded).
    pub max_attempts: Option<usize>,
    pub temp_dir: PathBuf,
    pub privacy: PrivacyStatus,
    pub category_id: String,
    pub short_threshold_secs: f64,
}

impl From<&MirrorConfig> for BatchSettings {
    fn from(config: &MirrorConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_attempts: config.max_attempts,
            temp_dir: config.temp_dir.clone(),
            privacy: config.privacy_status,
            category_id: config.category_id.clone(),
            short_threshold_secs: config.short_threshold_secs,
        }
    }
}

/// Where an item ended up after this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Skipped,
    FetchFailed,
    UploadFailed,
    Committed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    pub key: String,
    pub state: ItemState,
    pub destination_id: Option<String>,
    pub message: Option<String>,
}

/// Outcome of one run. Items that were never reached are only counted.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub items: Vec<ItemReport>,
    /// Unreached entries that are not in history yet.
    pub pending: usize,
}

impl BatchReport {
    pub fn count(&self, state: ItemState) -> usize {
        if state == ItemState::Pending {
            return self.pending;
        }
        self.items.iter().filter(|item| item.state == state).count()
    }

    pub fn committed(&self) -> usize {
        self.count(ItemState::Committed)
    }
}

/// Number of `entries` whose key has no history record.
pub fn count_unrecorded(entries: &[SourceEntry], history: &HistoryStore) -> usize {
    entries
        .iter()
        .filter(|entry| !history.contains(&entry.key))
        .count()
}

pub struct Orchestrator<F, P, U> {
    settings: BatchSettings,
    history: HistoryStore,
    error_log: ErrorLog,
    allocator: FilenameAllocator,
    fetcher: F,
    probe: P,
    uploader: U,
}

impl<F, P, U> Orchestrator<F, P, U>
where
    F: VideoFetcher,
    P: DurationProbe,
    U: Uploader,
{
    pub fn new(
        settings: BatchSettings,
        history: HistoryStore,
        error_log: ErrorLog,
        fetcher: F,
        probe: P,
        uploader: U,
    ) -> Self {
        let allocator = FilenameAllocator::new(&settings.temp_dir);
        Self {
            settings,
            history,
            error_log,
            allocator,
            fetcher,
            probe,
            uploader,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }

    /// Walks `entries` in order until the list or one of the bounds runs out.
    pub fn run(&mut self, entries: &[SourceEntry]) -> Result<BatchReport, ConfigError> {
        fs::create_dir_all(&self.settings.temp_dir).map_err(|err| {
            ConfigError::InvalidSetting {
                key: "temp_dir",
                reason: format!("{}: {err}", self.settings.temp_dir.display()),
            }
        })?;

        let total = entries.len();
        let mut report = BatchReport::default();
        let mut committed = 0usize;
        let mut attempts = 0usize;

        for (index, entry) in entries.iter().enumerate() {
            if committed >= self.settings.batch_size {
                info!(
                    "batch size of {} reached, leaving the rest for the next run",
                    self.settings.batch_size
                );
                report.pending = count_unrecorded(&entries[index..], &self.history);
                break;
            }

            let position = index + 1;
            if self.history.contains(&entry.key) {
                debug!("[{position}/{total}] {} already uploaded", entry.key);
                report.items.push(ItemReport {
                    key: entry.key.clone(),
                    state: ItemState::Skipped,
                    destination_id: self.history.destination_id(&entry.key).map(str::to_string),
                    message: None,
                });
                continue;
            }

            if let Some(max_attempts) = self.settings.max_attempts
                && attempts >= max_attempts
            {
                info!("{max_attempts} attempts made, leaving the rest for the next run");
                report.pending = count_unrecorded(&entries[index..], &self.history);
                break;
            }
            attempts += 1;

            println!("[{position}/{total}] Mirroring {}", entry.key);
            let item_report = match self.mirror(entry) {
                Ok(destination_id) => {
                    committed += 1;
                    println!(
                        "  Committed as {destination_id} ({committed}/{})",
                        self.settings.batch_size
                    );
                    ItemReport {
                        key: entry.key.clone(),
                        state: ItemState::Committed,
                        destination_id: Some(destination_id),
                        message: None,
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    warn!("{}: {message}", entry.key);
                    self.error_log.record(&entry.key, &message);
                    let state = match err {
                        ItemError::Parse(_) | ItemError::Fetch(_) => ItemState::FetchFailed,
                        ItemError::Upload(_) | ItemError::History { .. } => ItemState::UploadFailed,
                    };
                    ItemReport {
                        key: entry.key.clone(),
                        state,
                        destination_id: None,
                        message: Some(message),
                    }
                }
            };
            report.items.push(item_report);
        }

        Ok(report)
    }

    /// Download, upload and record one entry. The scratch file is removed on
    /// every way out of this function.
    fn mirror(&mut self, entry: &SourceEntry) -> Result<String, ItemError> {
        let item = entry.item.as_ref().map_err(|err| err.clone())?;
        let metadata = metadata::derive(&item.caption);

        let scratch = ScratchFile::new(self.allocator.allocate(&entry.key));
        let bytes = self.fetcher.fetch(&item.media_url, scratch.path())?;
        debug!("downloaded {bytes} bytes to {}", scratch.path().display());

        let duration = self.probe.probe(scratch.path());
        match duration {
            ClipDuration::Seconds(secs) => println!("  Video duration: {secs:.2} seconds"),
            ClipDuration::Unknown => debug!("duration of {} is unknown", entry.key),
        }
        if duration.is_at_most(self.settings.short_threshold_secs) {
            warn!("{} will likely be published as a Short", entry.key);
        }

        let request = UploadRequest::from_metadata(
            scratch.path().to_path_buf(),
            metadata,
            self.settings.privacy,
            self.settings.category_id.clone(),
        );
        let destination_id = self
            .uploader
            .upload(request, &mut |percent| println!("  Upload progress: {percent}%"))?;

        self.history
            .record(&entry.key, &destination_id)
            .map_err(|source| ItemError::History {
                destination_id: destination_id.clone(),
                source,
            })?;

        Ok(destination_id)
    }
}

/// Owns a downloaded file for the duration of one item.
struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("removed {}", self.path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                let warning = CleanupWarning {
                    path: self.path.clone(),
                    source,
                };
                warn!("{warning}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, UploadError};
    use crate::source::parse_source_list;
    use serde_json::{Value, json};
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::rc::Rc;
    use tempfile::{TempDir, tempdir};

    #[derive(Clone, Default)]
    struct FakeFetcher {
        failing: HashSet<String>,
        /// URLs whose download lands as a non-empty directory, which
        /// `remove_file` cannot delete.
        undeletable: HashSet<String>,
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl VideoFetcher for FakeFetcher {
        fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
            self.calls.borrow_mut().push(url.to_string());
            if self.failing.contains(url) {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                });
            }
            if self.undeletable.contains(url) {
                fs::create_dir_all(dest.join("inner")).unwrap();
                return Ok(0);
            }
            fs::write(dest, b"video").unwrap();
            Ok(5)
        }
    }

    struct FixedProbe(ClipDuration);

    impl DurationProbe for FixedProbe {
        fn probe(&self, _path: &Path) -> ClipDuration {
            self.0
        }
    }

    #[derive(Clone)]
    struct Upload {
        request: UploadRequest,
        file_present: bool,
    }

    #[derive(Clone, Default)]
    struct FakeUploader {
        /// Title → result; titles not listed get `ID-<n>`.
        failing_titles: HashMap<String, u16>,
        ids: HashMap<String, String>,
        calls: Rc<RefCell<Vec<Upload>>>,
    }

    impl Uploader for FakeUploader {
        fn upload(
            &mut self,
            request: UploadRequest,
            on_progress: &mut dyn FnMut(u8),
        ) -> Result<String, UploadError> {
            let file_present = request.file.exists();
            let title = request.title.clone();
            self.calls.borrow_mut().push(Upload {
                request,
                file_present,
            });
            if let Some(status) = self.failing_titles.get(&title) {
                return Err(UploadError::Api {
                    status: *status,
                    body: "rejected".into(),
                });
            }
            on_progress(50);
            on_progress(100);
            let n = self.calls.borrow().len();
            Ok(self.ids.get(&title).cloned().unwrap_or(format!("ID-{n}")))
        }
    }

    struct Harness {
        dir: TempDir,
        fetcher: FakeFetcher,
        uploader: FakeUploader,
        batch_size: usize,
        max_attempts: Option<usize>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                dir: tempdir().unwrap(),
                fetcher: FakeFetcher::default(),
                uploader: FakeUploader::default(),
                batch_size: 10,
                max_attempts: None,
            }
        }

        fn history_path(&self) -> PathBuf {
            self.dir.path().join("upload_history.json")
        }

        fn error_log_path(&self) -> PathBuf {
            self.dir.path().join("upload_errors.log")
        }

        fn temp_dir(&self) -> PathBuf {
            self.dir.path().join("downloads")
        }

        fn orchestrator(&self) -> Orchestrator<FakeFetcher, FixedProbe, FakeUploader> {
            let settings = BatchSettings {
                batch_size: self.batch_size,
                max_attempts: self.max_attempts,
                temp_dir: self.temp_dir(),
                privacy: PrivacyStatus::Private,
                category_id: "22".into(),
                short_threshold_secs: 60.0,
            };
            Orchestrator::new(
                settings,
                HistoryStore::load(self.history_path()).unwrap(),
                ErrorLog::open(self.error_log_path()).unwrap(),
                self.fetcher.clone(),
                FixedProbe(ClipDuration::Seconds(12.0)),
                self.uploader.clone(),
            )
        }

        fn run(&self, source: Value) -> BatchReport {
            let entries = parse_source_list(&source.to_string()).unwrap();
            self.orchestrator().run(&entries).unwrap()
        }

        fn history(&self) -> Value {
            match fs::read_to_string(self.history_path()) {
                Ok(content) => serde_json::from_str(&content).unwrap(),
                Err(_) => json!({}),
            }
        }

        fn error_lines(&self) -> Vec<String> {
            fs::read_to_string(self.error_log_path())
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn temp_files(&self) -> usize {
            fs::read_dir(self.temp_dir()).map(|dir| dir.count()).unwrap_or(0)
        }
    }

    fn post(url: &str, caption: &str) -> Value {
        json!({ "media_details": [{ "url": url }], "post_info": { "caption": caption } })
    }

    #[test]
    fn successful_item_is_committed_and_cleaned_up() {
        let mut harness = Harness::new();
        harness.uploader.ids.insert("Hi #fun #fun".into(), "YT1".into());

        let report = harness.run(json!({ "u1": post("http://x/a.mp4", "Hi #fun #fun") }));

        assert_eq!(report.committed(), 1);
        assert_eq!(report.items[0].destination_id.as_deref(), Some("YT1"));
        assert_eq!(harness.history(), json!({ "u1": { "destination_id": "YT1" } }));

        let calls = harness.uploader.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].file_present);
        assert_eq!(calls[0].request.tags, vec!["fun".to_string()]);
        assert_eq!(calls[0].request.description, "Hi #fun #fun");
        assert_eq!(calls[0].request.privacy, PrivacyStatus::Private);
        assert!(!calls[0].request.file.exists());
        assert_eq!(harness.temp_files(), 0);
        assert!(harness.error_lines().is_empty());
    }

    #[test]
    fn fetch_failure_logs_and_skips_upload() {
        let mut harness = Harness::new();
        harness.fetcher.failing.insert("http://x/a.mp4".into());

        let report = harness.run(json!({ "u1": post("http://x/a.mp4", "Hi #fun") }));

        assert_eq!(report.items[0].state, ItemState::FetchFailed);
        assert_eq!(harness.history(), json!({}));
        assert!(harness.uploader.calls.borrow().is_empty());
        let lines = harness.error_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\tu1\t"));
        assert!(lines[0].contains("404"));
        assert_eq!(harness.temp_files(), 0);
    }

    #[test]
    fn batch_size_bounds_committed_items() {
        let mut harness = Harness::new();
        harness.batch_size = 2;

        let report = harness.run(json!({
            "u1": post("http://x/1.mp4", "one"),
            "u2": post("http://x/2.mp4", "two"),
            "u3": post("http://x/3.mp4", "three"),
        }));

        assert_eq!(report.committed(), 2);
        assert_eq!(report.count(ItemState::Pending), 1);
        assert_eq!(
            *harness.fetcher.calls.borrow(),
            vec!["http://x/1.mp4".to_string(), "http://x/2.mp4".to_string()]
        );
        let history = harness.history();
        assert!(history.get("u3").is_none());
        assert_eq!(history.as_object().unwrap().len(), 2);
        assert!(harness.error_lines().is_empty());
    }

    #[test]
    fn malformed_entry_is_logged_and_loop_continues() {
        let harness = Harness::new();

        let report = harness.run(json!({
            "broken": { "post_info": { "caption": "no media" } },
            "u2": post("http://x/2.mp4", "fine"),
        }));

        assert_eq!(report.items[0].state, ItemState::FetchFailed);
        assert_eq!(report.items[1].state, ItemState::Committed);
        assert_eq!(harness.fetcher.calls.borrow().len(), 1);
        let lines = harness.error_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\tbroken\tparse error"));
        assert!(harness.history().get("broken").is_none());
    }

    #[test]
    fn second_run_skips_everything() {
        let harness = Harness::new();
        let source = json!({
            "u1": post("http://x/1.mp4", "one"),
            "u2": post("http://x/2.mp4", "two"),
        });

        assert_eq!(harness.run(source.clone()).committed(), 2);
        let fetches = harness.fetcher.calls.borrow().len();
        let uploads = harness.uploader.calls.borrow().len();

        let report = harness.run(source);
        assert_eq!(report.count(ItemState::Skipped), 2);
        assert_eq!(harness.fetcher.calls.borrow().len(), fetches);
        assert_eq!(harness.uploader.calls.borrow().len(), uploads);
    }

    #[test]
    fn upload_failure_keeps_item_retryable() {
        let mut harness = Harness::new();
        harness.uploader.failing_titles.insert("two".into(), 403);
        let source = json!({
            "u1": post("http://x/1.mp4", "one"),
            "u2": post("http://x/2.mp4", "two"),
            "u3": post("http://x/3.mp4", "three"),
        });

        let report = harness.run(source.clone());
        let states: Vec<ItemState> = report.items.iter().map(|item| item.state).collect();
        assert_eq!(
            states,
            vec![ItemState::Committed, ItemState::UploadFailed, ItemState::Committed]
        );
        assert!(harness.history().get("u2").is_none());
        assert_eq!(harness.temp_files(), 0);
        let lines = harness.error_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\tu2\tupload error"));

        harness.uploader.failing_titles.clear();
        let mut retry = harness.orchestrator();
        let entries = parse_source_list(&source.to_string()).unwrap();
        let report = retry.run(&entries).unwrap();
        assert_eq!(report.committed(), 1);
        assert_eq!(report.items[1].key, "u2");
        assert_eq!(retry.history().len(), 3);
    }

    #[test]
    fn failures_do_not_count_towards_batch_size() {
        let mut harness = Harness::new();
        harness.batch_size = 1;
        harness.fetcher.failing.insert("http://x/1.mp4".into());

        let report = harness.run(json!({
            "u1": post("http://x/1.mp4", "one"),
            "u2": post("http://x/2.mp4", "two"),
            "u3": post("http://x/3.mp4", "three"),
        }));

        assert_eq!(report.committed(), 1);
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.pending, 1);
    }

    #[test]
    fn pending_leaves_out_recorded_entries() {
        let mut harness = Harness::new();
        harness.batch_size = 1;
        fs::write(
            harness.history_path(),
            json!({ "u3": { "destination_id": "OLD" } }).to_string(),
        )
        .unwrap();

        let report = harness.run(json!({
            "u1": post("http://x/1.mp4", "one"),
            "u2": post("http://x/2.mp4", "two"),
            "u3": post("http://x/3.mp4", "three"),
        }));

        assert_eq!(report.committed(), 1);
        assert_eq!(report.pending, 1);
    }

    #[test]
    fn count_unrecorded_ignores_history_keys() {
        let harness = Harness::new();
        fs::write(
            harness.history_path(),
            json!({ "u1": { "destination_id": "YT1" } }).to_string(),
        )
        .unwrap();
        let history = HistoryStore::load(harness.history_path()).unwrap();
        let entries = parse_source_list(
            &json!({
                "u1": post("http://x/1.mp4", "one"),
                "u2": post("http://x/2.mp4", "two"),
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(count_unrecorded(&entries, &history), 1);
        assert_eq!(count_unrecorded(&entries[..1], &history), 0);
    }

    #[test]
    fn max_attempts_bounds_tries() {
        let mut harness = Harness::new();
        harness.max_attempts = Some(2);
        harness.fetcher.failing.insert("http://x/1.mp4".into());
        harness.fetcher.failing.insert("http://x/2.mp4".into());

        let report = harness.run(json!({
            "done": post("http://x/0.mp4", "zero"),
            "u1": post("http://x/1.mp4", "one"),
            "u2": post("http://x/2.mp4", "two"),
            "u3": post("http://x/3.mp4", "three"),
        }));

        // `done` commits and u1 fails, which uses up both attempts.
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.pending, 2);

        let report = harness.run(json!({
            "done": post("http://x/0.mp4", "zero"),
            "u1": post("http://x/1.mp4", "one"),
            "u2": post("http://x/2.mp4", "two"),
            "u3": post("http://x/3.mp4", "three"),
        }));
        // Skips are free: `done` is skipped, u1 and u2 use the two attempts.
        assert_eq!(report.count(ItemState::Skipped), 1);
        assert_eq!(report.count(ItemState::FetchFailed), 2);
        assert_eq!(report.pending, 1);
    }

    #[test]
    fn history_write_failure_is_reported_with_destination_id() {
        let mut harness = Harness::new();
        harness.uploader.ids.insert("one".into(), "YT9".into());
        let mut orchestrator = harness.orchestrator();
        // Occupy the history path with a directory so the rewrite fails.
        fs::create_dir(harness.history_path()).unwrap();

        let entries =
            parse_source_list(&json!({ "u1": post("http://x/1.mp4", "one") }).to_string())
                .unwrap();
        let report = orchestrator.run(&entries).unwrap();

        assert_eq!(report.items[0].state, ItemState::UploadFailed);
        assert!(!orchestrator.history().contains("u1"));
        let lines = harness.error_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("YT9"));
        assert_eq!(harness.temp_files(), 0);
    }

    #[test]
    fn failed_scratch_cleanup_does_not_fail_the_item() {
        let mut harness = Harness::new();
        harness.fetcher.undeletable.insert("http://x/1.mp4".into());
        harness.uploader.ids.insert("one".into(), "YT1".into());

        let report = harness.run(json!({
            "u1": post("http://x/1.mp4", "one"),
            "u2": post("http://x/2.mp4", "two"),
        }));

        assert_eq!(report.items[0].state, ItemState::Committed);
        assert_eq!(report.items[1].state, ItemState::Committed);
        assert_eq!(harness.history()["u1"]["destination_id"], "YT1");
        assert!(harness.error_lines().is_empty());
        // Only the undeletable leftover remains.
        assert_eq!(harness.temp_files(), 1);
    }

    #[test]
    fn colliding_keys_get_separate_scratch_files() {
        let harness = Harness::new();
        fs::create_dir_all(harness.temp_dir()).unwrap();
        // Leftover from an earlier crash under the same sanitized name.
        fs::write(harness.temp_dir().join("u1.mp4"), b"stale").unwrap();

        let report = harness.run(json!({ "u1": post("http://x/1.mp4", "one") }));

        assert_eq!(report.committed(), 1);
        let calls = harness.uploader.calls.borrow();
        assert_ne!(calls[0].request.file, harness.temp_dir().join("u1.mp4"));
        assert!(harness.temp_dir().join("u1.mp4").exists());
    }
}
