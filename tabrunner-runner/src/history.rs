// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage and retrieval of per-test runtime history.
//!
//! The history is a lightweight local cache mapping each test name to the
//! duration of its last observed pass and failure. It exists solely so the
//! [scheduler](crate::schedule) can estimate future runtimes; it is not a
//! durable work log. Entries are created on first observed result, updated on
//! every subsequent one, and never deleted.

use crate::errors::{HistoryFlushError, HistoryLoadError};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, io::Write, time::Duration};
use tabrunner_metadata::TestResult;
use tracing::{debug, warn};

/// Estimated runtime for a test that has never been observed.
pub const DEFAULT_ESTIMATE: Duration = Duration::from_millis(200);

/// How long to wait after a record before flushing to disk.
pub const FLUSH_DEBOUNCE: Duration = Duration::from_secs(5);

/// Tests slower than this get logged when recorded.
const SLOW_TEST_MS: u64 = 2000;

/// Runtime data for a single test, serialized to disk.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// True if the most recently observed outcome was a failure.
    pub last_outcome_failed: bool,

    /// Duration of the last observed pass, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_time: Option<u64>,

    /// Duration of the last observed failure, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_time: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    version: u32,
    entries: BTreeMap<String, HistoryEntry>,
}

/// The runtime-history store.
///
/// Flushing is debounced: [`record`](Self::record) only marks the store dirty,
/// and the owner is expected to call [`flush`](Self::flush) once
/// [`FLUSH_DEBOUNCE`] has elapsed (the coordinator arms a timer for this).
#[derive(Debug)]
pub struct RuntimeHistory {
    path: Utf8PathBuf,
    entries: BTreeMap<String, HistoryEntry>,
    dirty: bool,
}

impl RuntimeHistory {
    /// Current version of the on-disk format.
    const CURRENT_VERSION: u32 = 1;

    const FILE_NAME: &'static str = "history.json";

    /// Loads the history from the given store directory.
    ///
    /// A missing file yields an empty store. A version mismatch also yields an
    /// empty store: the history is only a scheduling hint, so discarding it is
    /// always safe.
    pub fn load(store_dir: &Utf8Path) -> Result<Self, HistoryLoadError> {
        let path = store_dir.join(Self::FILE_NAME);
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => {
                let file: HistoryFile = serde_json::from_str(&contents).map_err(|error| {
                    HistoryLoadError::Deserialize {
                        path: path.clone(),
                        error,
                    }
                })?;
                if file.version == Self::CURRENT_VERSION {
                    file.entries
                } else {
                    warn!(
                        version = file.version,
                        expected = Self::CURRENT_VERSION,
                        "runtime history version mismatch, starting empty"
                    );
                    BTreeMap::new()
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => {
                return Err(HistoryLoadError::Read {
                    path: path.clone(),
                    error,
                });
            }
        };

        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    /// Creates an empty in-memory store rooted at the given directory.
    pub fn empty(store_dir: &Utf8Path) -> Self {
        Self {
            path: store_dir.join(Self::FILE_NAME),
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Records an observed result and marks the store dirty.
    pub fn record(&mut self, result: &TestResult) {
        let entry = self.entries.entry(result.full_name.clone()).or_default();
        entry.last_outcome_failed = !result.passed();
        if result.passed() {
            entry.pass_time = Some(result.time);
        } else {
            entry.fail_time = Some(result.time);
        }
        if result.time > SLOW_TEST_MS {
            debug!(test = %result.full_name, time_ms = result.time, "slow test");
        }
        self.dirty = true;
    }

    /// Estimates how long the named test will take to run.
    ///
    /// If the last recorded outcome was a failure, the estimate is the slower
    /// of the last pass and last failure, since failing tests often include
    /// teardown. Otherwise it's the last pass time, or [`DEFAULT_ESTIMATE`]
    /// for a test never seen before.
    pub fn estimate(&self, full_name: &str) -> Duration {
        let Some(entry) = self.entries.get(full_name) else {
            return DEFAULT_ESTIMATE;
        };
        let millis = if entry.last_outcome_failed {
            entry.pass_time.unwrap_or(0).max(entry.fail_time.unwrap_or(0))
        } else {
            entry.pass_time.unwrap_or(DEFAULT_ESTIMATE.as_millis() as u64)
        };
        Duration::from_millis(millis)
    }

    /// Returns true if there are recorded results not yet flushed to disk.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the history to disk with an atomic replace.
    ///
    /// A no-op if the store isn't dirty.
    pub fn flush(&mut self) -> Result<(), HistoryFlushError> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|error| HistoryFlushError::CreateDir {
                path: parent.to_owned(),
                error,
            })?;
        }

        let file = HistoryFile {
            version: Self::CURRENT_VERSION,
            entries: std::mem::take(&mut self.entries),
        };
        let buf = serde_json::to_vec(&file);
        self.entries = file.entries;
        let buf = buf.map_err(HistoryFlushError::Serialize)?;

        atomicwrites::AtomicFile::new(&self.path, atomicwrites::AllowOverwrite)
            .write(|f| f.write_all(&buf))
            .map_err(|error| match error {
                atomicwrites::Error::Internal(error) | atomicwrites::Error::User(error) => {
                    HistoryFlushError::Write {
                        path: self.path.clone(),
                        error,
                    }
                }
            })?;

        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;

    fn result(name: &str, error: Option<&str>, time: u64) -> TestResult {
        TestResult {
            full_name: name.to_owned(),
            error: error.map(str::to_owned),
            stack: None,
            time,
            attempts: 1,
            run_id: 1,
            batch_id: None,
            log_stream: None,
        }
    }

    #[test]
    fn estimate_defaults_to_200ms() {
        let dir = Utf8TempDir::new().unwrap();
        let history = RuntimeHistory::empty(dir.path());
        assert_eq!(history.estimate("never seen"), DEFAULT_ESTIMATE);
    }

    #[test]
    fn estimate_uses_last_pass_time() {
        let dir = Utf8TempDir::new().unwrap();
        let mut history = RuntimeHistory::empty(dir.path());
        history.record(&result("t", None, 1200));
        assert_eq!(history.estimate("t"), Duration::from_millis(1200));
    }

    #[test]
    fn failed_tests_estimate_slower_of_pass_and_fail() {
        let dir = Utf8TempDir::new().unwrap();
        let mut history = RuntimeHistory::empty(dir.path());

        // Fails slow, then passes fast: while the last outcome is a pass, the
        // pass time wins; after a new failure, the slower of the two wins.
        history.record(&result("t", Some("boom"), 900));
        history.record(&result("t", None, 300));
        assert_eq!(history.estimate("t"), Duration::from_millis(300));

        history.record(&result("t", Some("boom"), 100));
        assert_eq!(history.estimate("t"), Duration::from_millis(300));
    }

    #[test]
    fn entries_are_updated_never_deleted() {
        let dir = Utf8TempDir::new().unwrap();
        let mut history = RuntimeHistory::empty(dir.path());
        history.record(&result("a", None, 10));
        history.record(&result("b", Some("x"), 20));
        history.record(&result("a", None, 30));
        assert_eq!(history.entries.len(), 2);
        assert_eq!(history.entries["a"].pass_time, Some(30));
    }

    #[test]
    fn flush_and_reload_round_trip() {
        let dir = Utf8TempDir::new().unwrap();
        let mut history = RuntimeHistory::load(dir.path()).unwrap();
        assert!(!history.is_dirty());

        history.record(&result("t", Some("boom"), 450));
        assert!(history.is_dirty());
        history.flush().unwrap();
        assert!(!history.is_dirty());

        let reloaded = RuntimeHistory::load(dir.path()).unwrap();
        assert_eq!(reloaded.estimate("t"), Duration::from_millis(450));
        assert_eq!(
            reloaded.entries["t"],
            HistoryEntry {
                last_outcome_failed: true,
                pass_time: None,
                fail_time: Some(450),
            }
        );
    }

    #[test]
    fn version_mismatch_starts_empty() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        fs::write(
            &path,
            r#"{"version": 99, "entries": {"t": {"last_outcome_failed": false}}}"#,
        )
        .unwrap();

        let history = RuntimeHistory::load(dir.path()).unwrap();
        assert_eq!(history.estimate("t"), DEFAULT_ESTIMATE);
    }
}
