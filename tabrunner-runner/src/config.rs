// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the orchestrator and its sessions.

use camino::Utf8PathBuf;
use std::time::Duration;
use tabrunner_metadata::SessionUuid;

/// Behavior configuration for a single browser-tab session.
#[derive(Clone, Copy, Debug, Default)]
pub struct TabConfig {
    /// Fail the in-flight test when the page throws an unexpected exception.
    ///
    /// Some test suites throw stray errors that never fail the test's own
    /// promise. When this is false (the default), such exceptions are logged
    /// and ignored, and the test is left to finish or time out on its own.
    pub fail_on_exceptions: bool,

    /// Always perform a full reload instead of an in-place code upgrade.
    pub skip_hot_reload: bool,
}

/// Timeouts applied by the session state machine, one per waiting state.
#[derive(Clone, Copy, Debug)]
pub struct SessionTimeouts {
    /// Time allowed for a navigation or reload to signal readiness.
    pub load: Duration,

    /// Time allowed for a dispatched test to produce a result.
    pub run: Duration,

    /// Time allowed for an in-place code upgrade before falling back to a
    /// full reload.
    pub hot_reload: Duration,

    /// Grace period for in-flight work to finish when new work interrupts it.
    pub abort: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            load: Duration::from_secs(10),
            run: Duration::from_secs(20),
            hot_reload: Duration::from_secs(5),
            abort: Duration::from_millis(500),
        }
    }
}

/// Top-level configuration for a [`RunCoordinator`](crate::runner::RunCoordinator).
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Maximum number of concurrent remote worker invocations. Also the upper
    /// bound on the number of run groups the scheduler produces.
    pub remote_concurrency: usize,

    /// Number of local browser-tab slots.
    pub local_workers: usize,

    /// Maximum number of attempts per test on remote workers.
    pub deflake_limit: u32,

    /// Per-session behavior.
    pub tab: TabConfig,

    /// Per-state session timeouts.
    pub timeouts: SessionTimeouts,

    /// Directory holding the runtime-history cache.
    pub store_dir: Utf8PathBuf,

    /// The publish session remote workers should serve assets from.
    pub session_id: SessionUuid,
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults, rooted at the given store
    /// directory.
    pub fn new(store_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            remote_concurrency: 400,
            local_workers: 8,
            deflake_limit: 3,
            tab: TabConfig::default(),
            timeouts: SessionTimeouts::default(),
            store_dir: store_dir.into(),
            session_id: SessionUuid::new_v4(),
        }
    }
}
