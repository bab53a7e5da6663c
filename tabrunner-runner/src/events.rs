// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run events.
//!
//! Events are produced by a [`RunCoordinator`](crate::runner::RunCoordinator)
//! and consumed by the reporting layer. They are pushed incrementally as
//! results arrive, not buffered to the end of the run, so a watching client
//! sees live progress.

use chrono::{DateTime, FixedOffset};
use std::time::Duration;
use tabrunner_metadata::TestResult;

/// A run event.
#[derive(Clone, Debug)]
pub struct RunEvent {
    /// The time at which the event was generated, including the offset from
    /// UTC.
    pub timestamp: DateTime<FixedOffset>,

    /// The amount of time elapsed since the start of the run.
    pub elapsed: Duration,

    /// The kind of event this is.
    pub kind: RunEventKind,
}

/// The kind of run event this is.
///
/// Forms part of [`RunEvent`].
#[derive(Clone, Debug)]
pub enum RunEventKind {
    /// A run started.
    RunStarted {
        /// The run generation.
        run_id: u64,

        /// The number of tests in the working set.
        initial_run_count: usize,

        /// The number of worker slots the run was fanned out to.
        worker_count: usize,

        /// True if the run executes on remote workers.
        is_remote: bool,
    },

    /// A test finished running, possibly after several attempts.
    TestFinished {
        /// The final result for this test.
        result: TestResult,

        /// Current run statistics so far.
        current_stats: RunStats,
    },

    /// A remote invocation itself failed (not an individual test), so every
    /// test in its batch was synthesized as failed.
    ///
    /// Reported distinctly so operators can tell infrastructure failures from
    /// real test failures.
    InvocationFailed {
        /// The batch whose invocation failed.
        batch_id: String,

        /// The invocation error.
        error: String,

        /// The number of tests in the batch.
        test_count: usize,
    },

    /// The run finished.
    RunFinished {
        /// The run generation.
        run_id: u64,

        /// The amount of time the run took.
        elapsed: Duration,

        /// Statistics for the run.
        run_stats: RunStats,
    },
}

/// Statistics for a test run.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct RunStats {
    /// The number of tests in the working set when the run started.
    pub initial_run_count: usize,

    /// The number of tests with a final result so far.
    pub finished_count: usize,

    /// The number of tests that passed on their most recent attempt.
    pub passed: usize,

    /// The number of tests that passed, but only after more than one attempt.
    pub flaky: usize,

    /// The number of tests that failed after all attempts.
    pub failed: usize,
}

impl RunStats {
    /// Returns true if zero tests ultimately failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub(crate) fn on_test_finished(&mut self, result: &TestResult) {
        self.finished_count += 1;
        if result.passed() {
            self.passed += 1;
            if result.is_flaky() {
                self.flaky += 1;
            }
        } else {
            self.failed += 1;
        }
    }

    /// Removes a previously counted final result, used when a deflake retry
    /// or re-run replaces it.
    pub(crate) fn on_result_replaced(&mut self, previous: &TestResult) {
        self.finished_count -= 1;
        if previous.passed() {
            self.passed -= 1;
            if previous.is_flaky() {
                self.flaky -= 1;
            }
        } else {
            self.failed -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(passed: bool, attempts: u32) -> TestResult {
        TestResult {
            full_name: "t".to_owned(),
            error: (!passed).then(|| "boom".to_owned()),
            stack: None,
            time: 5,
            attempts,
            run_id: 1,
            batch_id: None,
            log_stream: None,
        }
    }

    #[test]
    fn stats_track_flaky_and_failed() {
        let mut stats = RunStats::default();
        stats.on_test_finished(&result(true, 1));
        stats.on_test_finished(&result(true, 3));
        stats.on_test_finished(&result(false, 3));

        assert_eq!(stats.finished_count, 3);
        assert_eq!(stats.passed, 2);
        assert_eq!(stats.flaky, 1);
        assert_eq!(stats.failed, 1);
        assert!(!stats.is_success());

        stats.on_result_replaced(&result(false, 3));
        stats.on_test_finished(&result(true, 4));
        assert_eq!(stats.failed, 0);
        assert!(stats.is_success());
    }
}
