// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Wire-level types for [tabrunner](https://crates.io/crates/tabrunner-runner).
//!
//! Everything in this crate crosses a process or network boundary: results
//! streamed to a watching client, requests sent to remote worker functions, and
//! the responses they produce. All types serialize as camelCase JSON so that
//! in-page and worker-side consumers written in other languages can read them
//! directly.

mod exit_codes;

pub use exit_codes::TabrunnerExitCode;

use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

/// Typed UUID kind for a publish session.
///
/// A publish session identifies one uploaded bundle of test code. Remote
/// workers use it to locate the assets they should serve to the browser.
pub enum PublishSessionKind {}

impl TypedUuidKind for PublishSessionKind {
    #[inline]
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("tabrunner_session");
        TAG
    }
}

/// A unique identifier for a publish session.
pub type SessionUuid = TypedUuid<PublishSessionKind>;

/// The outcome of one or more attempts at a single test.
///
/// A test is identified solely by its fully-qualified name. `error` being
/// absent means the test passed on its most recent attempt; `attempts` counts
/// only attempts executed within the current run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// The fully-qualified test name.
    pub full_name: String,

    /// The error message, if the most recent attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// The stack trace accompanying `error`, if one was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    /// Time taken by the most recent attempt, in milliseconds.
    pub time: u64,

    /// The number of attempts executed in the current run. Always at least 1.
    pub attempts: u32,

    /// The run generation this result belongs to.
    pub run_id: u64,

    /// The batch (run group) this test was executed in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,

    /// The log stream of the worker that produced this result, so failures can
    /// be traced back to worker output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_stream: Option<String>,
}

impl TestResult {
    /// Returns true if the most recent attempt passed.
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }

    /// Returns true if the test passed, but only after more than one attempt.
    pub fn is_flaky(&self) -> bool {
        self.passed() && self.attempts > 1
    }

    /// The duration of the most recent attempt.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.time)
    }
}

/// A request to a remote worker function to execute a batch of tests.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRequest {
    /// The tests to run, in order.
    pub test_names: Vec<String>,

    /// The maximum number of attempts per test.
    pub deflake_limit: u32,

    /// The run generation results should be tagged with.
    pub run_id: u64,

    /// The batch identifier for this invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,

    /// The publish session whose assets the worker should serve.
    pub session_id: SessionUuid,
}

/// The response produced by a remote worker for a [`WorkRequest`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkResponse {
    /// One entry per requested test, each carrying the full attempt history in
    /// execution order. Always non-empty per test.
    pub results: BTreeMap<String, Vec<TestResult>>,

    /// The worker's log stream name, for tracing failures to worker output.
    pub log_stream_name: String,
}

impl WorkResponse {
    /// Returns the final (most recent) result for each test, in name order.
    pub fn final_results(&self) -> impl Iterator<Item = &TestResult> + '_ {
        self.results.values().filter_map(|attempts| attempts.last())
    }
}

/// A request to a remote worker function to list the test names the current
/// publish session defines.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    /// The publish session whose assets the worker should serve.
    pub session_id: SessionUuid,
}

/// A run request from a watching client.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// The explicit working set of test names.
    #[serde(default)]
    pub test_names: Vec<String>,

    /// The filter string the working set was derived from. A run request with
    /// an unchanged filter and no `force` flag is a no-op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grep: Option<String>,

    /// Start a new run even if the filter is unchanged.
    #[serde(default)]
    pub force: bool,

    /// Run only the tests that failed in the previous run.
    #[serde(default)]
    pub filter_failed: bool,
}

/// An incremental batch of results pushed to the reporting layer.
///
/// Batches are best-effort and may be delivered out of order relative to other
/// sessions, but are in-order per session.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBatch {
    /// The results in this batch.
    pub results: Vec<TestResult>,
}

/// A full-state snapshot sent to the reporting layer on reconnect.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// The current run generation.
    pub run_id: u64,

    /// The number of tests in the current working set.
    pub total_count: usize,

    /// The number of worker slots (local tabs or remote invocations) in use.
    pub worker_count: usize,

    /// True if the current run is executing on remote workers.
    pub is_remote: bool,

    /// All results aggregated so far, in arrival order.
    pub results: Vec<TestResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_result_wire_shape() {
        let result = TestResult {
            full_name: "editor can copy".to_owned(),
            error: Some("expected 1 to equal 2".to_owned()),
            stack: None,
            time: 340,
            attempts: 2,
            run_id: 7,
            batch_id: Some("L3".to_owned()),
            log_stream: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "fullName": "editor can copy",
                "error": "expected 1 to equal 2",
                "time": 340,
                "attempts": 2,
                "runId": 7,
                "batchId": "L3",
            })
        );

        let parsed: TestResult = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn passed_iff_error_absent() {
        let mut result = TestResult {
            full_name: "t".to_owned(),
            error: None,
            stack: None,
            time: 10,
            attempts: 1,
            run_id: 1,
            batch_id: None,
            log_stream: None,
        };
        assert!(result.passed());
        assert!(!result.is_flaky());

        result.attempts = 3;
        assert!(result.is_flaky());

        result.error = Some("boom".to_owned());
        assert!(!result.passed());
        assert!(!result.is_flaky());
    }

    #[test]
    fn work_response_final_results() {
        let pass = TestResult {
            full_name: "a".to_owned(),
            error: None,
            stack: None,
            time: 5,
            attempts: 2,
            run_id: 1,
            batch_id: None,
            log_stream: None,
        };
        let fail = TestResult {
            error: Some("nope".to_owned()),
            attempts: 1,
            ..pass.clone()
        };
        let response = WorkResponse {
            results: BTreeMap::from([("a".to_owned(), vec![fail, pass.clone()])]),
            log_stream_name: "2026/08/08/worker-0".to_owned(),
        };
        let finals: Vec<_> = response.final_results().collect();
        assert_eq!(finals, vec![&pass]);
    }

    #[test]
    fn run_request_defaults() {
        let parsed: RunRequest = serde_json::from_str(r#"{"testNames": ["x"]}"#).unwrap();
        assert_eq!(parsed.test_names, vec!["x".to_owned()]);
        assert_eq!(parsed.grep, None);
        assert!(!parsed.force);
        assert!(!parsed.filter_failed);
    }
}
