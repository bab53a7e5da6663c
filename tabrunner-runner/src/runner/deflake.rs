// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker-side deflake loop.
//!
//! One ephemeral worker receives one batch of tests and a wall-clock budget.
//! Every test runs once; failing tests are then retried up to the deflake
//! limit, with a session reload between attempts so one test's page state
//! can't contaminate the next. The hard cutoff is enforced independently of
//! the retry loop: whatever is still outstanding when the budget expires gets
//! a synthesized terminal failure carrying the cutoff as the error.

use crate::{
    errors::SessionError,
    session::{SessionHandle, TestSpec},
};
use std::{collections::BTreeMap, time::Duration};
use tabrunner_metadata::{TestResult, WorkRequest, WorkResponse};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Minimum headroom required before re-attempting a failing test, on top of
/// the slowest known failure in the batch.
pub const CUTOFF_SAFETY_MARGIN: Duration = Duration::from_secs(5);

/// The error synthesized for tests still outstanding at the wall-clock
/// cutoff. Distinct from the per-test timeout message so operators can tell
/// "the worker ran out of budget" from "this test hung".
pub const WALL_CLOCK_CUTOFF_ERROR: &str = "worker wall-clock cutoff";

/// The error synthesized when a dispatch resolves without a result, which
/// only happens if something superseded it out from under the batch.
const RESOLVED_WITHOUT_RUNNING_ERROR: &str = "test resolved without running";

/// Options for [`work_batch`].
#[derive(Clone, Debug)]
pub struct WorkBatchOptions {
    /// Maximum attempts per test. Clamped to at least 1.
    pub deflake_limit: u32,

    /// The run generation results are tagged with.
    pub run_id: u64,

    /// The batch identifier stamped onto every result.
    pub batch_id: Option<String>,

    /// The worker's log stream, stamped onto every result.
    pub log_stream: Option<String>,

    /// Wall-clock budget for the whole batch.
    pub budget: Duration,
}

/// Runs a batch of tests through one session, deflaking failures.
///
/// `acquire` produces the session; its cost counts against the budget. The
/// returned map always has at least one result per input test name, even
/// under a hard cutoff or a session-acquisition failure, and never more than
/// `deflake_limit` attempts for any single test.
pub async fn work_batch<F, Fut>(
    acquire: F,
    test_names: &[String],
    options: &WorkBatchOptions,
) -> BTreeMap<String, Vec<TestResult>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<SessionHandle, SessionError>>,
{
    let deadline = Instant::now() + options.budget;
    let mut results: BTreeMap<String, Vec<TestResult>> = test_names
        .iter()
        .map(|name| (name.clone(), Vec::new()))
        .collect();

    let interrupt = {
        let rounds = run_rounds(acquire, test_names, options, deadline, &mut results);
        tokio::pin!(rounds);
        tokio::select! {
            outcome = &mut rounds => outcome,
            _ = tokio::time::sleep_until(deadline) => Err(BatchInterrupt::Cutoff),
        }
    };

    match interrupt {
        Ok(()) => {}
        Err(BatchInterrupt::Cutoff) => {
            warn!(batch = ?options.batch_id, "wall-clock cutoff hit");
            synthesize_terminal(&mut results, WALL_CLOCK_CUTOFF_ERROR, options);
        }
        Err(BatchInterrupt::Setup(error)) => {
            // No test was active, so the acquisition error is attributed to
            // every remaining test.
            warn!(batch = ?options.batch_id, %error, "session acquisition failed");
            synthesize_terminal(&mut results, &error.to_string(), options);
        }
    }

    results
}

/// Serves one worker invocation end to end.
pub async fn handle_work_request<F, Fut>(
    request: &WorkRequest,
    budget: Duration,
    log_stream_name: String,
    acquire: F,
) -> WorkResponse
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<SessionHandle, SessionError>>,
{
    let options = WorkBatchOptions {
        deflake_limit: request.deflake_limit,
        run_id: request.run_id,
        batch_id: request.batch_id.clone(),
        log_stream: Some(log_stream_name.clone()),
        budget,
    };
    let results = work_batch(acquire, &request.test_names, &options).await;
    WorkResponse {
        results,
        log_stream_name,
    }
}

enum BatchInterrupt {
    Cutoff,
    Setup(SessionError),
}

async fn run_rounds<F, Fut>(
    acquire: F,
    test_names: &[String],
    options: &WorkBatchOptions,
    deadline: Instant,
    results: &mut BTreeMap<String, Vec<TestResult>>,
) -> Result<(), BatchInterrupt>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<SessionHandle, SessionError>>,
{
    let session = acquire().await.map_err(BatchInterrupt::Setup)?;

    for round in 1..=options.deflake_limit.max(1) {
        let remaining: Vec<String> = test_names
            .iter()
            .filter(|name| {
                results[name.as_str()]
                    .last()
                    .map(|result| !result.passed())
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        if remaining.is_empty() {
            break;
        }

        if round > 1 {
            let slowest = remaining
                .iter()
                .filter_map(|name| results[name.as_str()].last().map(|r| r.duration()))
                .max()
                .unwrap_or_default();
            if deadline.duration_since(Instant::now()) < CUTOFF_SAFETY_MARGIN + slowest {
                debug!(
                    batch = ?options.batch_id,
                    failing = remaining.len(),
                    "not enough budget left to deflake"
                );
                break;
            }
            debug!(batch = ?options.batch_id, round, failing = remaining.len(), "deflaking");
        }

        for name in remaining {
            if round > 1 {
                // A fresh page per re-attempt, so state left behind by the
                // failing run can't contaminate it.
                session.reload();
            }
            let spec = TestSpec {
                test_name: name.clone(),
                run_id: options.run_id,
            };
            let mut result = session.set_test(spec).await.unwrap_or_else(|| TestResult {
                full_name: name.clone(),
                error: Some(RESOLVED_WITHOUT_RUNNING_ERROR.to_owned()),
                stack: None,
                time: 0,
                attempts: 1,
                run_id: options.run_id,
                batch_id: None,
                log_stream: None,
            });

            let attempts = results.get_mut(&name).expect("every input test has an entry");
            result.attempts = attempts.len() as u32 + 1;
            result.run_id = options.run_id;
            result.batch_id = options.batch_id.clone();
            result.log_stream = options.log_stream.clone();
            attempts.push(result);
        }
    }

    Ok(())
}

/// Appends a synthesized failure for every test with no attempt yet or whose
/// latest attempt is still failing, without exceeding the deflake limit.
fn synthesize_terminal(
    results: &mut BTreeMap<String, Vec<TestResult>>,
    error: &str,
    options: &WorkBatchOptions,
) {
    for (name, attempts) in results.iter_mut() {
        let outstanding = attempts.last().map(|r| !r.passed()).unwrap_or(true);
        if !outstanding || attempts.len() >= options.deflake_limit.max(1) as usize {
            continue;
        }
        attempts.push(TestResult {
            full_name: name.clone(),
            error: Some(error.to_owned()),
            stack: None,
            time: 0,
            attempts: attempts.len() as u32 + 1,
            run_id: options.run_id,
            batch_id: options.batch_id.clone(),
            log_stream: options.log_stream.clone(),
        });
    }
}
