// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote worker invocation.
//!
//! A remote invocation hands one run group to an ephemeral worker function
//! and gets back the full attempt history for every test in the batch. The
//! transport (a FaaS call, usually) lives behind [`RemoteInvoker`]; the core
//! only adds the retry policy: throttling errors are retried a bounded number
//! of times with a fixed backoff, everything else propagates immediately.

use crate::errors::InvokeError;
use futures::future::BoxFuture;
use rand::{RngExt, distr::OpenClosed01};
use std::time::Duration;
use tabrunner_metadata::{ListRequest, WorkRequest, WorkResponse};
use tracing::warn;

/// Maximum retries for a rate-exceeded invocation failure.
pub const RATE_EXCEEDED_RETRIES: u32 = 3;

/// Backoff between rate-exceeded retries. Long enough for provider-side
/// throttling to clear.
pub const RATE_EXCEEDED_BACKOFF: Duration = Duration::from_secs(10);

/// Invocation of remote worker functions.
///
/// Implementations wrap whatever transport reaches the worker fleet; tests
/// use scripted fakes.
pub trait RemoteInvoker: Send + Sync {
    /// Runs a batch of tests on a worker, returning per-test attempt
    /// histories.
    fn work_tests(&self, request: WorkRequest) -> BoxFuture<'_, Result<WorkResponse, InvokeError>>;

    /// Lists the test names the current publish session defines.
    fn list_tests(&self, request: ListRequest)
    -> BoxFuture<'_, Result<Vec<String>, InvokeError>>;
}

/// Runs `attempt` until it succeeds, retrying only rate-exceeded failures, at
/// most [`RATE_EXCEEDED_RETRIES`] times.
pub async fn invoke_with_retry<T, F, Fut>(mut attempt: F) -> Result<T, InvokeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InvokeError>>,
{
    let mut remaining = RATE_EXCEEDED_RETRIES;
    loop {
        match attempt().await {
            Err(error) if error.is_retryable() && remaining > 0 => {
                remaining -= 1;
                let delay = apply_jitter(RATE_EXCEEDED_BACKOFF);
                warn!(%error, ?delay, remaining, "invocation throttled, backing off");
                tokio::time::sleep(delay).await;
            }
            outcome => return outcome,
        }
    }
}

/// Dispatches a work request through `invoker` with the retry policy applied.
pub async fn work_tests_with_retry(
    invoker: &dyn RemoteInvoker,
    request: WorkRequest,
) -> Result<WorkResponse, InvokeError> {
    invoke_with_retry(|| invoker.work_tests(request.clone())).await
}

/// Applies jitter in the range (0.5, 1] so simultaneous throttled callers
/// don't all come back at once.
fn apply_jitter(duration: Duration) -> Duration {
    let jitter: f64 = rand::rng().sample(OpenClosed01);
    duration.mul_f64(0.5 + jitter / 2.)
}
