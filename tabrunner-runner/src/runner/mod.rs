// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run coordinator and the execution loops it fans work out to.

mod coordinator;
mod deflake;
mod remote;

pub use coordinator::{RunCoordinator, RunHandle, RunMode, RunOptions};
pub use deflake::{
    CUTOFF_SAFETY_MARGIN, WALL_CLOCK_CUTOFF_ERROR, WorkBatchOptions, handle_work_request,
    work_batch,
};
pub use remote::{
    RATE_EXCEEDED_BACKOFF, RATE_EXCEEDED_RETRIES, RemoteInvoker, invoke_with_retry,
    work_tests_with_retry,
};
