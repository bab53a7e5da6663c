// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopwatch for tracking how long tests and runs take.
//!
//! We track a start time and a duration using a combination of a realtime
//! clock (for reporting when something happened) and a monotonic clock (for
//! measuring how long it took).

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

pub(crate) fn stopwatch() -> StopwatchStart {
    StopwatchStart::new()
}

/// The start state of a stopwatch.
#[derive(Clone, Debug)]
pub(crate) struct StopwatchStart {
    start_time: DateTime<Local>,
    instant: Instant,
}

impl StopwatchStart {
    fn new() -> Self {
        Self {
            // These two syscalls happen imperceptibly close to each other,
            // which is good enough for our purposes.
            start_time: Local::now(),
            instant: Instant::now(),
        }
    }

    pub(crate) fn snapshot(&self) -> StopwatchSnapshot {
        StopwatchSnapshot {
            start_time: self.start_time,
            active: self.instant.elapsed(),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct StopwatchSnapshot {
    pub(crate) start_time: DateTime<Local>,
    pub(crate) active: Duration,
}
