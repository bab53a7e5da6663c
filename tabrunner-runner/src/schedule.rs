// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Packing tests into balanced run groups.
//!
//! Each run group is handed to one worker slot (a local tab or one remote
//! invocation), so group totals should be as even as possible. We use
//! longest-processing-time-first: sort tests by estimated runtime descending,
//! then repeatedly extend whichever group currently has the smallest total.
//! Groups are allowed to grow to a soft cap before a new one is opened, and
//! the group count never exceeds the concurrency limit.

use crate::history::RuntimeHistory;
use std::time::Duration;

/// A group can grow to about this long before we open a new one.
const GROUP_SOFT_CAP: Duration = Duration::from_millis(500);

/// A partition of the working set assigned to one worker slot.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunGroup {
    /// The tests in this group, in dispatch order.
    pub tests: Vec<String>,

    /// The sum of the estimated runtimes of `tests`.
    pub estimated_time: Duration,
}

/// Packs `names` into at most `concurrency` groups, balanced by estimated
/// runtime.
///
/// The returned groups are a partition of the input: no test is omitted or
/// duplicated. Group order does not correlate with input order. An empty
/// input yields no groups; a concurrency limit of 1 yields a single group
/// with all tests in estimated-runtime order, longest first.
pub fn group_tests(
    names: &[String],
    concurrency: usize,
    history: &RuntimeHistory,
) -> Vec<RunGroup> {
    let concurrency = concurrency.max(1);

    let mut sorted: Vec<(&String, Duration)> = names
        .iter()
        .map(|name| (name, history.estimate(name)))
        .collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));

    // Ordered ascending by total time, so the group to extend is always the
    // first one.
    let mut groups: Vec<RunGroup> = Vec::new();

    for (name, time) in sorted {
        let extend_smallest = match groups.first() {
            Some(smallest) => {
                smallest.estimated_time + time <= GROUP_SOFT_CAP || groups.len() >= concurrency
            }
            None => false,
        };

        let mut group = if extend_smallest {
            groups.remove(0)
        } else {
            RunGroup::default()
        };
        group.tests.push(name.clone());
        group.estimated_time += time;

        let pos = groups
            .iter()
            .position(|g| g.estimated_time > group.estimated_time)
            .unwrap_or(groups.len());
        groups.insert(pos, group);
    }

    groups
}
