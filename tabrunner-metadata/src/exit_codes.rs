// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `tabrunner` failures.
///
/// Runs may fail for a variety of reasons. This structure documents the exit
/// codes that may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum TabrunnerExitCode {}

impl TabrunnerExitCode {
    /// No errors occurred and tabrunner exited normally.
    pub const OK: i32 = 0;

    /// One or more tests failed after all deflake attempts.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// Listing test names from a worker produced an error.
    pub const TEST_LIST_FAILED: i32 = 104;

    /// A user issue happened while setting up a tabrunner invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;
}
