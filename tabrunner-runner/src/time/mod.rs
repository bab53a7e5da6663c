// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time tracking for test runs.

mod stopwatch;

pub(crate) use stopwatch::*;
