// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [tabrunner](https://crates.io/crates/tabrunner-cli),
//! a distributed test-execution orchestrator for browser-hosted test suites.
//!
//! Tests run inside headless-browser tabs, either locally or on a fleet of
//! ephemeral remote workers. This crate contains the orchestration engine:
//! the per-tab session state machine, the runtime-model batch scheduler, the
//! remote deflake loop, and the generation-fenced run coordinator. Actual
//! browser control and remote invocation are consumed through the traits in
//! [`session::channel`] and [`runner::remote`].

pub mod config;
pub mod errors;
pub mod events;
pub mod history;
pub mod runner;
pub mod schedule;
pub mod session;
mod time;
