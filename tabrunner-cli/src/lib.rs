// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! The tabrunner command-line interface.
//!
//! A thin wrapper over [`tabrunner_runner`]: it discovers the working set,
//! runs it on remote workers through a subprocess-based invoker, prints one
//! line per failing test, and maps the outcome to a documented exit code.

mod invoker;
mod output;

pub use invoker::{InvokerSetupError, ProcessInvoker};

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use output::OutputOpts;
use std::sync::Arc;
use tabrunner_metadata::{ListRequest, TabrunnerExitCode};
use tabrunner_runner::{
    config::OrchestratorConfig,
    events::RunEventKind,
    history::RuntimeHistory,
    runner::{RemoteInvoker, RunCoordinator, RunOptions, invoke_with_retry},
};
use tracing::warn;

/// A distributed test runner for browser-hosted test suites.
#[derive(Debug, Parser)]
#[command(name = "tabrunner", version)]
pub struct TabrunnerApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run tests on the worker fleet.
    Run {
        #[clap(flatten)]
        worker: WorkerOpts,

        /// Only run tests whose full name contains this string.
        #[arg(long, value_name = "FILTER")]
        grep: Option<String>,

        /// Maximum attempts per test.
        #[arg(long, value_name = "N", default_value_t = 3)]
        deflake_limit: u32,

        /// Maximum concurrent worker invocations.
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,

        /// Explicit test names; the worker's listing is used when empty.
        #[arg(value_name = "TEST_NAME")]
        tests: Vec<String>,
    },

    /// List the test names the suite defines.
    List {
        #[clap(flatten)]
        worker: WorkerOpts,
    },
}

#[derive(Debug, clap::Args)]
struct WorkerOpts {
    /// Command invoked once per batch; receives the function name as its
    /// final argument and the request JSON on stdin.
    #[arg(long, value_name = "CMD", env = "TABRUNNER_WORKER_CMD")]
    worker_cmd: String,

    /// Directory for the runtime-history cache.
    #[arg(long, value_name = "DIR", default_value = ".tabrunner")]
    store_dir: Utf8PathBuf,
}

impl TabrunnerApp {
    /// Executes the parsed command, returning the process exit code.
    pub fn exec(self) -> Result<i32> {
        self.output.init();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("tabrunner-worker")
            .build()?;

        match self.command {
            Command::Run {
                worker,
                grep,
                deflake_limit,
                concurrency,
                tests,
            } => runtime.block_on(run(worker, grep, deflake_limit, concurrency, tests)),
            Command::List { worker } => runtime.block_on(list(worker)),
        }
    }
}

async fn run(
    worker: WorkerOpts,
    grep: Option<String>,
    deflake_limit: u32,
    concurrency: Option<usize>,
    tests: Vec<String>,
) -> Result<i32> {
    let invoker = match ProcessInvoker::new(&worker.worker_cmd) {
        Ok(invoker) => Arc::new(invoker),
        Err(error) => {
            eprintln!("error: {error}");
            return Ok(TabrunnerExitCode::SETUP_ERROR);
        }
    };

    let history = load_history(&worker.store_dir);
    let mut config = OrchestratorConfig::new(worker.store_dir.clone());
    config.deflake_limit = deflake_limit;
    if let Some(concurrency) = concurrency {
        config.remote_concurrency = concurrency;
    }
    let session_id = config.session_id;

    let mut working_set = if tests.is_empty() {
        match invoke_with_retry(|| invoker.list_tests(ListRequest { session_id })).await {
            Ok(names) => names,
            Err(error) => {
                eprintln!("error: listing tests failed: {error}");
                return Ok(TabrunnerExitCode::TEST_LIST_FAILED);
            }
        }
    } else {
        tests
    };
    if let Some(filter) = &grep {
        working_set.retain(|name| name.contains(filter.as_str()));
    }
    if working_set.is_empty() {
        println!("no tests to run");
        return Ok(TabrunnerExitCode::NO_TESTS_RUN);
    }

    let mut coordinator = RunCoordinator::new(config, history, print_event);
    coordinator.attach_invoker(invoker);

    let options = RunOptions {
        grep,
        ..RunOptions::default()
    };
    let stats = match coordinator.run_to_completion(working_set, options).await {
        Ok(stats) => stats,
        Err(error) => {
            eprintln!("error: {error}");
            return Ok(TabrunnerExitCode::SETUP_ERROR);
        }
    };

    Ok(if stats.is_success() {
        TabrunnerExitCode::OK
    } else {
        TabrunnerExitCode::TEST_RUN_FAILED
    })
}

async fn list(worker: WorkerOpts) -> Result<i32> {
    let invoker = match ProcessInvoker::new(&worker.worker_cmd) {
        Ok(invoker) => invoker,
        Err(error) => {
            eprintln!("error: {error}");
            return Ok(TabrunnerExitCode::SETUP_ERROR);
        }
    };

    let session_id = OrchestratorConfig::new(worker.store_dir).session_id;
    match invoke_with_retry(|| invoker.list_tests(ListRequest { session_id })).await {
        Ok(names) => {
            for name in names {
                println!("{name}");
            }
            Ok(TabrunnerExitCode::OK)
        }
        Err(error) => {
            eprintln!("error: listing tests failed: {error}");
            Ok(TabrunnerExitCode::TEST_LIST_FAILED)
        }
    }
}

/// The runtime history is only a scheduling hint, so a corrupt or unreadable
/// cache degrades to an empty one instead of failing the run.
fn load_history(store_dir: &Utf8PathBuf) -> RuntimeHistory {
    match RuntimeHistory::load(store_dir) {
        Ok(history) => history,
        Err(error) => {
            warn!(%error, "could not load runtime history, starting empty");
            RuntimeHistory::empty(store_dir)
        }
    }
}

fn print_event(event: tabrunner_runner::events::RunEvent) {
    match event.kind {
        RunEventKind::RunStarted {
            initial_run_count,
            worker_count,
            ..
        } => {
            eprintln!("running {initial_run_count} tests on {worker_count} workers");
        }
        RunEventKind::TestFinished { result, .. } => {
            if let Some(error) = &result.error {
                println!(
                    "FAIL {} {} (tried {} times)",
                    result.full_name, error, result.attempts
                );
            } else if result.is_flaky() {
                println!(
                    "flaky {} (passed after {} attempts)",
                    result.full_name, result.attempts
                );
            }
        }
        RunEventKind::InvocationFailed {
            batch_id,
            error,
            test_count,
        } => {
            eprintln!(
                "infrastructure failure in batch {batch_id} ({test_count} tests): {error}"
            );
        }
        RunEventKind::RunFinished { elapsed, run_stats, .. } => {
            eprintln!(
                "{} of {} tests failed ({} flaky) in {:.1}s",
                run_stats.failed,
                run_stats.finished_count,
                run_stats.flaky,
                elapsed.as_secs_f64(),
            );
        }
    }
}
