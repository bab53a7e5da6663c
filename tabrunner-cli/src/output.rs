// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Args;
use tracing_subscriber::filter::LevelFilter;

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Verbose output
    #[arg(long, short, global = true, env = "TABRUNNER_VERBOSE")]
    pub(crate) verbose: bool,
}

impl OutputOpts {
    /// Initializes the tracing subscriber on stderr, keeping stdout for the
    /// per-test result lines.
    pub(crate) fn init(self) {
        let level = if self.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}
