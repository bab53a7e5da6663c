// Copyright (c) The tabrunner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use color_eyre::Result;
use tabrunner_cli::TabrunnerApp;

fn main() -> Result<()> {
    color_eyre::install()?;

    let app = TabrunnerApp::parse();
    match app.exec() {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("error: {error:?}");
            std::process::exit(1)
        }
    }
}
