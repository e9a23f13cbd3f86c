//! Updraft CLI - standalone updater
//!
//! Checks a feed for updates and, with `--update`, downloads and applies
//! them. The exit code tells the caller how the run ended; see
//! [`error::exit_code`].

mod args;
mod error;
mod progress;
mod runner;

use std::process;

use clap::Parser;

use args::Args;
use runner::CliRunner;

fn main() {
    let args = Args::parse();
    let result = CliRunner::new(args).and_then(CliRunner::run);
    let code = match result {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    process::exit(code);
}
