// SPDX-License-Identifier: Apache-2.0

//! Gatecheck CLI tool.

#![allow(clippy::print_stdout)]

use clap::Parser;

use gatecheck_common::{ConsoleLogger, Logger, QuietLogger};

use crate::cli::{Cli, Commands};

mod cli;
mod evaluate;
mod transpile;

fn main() {
    let cli = Cli::parse();

    let error_code = if cli.quiet {
        let log = QuietLogger::new();
        run_command(&cli, log)
    } else {
        let log = ConsoleLogger::new(cli.debug);
        run_command(&cli, log)
    };

    #[allow(clippy::exit)] // Exit the process with a specific error code.
    std::process::exit(error_code);
}

fn run_command(cli: &Cli, log: impl Logger + Sync + Clone) -> i32 {
    match &cli.command {
        Some(Commands::Transpile(args)) => transpile::command(&log, args),
        Some(Commands::Eval(args)) => evaluate::command(&log, args),
        None => 0,
    }
}
