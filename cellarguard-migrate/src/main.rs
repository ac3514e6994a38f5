//! Cellarguard Migration CLI Tool
//!
//! Revision management, the pre-commit guard, the dependency compatibility
//! check and the local migration harness. Exit code 0 on success, 1 on any
//! failure.

use cellarguard_migrate::{commands, Cli};
use clap::Parser;
use colored::Colorize;
use std::process;

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match commands::run(&cli) {
        Ok(true) => process::exit(0),
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{} Error: {:#}", "❌".red(), e);
            process::exit(1);
        }
    }
}
