//! shiftdb CLI
//!
//! Applies, rolls back and inspects SQL schema migrations.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use shiftdb_core::Engine;

mod cli;
mod commands;

use cli::Cli;

fn main() -> ExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.global.verbose, cli.global.log_json);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.global.engine_config()?;
    let engine = Engine::new(config, shiftdb_db::default_registry());
    commands::execute(cli.command, &engine)
}

/// `RUST_LOG` wins; otherwise `--verbose` raises the default level from
/// warn to info.
fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "info" } else { "warn" }));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
