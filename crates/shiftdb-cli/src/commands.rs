use std::process::ExitCode;

use anyhow::{Context, Result};
use shiftdb_core::{Engine, StatusReport};

use crate::cli::{Commands, StatusArgs};

/// Run one command, returning the process exit code.
pub fn execute(command: Commands, engine: &Engine) -> Result<ExitCode> {
    match command {
        Commands::New { name } => {
            engine.new_migration(&name)?;
        }
        Commands::Up => engine.create_and_migrate()?,
        Commands::Create => engine.create()?,
        Commands::Drop => engine.drop()?,
        Commands::Migrate => engine.migrate()?,
        Commands::Rollback => engine.rollback()?,
        Commands::Status(args) => return status(engine, &args),
        Commands::Dump => engine.dump_schema()?,
        Commands::Load => engine.load_schema()?,
        Commands::Wait => engine.wait()?,
    }
    Ok(ExitCode::SUCCESS)
}

fn status(engine: &Engine, args: &StatusArgs) -> Result<ExitCode> {
    let report = engine.status()?;

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("failed to encode status")?;
        println!("{json}");
    } else if args.quiet {
        println!("{}", report.pending);
    } else {
        print!("{}", render(&report));
    }

    if args.exit_code && report.pending > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn render(report: &StatusReport) -> String {
    let mut out = String::new();
    for migration in &report.migrations {
        let mark = if migration.applied { "[X]" } else { "[ ]" };
        out.push_str(&format!("{mark} {}\n", migration.file_name));
    }
    out.push_str(&format!(
        "\nApplied: {}\nPending: {}\n",
        report.applied, report.pending
    ));
    out
}
