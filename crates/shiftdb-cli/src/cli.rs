//! CLI argument definitions using clap.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use shiftdb_config::{ConfigLoader, EngineConfig};
use tracing::debug;
use url::Url;

/// shiftdb - lightweight, framework-agnostic SQL schema migrations
#[derive(Parser, Debug)]
#[command(name = "shiftdb")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every command. Each one overrides the matching field
/// of the config file.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Config file (default: shiftdb.toml, shiftdb.yml or shiftdb.yaml in the current directory)
    #[arg(short = 'c', long, env = "SHIFTDB_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Database connection URL
    #[arg(short = 'u', long, env = "DATABASE_URL", global = true)]
    pub url: Option<Url>,

    /// Directory containing migration files; repeat or comma-separate for several
    #[arg(
        short = 'd',
        long = "migrations-dir",
        env = "SHIFTDB_MIGRATIONS_DIR",
        value_delimiter = ',',
        global = true
    )]
    pub migrations_dirs: Vec<PathBuf>,

    /// Table that records applied migrations
    #[arg(long, env = "SHIFTDB_MIGRATIONS_TABLE", global = true)]
    pub migrations_table: Option<String>,

    /// Path of the schema snapshot
    #[arg(short = 's', long, env = "SHIFTDB_SCHEMA_FILE", global = true)]
    pub schema_file: Option<PathBuf>,

    /// Don't write the schema file after migrate or rollback
    #[arg(long, env = "SHIFTDB_NO_DUMP_SCHEMA", global = true)]
    pub no_dump_schema: bool,

    /// Load the schema file into an empty database before migrating
    #[arg(long, env = "SHIFTDB_LOAD_SCHEMA", global = true)]
    pub load_schema: bool,

    /// Delete migration files captured by the schema file after dumping
    #[arg(long, env = "SHIFTDB_PRUNE", global = true)]
    pub prune: bool,

    /// Wait for the database to become available first
    #[arg(long, env = "SHIFTDB_WAIT", global = true)]
    pub wait: bool,

    /// How long to wait for the database (e.g. "30s", "2m")
    #[arg(long, env = "SHIFTDB_WAIT_TIMEOUT", value_parser = humantime::parse_duration, global = true)]
    pub wait_timeout: Option<Duration>,

    /// Print rows affected per statement and raise the log level to info
    #[arg(short, long, env = "SHIFTDB_VERBOSE", global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a new migration file
    #[command(visible_alias = "n")]
    New {
        /// Name appended to the timestamp, e.g. create_users
        name: String,
    },

    /// Create the database if necessary, then migrate
    Up,

    /// Create the database
    Create,

    /// Drop the database
    Drop,

    /// Apply all pending migrations
    Migrate,

    /// Roll back the most recent migration
    #[command(visible_alias = "down")]
    Rollback,

    /// List applied and pending migrations
    Status(StatusArgs),

    /// Write the database schema to the schema file
    Dump,

    /// Load the schema file into the database
    Load,

    /// Wait for the database to become available
    Wait,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Exit with a non-zero code when migrations are pending
    #[arg(long)]
    pub exit_code: bool,

    /// Only print the number of pending migrations
    #[arg(short, long, conflicts_with = "json")]
    pub quiet: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl GlobalArgs {
    /// Config file values with flags layered on top.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let base = match &self.config {
            Some(path) => ConfigLoader::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => match ConfigLoader::discover(Path::new("."))? {
                Some((path, config)) => {
                    debug!("using config {}", path.display());
                    config
                }
                None => EngineConfig::default(),
            },
        };
        Ok(self.apply(base))
    }

    fn apply(&self, mut config: EngineConfig) -> EngineConfig {
        if let Some(url) = &self.url {
            config.database_url = Some(url.clone());
        }
        if !self.migrations_dirs.is_empty() {
            config.migrations_dirs = self.migrations_dirs.clone();
        }
        if let Some(table) = &self.migrations_table {
            config.migrations_table = table.clone();
        }
        if let Some(schema) = &self.schema_file {
            config.schema_file = schema.clone();
        }
        if let Some(timeout) = self.wait_timeout {
            config.wait_timeout = timeout;
        }
        if self.no_dump_schema {
            config.auto_dump_schema = false;
        }
        config.auto_load_schema |= self.load_schema;
        config.prune |= self.prune;
        config.wait_before |= self.wait;
        config.verbose |= self.verbose;
        config
    }
}
