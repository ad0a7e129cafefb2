use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Settings shared by every engine operation.
///
/// Built once (from defaults, a config file, or CLI flags) and treated as
/// read-only by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database_url: Option<Url>,
    /// Migration roots, searched in order and merged by version.
    pub migrations_dirs: Vec<PathBuf>,
    pub migrations_table: String,
    pub schema_file: PathBuf,
    /// Resolve relative roots and the schema file against this directory
    /// instead of the process working directory.
    pub base_dir: Option<PathBuf>,
    pub wait_before: bool,
    #[serde(with = "humantime_serde")]
    pub wait_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,
    pub verbose: bool,
    pub auto_dump_schema: bool,
    pub auto_load_schema: bool,
    pub prune: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            migrations_dirs: vec![PathBuf::from("./db/migrations")],
            migrations_table: "schema_migrations".to_string(),
            schema_file: PathBuf::from("./db/schema.sql"),
            base_dir: None,
            wait_before: false,
            wait_interval: Duration::from_secs(1),
            wait_timeout: Duration::from_secs(60),
            verbose: false,
            auto_dump_schema: true,
            auto_load_schema: false,
            prune: false,
        }
    }
}

impl EngineConfig {
    pub fn with_url(url: Url) -> Self {
        Self {
            database_url: Some(url),
            ..Self::default()
        }
    }

    /// Resolve `path` against `base_dir` when it is relative.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn schema_path(&self) -> PathBuf {
        self.resolve(&self.schema_file)
    }
}
