use std::path::{Path, PathBuf};

use shiftdb_common::{Error, Result};
use tracing::{debug, info};

use crate::model::EngineConfig;

const CANDIDATES: &[&str] = &["shiftdb.toml", "shiftdb.yml", "shiftdb.yaml"];

/// Reads `EngineConfig` from TOML or YAML files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a config file, picking the format from its extension.
    pub fn load(path: &Path) -> Result<EngineConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config {}: {e}", path.display()))
        })?;
        let config = Self::parse(&contents, path)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Look for a well-known config file in `dir`. Returns `None` when there
    /// is none, so callers fall back to defaults.
    pub fn discover(dir: &Path) -> Result<Option<(PathBuf, EngineConfig)>> {
        for name in CANDIDATES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                let config = Self::load(&candidate)?;
                return Ok(Some((candidate, config)));
            }
        }
        debug!("no config file found in {}", dir.display());
        Ok(None)
    }

    fn parse(contents: &str, path: &Path) -> Result<EngineConfig> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => toml::from_str(contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}"))),
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }
}
