use std::io;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use shiftdb_common::{Error, Result};
use tracing::debug;

use crate::fs::{MigrationFs, clean};
use crate::migration::Migration;

static FILE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)_.*\.sql$").expect("file name pattern is valid"));

/// Enumerates migration files across one or more roots.
pub struct MigrationSource {
    fs: Arc<dyn MigrationFs>,
    overlay: bool,
}

impl MigrationSource {
    pub fn new(fs: Arc<dyn MigrationFs>, overlay: bool) -> Self {
        Self { fs, overlay }
    }

    /// Every `<digits>_<name>.sql` file directly under each root, merged
    /// into one sequence ordered by version.
    ///
    /// Other entries are skipped. The same version appearing twice, in one
    /// root or across roots, is a configuration error.
    pub fn discover(&self, roots: &[PathBuf]) -> Result<Vec<Migration>> {
        let mut migrations = Vec::new();

        for root in roots {
            let dir = clean(root);
            let names = self.fs.list_files(&dir).map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("could not find migrations directory {}: {e}", root.display()),
                )
            })?;

            for name in names {
                let Some(caps) = FILE_NAME.captures(&name) else {
                    debug!("skipping non-migration file {name}");
                    continue;
                };
                let version = caps[1].to_string();
                let file_path = dir.join(&name);
                migrations.push(Migration::new(
                    version,
                    name,
                    file_path,
                    Arc::clone(&self.fs),
                    self.overlay,
                ));
            }
        }

        migrations.sort_by(|a, b| a.version.cmp(&b.version));

        if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
            return Err(Error::Config(format!(
                "duplicate migration version {}: {} and {}",
                pair[0].version,
                pair[0].file_path.display(),
                pair[1].file_path.display()
            )));
        }

        Ok(migrations)
    }
}
