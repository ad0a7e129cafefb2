//! Schema snapshots: dumping the schema plus ledger to a file, loading it
//! back, and pruning migration files the snapshot makes redundant.

use std::fs;
use std::io;

use shiftdb_common::Result;
use tracing::{debug, info};

use crate::driver::Driver;
use crate::engine::Engine;
use crate::store::StateStore;

impl Engine {
    /// Write the driver's schema export to the configured schema file,
    /// then prune migration files when enabled.
    pub fn dump_schema(&self) -> Result<()> {
        let driver = self.ready_driver()?;
        self.dump_with(driver.as_ref())
    }

    /// Execute the schema file against the database. Meant for a freshly
    /// created, empty database.
    pub fn load_schema(&self) -> Result<()> {
        let driver = self.ready_driver()?;
        self.load_with(driver.as_ref())
    }

    pub(crate) fn dump_with(&self, driver: &dyn Driver) -> Result<()> {
        let schema = driver.dump_schema()?;
        let path = self.config().schema_path();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        self.say(format_args!("Writing: {}", path.display()));
        fs::write(&path, schema).map_err(|e| {
            io::Error::new(e.kind(), format!("failed to write {}: {e}", path.display()))
        })?;
        info!("schema written to {}", path.display());

        if self.config().prune {
            self.prune_with(driver)?;
        }
        Ok(())
    }

    pub(crate) fn load_with(&self, driver: &dyn Driver) -> Result<()> {
        let path = self.config().schema_path();
        let sql = fs::read_to_string(&path).map_err(|e| {
            io::Error::new(e.kind(), format!("failed to read {}: {e}", path.display()))
        })?;
        info!("loading schema from {}", path.display());
        driver.load_schema(&sql)
    }

    /// Delete source files for every version the ledger records. Those
    /// versions are all captured by the snapshot just written, so anything
    /// unapplied or newer stays.
    fn prune_with(&self, driver: &dyn Driver) -> Result<()> {
        let applied = {
            let mut conn = driver.open()?;
            StateStore::new(conn.as_mut()).applied_or_empty()?
        };
        let Some(highest) = applied.last() else {
            debug!("nothing applied, nothing to prune");
            return Ok(());
        };

        for migration in self.discover()? {
            if migration.version > *highest || !applied.contains(&migration.version) {
                continue;
            }
            self.say(format_args!("Pruning: {}", migration.file_name));
            migration.remove()?;
        }
        Ok(())
    }
}
