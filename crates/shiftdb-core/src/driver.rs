use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use shiftdb_common::{Error, Result};
use url::Url;

/// Statement execution shared by plain connections and open transactions.
pub trait Executor {
    /// Run one or more statements and return the affected row count of each.
    ///
    /// How the text is split into statements is up to the driver. Comment
    /// lines, including migration markers, must be no-ops.
    fn execute(&mut self, sql: &str) -> Result<Vec<u64>>;

    fn insert_migration(&mut self, version: &str) -> Result<()>;

    fn delete_migration(&mut self, version: &str) -> Result<()>;
}

/// An open connection to the target database. Closed on drop.
pub trait Connection: Executor {
    /// Run `body` inside a transaction: commit when it succeeds, roll back
    /// before returning its error otherwise.
    fn transaction(
        &mut self,
        body: &mut dyn FnMut(&mut dyn Executor) -> Result<()>,
    ) -> Result<()>;

    /// Create the ledger table if it is absent.
    fn ensure_migrations_table(&mut self) -> Result<()>;

    fn migrations_table_exists(&mut self) -> Result<bool>;

    /// Applied versions, highest first, limited to `limit` when given.
    fn select_migrations(&mut self, limit: Option<usize>) -> Result<BTreeSet<String>>;
}

/// Backend-specific capabilities the engine is written against.
pub trait Driver: Send + Sync {
    fn open(&self) -> Result<Box<dyn Connection>>;

    /// Check that the database server is reachable. Failures should be
    /// [`Error::Connection`] carrying the transport diagnostic.
    fn ping(&self) -> Result<()>;

    fn create_database(&self) -> Result<()>;

    fn drop_database(&self) -> Result<()>;

    fn database_exists(&self) -> Result<bool>;

    /// Export the schema plus statements that repopulate the ledger.
    fn dump_schema(&self) -> Result<String>;

    /// Execute a snapshot produced by [`Driver::dump_schema`].
    fn load_schema(&self, sql: &str) -> Result<()>;
}

/// What a driver factory receives.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub url: Url,
    pub migrations_table: String,
    /// Anchor for file-based databases given by a relative path.
    pub base_dir: Option<PathBuf>,
}

type Factory = Arc<dyn Fn(&DriverConfig) -> Result<Box<dyn Driver>> + Send + Sync>;

/// Maps URL schemes to driver factories.
///
/// Starts empty; backends are added with [`DriverRegistry::register`] at
/// startup.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, Factory>,
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("schemes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, scheme: &str, factory: F) -> &mut Self
    where
        F: Fn(&DriverConfig) -> Result<Box<dyn Driver>> + Send + Sync + 'static,
    {
        self.factories.insert(scheme.to_string(), Arc::new(factory));
        self
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn driver(&self, config: &DriverConfig) -> Result<Box<dyn Driver>> {
        let scheme = config.url.scheme();
        let factory = self
            .factories
            .get(scheme)
            .ok_or_else(|| Error::unsupported_driver(scheme))?;
        factory(config)
    }
}
