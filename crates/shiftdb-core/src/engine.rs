use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use shiftdb_common::{Error, Result};
use shiftdb_config::EngineConfig;
use tracing::{debug, info, warn};

use crate::driver::{Connection, Driver, DriverConfig, DriverRegistry, Executor};
use crate::fs::{MigrationFs, OsFs, clean};
use crate::migration::{Block, Migration};
use crate::source::MigrationSource;
use crate::store::StateStore;

const MIGRATION_TEMPLATE: &str = "-- migrate:up\n\n\n-- migrate:down\n\n";

/// Runs migration operations against the database named by an
/// [`EngineConfig`].
///
/// Every operation opens its own connection and releases it before
/// returning. Operations block the caller and must not run concurrently on
/// the same database.
pub struct Engine {
    config: EngineConfig,
    registry: DriverRegistry,
    fs: Option<Arc<dyn MigrationFs>>,
    out: Mutex<Box<dyn Write + Send>>,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    fn record<E: Executor + ?Sized>(self, exec: &mut E, version: &str) -> Result<()> {
        match self {
            Direction::Up => StateStore::record_applied(exec, version),
            Direction::Down => StateStore::record_reverted(exec, version),
        }
    }
}

/// One line of a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: String,
    pub file_name: String,
    pub file_path: PathBuf,
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub migrations: Vec<MigrationStatus>,
    pub applied: usize,
    pub pending: usize,
}

impl Engine {
    pub fn new(config: EngineConfig, registry: DriverRegistry) -> Self {
        Self {
            config,
            registry,
            fs: None,
            out: Mutex::new(Box::new(io::stdout())),
        }
    }

    /// Read migrations from `fs` instead of the real filesystem.
    pub fn with_fs(mut self, fs: Arc<dyn MigrationFs>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Send progress lines somewhere other than stdout.
    pub fn with_output(mut self, out: Box<dyn Write + Send>) -> Self {
        self.out = Mutex::new(out);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    /// Resolve the driver for the configured URL.
    pub fn driver(&self) -> Result<Box<dyn Driver>> {
        let url = self
            .config
            .database_url
            .clone()
            .ok_or_else(Error::missing_url)?;
        self.registry.driver(&DriverConfig {
            url,
            migrations_table: self.config.migrations_table.clone(),
            base_dir: self.config.base_dir.clone(),
        })
    }

    pub(crate) fn say(&self, line: impl fmt::Display) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{line}") {
            warn!("failed to write progress output: {e}");
        }
    }

    /// The driver, after waiting for the database when `wait_before` is set.
    pub(crate) fn ready_driver(&self) -> Result<Box<dyn Driver>> {
        let driver = self.driver()?;
        if self.config.wait_before {
            self.wait_for(driver.as_ref())?;
        }
        Ok(driver)
    }

    /// The filesystem migrations live in, and whether it is an overlay.
    fn migration_fs(&self) -> (Arc<dyn MigrationFs>, bool) {
        match &self.fs {
            Some(fs) => (Arc::clone(fs), true),
            None => (Arc::new(OsFs::new(self.config.base_dir.clone())), false),
        }
    }

    pub(crate) fn discover(&self) -> Result<Vec<Migration>> {
        let (fs, overlay) = self.migration_fs();
        MigrationSource::new(fs, overlay).discover(&self.config.migrations_dirs)
    }

    /// Block until the database answers a ping, or fail with the last
    /// connection error once `wait_timeout` has elapsed.
    pub fn wait(&self) -> Result<()> {
        let driver = self.driver()?;
        self.wait_for(driver.as_ref())
    }

    fn wait_for(&self, driver: &dyn Driver) -> Result<()> {
        let started = Instant::now();
        let mut announced = false;
        loop {
            match driver.ping() {
                Ok(()) => {
                    if announced {
                        info!(elapsed = ?started.elapsed(), "database is ready");
                    }
                    return Ok(());
                }
                Err(err) => {
                    if started.elapsed() >= self.config.wait_timeout {
                        warn!("gave up waiting for database: {err}");
                        return Err(err);
                    }
                    if !announced {
                        self.say("Waiting for database...");
                        announced = true;
                    }
                    debug!("database not ready: {err}");
                }
            }
            thread::sleep(self.config.wait_interval);
        }
    }

    pub fn create(&self) -> Result<()> {
        let driver = self.ready_driver()?;
        info!("creating database");
        driver.create_database()
    }

    pub fn drop(&self) -> Result<()> {
        let driver = self.ready_driver()?;
        info!("dropping database");
        driver.drop_database()
    }

    /// Create the database if it does not exist, then migrate it.
    pub fn create_and_migrate(&self) -> Result<()> {
        let exists = self.ready_driver()?.database_exists()?;
        if !exists {
            self.create()?;
        }
        self.migrate()
    }

    /// Apply every pending migration in version order.
    ///
    /// Stops at the first failure; migrations applied earlier in the same
    /// call stay applied.
    pub fn migrate(&self) -> Result<()> {
        let driver = self.ready_driver()?;

        if self.config.auto_load_schema {
            self.load_if_fresh(driver.as_ref())?;
        }

        let migrations = self.discover()?;
        let mut conn = driver.open()?;
        let mut store = StateStore::new(conn.as_mut());
        store.ensure_table()?;
        let applied = store.select_applied(None)?;

        let pending: Vec<&Migration> = migrations
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .collect();
        if pending.is_empty() {
            info!("no pending migrations");
        }

        for migration in pending {
            self.say(format_args!("Applying: {}", migration.file_name));
            info!(
                version = %migration.version,
                path = %migration.file_path.display(),
                "applying migration"
            );
            let parsed = migration.parse()?;
            self.run_block(conn.as_mut(), migration, &parsed.up, Direction::Up)?;
        }
        drop(conn);

        if self.config.auto_dump_schema {
            self.dump_with(driver.as_ref())?;
        }
        Ok(())
    }

    /// Reverse the single most recently applied migration.
    pub fn rollback(&self) -> Result<()> {
        let driver = self.ready_driver()?;
        let mut conn = driver.open()?;

        let latest = StateStore::new(conn.as_mut())
            .latest()?
            .ok_or(Error::NoMigrationsApplied)?;
        let migration = self
            .discover()?
            .into_iter()
            .find(|m| m.version == latest)
            .ok_or(Error::MigrationNotFound(latest))?;

        self.say(format_args!("Rolling back: {}", migration.file_name));
        info!(
            version = %migration.version,
            path = %migration.file_path.display(),
            "rolling back migration"
        );
        let parsed = migration.parse()?;
        self.run_block(conn.as_mut(), &migration, &parsed.down, Direction::Down)?;
        drop(conn);

        if self.config.auto_dump_schema {
            self.dump_with(driver.as_ref())?;
        }
        Ok(())
    }

    /// Discovered migrations with their applied flag read from the ledger.
    /// Never creates the ledger table.
    pub fn find_migrations(&self) -> Result<Vec<Migration>> {
        let driver = self.ready_driver()?;
        let applied = {
            let mut conn = driver.open()?;
            StateStore::new(conn.as_mut()).applied_or_empty()?
        };

        let mut migrations = self.discover()?;
        for migration in &mut migrations {
            migration.applied = applied.contains(&migration.version);
        }
        Ok(migrations)
    }

    pub fn status(&self) -> Result<StatusReport> {
        let migrations: Vec<MigrationStatus> = self
            .find_migrations()?
            .into_iter()
            .map(|m| MigrationStatus {
                version: m.version,
                file_name: m.file_name,
                file_path: m.file_path,
                applied: m.applied,
            })
            .collect();
        let applied = migrations.iter().filter(|m| m.applied).count();
        Ok(StatusReport {
            pending: migrations.len() - applied,
            applied,
            migrations,
        })
    }

    /// Write an empty migration named `<UTC timestamp>_<name>.sql` into the
    /// first migrations directory of the migration filesystem.
    ///
    /// Returns the path on disk, or the overlay path when an overlay is set.
    pub fn new_migration(&self, name: &str) -> Result<PathBuf> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Config(
                "please specify a name for the new migration".into(),
            ));
        }
        if name.contains(['/', '\\']) {
            return Err(Error::Config(format!(
                "migration name must not contain path separators: {name}"
            )));
        }
        let root = self
            .config
            .migrations_dirs
            .first()
            .ok_or_else(|| Error::Config("no migrations directory configured".into()))?;

        let file_name = format!("{}_{name}.sql", Utc::now().format("%Y%m%d%H%M%S"));
        let path = clean(root).join(file_name);
        let (fs, overlay) = self.migration_fs();
        fs.create_file(&path, MIGRATION_TEMPLATE).map_err(|e| {
            io::Error::new(e.kind(), format!("failed to create {}: {e}", path.display()))
        })?;

        let path = if overlay {
            path
        } else {
            self.config.resolve(&path)
        };
        self.say(format_args!("Creating migration: {}", path.display()));
        Ok(path)
    }

    fn load_if_fresh(&self, driver: &dyn Driver) -> Result<()> {
        let schema = self.config.schema_path();
        if !schema.exists() {
            debug!("no schema file at {}, skipping auto-load", schema.display());
            return Ok(());
        }

        let fresh = {
            let mut conn = driver.open()?;
            StateStore::new(conn.as_mut()).is_empty()?
        };
        if fresh {
            info!("loading schema from {} into empty database", schema.display());
            self.load_with(driver)?;
        }
        Ok(())
    }

    fn run_block(
        &self,
        conn: &mut dyn Connection,
        migration: &Migration,
        block: &Block,
        direction: Direction,
    ) -> Result<()> {
        let file = migration.file_name.as_str();
        let version = migration.version.as_str();

        if block.options.transaction() {
            return conn.transaction(&mut |tx: &mut dyn Executor| {
                self.execute_block(tx, &block.sql)
                    .map_err(|e| e.in_migration(file, true))?;
                direction.record(tx, version)
            });
        }

        warn!(file, "running migration outside a transaction");
        self.execute_block(conn, &block.sql)
            .map_err(|e| e.in_migration(file, false))?;
        direction.record(conn, version)
    }

    fn execute_block<E: Executor + ?Sized>(&self, exec: &mut E, sql: &str) -> Result<()> {
        for rows in exec.execute(sql)? {
            debug!(rows, "statement executed");
            if self.config.verbose {
                self.say(format_args!("Rows affected: {rows}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;
    use url::Url;

    use super::*;
    use crate::fs::MemFs;
    use crate::testing::{FakeDriver, REFUSED, SharedBuffer};

    const USERS: &str = "-- migrate:up\ncreate table users (id int);\ninsert into users values (1);\n\
                         -- migrate:down\ndrop table users;\n";
    const POSTS: &str = "-- migrate:up\ncreate table posts (id int);\n-- migrate:down\ndrop table posts;\n";

    struct Harness {
        engine: Engine,
        fake: FakeDriver,
        fs: Arc<MemFs>,
        out: SharedBuffer,
        dir: TempDir,
    }

    fn harness(files: &[(&str, &str)]) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeDriver::new();
        let mut registry = DriverRegistry::new();
        registry.register("fake", fake.factory());

        let mut config = EngineConfig::with_url(Url::parse("fake://localhost/app").unwrap());
        config.migrations_dirs = vec![PathBuf::from("db/migrations")];
        config.schema_file = dir.path().join("db/schema.sql");
        config.auto_dump_schema = false;

        let fs = Arc::new(MemFs::new());
        for (name, contents) in files {
            fs.insert(format!("db/migrations/{name}"), *contents);
        }
        let out = SharedBuffer::default();
        let engine = Engine::new(config, registry)
            .with_fs(fs.clone())
            .with_output(Box::new(out.clone()));

        Harness {
            engine,
            fake,
            fs,
            out,
            dir,
        }
    }

    fn standard() -> Harness {
        harness(&[("001_users.sql", USERS), ("002_posts.sql", POSTS)])
    }

    fn ledger(h: &Harness) -> Vec<String> {
        h.fake.state().ledger.iter().cloned().collect()
    }

    #[test]
    fn missing_url_is_a_configuration_error() {
        let engine = Engine::new(EngineConfig::default(), DriverRegistry::new());
        let err = engine.migrate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid url, have you set your --url flag or DATABASE_URL environment variable?"
        );
    }

    #[test]
    fn unknown_scheme_is_a_configuration_error() {
        let config = EngineConfig::with_url(Url::parse("foo://bar").unwrap());
        let engine = Engine::new(config, DriverRegistry::new());
        let err = engine.driver().err().unwrap();
        assert_eq!(err.to_string(), "unsupported driver: foo");
    }

    #[test]
    fn migrate_applies_pending_in_version_order() {
        let h = standard();
        h.engine.migrate().unwrap();

        let state = h.fake.state();
        assert_eq!(
            state.executed,
            vec![
                "create table users (id int)",
                "insert into users values (1)",
                "create table posts (id int)",
            ]
        );
        assert_eq!(state.commits, 2);
        drop(state);
        assert_eq!(ledger(&h), vec!["001", "002"]);
        assert_eq!(h.out.contents(), "Applying: 001_users.sql\nApplying: 002_posts.sql\n");
    }

    #[test]
    fn migrate_twice_executes_nothing_new() {
        let h = standard();
        h.engine.migrate().unwrap();
        let executed = h.fake.state().executed.len();

        h.engine.migrate().unwrap();

        let state = h.fake.state();
        assert_eq!(state.executed.len(), executed);
        assert_eq!(state.commits, 2);
        drop(state);
        assert_eq!(ledger(&h), vec!["001", "002"]);
    }

    #[test]
    fn failing_migration_halts_and_rolls_back() {
        let h = harness(&[
            ("001_users.sql", USERS),
            (
                "002_broken.sql",
                "-- migrate:up\ncreate table posts (id int);\nfail here;\n-- migrate:down\n",
            ),
            ("003_posts.sql", POSTS),
        ]);

        let err = h.engine.migrate().unwrap_err();
        assert!(matches!(err, Error::Execution { ref file, .. } if file == "002_broken.sql"));

        let state = h.fake.state();
        assert_eq!(state.rollbacks, 1);
        assert!(!state.executed.iter().any(|s| s.contains("posts")));
        drop(state);
        assert_eq!(ledger(&h), vec!["001"]);
    }

    #[test]
    fn non_transactional_failure_keeps_partial_effects() {
        let h = harness(&[(
            "001_partial.sql",
            "-- migrate:up transaction:false\ncreate table a (id int);\nfail;\n-- migrate:down\n",
        )]);

        let err = h.engine.migrate().unwrap_err();
        assert!(matches!(err, Error::PartialExecution { .. }));

        let state = h.fake.state();
        assert_eq!(state.executed, vec!["create table a (id int)"]);
        assert_eq!(state.rollbacks, 0);
        assert!(state.ledger.is_empty());
    }

    #[test]
    fn non_transactional_success_records_version() {
        let h = harness(&[(
            "001_enum.sql",
            "-- migrate:up transaction:false\nalter type colors add value 'x';\n-- migrate:down\n",
        )]);

        h.engine.migrate().unwrap();
        assert_eq!(h.fake.state().commits, 0);
        assert_eq!(ledger(&h), vec!["001"]);
    }

    #[test]
    fn verbose_mode_reports_rows_per_statement() {
        let mut h = standard();
        h.engine.config_mut().verbose = true;

        h.engine.migrate().unwrap();
        h.engine.rollback().unwrap();

        let out = h.out.contents();
        assert!(out.contains(
            "Applying: 001_users.sql\nRows affected: 0\nRows affected: 1\n\
             Applying: 002_posts.sql\nRows affected: 0\n"
        ));
        assert!(out.contains("Rolling back: 002_posts.sql\nRows affected: 0\n"));
    }

    #[test]
    fn rollback_without_applied_migrations_changes_nothing() {
        let h = standard();
        let err = h.engine.rollback().unwrap_err();
        assert!(matches!(err, Error::NoMigrationsApplied));
        assert_eq!(
            err.to_string(),
            "can't rollback: no migrations have been applied"
        );

        let state = h.fake.state();
        assert!(!state.ledger_table);
        assert!(state.executed.is_empty());
    }

    #[test]
    fn rollback_reverts_only_the_latest_migration() {
        let h = standard();
        h.engine.migrate().unwrap();

        h.engine.rollback().unwrap();
        assert_eq!(ledger(&h), vec!["001"]);
        assert_eq!(
            h.fake.state().executed.last().map(String::as_str),
            Some("drop table posts")
        );

        h.engine.rollback().unwrap();
        assert!(ledger(&h).is_empty());
        assert_eq!(
            h.fake.state().executed.last().map(String::as_str),
            Some("drop table users")
        );

        assert!(matches!(
            h.engine.rollback().unwrap_err(),
            Error::NoMigrationsApplied
        ));
    }

    #[test]
    fn rollback_fails_when_file_is_gone() {
        let h = standard();
        h.engine.migrate().unwrap();
        h.fs.remove_file(std::path::Path::new("db/migrations/002_posts.sql"))
            .unwrap();

        let err = h.engine.rollback().unwrap_err();
        assert_eq!(err.to_string(), "can't find migration file: 002");
        assert_eq!(ledger(&h), vec!["001", "002"]);
    }

    #[test]
    fn find_migrations_reads_ledger_without_creating_it() {
        let h = standard();

        let found = h.engine.find_migrations().unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|m| !m.applied));
        assert!(!h.fake.state().ledger_table);

        h.engine.migrate().unwrap();
        let found = h.engine.find_migrations().unwrap();
        assert!(found.iter().all(|m| m.applied));

        h.engine.rollback().unwrap();
        let found = h.engine.find_migrations().unwrap();
        assert!(found[0].applied);
        assert!(!found[1].applied);

        let report = h.engine.status().unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.pending, 1);
        assert_eq!(report.migrations[1].file_name, "002_posts.sql");
    }

    #[test]
    fn wait_times_out_with_transport_error() {
        let mut h = standard();
        h.fake.state().reachable = false;
        h.engine.config_mut().wait_interval = Duration::from_millis(1);
        h.engine.config_mut().wait_timeout = Duration::from_millis(30);

        let started = Instant::now();
        let err = h.engine.wait().unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(
            err.to_string(),
            format!("unable to connect to database: {REFUSED}")
        );
        assert!(h.out.contents().contains("Waiting for database..."));
    }

    #[test]
    fn wait_returns_promptly_when_reachable() {
        let h = standard();
        let started = Instant::now();
        h.engine.wait().unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(h.fake.state().pings, 1);
        assert!(h.out.contents().is_empty());
    }

    #[test]
    fn wait_before_gates_every_operation() {
        let mut h = standard();
        h.fake.state().reachable = false;
        let config = h.engine.config_mut();
        config.wait_before = true;
        config.wait_interval = Duration::from_millis(1);
        config.wait_timeout = Duration::from_millis(5);

        let ops: [(&str, fn(&Engine) -> Result<()>); 7] = [
            ("create", Engine::create),
            ("drop", Engine::drop),
            ("create_and_migrate", Engine::create_and_migrate),
            ("migrate", Engine::migrate),
            ("rollback", Engine::rollback),
            ("dump_schema", Engine::dump_schema),
            ("load_schema", Engine::load_schema),
        ];
        for (name, op) in ops {
            let err = op(&h.engine).unwrap_err();
            assert!(
                err.to_string().contains("connection refused"),
                "{name}: unexpected error {err}"
            );
        }
    }

    #[test]
    fn create_and_migrate_creates_missing_database() {
        let h = standard();
        h.fake.state().exists = false;

        h.engine.create_and_migrate().unwrap();

        assert!(h.fake.state().exists);
        assert_eq!(ledger(&h), vec!["001", "002"]);
    }

    #[test]
    fn auto_dump_rewrites_schema_after_migrate_and_rollback() {
        let mut h = standard();
        h.engine.config_mut().auto_dump_schema = true;
        let schema = h.dir.path().join("db/schema.sql");

        h.engine.migrate().unwrap();
        let dumped = std::fs::read_to_string(&schema).unwrap();
        assert!(dumped.contains("-- ledger: 001,002"));

        std::fs::remove_file(&schema).unwrap();
        h.engine.rollback().unwrap();
        let dumped = std::fs::read_to_string(&schema).unwrap();
        assert!(dumped.contains("-- ledger: 001\n"));
    }

    #[test]
    fn auto_load_seeds_fresh_database_from_schema() {
        let mut h = harness(&[
            ("001_users.sql", USERS),
            ("002_posts.sql", POSTS),
            (
                "003_tags.sql",
                "-- migrate:up\ncreate table tags (id int);\n-- migrate:down\ndrop table tags;\n",
            ),
        ]);
        h.engine.config_mut().auto_load_schema = true;
        let schema = h.dir.path().join("db/schema.sql");
        std::fs::create_dir_all(schema.parent().unwrap()).unwrap();
        std::fs::write(
            &schema,
            "create table users (id int);\ncreate table posts (id int);\n-- ledger: 001,002\n",
        )
        .unwrap();

        h.engine.migrate().unwrap();

        let state = h.fake.state();
        assert_eq!(
            state.executed,
            vec![
                "create table users (id int)",
                "create table posts (id int)",
                "create table tags (id int)",
            ]
        );
        assert_eq!(state.commits, 1);
        drop(state);
        assert_eq!(ledger(&h), vec!["001", "002", "003"]);
    }

    #[test]
    fn auto_load_seeds_database_with_empty_ledger() {
        let mut h = standard();
        h.engine.migrate().unwrap();
        h.engine.rollback().unwrap();
        h.engine.rollback().unwrap();
        {
            let state = h.fake.state();
            assert!(state.ledger_table);
            assert!(state.ledger.is_empty());
        }

        h.engine.config_mut().auto_load_schema = true;
        let schema = h.dir.path().join("db/schema.sql");
        std::fs::create_dir_all(schema.parent().unwrap()).unwrap();
        std::fs::write(&schema, "create table snapshot (id int);\n-- ledger: 001,002\n").unwrap();

        h.engine.migrate().unwrap();

        assert!(
            h.fake
                .state()
                .executed
                .iter()
                .any(|s| s == "create table snapshot (id int)")
        );
        assert_eq!(ledger(&h), vec!["001", "002"]);
        assert_eq!(h.out.contents().matches("Applying:").count(), 2);
    }

    #[test]
    fn auto_load_skips_database_with_ledger() {
        let mut h = standard();
        h.engine.migrate().unwrap();
        h.engine.config_mut().auto_load_schema = true;
        let schema = h.dir.path().join("db/schema.sql");
        std::fs::create_dir_all(schema.parent().unwrap()).unwrap();
        std::fs::write(&schema, "create table ghosts (id int);\n-- ledger: 001\n").unwrap();

        h.engine.migrate().unwrap();

        assert!(!h.fake.state().executed.iter().any(|s| s.contains("ghosts")));
        assert_eq!(ledger(&h), vec!["001", "002"]);
    }

    #[test]
    fn dump_with_prune_removes_only_applied_files() {
        let mut h = standard();
        h.engine.migrate().unwrap();
        h.fs.insert(
            "db/migrations/003_tags.sql",
            "-- migrate:up\ncreate table tags (id int);\n-- migrate:down\n",
        );
        h.engine.config_mut().prune = true;

        h.engine.dump_schema().unwrap();

        assert!(!h.fs.contains("db/migrations/001_users.sql"));
        assert!(!h.fs.contains("db/migrations/002_posts.sql"));
        assert!(h.fs.contains("db/migrations/003_tags.sql"));
        assert!(h.out.contents().contains("Pruning: 001_users.sql"));
    }

    #[test]
    fn dump_then_load_restores_ledger() {
        let h = standard();
        h.engine.migrate().unwrap();
        h.engine.dump_schema().unwrap();

        h.engine.drop().unwrap();
        h.engine.create().unwrap();
        assert!(ledger(&h).is_empty());

        h.engine.load_schema().unwrap();
        assert_eq!(ledger(&h), vec!["001", "002"]);
        assert!(h.engine.find_migrations().unwrap().iter().all(|m| m.applied));
    }

    #[test]
    fn load_schema_without_file_is_an_io_error() {
        let h = standard();
        let err = h.engine.load_schema().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn new_migration_writes_template_into_first_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.base_dir = Some(dir.path().to_path_buf());
        let engine = Engine::new(config, DriverRegistry::new()).with_output(Box::new(io::sink()));

        let path = engine.new_migration("create_users").unwrap();

        assert!(path.starts_with(dir.path().join("db/migrations")));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_create_users.sql"));
        assert_eq!(name.len(), "20240101000000_create_users.sql".len());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), MIGRATION_TEMPLATE);

        assert!(matches!(
            engine.new_migration("  "),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn new_migration_rejects_path_separators() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.base_dir = Some(dir.path().to_path_buf());
        let engine = Engine::new(config, DriverRegistry::new()).with_output(Box::new(io::sink()));

        for name in ["a/../../x", "..\\x"] {
            let err = engine.new_migration(name).unwrap_err();
            assert!(matches!(err, Error::Config(_)));
            assert!(err.to_string().contains("path separators"));
        }
        assert!(!dir.path().join("db").exists());
    }

    #[test]
    fn new_migration_writes_into_overlay() {
        let h = standard();

        let path = h.engine.new_migration("add_tags").unwrap();

        assert!(path.starts_with("db/migrations"));
        assert!(h.fs.contains(&path));
        assert!(!h.dir.path().join("db/migrations").exists());

        let found = h.engine.discover().unwrap();
        assert_eq!(found.len(), 3);
        assert!(found[2].file_name.ends_with("_add_tags.sql"));
        assert_eq!(found[2].read().unwrap(), MIGRATION_TEMPLATE);
    }
}
