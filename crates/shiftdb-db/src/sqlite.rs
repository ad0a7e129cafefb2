use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use rusqlite::{Batch, OpenFlags, params};
use shiftdb_common::{Error, Result};
use shiftdb_core::{Connection, Driver, DriverConfig, Executor};
use tracing::{debug, info, warn};
use url::Url;

/// SQLite backend. The database is a single file named by the URL path:
/// `sqlite:db/app.sqlite3`, `sqlite:/abs/app.sqlite3` or
/// `sqlite:///abs/app.sqlite3`.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    path: PathBuf,
    migrations_table: String,
}

impl SqliteDriver {
    pub fn from_config(config: &DriverConfig) -> Result<Self> {
        let path = database_path(&config.url)?;
        let path = match &config.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        };
        Ok(Self {
            path,
            migrations_table: config.migrations_table.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<rusqlite::Connection> {
        let conn = rusqlite::Connection::open(&self.path).map_err(|e| {
            Error::Connection(format!("{e}: {}", self.path.display()))
        })?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
        Ok(conn)
    }
}

/// Strip the scheme and any authority marker, keeping the path as written
/// so relative paths stay relative. Percent-escapes are decoded.
fn database_path(url: &Url) -> Result<PathBuf> {
    let raw = url.as_str();
    let rest = &raw[url.scheme().len() + 1..];
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    if rest.is_empty() {
        return Err(Error::Config(format!("missing database path in url: {raw}")));
    }
    let decoded = urlencoding::decode(rest)
        .map_err(|e| Error::Config(format!("invalid database path in url {raw}: {e}")))?;
    Ok(PathBuf::from(decoded.into_owned()))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Also used in dumps, so a snapshot loads over an existing, empty ledger.
fn ledger_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (version varchar(128) PRIMARY KEY)",
        quote_ident(table)
    )
}

/// First keyword of a statement, skipping leading whitespace and comments.
fn leading_keyword(sql: &str) -> String {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            break;
        }
    }
    rest.chars()
        .take_while(char::is_ascii_alphabetic)
        .collect::<String>()
        .to_ascii_uppercase()
}

/// `sqlite3_changes` is only updated by row-changing statements, so DDL
/// reports zero instead of a stale count.
fn changes_rows(sql: &str) -> bool {
    matches!(
        leading_keyword(sql).as_str(),
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE"
    )
}

/// Statement execution over either a plain connection or a transaction.
struct Session<'a> {
    conn: &'a rusqlite::Connection,
    migrations_table: &'a str,
}

impl Executor for Session<'_> {
    fn execute(&mut self, sql: &str) -> Result<Vec<u64>> {
        let mut batch = Batch::new(self.conn, sql);
        let mut affected = Vec::new();
        while let Some(mut stmt) = batch.next().map_err(|e| Error::Database(e.to_string()))? {
            let counts = stmt.expanded_sql().is_some_and(|text| changes_rows(&text));
            let mut rows = stmt.raw_query();
            while rows
                .next()
                .map_err(|e| Error::Database(e.to_string()))?
                .is_some()
            {}
            drop(rows);
            affected.push(if counts { self.conn.changes() as u64 } else { 0 });
        }
        Ok(affected)
    }

    fn insert_migration(&mut self, version: &str) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (version) VALUES (?1)",
            quote_ident(self.migrations_table)
        );
        self.conn
            .execute(&sql, params![version])
            .map_err(|e| Error::Database(format!("failed to record migration {version}: {e}")))?;
        Ok(())
    }

    fn delete_migration(&mut self, version: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE version = ?1",
            quote_ident(self.migrations_table)
        );
        self.conn
            .execute(&sql, params![version])
            .map_err(|e| Error::Database(format!("failed to remove migration {version}: {e}")))?;
        Ok(())
    }
}

/// An open SQLite database file.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    migrations_table: String,
}

impl SqliteConnection {
    fn session(&self) -> Session<'_> {
        Session {
            conn: &self.conn,
            migrations_table: &self.migrations_table,
        }
    }
}

impl Executor for SqliteConnection {
    fn execute(&mut self, sql: &str) -> Result<Vec<u64>> {
        self.session().execute(sql)
    }

    fn insert_migration(&mut self, version: &str) -> Result<()> {
        self.session().insert_migration(version)
    }

    fn delete_migration(&mut self, version: &str) -> Result<()> {
        self.session().delete_migration(version)
    }
}

impl Connection for SqliteConnection {
    fn transaction(
        &mut self,
        body: &mut dyn FnMut(&mut dyn Executor) -> Result<()>,
    ) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        let outcome = body(&mut Session {
            conn: &tx,
            migrations_table: &self.migrations_table,
        });

        match outcome {
            Ok(()) => tx
                .commit()
                .map_err(|e| Error::Database(format!("failed to commit transaction: {e}"))),
            Err(err) => {
                if let Err(e) = tx.rollback() {
                    warn!("failed to roll back transaction: {e}");
                }
                Err(err)
            }
        }
    }

    fn ensure_migrations_table(&mut self) -> Result<()> {
        self.conn
            .execute_batch(&ledger_table_ddl(&self.migrations_table))
            .map_err(|e| Error::Database(format!("failed to create migrations table: {e}")))
    }

    fn migrations_table_exists(&mut self) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
                params![self.migrations_table],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to check migrations table: {e}")))
    }

    fn select_migrations(&mut self, limit: Option<usize>) -> Result<BTreeSet<String>> {
        let mut sql = format!(
            "SELECT version FROM {} ORDER BY version DESC",
            quote_ident(&self.migrations_table)
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("failed to query migrations: {e}")))?;

        rows.collect::<std::result::Result<BTreeSet<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read migration row: {e}")))
    }
}

impl Driver for SqliteDriver {
    fn open(&self) -> Result<Box<dyn Connection>> {
        debug!("opening sqlite database {}", self.path.display());
        Ok(Box::new(SqliteConnection {
            conn: self.connect()?,
            migrations_table: self.migrations_table.clone(),
        }))
    }

    /// A database file is reachable when it opens read-only, or, before it
    /// is created, when its directory exists.
    fn ping(&self) -> Result<()> {
        if self.path.is_file() {
            let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            let conn = rusqlite::Connection::open_with_flags(&self.path, flags)
                .map_err(|e| Error::Connection(format!("{e}: {}", self.path.display())))?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| Error::Connection(e.to_string()))?;
            return Ok(());
        }

        let dir = parent_dir(&self.path);
        if dir.is_dir() {
            Ok(())
        } else {
            Err(Error::Connection(format!(
                "unable to open database file {}: directory {} does not exist",
                self.path.display(),
                dir.display()
            )))
        }
    }

    fn create_database(&self) -> Result<()> {
        if self.path.exists() {
            info!("database {} already exists", self.path.display());
            return Ok(());
        }
        info!("creating database {}", self.path.display());
        // An empty file is a valid, empty SQLite database.
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("failed to create {}: {e}", self.path.display()),
                )
            })?;
        Ok(())
    }

    fn drop_database(&self) -> Result<()> {
        if !self.path.exists() {
            debug!("database {} does not exist", self.path.display());
            return Ok(());
        }
        info!("dropping database {}", self.path.display());
        std::fs::remove_file(&self.path)?;
        Ok(())
    }

    fn database_exists(&self) -> Result<bool> {
        Ok(self.path.is_file())
    }

    fn dump_schema(&self) -> Result<String> {
        let mut conn = SqliteConnection {
            conn: self.connect()?,
            migrations_table: self.migrations_table.clone(),
        };

        let objects = {
            let mut stmt = conn
                .conn
                .prepare(
                    "SELECT type, name, sql FROM sqlite_master \
                     WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
                     ORDER BY rowid",
                )
                .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(|e| Error::Database(format!("failed to read schema: {e}")))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Database(format!("failed to read schema row: {e}")))?
        };

        let mut out = String::from("-- SQLite schema dump\n\n");
        for (kind, name, sql) in objects {
            if kind == "table" && name == self.migrations_table {
                out.push_str(&ledger_table_ddl(&name));
            } else {
                out.push_str(&sql);
            }
            out.push_str(";\n");
        }

        if conn.migrations_table_exists()? {
            let versions = conn.select_migrations(None)?;
            if !versions.is_empty() {
                out.push_str(&ledger_seed(&self.migrations_table, &versions));
            }
        }
        Ok(out)
    }

    fn load_schema(&self, sql: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(sql)
            .map_err(|e| Error::Database(format!("failed to load schema: {e}")))
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Statements that repopulate the ledger when a dump is loaded.
fn ledger_seed(table: &str, versions: &BTreeSet<String>) -> String {
    let values: Vec<String> = versions
        .iter()
        .map(|v| format!("  ('{}')", v.replace('\'', "''")))
        .collect();
    format!(
        "\n-- schema migrations\nINSERT OR IGNORE INTO {} (version) VALUES\n{};\n",
        quote_ident(table),
        values.join(",\n")
    )
}
