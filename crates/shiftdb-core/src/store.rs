use std::collections::BTreeSet;

use shiftdb_common::Result;
use tracing::debug;

use crate::driver::{Connection, Executor};

/// The applied-version ledger kept inside the target database.
pub struct StateStore<'c> {
    conn: &'c mut dyn Connection,
}

impl<'c> StateStore<'c> {
    pub fn new(conn: &'c mut dyn Connection) -> Self {
        Self { conn }
    }

    pub fn ensure_table(&mut self) -> Result<()> {
        self.conn.ensure_migrations_table()
    }

    pub fn table_exists(&mut self) -> Result<bool> {
        self.conn.migrations_table_exists()
    }

    /// Applied versions; `None` returns all of them.
    pub fn select_applied(&mut self, limit: Option<usize>) -> Result<BTreeSet<String>> {
        self.conn.select_migrations(limit)
    }

    /// Applied versions for read-only reporting. A missing ledger table
    /// means nothing is applied yet, and is not created here.
    pub fn applied_or_empty(&mut self) -> Result<BTreeSet<String>> {
        if !self.table_exists()? {
            debug!("ledger table does not exist yet");
            return Ok(BTreeSet::new());
        }
        self.select_applied(None)
    }

    /// The most recently applied version, if any.
    pub fn latest(&mut self) -> Result<Option<String>> {
        if !self.table_exists()? {
            return Ok(None);
        }
        Ok(self.select_applied(Some(1))?.pop_last())
    }

    /// True when the ledger table is missing or holds no versions.
    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.latest()?.is_none())
    }

    pub fn record_applied<E: Executor + ?Sized>(exec: &mut E, version: &str) -> Result<()> {
        exec.insert_migration(version)
    }

    pub fn record_reverted<E: Executor + ?Sized>(exec: &mut E, version: &str) -> Result<()> {
        exec.delete_migration(version)
    }
}
