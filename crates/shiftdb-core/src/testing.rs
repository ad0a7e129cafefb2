//! An in-memory driver that records what the engine asks of it.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shiftdb_common::{Error, Result};

use crate::driver::{Connection, Driver, DriverConfig, Executor};

pub(crate) const REFUSED: &str = "dial tcp 127.0.0.1:5432: connect: connection refused";

#[derive(Debug, Clone)]
pub(crate) struct FakeState {
    pub reachable: bool,
    pub exists: bool,
    pub ledger_table: bool,
    pub ledger: BTreeSet<String>,
    pub executed: Vec<String>,
    pub commits: usize,
    pub rollbacks: usize,
    pub pings: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                reachable: true,
                exists: true,
                ledger_table: false,
                ledger: BTreeSet::new(),
                executed: Vec::new(),
                commits: 0,
                rollbacks: 0,
                pings: 0,
            })),
        }
    }

    pub fn factory(
        &self,
    ) -> impl Fn(&DriverConfig) -> Result<Box<dyn Driver>> + Send + Sync + 'static {
        let driver = self.clone();
        move |_| Ok(Box::new(driver.clone()) as Box<dyn Driver>)
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct FakeConnection {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnection {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Split on `;`, dropping comment lines. A statement containing `fail`
/// raises an error; `insert` statements report one affected row.
fn statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|l| !l.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

impl Executor for FakeConnection {
    fn execute(&mut self, sql: &str) -> Result<Vec<u64>> {
        let mut state = self.state();
        let mut affected = Vec::new();
        for stmt in statements(sql) {
            if stmt.contains("fail") {
                return Err(Error::Database(format!("syntax error at \"{stmt}\"")));
            }
            affected.push(u64::from(stmt.starts_with("insert")));
            state.executed.push(stmt);
        }
        Ok(affected)
    }

    fn insert_migration(&mut self, version: &str) -> Result<()> {
        let mut state = self.state();
        if !state.ledger_table {
            return Err(Error::Database("no such table: schema_migrations".into()));
        }
        state.ledger.insert(version.to_string());
        Ok(())
    }

    fn delete_migration(&mut self, version: &str) -> Result<()> {
        self.state().ledger.remove(version);
        Ok(())
    }
}

impl Connection for FakeConnection {
    fn transaction(
        &mut self,
        body: &mut dyn FnMut(&mut dyn Executor) -> Result<()>,
    ) -> Result<()> {
        let snapshot = self.state().clone();
        match body(&mut *self) {
            Ok(()) => {
                self.state().commits += 1;
                Ok(())
            }
            Err(e) => {
                let mut state = self.state();
                let rollbacks = state.rollbacks + 1;
                *state = snapshot;
                state.rollbacks = rollbacks;
                Err(e)
            }
        }
    }

    fn ensure_migrations_table(&mut self) -> Result<()> {
        self.state().ledger_table = true;
        Ok(())
    }

    fn migrations_table_exists(&mut self) -> Result<bool> {
        Ok(self.state().ledger_table)
    }

    fn select_migrations(&mut self, limit: Option<usize>) -> Result<BTreeSet<String>> {
        let state = self.state();
        if !state.ledger_table {
            return Err(Error::Database("no such table: schema_migrations".into()));
        }
        Ok(state
            .ledger
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

impl Driver for FakeDriver {
    fn open(&self) -> Result<Box<dyn Connection>> {
        self.ping()?;
        if !self.state().exists {
            return Err(Error::Database("database does not exist".into()));
        }
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
        }))
    }

    fn ping(&self) -> Result<()> {
        let mut state = self.state();
        state.pings += 1;
        if state.reachable {
            Ok(())
        } else {
            Err(Error::Connection(REFUSED.into()))
        }
    }

    fn create_database(&self) -> Result<()> {
        self.ping()?;
        self.state().exists = true;
        Ok(())
    }

    fn drop_database(&self) -> Result<()> {
        self.ping()?;
        let mut state = self.state();
        state.exists = false;
        state.ledger_table = false;
        state.ledger.clear();
        state.executed.clear();
        Ok(())
    }

    fn database_exists(&self) -> Result<bool> {
        self.ping()?;
        Ok(self.state().exists)
    }

    fn dump_schema(&self) -> Result<String> {
        self.ping()?;
        let state = self.state();
        let mut out = String::from("-- fake schema dump\n");
        for stmt in &state.executed {
            out.push_str(stmt);
            out.push_str(";\n");
        }
        let versions: Vec<_> = state.ledger.iter().cloned().collect();
        out.push_str(&format!("-- ledger: {}\n", versions.join(",")));
        Ok(out)
    }

    fn load_schema(&self, sql: &str) -> Result<()> {
        self.ping()?;
        let mut state = self.state();
        for line in sql.lines() {
            if let Some(list) = line.strip_prefix("-- ledger: ") {
                state.ledger_table = true;
                state.ledger = list
                    .split(',')
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        }
        state.executed.extend(statements(sql));
        Ok(())
    }
}

/// A cloneable sink for capturing engine output.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
