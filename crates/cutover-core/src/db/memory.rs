//! In-memory [`Database`] for tests.
//!
//! Tables are vectors of JSON rows. Failures can be injected per statement
//! substring or per restore target, and every executed statement and restore
//! is recorded so tests can assert on order.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use super::{Database, Ident, BACKUP_MARKER_COLUMN};
use crate::error::DbError;

type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, Table>,
    reachable: bool,
    failing_statements: Vec<String>,
    failing_restores: HashSet<String>,
    failing_scripts: bool,
    executed: Vec<String>,
    scripts: Vec<String>,
    restores: Vec<String>,
}

/// In-memory database.
#[derive(Debug)]
pub struct MemoryDatabase {
    inner: Mutex<Inner>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                reachable: true,
                ..Inner::default()
            }),
        }
    }

    /// Create a table with `count` rows of the form `{id: n, <col>: "<col>-n"}`.
    pub fn with_table(self, name: &str, columns: &[&str], count: usize) -> Self {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let rows = (0..count)
            .map(|n| {
                columns
                    .iter()
                    .map(|c| {
                        let value = if c == "id" {
                            Value::from(n as u64 + 1)
                        } else {
                            Value::from(format!("{c}-{}", n + 1))
                        };
                        (c.clone(), value)
                    })
                    .collect()
            })
            .collect();
        self.inner
            .lock()
            .tables
            .insert(name.to_string(), Table { columns, rows });
        self
    }

    /// Make the reachability check fail.
    pub fn unreachable(self) -> Self {
        self.inner.lock().reachable = false;
        self
    }

    /// Reject any statement containing `needle`.
    pub fn fail_statements_containing(self, needle: &str) -> Self {
        self.inner.lock().failing_statements.push(needle.to_string());
        self
    }

    /// Reject restores into `table`.
    pub fn fail_restore(self, table: &str) -> Self {
        self.inner.lock().failing_restores.insert(table.to_string());
        self
    }

    /// Reject every multi-statement script.
    pub fn fail_scripts(self) -> Self {
        self.inner.lock().failing_scripts = true;
        self
    }

    /// Append rows to a table, e.g. to simulate migration writes.
    pub fn insert_rows(&self, table: &str, rows: usize) {
        let mut inner = self.inner.lock();
        if let Some(t) = inner.tables.get_mut(table) {
            let start = t.rows.len();
            for n in start..start + rows {
                let row = t
                    .columns
                    .iter()
                    .map(|c| (c.clone(), Value::from(format!("{c}-new-{n}"))))
                    .collect();
                t.rows.push(row);
            }
        }
    }

    /// Drop a table.
    pub fn drop_table(&self, table: &str) {
        self.inner.lock().tables.remove(table);
    }

    /// Current row count of a table, if it exists.
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.inner.lock().tables.get(table).map(|t| t.rows.len())
    }

    /// Statements executed through [`Database::execute`], in order.
    pub fn executed(&self) -> Vec<String> {
        self.inner.lock().executed.clone()
    }

    /// Scripts executed through [`Database::execute_script`], in order.
    pub fn scripts(&self) -> Vec<String> {
        self.inner.lock().scripts.clone()
    }

    /// Restore targets attempted, in order.
    pub fn restores(&self) -> Vec<String> {
        self.inner.lock().restores.clone()
    }

    fn generation_key(at: DateTime<Utc>) -> Value {
        Value::from(at.to_rfc3339_opts(SecondsFormat::Micros, true))
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn ping(&self, check_table: &Ident) -> Result<(), DbError> {
        let inner = self.inner.lock();
        if !inner.reachable {
            return Err(DbError::Rejected("connection refused".to_string()));
        }
        if !inner.tables.contains_key(check_table.as_str()) {
            return Err(DbError::TableNotFound(check_table.to_string()));
        }
        Ok(())
    }

    async fn execute(&self, statement: &str) -> Result<u64, DbError> {
        let mut inner = self.inner.lock();
        if let Some(needle) = inner
            .failing_statements
            .iter()
            .find(|n| statement.contains(n.as_str()))
        {
            return Err(DbError::Rejected(format!("injected failure on {needle:?}")));
        }
        inner.executed.push(statement.to_string());
        Ok(0)
    }

    async fn execute_script(&self, script: &str) -> Result<(), DbError> {
        let mut inner = self.inner.lock();
        if inner.failing_scripts {
            return Err(DbError::Rejected("injected script failure".to_string()));
        }
        inner.scripts.push(script.to_string());
        Ok(())
    }

    async fn table_exists(&self, table: &Ident) -> Result<bool, DbError> {
        let inner = self.inner.lock();
        if !inner.reachable {
            return Err(DbError::Rejected("connection refused".to_string()));
        }
        Ok(inner.tables.contains_key(table.as_str()))
    }

    async fn columns(&self, table: &Ident) -> Result<Vec<String>, DbError> {
        self.inner
            .lock()
            .tables
            .get(table.as_str())
            .map(|t| t.columns.clone())
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))
    }

    async fn count_rows(&self, table: &Ident) -> Result<u64, DbError> {
        self.inner
            .lock()
            .tables
            .get(table.as_str())
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))
    }

    async fn snapshot_table(
        &self,
        source: &Ident,
        backup: &Ident,
        columns: &[Ident],
        generation: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let mut inner = self.inner.lock();
        let src = inner
            .tables
            .get(source.as_str())
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(source.to_string()))?;

        let marker = Self::generation_key(generation);
        let copied: Vec<Row> = src
            .rows
            .iter()
            .map(|row| {
                let mut out: Row = columns
                    .iter()
                    .map(|c| (c.to_string(), row.get(c.as_str()).cloned().unwrap_or(Value::Null)))
                    .collect();
                out.insert(BACKUP_MARKER_COLUMN.to_string(), marker.clone());
                out
            })
            .collect();
        let count = copied.len() as u64;

        let entry = inner.tables.entry(backup.to_string()).or_insert_with(|| {
            let mut columns = src.columns.clone();
            columns.push(BACKUP_MARKER_COLUMN.to_string());
            Table {
                columns,
                rows: Vec::new(),
            }
        });
        entry.rows.extend(copied);
        Ok(count)
    }

    async fn count_generation(&self, backup: &Ident, generation: DateTime<Utc>) -> Result<u64, DbError> {
        let marker = Self::generation_key(generation);
        self.inner
            .lock()
            .tables
            .get(backup.as_str())
            .map(|t| t.rows.iter().filter(|r| r.get(BACKUP_MARKER_COLUMN) == Some(&marker)).count() as u64)
            .ok_or_else(|| DbError::TableNotFound(backup.to_string()))
    }

    async fn restore_table(
        &self,
        target: &Ident,
        backup: &Ident,
        columns: &[Ident],
        generation: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let mut inner = self.inner.lock();
        inner.restores.push(target.to_string());

        if inner.failing_restores.contains(target.as_str()) {
            return Err(DbError::Rejected(format!("injected restore failure for {target}")));
        }

        let marker = Self::generation_key(generation);
        let source = inner
            .tables
            .get(backup.as_str())
            .ok_or_else(|| DbError::TableNotFound(backup.to_string()))?;
        let restored: Vec<Row> = source
            .rows
            .iter()
            .filter(|r| r.get(BACKUP_MARKER_COLUMN) == Some(&marker))
            .map(|r| {
                columns
                    .iter()
                    .map(|c| (c.to_string(), r.get(c.as_str()).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect();

        let table = inner
            .tables
            .get_mut(target.as_str())
            .ok_or_else(|| DbError::TableNotFound(target.to_string()))?;
        table.rows = restored;
        Ok(table.rows.len() as u64)
    }
}
