//! Database access.
//!
//! The orchestrator and rollback engine talk to the database only through
//! [`Database`]. SQL that embeds table or column names is built here from
//! [`Ident`] values, never by formatting raw strings at call sites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod postgres;

#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryDatabase;
pub use postgres::PgDatabase;

/// Column tagging each backup row with its snapshot generation.
pub const BACKUP_MARKER_COLUMN: &str = "backup_date";

/// Postgres truncates identifiers longer than this.
const MAX_IDENT_LEN: usize = 63;

/// A validated SQL identifier, always emitted quoted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(String);

impl Ident {
    /// Validate an identifier.
    pub fn new(name: impl Into<String>) -> Result<Self, DbError> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_IDENT_LEN || name.contains('\0') {
            return Err(DbError::InvalidIdentifier(name));
        }
        Ok(Self(name))
    }

    /// Validate every name in a list.
    pub fn all<I, S>(names: I) -> Result<Vec<Self>, DbError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().map(Self::new).collect()
    }

    /// The unquoted name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name quoted for direct inclusion in SQL.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0.replace('"', "\"\""))
    }

    /// Name of the sibling backup table for this table.
    pub fn backup_table(&self) -> Result<Self, DbError> {
        Self::new(format!("{}_backup", self.0))
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Comma-separated quoted column list.
pub fn column_list(columns: &[Ident]) -> String {
    columns
        .iter()
        .map(Ident::quoted)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Operations the orchestrator, backup manager and rollback engine need.
///
/// Every call is one blocking round-trip from the caller's point of view and
/// is bounded by the implementation's statement timeout.
#[async_trait]
pub trait Database: Send + Sync {
    /// Cheap read against a known table to prove connectivity.
    async fn ping(&self, check_table: &Ident) -> Result<(), DbError>;

    /// Execute one statement in autocommit mode; returns affected rows.
    async fn execute(&self, statement: &str) -> Result<u64, DbError>;

    /// Execute a multi-statement script as a single request.
    async fn execute_script(&self, script: &str) -> Result<(), DbError>;

    async fn table_exists(&self, table: &Ident) -> Result<bool, DbError>;

    /// Column names of a table in ordinal order.
    async fn columns(&self, table: &Ident) -> Result<Vec<String>, DbError>;

    async fn count_rows(&self, table: &Ident) -> Result<u64, DbError>;

    /// Copy every row of `source` into `backup` tagged with `generation`,
    /// creating `backup` if needed. Returns the number of rows copied.
    async fn snapshot_table(
        &self,
        source: &Ident,
        backup: &Ident,
        columns: &[Ident],
        generation: DateTime<Utc>,
    ) -> Result<u64, DbError>;

    /// Number of rows in `backup` tagged with `generation`.
    async fn count_generation(&self, backup: &Ident, generation: DateTime<Utc>) -> Result<u64, DbError>;

    /// In one transaction: truncate `target` (restarting identities,
    /// cascading), then insert `columns` from the rows of `backup` tagged
    /// with `generation`. Returns the number of rows inserted. On error
    /// nothing is committed.
    async fn restore_table(
        &self,
        target: &Ident,
        backup: &Ident,
        columns: &[Ident],
        generation: DateTime<Utc>,
    ) -> Result<u64, DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting_escapes_double_quotes() {
        let ident = Ident::new("weird\"name").unwrap();
        assert_eq!(ident.quoted(), "\"weird\"\"name\"");
    }

    #[test]
    fn test_mixed_case_preserved() {
        let ident = Ident::new("opportunityNotes").unwrap();
        assert_eq!(ident.quoted(), "\"opportunityNotes\"");
        assert_eq!(ident.backup_table().unwrap().as_str(), "opportunityNotes_backup");
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(Ident::new("").is_err());
        assert!(Ident::new("a\0b").is_err());
        assert!(Ident::new("x".repeat(64)).is_err());
        assert!(Ident::new("x".repeat(63)).is_ok());
        assert!(Ident::new("x".repeat(60)).unwrap().backup_table().is_err());
    }

    #[test]
    fn test_column_list() {
        let cols = Ident::all(["id", "name"]).unwrap();
        assert_eq!(column_list(&cols), "\"id\", \"name\"");
    }
}
