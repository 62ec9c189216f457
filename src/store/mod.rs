//! Persistent store boundary.
//!
//! The ingestor needs exactly two operations: a filtered single-row lookup
//! and a single-row insert. No updates, no deletes.

pub mod sqlite;

pub use sqlite::{open_memory_store, SqliteStore};

use serde_json::Value;
use thiserror::Error;

use crate::pipeline::Record;
use crate::schema::{Entity, SchemaError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Cannot store non-scalar value in column '{column}'")]
    UnsupportedValue { column: String },

    #[error("Refusing to insert an empty record into '{0}'")]
    EmptyRecord(Entity),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store connection lock poisoned")]
    LockPoisoned,
}

/// One condition of a lookup. Conditions are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Exact equality. A JSON null compares as `IS NULL`.
    Eq(&'static str, Value),
    /// Case-insensitive text equality.
    EqIgnoreCase(&'static str, String),
    IsNull(&'static str),
}

impl Filter {
    pub fn column(&self) -> &'static str {
        match self {
            Self::Eq(c, _) | Self::EqIgnoreCase(c, _) | Self::IsNull(c) => c,
        }
    }
}

pub trait Store: Send + Sync {
    /// First row of `entity` matching every filter, if any.
    fn find_one(&self, entity: Entity, filters: &[Filter]) -> Result<Option<Record>, StoreError>;

    /// Insert one row. Every key must be a persisted column of `entity`.
    fn insert(&self, entity: Entity, record: &Record) -> Result<(), StoreError>;
}
