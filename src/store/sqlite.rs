use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;

use super::{Filter, Store, StoreError};
use crate::pipeline::Record;
use crate::schema::{self, Entity, SchemaError};

/// SQLite-backed store. One connection, serialized behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating parent directories if needed) and migrate.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        configure_pragmas(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Current schema version (0 if none).
    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(get_current_version(&*self.conn()?))
    }

    /// Row count of one table.
    pub fn count(&self, entity: Entity) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let count = conn.query_row(&format!("SELECT COUNT(*) FROM {entity}"), [], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(count)
    }
}

/// In-memory store with migrations applied (for testing).
pub fn open_memory_store() -> Result<SqliteStore, StoreError> {
    SqliteStore::from_connection(Connection::open_in_memory()?)
}

fn configure_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=DELETE;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    let current_version = get_current_version(conn);

    let migrations: Vec<(i64, &str)> =
        vec![(1, include_str!("../../resources/migrations/001_initial.sql"))];

    for (version, sql) in migrations {
        if version > current_version {
            tracing::info!("Running migration v{version}");
            conn.execute_batch(sql)
                .map_err(|e| StoreError::MigrationFailed {
                    version,
                    reason: e.to_string(),
                })?;
        }
    }
    Ok(())
}

fn get_current_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, i64>(0)
    })
    .unwrap_or(0)
}

fn ensure_column(entity: Entity, column: &str) -> Result<(), StoreError> {
    if schema::is_persisted_column(entity, column) {
        Ok(())
    } else {
        Err(SchemaError::UnknownColumn {
            entity,
            column: column.to_string(),
        }
        .into())
    }
}

fn to_sql_value(column: &str, value: &Value) -> Result<SqlValue, StoreError> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => {
            return Err(StoreError::UnsupportedValue {
                column: column.to_string(),
            })
        }
    })
}

fn from_sql_value(value: SqlValue) -> Option<Value> {
    match value {
        SqlValue::Null | SqlValue::Blob(_) => None,
        SqlValue::Integer(i) => Some(Value::from(i)),
        SqlValue::Real(f) => serde_json::Number::from_f64(f).map(Value::Number),
        SqlValue::Text(s) => Some(Value::String(s)),
    }
}

impl Store for SqliteStore {
    fn find_one(&self, entity: Entity, filters: &[Filter]) -> Result<Option<Record>, StoreError> {
        let mut clauses = Vec::with_capacity(filters.len());
        let mut params = Vec::with_capacity(filters.len());
        for filter in filters {
            let column = filter.column();
            ensure_column(entity, column)?;
            match filter {
                Filter::Eq(_, Value::Null) | Filter::IsNull(_) => {
                    clauses.push(format!("\"{column}\" IS NULL"));
                }
                Filter::Eq(_, value) => {
                    params.push(to_sql_value(column, value)?);
                    clauses.push(format!("\"{column}\" = ?{}", params.len()));
                }
                Filter::EqIgnoreCase(_, text) => {
                    params.push(SqlValue::Text(text.clone()));
                    clauses.push(format!("LOWER(\"{column}\") = LOWER(?{})", params.len()));
                }
            }
        }

        let columns = schema::columns(entity);
        let select = columns
            .iter()
            .map(|c| format!("\"{}\"", c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!("SELECT {select} FROM {entity}{where_clause} LIMIT 1");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let mut record = Record::new();
        for (idx, column) in columns.iter().enumerate() {
            if let Some(value) = from_sql_value(row.get::<_, SqlValue>(idx)?) {
                record.insert(column.name.to_string(), value);
            }
        }
        Ok(Some(record))
    }

    fn insert(&self, entity: Entity, record: &Record) -> Result<(), StoreError> {
        if record.is_empty() {
            return Err(StoreError::EmptyRecord(entity));
        }

        let mut names = Vec::with_capacity(record.len());
        let mut placeholders = Vec::with_capacity(record.len());
        let mut params = Vec::with_capacity(record.len());
        for (column, value) in record {
            ensure_column(entity, column)?;
            params.push(to_sql_value(column, value)?);
            names.push(format!("\"{column}\""));
            placeholders.push(format!("?{}", params.len()));
        }

        let sql = format!(
            "INSERT INTO {entity} ({}) VALUES ({})",
            names.join(", "),
            placeholders.join(", ")
        );
        self.conn()?.execute(&sql, params_from_iter(params))?;
        Ok(())
    }
}
