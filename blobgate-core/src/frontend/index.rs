//! The stateful frontend's persistent object index.

use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Index database file.
    pub path: PathBuf,
    /// Index table name.
    pub table: String,
}

impl IndexConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: "objects".to_string(),
        }
    }
}

/// One row of the index: which backend holds an id, and for whom.
///
/// An empty `bearer` marks a public object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: String,
    pub backend: String,
    pub bearer: String,
}

/// id → (backend alias, bearer), stored in a small embedded table.
///
/// Entries are inserted exactly when a write succeeds and never mutated;
/// deletion exists only as a test affordance.
pub struct ObjectIndex {
    config: Arc<IndexConfig>,
}

impl ObjectIndex {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.config.path)?;
        Ok(conn)
    }

    /// Create the backing file and table if absent.
    pub fn init(&self) -> Result<()> {
        if let Some(parent) = self.config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = self.connection()?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    backend TEXT NOT NULL,
                    bearer TEXT NOT NULL
                )",
                self.config.table
            ),
            [],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<IndexEntry>> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT backend, bearer FROM {} WHERE id = ?1",
                    self.config.table
                ),
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        Ok(row.map(|(backend, bearer)| IndexEntry {
            id: id.to_string(),
            backend,
            bearer,
        }))
    }

    pub fn insert(&self, entry: &IndexEntry) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, backend, bearer) VALUES (?1, ?2, ?3)",
                self.config.table
            ),
            params![entry.id, entry.backend, entry.bearer],
        )?;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.connection()?;
        let affected = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.config.table),
            params![id],
        )?;
        Ok(affected > 0)
    }
}
