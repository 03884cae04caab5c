//! SQLite-backed storage: metadata and blob bytes live in the same row.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use crate::backend::{BackendSocket, ObjectMetadata};
use crate::error::{GateError, Result};
use crate::promise::{deadline, Promise, ReadyCell};

#[derive(Debug, Clone)]
pub struct DbBackendConfig {
    /// Database file location.
    pub path: PathBuf,
    /// Blob table name.
    pub table: String,
    /// Per-operation deadline.
    pub timeout: Duration,
}

impl DbBackendConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: "storage".to_string(),
            timeout: Duration::from_millis(2000),
        }
    }
}

pub struct DbBackend {
    config: Arc<DbBackendConfig>,
    ready: ReadyCell,
}

impl DbBackend {
    pub fn new(config: DbBackendConfig) -> Self {
        Self {
            config: Arc::new(config),
            ready: ReadyCell::new(),
        }
    }

    fn open_connection(config: &DbBackendConfig) -> Result<Connection> {
        let conn = Connection::open(&config.path)?;
        Ok(conn)
    }

    fn lookup_metadata(conn: &Connection, table: &str, id: &str) -> Result<Option<ObjectMetadata>> {
        let row = conn
            .query_row(
                &format!("SELECT size, created_at FROM {table} WHERE id = ?1"),
                params![id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        Ok(row.map(|(size, created_at)| ObjectMetadata {
            id: id.to_string(),
            size,
            created_at,
        }))
    }
}

impl BackendSocket for DbBackend {
    fn kind(&self) -> &'static str {
        "db"
    }

    fn is_ready(&self) -> Promise<bool> {
        self.ready.current()
    }

    fn init(&self) -> Promise<bool> {
        let ready = self.ready.replace();
        let config = Arc::clone(&self.config);
        let cell = ready.clone();
        tokio::spawn(async move {
            let outcome: Result<bool> = (|| {
                if let Some(parent) = config.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let conn = Self::open_connection(&config)?;
                conn.execute(
                    &format!(
                        "CREATE TABLE IF NOT EXISTS {} (
                            id TEXT PRIMARY KEY,
                            size INTEGER NOT NULL,
                            created_at INTEGER NOT NULL,
                            data BLOB NOT NULL
                        )",
                        config.table
                    ),
                    [],
                )?;
                Ok(true)
            })();
            match outcome {
                Ok(value) => cell.resolve(value),
                Err(reason) => cell.reject(reason),
            }
        });
        ready
    }

    fn backup(&self) -> Promise<bool> {
        // SQLite flushes on write; nothing extra to persist.
        Promise::resolved(true)
    }

    fn close(&self) -> Promise<bool> {
        self.ready.close();
        Promise::resolved(true)
    }

    fn is_online(&self) -> Promise<Option<u64>> {
        let config = Arc::clone(&self.config);
        let probe = Promise::spawn(async move {
            let started = Instant::now();
            let round_trip: Result<i64> = (|| {
                let conn = Self::open_connection(&config)?;
                let one = conn.query_row("SELECT 1", [], |row| row.get(0))?;
                Ok(one)
            })();
            Ok(match round_trip {
                Ok(_) => Some(started.elapsed().as_millis() as u64),
                Err(_) => None,
            })
        });
        deadline(probe, self.config.timeout).catch(|_| Ok(None))
    }

    fn get_object_metadata(&self, id: &str) -> Promise<ObjectMetadata> {
        let config = Arc::clone(&self.config);
        let id = id.to_string();
        let lookup = Promise::spawn(async move {
            let conn = Self::open_connection(&config)?;
            Self::lookup_metadata(&conn, &config.table, &id)?.ok_or(GateError::NotFound(id))
        });
        deadline(lookup, self.config.timeout)
    }

    fn approve_object_metadata(&self, id: &str, _size: i64) -> Promise<bool> {
        let config = Arc::clone(&self.config);
        let id = id.to_string();
        let check = Promise::spawn(async move {
            let conn = Self::open_connection(&config)?;
            match Self::lookup_metadata(&conn, &config.table, &id)? {
                Some(_) => Err(GateError::AlreadyExists(id)),
                None => Ok(true),
            }
        });
        deadline(check, self.config.timeout)
    }

    fn get_object(&self, id: &str) -> Promise<Bytes> {
        let config = Arc::clone(&self.config);
        let id = id.to_string();
        let fetch = Promise::spawn(async move {
            let conn = Self::open_connection(&config)?;
            let data: Option<Vec<u8>> = conn
                .query_row(
                    &format!("SELECT data FROM {} WHERE id = ?1", config.table),
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            data.map(Bytes::from).ok_or(GateError::NotFound(id))
        });
        deadline(fetch, self.config.timeout)
    }

    fn set_object(&self, id: &str, data: Bytes) -> Promise<ObjectMetadata> {
        let config = Arc::clone(&self.config);
        let id = id.to_string();
        let store = Promise::spawn(async move {
            let conn = Self::open_connection(&config)?;
            if Self::lookup_metadata(&conn, &config.table, &id)?.is_some() {
                return Err(GateError::AlreadyExists(id));
            }

            let size = data.len() as i64;
            let created_at = chrono::Utc::now().timestamp_millis();
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, size, created_at, data) VALUES (?1, ?2, ?3, ?4)",
                    config.table
                ),
                params![id, size, created_at, data.as_ref()],
            )?;
            tracing::debug!("stored {} ({} bytes) in table {}", id, size, config.table);

            Ok(ObjectMetadata {
                id,
                size,
                created_at,
            })
        });
        deadline(store, self.config.timeout)
    }

    fn del_object(&self, id: &str) -> Promise<bool> {
        let config = Arc::clone(&self.config);
        let id = id.to_string();
        let remove = Promise::spawn(async move {
            let conn = Self::open_connection(&config)?;
            let affected = conn.execute(
                &format!("DELETE FROM {} WHERE id = ?1", config.table),
                params![id],
            )?;
            Ok(affected > 0)
        });
        deadline(remove, self.config.timeout)
    }
}
