//! Filesystem-backed storage with a JSON metadata sidecar.
//!
//! Blobs land in numerically named files under the configured root. The
//! id → entry map lives in memory and is serialized to the sidecar by
//! `backup`; on `init` the sidecar is read back and the file-name counter
//! resumes past the largest numeric name already on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::backend::{BackendSocket, ObjectMetadata};
use crate::error::{GateError, Result};
use crate::promise::{deadline, Promise, ReadyCell};

#[derive(Debug, Clone)]
pub struct FsBackendConfig {
    /// Directory holding the blob files.
    pub root: PathBuf,
    /// Sidecar file for the serialized metadata map.
    pub meta_path: PathBuf,
    /// Per-operation deadline.
    pub timeout: Duration,
}

impl FsBackendConfig {
    pub fn new(root: impl Into<PathBuf>, meta_path: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            meta_path: meta_path.into(),
            timeout: Duration::from_millis(2000),
        }
    }
}

/// Sidecar record for one blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsEntry {
    pub id: String,
    pub size: i64,
    pub created_at: i64,
    /// Numeric file name under the root.
    pub file: String,
}

#[derive(Debug, Default)]
struct FsState {
    entries: HashMap<String, FsEntry>,
    /// Next file name to assign.
    next_name: u64,
}

pub struct FsBackend {
    config: Arc<FsBackendConfig>,
    state: Arc<Mutex<FsState>>,
    ready: ReadyCell,
}

impl FsBackend {
    pub fn new(config: FsBackendConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(FsState::default())),
            ready: ReadyCell::new(),
        }
    }

    fn load_sidecar(config: &FsBackendConfig) -> HashMap<String, FsEntry> {
        let raw = match std::fs::read_to_string(&config.meta_path) {
            Ok(raw) => raw,
            Err(_) => return HashMap::new(),
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(
                    "ignoring malformed metadata sidecar {:?}: {}",
                    config.meta_path,
                    error
                );
                HashMap::new()
            }
        }
    }

    fn scan_largest_name(config: &FsBackendConfig) -> Result<u64> {
        let mut largest = 0u64;
        for entry in std::fs::read_dir(&config.root)? {
            let entry = entry?;
            if let Some(numeric) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            {
                largest = largest.max(numeric);
            }
        }
        Ok(largest)
    }

    async fn write_atomically(path: &PathBuf, data: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, path).await?;
        Ok(())
    }

    async fn persist_sidecar(config: &FsBackendConfig, state: &Arc<Mutex<FsState>>) -> Result<()> {
        let entries = {
            let state = state.lock().await;
            state.entries.clone()
        };
        let serialized = serde_json::to_string_pretty(&entries)?;
        Self::write_atomically(&config.meta_path, serialized.as_bytes()).await
    }
}

impl BackendSocket for FsBackend {
    fn kind(&self) -> &'static str {
        "fs"
    }

    fn is_ready(&self) -> Promise<bool> {
        self.ready.current()
    }

    fn init(&self) -> Promise<bool> {
        let ready = self.ready.replace();
        let config = Arc::clone(&self.config);
        let state = Arc::clone(&self.state);
        let cell = ready.clone();
        tokio::spawn(async move {
            let outcome: Result<bool> = async {
                std::fs::create_dir_all(&config.root)?;
                if let Some(parent) = config.meta_path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }

                let entries = Self::load_sidecar(&config);
                let next_name = Self::scan_largest_name(&config)? + 1;

                let mut state = state.lock().await;
                state.entries = entries;
                state.next_name = next_name;
                tracing::debug!(
                    "filesystem backend at {:?} loaded {} entries, next file {}",
                    config.root,
                    state.entries.len(),
                    state.next_name
                );
                Ok(true)
            }
            .await;
            match outcome {
                Ok(value) => cell.resolve(value),
                Err(reason) => cell.reject(reason),
            }
        });
        ready
    }

    fn backup(&self) -> Promise<bool> {
        let config = Arc::clone(&self.config);
        let state = Arc::clone(&self.state);
        let persist = Promise::spawn(async move {
            Self::persist_sidecar(&config, &state).await?;
            Ok(true)
        });
        deadline(persist, self.config.timeout)
    }

    fn close(&self) -> Promise<bool> {
        self.ready.close();
        Promise::resolved(true)
    }

    fn is_online(&self) -> Promise<Option<u64>> {
        let config = Arc::clone(&self.config);
        let probe = Promise::spawn(async move {
            let started = Instant::now();
            Ok(match tokio::fs::metadata(&config.root).await {
                Ok(_) => Some(started.elapsed().as_millis() as u64),
                Err(_) => None,
            })
        });
        deadline(probe, self.config.timeout).catch(|_| Ok(None))
    }

    fn get_object_metadata(&self, id: &str) -> Promise<ObjectMetadata> {
        let state = Arc::clone(&self.state);
        let id = id.to_string();
        let lookup = Promise::spawn(async move {
            let state = state.lock().await;
            state
                .entries
                .get(&id)
                .map(|entry| ObjectMetadata {
                    id: entry.id.clone(),
                    size: entry.size,
                    created_at: entry.created_at,
                })
                .ok_or(GateError::NotFound(id))
        });
        deadline(lookup, self.config.timeout)
    }

    fn approve_object_metadata(&self, id: &str, _size: i64) -> Promise<bool> {
        let state = Arc::clone(&self.state);
        let id = id.to_string();
        let check = Promise::spawn(async move {
            let state = state.lock().await;
            if state.entries.contains_key(&id) {
                return Err(GateError::AlreadyExists(id));
            }
            Ok(true)
        });
        deadline(check, self.config.timeout)
    }

    fn get_object(&self, id: &str) -> Promise<Bytes> {
        let config = Arc::clone(&self.config);
        let state = Arc::clone(&self.state);
        let id = id.to_string();
        let fetch = Promise::spawn(async move {
            let file = {
                let state = state.lock().await;
                match state.entries.get(&id) {
                    Some(entry) => entry.file.clone(),
                    None => return Err(GateError::NotFound(id)),
                }
            };
            let data = tokio::fs::read(config.root.join(&file)).await?;
            Ok(Bytes::from(data))
        });
        deadline(fetch, self.config.timeout)
    }

    fn set_object(&self, id: &str, data: Bytes) -> Promise<ObjectMetadata> {
        let config = Arc::clone(&self.config);
        let state = Arc::clone(&self.state);
        let id = id.to_string();
        let store = Promise::spawn(async move {
            let mut state = state.lock().await;
            if state.entries.contains_key(&id) {
                return Err(GateError::AlreadyExists(id));
            }

            let file = state.next_name.to_string();
            Self::write_atomically(&config.root.join(&file), &data).await?;
            state.next_name += 1;

            let entry = FsEntry {
                id: id.clone(),
                size: data.len() as i64,
                created_at: chrono::Utc::now().timestamp_millis(),
                file: file.clone(),
            };
            let meta = ObjectMetadata {
                id: entry.id.clone(),
                size: entry.size,
                created_at: entry.created_at,
            };
            state.entries.insert(id.clone(), entry);
            tracing::debug!("stored {} as file {} under {:?}", id, file, config.root);
            Ok(meta)
        });
        deadline(store, self.config.timeout)
    }

    fn del_object(&self, id: &str) -> Promise<bool> {
        let config = Arc::clone(&self.config);
        let state = Arc::clone(&self.state);
        let id = id.to_string();
        let remove = Promise::spawn(async move {
            let removed = {
                let mut state = state.lock().await;
                state.entries.remove(&id)
            };
            match removed {
                Some(entry) => {
                    tokio::fs::remove_file(config.root.join(&entry.file)).await.ok();
                    Ok(true)
                }
                None => Ok(false),
            }
        });
        deadline(remove, self.config.timeout)
    }
}
