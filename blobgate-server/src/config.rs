use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use blobgate_core::{
    BackendSocket, DbBackend, DbBackendConfig, FsBackend, FsBackendConfig, GateError, IndexConfig,
    Result, S3Backend, S3BackendConfig, StatefulFrontend, StatefulFrontendConfig,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    pub index: IndexSettings,
    /// Seconds between periodic backups; 0 disables the loop.
    #[serde(default = "default_backup_interval")]
    pub backup_interval_secs: u64,
    pub backends: Vec<BackendEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexSettings {
    pub path: PathBuf,
    #[serde(default = "default_index_table")]
    pub table: String,
}

/// One backend declaration. The declaration order fixes the alias order the
/// frontend records in its index.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendEntry {
    Db {
        alias: String,
        path: PathBuf,
        #[serde(default = "default_blob_table")]
        table: String,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
    Fs {
        alias: String,
        root: PathBuf,
        meta_path: PathBuf,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
    S3 {
        alias: String,
        host: String,
        bucket: String,
        access_key: String,
        secret_key: String,
        #[serde(default = "default_s3_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_backup_interval() -> u64 {
    300
}

fn default_index_table() -> String {
    "objects".to_string()
}

fn default_blob_table() -> String {
    "storage".to_string()
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_s3_timeout_ms() -> u64 {
    5000
}

impl BackendEntry {
    pub fn alias(&self) -> &str {
        match self {
            BackendEntry::Db { alias, .. }
            | BackendEntry::Fs { alias, .. }
            | BackendEntry::S3 { alias, .. } => alias,
        }
    }

    pub fn build_socket(&self) -> Result<Arc<dyn BackendSocket>> {
        match self {
            BackendEntry::Db {
                path,
                table,
                timeout_ms,
                ..
            } => Ok(Arc::new(DbBackend::new(DbBackendConfig {
                path: path.clone(),
                table: table.clone(),
                timeout: Duration::from_millis(*timeout_ms),
            }))),
            BackendEntry::Fs {
                root,
                meta_path,
                timeout_ms,
                ..
            } => Ok(Arc::new(FsBackend::new(FsBackendConfig {
                root: root.clone(),
                meta_path: meta_path.clone(),
                timeout: Duration::from_millis(*timeout_ms),
            }))),
            BackendEntry::S3 {
                host,
                bucket,
                access_key,
                secret_key,
                timeout_ms,
                ..
            } => Ok(Arc::new(S3Backend::new(S3BackendConfig {
                host: host.clone(),
                bucket: bucket.clone(),
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
                timeout: Duration::from_millis(*timeout_ms),
            })?)),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("BLOBGATE"))
            .build()
            .map_err(|error| GateError::Config(error.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|error| GateError::Config(error.to_string()))?;

        if config.backends.is_empty() {
            return Err(GateError::Config(
                "at least one backend must be configured".to_string(),
            ));
        }
        Ok(config)
    }

    /// Build the sockets in declaration order and wire them to the stateful
    /// frontend; the alias list follows the same order.
    pub fn build_frontend(&self) -> Result<StatefulFrontend> {
        let mut sockets = Vec::with_capacity(self.backends.len());
        for entry in &self.backends {
            sockets.push(entry.build_socket()?);
        }
        let aliases = self
            .backends
            .iter()
            .map(|entry| entry.alias().to_string())
            .collect();

        StatefulFrontend::new(
            sockets,
            StatefulFrontendConfig {
                index: IndexConfig {
                    path: self.index.path.clone(),
                    table: self.index.table.clone(),
                },
                aliases,
            },
        )
    }
}
