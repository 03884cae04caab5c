//! The uniform contract every storage backend satisfies.
//!
//! A backend socket wraps one concrete store (an embedded SQL table, a
//! filesystem tree, or an S3-compatible bucket) behind the same set of
//! promise-returning operations, so the frontend dispatcher can treat the
//! fleet uniformly.

pub mod db;
pub mod fs;
pub mod s3;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::promise::Promise;

pub use db::{DbBackend, DbBackendConfig};
pub use fs::{FsBackend, FsBackendConfig};
pub use s3::{S3Backend, S3BackendConfig};

/// What a backend records alongside a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub id: String,
    /// Byte count of the stored blob.
    pub size: i64,
    /// Milliseconds since the Unix epoch, stamped when the backend commits.
    pub created_at: i64,
}

/// A blob together with its metadata, as returned by reads.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub meta: ObjectMetadata,
    pub data: Bytes,
}

/// One concrete store behind the uniform gateway contract.
///
/// Every operation returns a [`Promise`]; per-operation deadlines are the
/// backend's own responsibility. Ids are write-once: `set_object` and
/// `approve_object_metadata` reject ids that already exist.
pub trait BackendSocket: Send + Sync {
    /// Short label for logs (`"db"`, `"fs"`, `"s3"`).
    fn kind(&self) -> &'static str;

    /// The current readiness cell: fulfills `true` after a successful
    /// `init`, rejects with [`GateError::Closed`] after `close`.
    ///
    /// [`GateError::Closed`]: crate::error::GateError::Closed
    fn is_ready(&self) -> Promise<bool>;

    /// Idempotent bring-up. Installs a fresh readiness cell, then settles it
    /// with the outcome.
    fn init(&self) -> Promise<bool>;

    /// Durably persist any state that is not already durable.
    fn backup(&self) -> Promise<bool>;

    /// Release resources and reject the readiness cell.
    fn close(&self) -> Promise<bool>;

    /// Liveness probe: round-trip latency in milliseconds, or `None` on any
    /// failure. Never rejects.
    fn is_online(&self) -> Promise<Option<u64>>;

    /// Metadata for a stored id; rejects `NotFound` when absent.
    fn get_object_metadata(&self, id: &str) -> Promise<ObjectMetadata>;

    /// Agree to accept a write: fulfills `true` iff the id is absent,
    /// rejects `AlreadyExists` otherwise.
    fn approve_object_metadata(&self, id: &str, size: i64) -> Promise<bool>;

    /// Blob bytes for a stored id; rejects `NotFound` when absent.
    fn get_object(&self, id: &str) -> Promise<Bytes>;

    /// Commit blob and metadata together; rejects `AlreadyExists` for a
    /// duplicate id. Returns the committed metadata.
    fn set_object(&self, id: &str, data: Bytes) -> Promise<ObjectMetadata>;

    /// Remove a blob. `true` if something was removed. A test affordance;
    /// the public surface is append-only.
    fn del_object(&self, id: &str) -> Promise<bool>;
}
