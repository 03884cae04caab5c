//! Core library for blobgate, a blob storage gateway over heterogeneous
//! backends.
//!
//! A single namespace of write-once blobs, each dispersed to exactly one of
//! the attached backends: an embedded SQLite table, a local filesystem tree,
//! or an S3-compatible object store reached over signed HTTP. Dispatching is
//! done by the frontend layer; concurrency is mediated end to end by the
//! promise runtime in [`promise`].

pub mod backend;
pub mod crypto;
pub mod error;
pub mod frontend;
pub mod promise;
pub mod sigv4;

pub use backend::{
    BackendSocket, DbBackend, DbBackendConfig, FsBackend, FsBackendConfig, ObjectMetadata,
    S3Backend, S3BackendConfig, StoredObject,
};
pub use error::{GateError, Result};
pub use frontend::{
    IndexConfig, IndexEntry, ObjectIndex, StatefulFrontend, StatefulFrontendConfig,
    StatelessFrontend, WriteOutcome,
};
pub use promise::{deadline, Promise};
pub use sigv4::{sign_request, SignOptions, SignedPayload};
