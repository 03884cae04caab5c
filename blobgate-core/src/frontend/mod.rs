//! Frontend dispatchers: the single namespace over the backend fleet.
//!
//! [`StatelessFrontend`] routes writes to a randomly ordered walk over the
//! online backends and resolves reads by parallel fan-out. The
//! [`StatefulFrontend`] layers an authoritative id → (backend alias, bearer)
//! index on top, adding bearer-based authorization and single-backend reads.

pub mod index;
pub mod stateful;
pub mod stateless;

pub use index::{IndexConfig, IndexEntry, ObjectIndex};
pub use stateful::{StatefulFrontend, StatefulFrontendConfig};
pub use stateless::{StatelessFrontend, WriteOutcome};
