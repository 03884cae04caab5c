//! HTTP gateway server for blobgate: configuration loading and the axum
//! controller that fronts the stateful dispatcher.

pub mod config;
pub mod server;
