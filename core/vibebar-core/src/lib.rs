//! Core detection, merge and aggregation library for vibebar.
//!
//! Channels (process scan, specialized probes) and engines (merge,
//! aggregation, refresh) all speak [`vibebar_protocol::Snapshot`]; the
//! session store is the only shared surface between this library and the
//! push-driven wrapper/agent binaries.

pub mod aggregate;
pub mod detect;
pub mod error;
pub mod merge;
pub mod refresh;
pub mod scan;
pub mod storage;
pub mod store;

pub use error::{CoreError, Result};
pub use storage::StorageConfig;
