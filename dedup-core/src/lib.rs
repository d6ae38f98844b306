//! Deduplicating backup engine.
//!
//! Files are split by [`chunker`] into content-defined chunks, each chunk is stored once
//! in the [`store`] under its SHA-256 digest, and a per-file [`manifest`] lists the
//! digests needed to put the file back together. [`backup::run_backup`] and
//! [`restore::run_restore`] are the two entry points used by the `dedup` binary.

pub mod backup;
pub mod chunker;
pub mod config;
pub mod digest;
pub mod error;
pub mod index;
pub mod logging;
pub mod manifest;
pub mod path_safety;
pub mod progress;
pub mod restore;
pub mod stats;
pub mod store;
pub mod verify;

pub use backup::{run_backup, run_backup_with};
pub use config::DedupConfig;
pub use error::{DedupError, Result};
pub use restore::{run_restore, RestoreMode, RestoreResponse, RestoreStatus};
pub use stats::RunStatistics;
pub use store::ChunkStore;
