//! Error type shared by every dedup-core operation.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DedupError>;

#[derive(Debug, Error)]
pub enum DedupError {
    /// A single source file could not be sized or read. File-local: the run continues.
    #[error("cannot read {path:?}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing chunk {digest}")]
    MissingChunk { digest: String },

    #[error("chunk {digest} is corrupt (content hashes to {actual})")]
    CorruptChunk { digest: String, actual: String },

    #[error("Invalid manifest path: {path:?}. File does not exist.")]
    InvalidManifestPath { path: PathBuf },

    #[error("Access denied for {path:?}. Check permissions.")]
    PermissionDenied { path: PathBuf },

    #[error("invalid manifest {path:?} line {line}: {reason}")]
    InvalidManifest { path: PathBuf, line: usize, reason: String },

    #[error("Invalid source path: {path:?}. {reason}")]
    InvalidSourceRoot { path: PathBuf, reason: String },

    #[error("Invalid backup set: {path:?}")]
    InvalidBackupSet { path: PathBuf },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("unsafe path: {reason}")]
    UnsafePath { reason: String },

    #[error("index error: {0}")]
    Index(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}
