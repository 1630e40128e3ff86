use std::path::PathBuf;

/// Result type for recovery operations
pub type Result<T> = std::result::Result<T, RecallError>;

#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    #[error("no key candidate in process memory verified against the container")]
    KeyNotFound,

    #[error("key failed HMAC verification against page 1")]
    InvalidKey,

    #[error("container {} truncated at offset {offset}", path.display())]
    TruncatedContainer { path: PathBuf, offset: u64 },

    #[error("container missing: {}", .0.display())]
    ContainerMissing(PathBuf),

    #[error("page {page} failed HMAC verification")]
    CorruptPage { page: u32 },

    #[error("row lookup in shard {} failed: {source}", shard.display())]
    ShardLookupFailed {
        shard: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("export precondition failed: {0}")]
    PhasePreconditionFailed(String),

    #[error("invalid key hex: {0}")]
    InvalidKeyHex(String),

    #[error("process not found: {0}")]
    ProcessNotFound(String),

    #[error("failed to read {len} bytes at {address:#x}")]
    MemoryRead { address: u64, len: usize },

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("copy failed: {0}")]
    Copy(#[from] fs_extra::error::Error),

    #[error("output already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("worker task failed: {0}")]
    TaskFailed(String),

    #[error("transcode failed: {0}")]
    Transcode(String),

    #[error("not a recognised image: {}", .0.display())]
    UnknownImage(PathBuf),
}
