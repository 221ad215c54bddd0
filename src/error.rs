//! Unified error type for all store operations.
//!
//! Every variant carries owned message data so the whole enum stays `Clone`
//! (load results are fanned out to every waiter of a shared load cycle).

/// Things that can go wrong when using the store.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// File system problem on the read side (or a failed blocking task).
    #[error("i/o error: {0}")]
    Io(String),
    /// Failed to serialize a payload to bytes.
    #[error("serialization error: {0}")]
    Serialize(String),
    /// Failed to deserialize stored bytes back into a record or payload.
    #[error("deserialization error: {0}")]
    Deserialize(String),
    /// Disk write failed (temp file, fsync, or rename).
    #[error("write error: {0}")]
    Write(String),
    /// The stored record's version differs from the configured version and no
    /// migrator was supplied via the builder.
    #[error("no migrator for '{key}': stored version {found}, expected {expected}")]
    MigrationNotImplemented {
        /// Store key whose record needs migrating.
        key: String,
        /// Version found on disk.
        found: u32,
        /// Version the code expects.
        expected: u32,
    },
    /// A supplied migrator or legacy transform failed.
    #[error("migration error: {0}")]
    Migration(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Error::Io(err.to_string())
        } else if err.is_syntax() || err.is_eof() {
            Error::Deserialize(err.to_string())
        } else {
            Error::Serialize(err.to_string())
        }
    }
}

/// Result alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
