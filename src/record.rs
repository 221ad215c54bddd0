//! On-disk record shape and the in-memory write staging area.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The persisted unit: one record per store, replaced wholesale on every save.
///
/// `version` is the schema version the writing code expected, which is not
/// necessarily what the reading code expects — a mismatch at load time is what
/// triggers migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    /// Schema version of `data`.
    pub version: u32,
    /// Store key; also the file name under the storage directory.
    pub key: String,
    /// The payload itself, kept as raw JSON so records of any schema version
    /// can be read back before migration.
    pub data: Value,
}

/// Staged data waiting to be flushed. At most one exists per store; every save
/// replaces it, and the flush routine takes it out the moment it starts.
pub(crate) enum PendingWrite<T> {
    /// Payload already built by the caller.
    Materialized(T),
    /// Deferred payload construction, evaluated at write (or load) time.
    Producer(Box<dyn FnOnce() -> T + Send>),
}

impl<T> PendingWrite<T> {
    /// Consume the staged entry, evaluating a producer if that's what's held.
    pub(crate) fn into_data(self) -> T {
        match self {
            PendingWrite::Materialized(data) => data,
            PendingWrite::Producer(producer) => producer(),
        }
    }
}

impl<T> std::fmt::Debug for PendingWrite<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingWrite::Materialized(_) => f.write_str("PendingWrite::Materialized"),
            PendingWrite::Producer(_) => f.write_str("PendingWrite::Producer"),
        }
    }
}
