//! One-shot migration from a legacy flat file into a [`Store`].
//!
//! For code that used to write plain JSON straight to its own path and is
//! moving to versioned storage: read the old file once, push its contents
//! through the store, delete the old file.

use std::fs;
use std::path::Path;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::persist;
use crate::store::Store;

/// Async transform applied to the raw legacy JSON before it is saved.
pub type LegacyTransform<T> = Box<dyn FnOnce(Value) -> BoxFuture<'static, Result<T>> + Send>;

/// Move the contents of `old_path` into `store`, then delete `old_path`.
///
/// If the legacy file does not exist this simply delegates to
/// [`Store::load`]. Otherwise the file is read off the main flow, `transform`
/// (or a plain deserialization of the raw JSON when `None`) produces the
/// payload, the payload is saved immediately, and the legacy file is removed.
/// Returns the migrated payload.
pub async fn migrate_legacy_file<T>(
    old_path: impl AsRef<Path>,
    store: &Store<T>,
    transform: Option<LegacyTransform<T>>,
) -> Result<Option<T>>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let old_path = old_path.as_ref().to_path_buf();

    let read_path = old_path.clone();
    let raw = persist::run_blocking(move || read_legacy(&read_path)).await?;
    let Some(raw) = raw else {
        return store.load().await;
    };

    let data = match transform {
        Some(transform) => transform(raw).await?,
        None => serde_json::from_value(raw).map_err(|err| Error::Deserialize(err.to_string()))?,
    };

    store.save(data.clone()).await;
    persist::run_blocking(move || persist::remove_file(&old_path)).await?;
    Ok(Some(data))
}

fn read_legacy(path: &Path) -> Result<Option<Value>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::Io(err.to_string())),
    };
    // Only a missing file falls back to the store. A file that exists but
    // cannot be parsed (an empty one included) is surfaced to the caller.
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| Error::Deserialize(err.to_string()))
}
