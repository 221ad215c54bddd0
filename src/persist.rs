//! Blocking disk I/O: record read, atomic write, removal.
//!
//! Everything here is synchronous and meant to run through
//! [`run_blocking`] so the async control flow never stalls on the
//! filesystem. Writes go to a temp file in the destination directory, get
//! fsynced, then renamed over the target — a crash mid-write leaves the old
//! file intact.

use std::fs;
use std::io::Write as _;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::record::VersionedRecord;

/// Run a blocking closure on the runtime's blocking pool.
pub(crate) async fn run_blocking<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| Error::Io(format!("blocking i/o task failed: {err}")))?
}

/// Read and parse the record at `path`. A missing or empty file is a valid
/// "no data yet" state, not an error.
pub(crate) fn read_record(path: &Path) -> Result<Option<VersionedRecord>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::Io(err.to_string())),
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| Error::Deserialize(err.to_string()))
}

/// Serialize `record` and atomically replace the file at `path`, creating
/// parent directories as needed. `private` tightens the file mode to
/// owner-only on Unix.
pub(crate) fn write_record(path: &Path, record: &VersionedRecord, private: bool) -> Result<()> {
    let bytes = serde_json::to_vec(record).map_err(|err| Error::Serialize(err.to_string()))?;
    atomic_write(path, &bytes, private)
}

/// Delete the file at `path`. Already absent is fine.
pub(crate) fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::Io(err.to_string())),
    }
}

fn atomic_write(path: &Path, bytes: &[u8], private: bool) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|err| Error::Write(err.to_string()))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|err| Error::Write(err.to_string()))?;
    tmp.write_all(bytes)
        .map_err(|err| Error::Write(err.to_string()))?;
    tmp.as_file()
        .sync_all()
        .map_err(|err| Error::Write(err.to_string()))?;
    tmp.persist(path)
        .map_err(|err| Error::Write(err.error.to_string()))?;

    set_file_mode(path, private)?;
    Ok(())
}

#[cfg(unix)]
fn set_file_mode(path: &Path, private: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    // Temp files start out 0o600; widen non-private files to the usual mode.
    let mode = if private { 0o600 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|err| Error::Write(err.to_string()))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _private: bool) -> Result<()> {
    Ok(())
}
