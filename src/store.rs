//! Core store type, builder, and the write-coalescing coordinator.
//!
//! One [`Store`] owns one record on disk. Saves are staged in memory and
//! coalesced (last writer wins), loads are single-flight, and anything still
//! pending when the host process shuts down is flushed on the final-write
//! signal instead of being lost with an unfired timer.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::lifecycle::LifecycleHandle;
use crate::persist;
use crate::record::{PendingWrite, VersionedRecord};

/// Subdirectory of the configured root that holds every store's file.
pub const STORAGE_DIR: &str = ".storage";

type LoadFuture<T> = Shared<BoxFuture<'static, Result<Option<T>>>>;
type Migrator<T> = Box<dyn Fn(u32, Value) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Durable single-record JSON store with debounced writes.
///
/// Cloning is cheap and every clone talks to the same coordinator, so a store
/// can be handed to as many tasks as needed. Construct one with
/// [`builder`](Self::builder).
///
/// Writes are fire-and-forget: [`save`](Self::save) and
/// [`save_delayed`](Self::save_delayed) stage data in memory and the flush
/// that eventually lands it on disk reports failures through `tracing` rather
/// than to the caller. Call [`load`](Self::load) if you need to confirm what
/// is durable.
pub struct Store<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    version: u32,
    key: String,
    path: PathBuf,
    private: bool,
    lifecycle: LifecycleHandle,
    migrator: Option<Migrator<T>>,
    state: Mutex<CoordinatorState<T>>,
    // At most one physical write to this store's file at a time.
    write_lock: tokio::sync::Mutex<()>,
}

struct CoordinatorState<T> {
    pending: Option<PendingWrite<T>>,
    // Slots hold the generation of the armed timer/listener task, not the
    // task itself. Cancellation clears the slot; the superseded task notices
    // the mismatch when it wakes and backs off. Killing the task instead
    // could drop a claimed pending write mid-flush.
    delay_timer: Option<u64>,
    final_write_listener: Option<u64>,
    load_task: Option<LoadFuture<T>>,
    generation: u64,
}

impl<T> Default for CoordinatorState<T> {
    fn default() -> Self {
        Self {
            pending: None,
            delay_timer: None,
            final_write_listener: None,
            load_task: None,
            generation: 0,
        }
    }
}

impl<T> CoordinatorState<T> {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn cancel_delay_timer(&mut self) {
        self.delay_timer = None;
    }

    fn cancel_final_write_listener(&mut self) {
        self.final_write_listener = None;
    }
}

impl<T> Store<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Start configuring a store for `key`, persisted under
    /// `<config_dir>/.storage/<key>` with the given schema `version`.
    pub fn builder(
        config_dir: impl AsRef<Path>,
        version: u32,
        key: impl Into<String>,
    ) -> StoreBuilder<T> {
        StoreBuilder::new(config_dir, version, key)
    }

    /// Load the stored payload, or `None` if nothing was ever saved.
    ///
    /// Unflushed in-memory state always wins over whatever is on disk. When a
    /// disk read is needed, concurrent callers share a single in-flight load:
    /// the file is read (and any migration run) at most once per load cycle,
    /// and every caller of that cycle gets the same result, errors included.
    ///
    /// A record whose `version` differs from the configured one is handed to
    /// the migrator registered via
    /// [`on_migrate`](StoreBuilder::on_migrate); without one the load fails
    /// with [`Error::MigrationNotImplemented`].
    pub async fn load(&self) -> Result<Option<T>> {
        let task = {
            let mut state = self.inner.state.lock();
            if let Some(task) = &state.load_task {
                task.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let task = async move {
                    let result = inner.load_inner().await;
                    // Clear the slot so the next load starts a fresh cycle;
                    // errors must not poison future loads.
                    inner.state.lock().load_task = None;
                    result
                }
                .boxed()
                .shared();
                state.load_task = Some(task.clone());
                task
            }
        };
        task.await
    }

    /// Save `data`, replacing any previously staged save.
    ///
    /// Outside shutdown the write happens before this returns. Once the host
    /// is stopping, the data is parked for the final-write signal instead,
    /// since immediate I/O could race with process teardown.
    pub async fn save(&self, data: T) {
        {
            let mut state = self.inner.state.lock();
            state.pending = Some(PendingWrite::Materialized(data));
            state.cancel_delay_timer();
            state.cancel_final_write_listener();
            if self.inner.lifecycle.is_stopping() {
                Inner::arm_final_write_listener(&self.inner, &mut state);
                return;
            }
        }
        self.inner.handle_write_data().await;
    }

    /// Stage a save whose payload is produced lazily, written after `delay`.
    ///
    /// The producer is not called until the write actually happens (or a
    /// [`load`](Self::load) needs the fresh state first), so repeated calls
    /// within the delay window cost nothing but a closure swap. Each call
    /// supersedes the previous one and restarts the delay. If shutdown begins
    /// before the delay elapses, the write is performed on the final-write
    /// signal instead.
    ///
    /// Must be called from within a tokio runtime.
    pub fn save_delayed<F>(&self, producer: F, delay: Duration)
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        state.pending = Some(PendingWrite::Producer(Box::new(producer)));
        state.cancel_delay_timer();
        state.cancel_final_write_listener();
        if self.inner.lifecycle.is_stopping() {
            Inner::arm_final_write_listener(&self.inner, &mut state);
            return;
        }
        let generation = state.next_generation();
        state.delay_timer = Some(generation);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.delayed_write_fired(generation).await;
        });
        // If shutdown begins before the timer fires, the final-write hook
        // performs the write instead.
        Inner::arm_final_write_listener(&self.inner, &mut state);
    }

    /// Delete the store's file. Succeeds if the file never existed.
    pub async fn remove(&self) -> Result<()> {
        let path = self.inner.path.clone();
        persist::run_blocking(move || persist::remove_file(&path)).await
    }

    /// Path to the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// The store key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// The schema version this store reads and writes.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.inner.version
    }
}

impl<T> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("key", &self.inner.key)
            .field("version", &self.inner.version)
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

impl<T> Inner<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn load_inner(&self) -> Result<Option<T>> {
        {
            let mut state = self.state.lock();
            if let Some(pending) = state.pending.take() {
                // Staged state is newer than disk. Materialize a producer now
                // and keep the result staged so the flush writes the same data.
                let data = pending.into_data();
                state.pending = Some(PendingWrite::Materialized(data.clone()));
                return Ok(Some(data));
            }
        }

        let path = self.path.clone();
        let record = persist::run_blocking(move || persist::read_record(&path)).await?;
        let Some(record) = record else {
            return Ok(None);
        };

        if record.version == self.version {
            let data = serde_json::from_value(record.data)
                .map_err(|err| Error::Deserialize(err.to_string()))?;
            return Ok(Some(data));
        }

        tracing::info!(
            key = %self.key,
            from = record.version,
            to = self.version,
            "migrating stored record"
        );
        let Some(migrator) = &self.migrator else {
            return Err(Error::MigrationNotImplemented {
                key: self.key.clone(),
                found: record.version,
                expected: self.version,
            });
        };
        let data = migrator(record.version, record.data).await?;
        Ok(Some(data))
    }

    /// The flush routine: claim whatever is staged and write it out.
    async fn handle_write_data(&self) {
        let data = {
            let mut state = self.state.lock();
            // Clear the slot before writing: saves arriving while this write
            // is in flight stage fresh data instead of blocking on it.
            match state.pending.take() {
                Some(pending) => pending.into_data(),
                None => return,
            }
        };

        let data = match serde_json::to_value(&data) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(key = %self.key, "error serializing data for store: {err}");
                return;
            }
        };
        let record = VersionedRecord {
            version: self.version,
            key: self.key.clone(),
            data,
        };

        let _guard = self.write_lock.lock().await;
        tracing::debug!(key = %self.key, "writing store data");
        let path = self.path.clone();
        let private = self.private;
        let result =
            persist::run_blocking(move || persist::write_record(&path, &record, private)).await;
        if let Err(err) = result {
            // No retry, no re-queue: the failed attempt is surfaced and done.
            tracing::error!(key = %self.key, "error writing store data: {err}");
        }
    }

    async fn delayed_write_fired(self: Arc<Self>, generation: u64) {
        {
            let mut state = self.state.lock();
            // A mismatch means a newer save superseded this timer while it
            // was waking up; the staged data is no longer ours to claim.
            if state.delay_timer != Some(generation) {
                return;
            }
            state.delay_timer = None;
            if self.lifecycle.is_stopping() {
                Self::arm_final_write_listener(&self, &mut state);
                return;
            }
            state.cancel_final_write_listener();
        }
        self.handle_write_data().await;
    }

    async fn final_write_fired(self: Arc<Self>, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.final_write_listener != Some(generation) {
                return;
            }
            state.final_write_listener = None;
            state.cancel_delay_timer();
        }
        self.handle_write_data().await;
    }

    /// Arm the shutdown hook, lazily and at most one at a time.
    fn arm_final_write_listener(this: &Arc<Self>, state: &mut CoordinatorState<T>) {
        if state.final_write_listener.is_some() {
            return;
        }
        let generation = state.next_generation();
        state.final_write_listener = Some(generation);
        let inner = Arc::clone(this);
        tokio::spawn(async move {
            if inner.lifecycle.final_write_signaled().await {
                inner.final_write_fired(generation).await;
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures and builds a [`Store`].
///
/// ```rust,no_run
/// use json_coalesce::{LifecycleHandle, Store};
///
/// let store: Store<Vec<String>> = Store::builder("/var/lib/myapp", 1, "favorites")
///     .lifecycle(LifecycleHandle::detached())
///     .private(true)
///     .build();
/// ```
pub struct StoreBuilder<T> {
    config_dir: PathBuf,
    version: u32,
    key: String,
    private: bool,
    lifecycle: LifecycleHandle,
    migrator: Option<Migrator<T>>,
}

impl<T> StoreBuilder<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn new(config_dir: impl AsRef<Path>, version: u32, key: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            version,
            key: key.into(),
            private: false,
            lifecycle: LifecycleHandle::detached(),
            migrator: None,
        }
    }

    /// Restrict the file to owner-only permissions (default: off).
    #[must_use]
    pub fn private(mut self, yes: bool) -> Self {
        self.private = yes;
        self
    }

    /// Observe the host process phase through `handle` (default: a detached
    /// handle that never reports shutdown, so writes are never deferred).
    #[must_use]
    pub fn lifecycle(mut self, handle: LifecycleHandle) -> Self {
        self.lifecycle = handle;
        self
    }

    /// Register the transform run when a stored record's version differs from
    /// the configured one: `migrate(stored_version, stored_data)` returns the
    /// payload in the current schema.
    #[must_use]
    pub fn on_migrate<F, Fut>(mut self, migrate: F) -> Self
    where
        F: Fn(u32, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.migrator = Some(Box::new(move |version, data| migrate(version, data).boxed()));
        self
    }

    /// Build the store. No I/O happens until the first load or save.
    #[must_use]
    pub fn build(self) -> Store<T> {
        let path = self.config_dir.join(STORAGE_DIR).join(&self.key);
        Store {
            inner: Arc::new(Inner {
                version: self.version,
                key: self.key,
                path,
                private: self.private,
                lifecycle: self.lifecycle,
                migrator: self.migrator,
                state: Mutex::new(CoordinatorState::default()),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

impl<T> fmt::Debug for StoreBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("config_dir", &self.config_dir)
            .field("version", &self.version)
            .field("key", &self.key)
            .field("private", &self.private)
            .finish_non_exhaustive()
    }
}
