//! Debounced, shutdown-safe JSON record store with versioned migrations.
//!
//! One [`Store`] persists one record under a key, replaced wholesale on every
//! save. The interesting part is *when* data touches disk: rapid saves are
//! coalesced so only the latest state is written, delayed saves defer both
//! the write and the payload construction, and anything still pending when
//! the host process shuts down is flushed on the final-write signal rather
//! than lost with an unfired timer. Loads are single-flight (concurrent
//! callers share one disk read), and records stored by older code versions
//! are migrated on the way in.
//!
//! ```rust,no_run
//! use json_coalesce::{Lifecycle, Store};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), json_coalesce::Error> {
//! let lifecycle = Lifecycle::new();
//! let store: Store<Vec<String>> = Store::builder("/var/lib/myapp", 1, "favorites")
//!     .lifecycle(lifecycle.handle())
//!     .build();
//!
//! store.save(vec!["first".into()]).await;
//! let favorites = store.load().await?;
//! assert!(favorites.is_some());
//!
//! // At shutdown:
//! lifecycle.begin_shutdown();
//! lifecycle.fire_final_write();
//! # Ok(())
//! # }
//! ```
//!
//! **Single-process only.** If multiple processes open the same storage
//! directory they will clobber each other.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod lifecycle;
pub mod migrate;
mod persist;
pub mod record;
pub mod store;

pub use error::{Error, Result};
pub use lifecycle::{Lifecycle, LifecycleHandle, ProcessPhase};
pub use migrate::{migrate_legacy_file, LegacyTransform};
pub use record::VersionedRecord;
pub use store::{Store, StoreBuilder, STORAGE_DIR};
