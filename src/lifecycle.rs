//! Process lifecycle observation.
//!
//! The store never writes on a timer once the host process starts shutting
//! down — timers may simply never fire. Instead it watches the phase stream
//! published here and defers any pending write to the final-write signal.

use tokio::sync::watch;

/// Where the host process is in its lifetime. Ordered: comparisons like
/// `phase >= Stopping` are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcessPhase {
    /// Normal operation.
    Running,
    /// Shutdown has begun; immediate disk writes may race with teardown.
    Stopping,
    /// Last chance to write: stores must flush anything still pending.
    FinalWrite,
}

/// Host-side lifecycle publisher. Create one per process, hand out
/// [`handle`](Lifecycle::handle)s to stores, and drive the phases during
/// shutdown: [`begin_shutdown`](Lifecycle::begin_shutdown) first, then
/// [`fire_final_write`](Lifecycle::fire_final_write) right before exit.
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<ProcessPhase>,
}

impl Lifecycle {
    /// New lifecycle in the [`ProcessPhase::Running`] phase.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProcessPhase::Running);
        Self { tx }
    }

    /// Subscribe a new observer handle.
    #[must_use]
    pub fn handle(&self) -> LifecycleHandle {
        LifecycleHandle {
            rx: self.tx.subscribe(),
        }
    }

    /// Enter the [`ProcessPhase::Stopping`] phase.
    pub fn begin_shutdown(&self) {
        self.tx.send_replace(ProcessPhase::Stopping);
    }

    /// Enter the [`ProcessPhase::FinalWrite`] phase, waking every armed
    /// final-write listener. Implies `Stopping` if it was never signaled.
    pub fn fire_final_write(&self) {
        self.tx.send_replace(ProcessPhase::FinalWrite);
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Store-side view of the process phase. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    rx: watch::Receiver<ProcessPhase>,
}

impl LifecycleHandle {
    /// A handle that reports [`ProcessPhase::Running`] forever. Useful when
    /// embedding a store somewhere without host lifecycle wiring.
    #[must_use]
    pub fn detached() -> Self {
        let (tx, rx) = watch::channel(ProcessPhase::Running);
        drop(tx);
        Self { rx }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ProcessPhase {
        *self.rx.borrow()
    }

    /// `true` once shutdown has begun (`Stopping` or later).
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.phase() >= ProcessPhase::Stopping
    }

    /// Resolves `true` when the final-write phase is reached, immediately if
    /// it already has been. Resolves `false` if the host side went away
    /// without ever firing it.
    pub async fn final_write_signaled(&self) -> bool {
        let mut rx = self.rx.clone();
        let signaled = rx
            .wait_for(|phase| *phase == ProcessPhase::FinalWrite)
            .await
            .is_ok();
        signaled
    }
}
