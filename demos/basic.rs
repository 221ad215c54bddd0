//! Minimal walkthrough: save, debounced save, shutdown flush.
//!
//! Run with `cargo run --example basic`.

use std::time::Duration;

use json_coalesce::{Lifecycle, Store};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowState {
    width: u32,
    height: u32,
    maximized: bool,
}

#[tokio::main]
async fn main() -> Result<(), json_coalesce::Error> {
    let dir = tempfile::tempdir().expect("tempdir");
    let lifecycle = Lifecycle::new();

    let store: Store<WindowState> = Store::builder(dir.path(), 1, "window-state")
        .lifecycle(lifecycle.handle())
        .build();

    // Immediate save: on disk before this returns.
    store
        .save(WindowState {
            width: 800,
            height: 600,
            maximized: false,
        })
        .await;
    println!("saved: {:?}", store.load().await?);

    // Rapid-fire resize events: stage lazily, let the debounce collapse them.
    for width in [810, 820, 830] {
        store.save_delayed(
            move || WindowState {
                width,
                height: 600,
                maximized: false,
            },
            Duration::from_millis(500),
        );
    }

    // The process quits before the delay elapses; the final-write signal
    // flushes the last staged state anyway.
    lifecycle.begin_shutdown();
    lifecycle.fire_final_write();
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("after shutdown flush: {:?}", store.load().await?);
    Ok(())
}
