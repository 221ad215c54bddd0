//! Concurrent loads share one underlying read/migration cycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use json_coalesce::{Error, Store, STORAGE_DIR};
use serde_json::json;

fn write_record(dir: &tempfile::TempDir, key: &str, version: u32, data: serde_json::Value) {
    let storage = dir.path().join(STORAGE_DIR);
    std::fs::create_dir_all(&storage).unwrap();
    let record = json!({"version": version, "key": key, "data": data});
    std::fs::write(storage.join(key), serde_json::to_vec(&record).unwrap()).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_loads_run_migration_once() {
    let dir = tempfile::tempdir().unwrap();
    write_record(&dir, "things", 1, json!([1, 2]));
    let migrations = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&migrations);
    let store: Store<Vec<u32>> = Store::builder(dir.path(), 2, "things")
        .on_migrate(move |_, old_data| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                // Keep the cycle in flight long enough for every caller to
                // pile onto it.
                tokio::time::sleep(Duration::from_millis(200)).await;
                let mut data: Vec<u32> = serde_json::from_value(old_data).unwrap();
                data.push(3);
                Ok(data)
            }
        })
        .build();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.load().await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), Some(vec![1, 2, 3]));
    }
    assert_eq!(migrations.load(Ordering::SeqCst), 1);

    // The cycle is over; a later load starts a fresh one.
    assert_eq!(store.load().await.unwrap(), Some(vec![1, 2, 3]));
    assert_eq!(migrations.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failures_fan_out_without_poisoning_the_slot() {
    let dir = tempfile::tempdir().unwrap();
    write_record(&dir, "things", 1, json!([1]));
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&attempts);
    let store: Store<Vec<u32>> = Store::builder(dir.path(), 2, "things")
        .on_migrate(move |_, old_data| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                if attempt == 0 {
                    Err(Error::Migration("transient".into()))
                } else {
                    Ok(serde_json::from_value(old_data).unwrap())
                }
            }
        })
        .build();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.load().await }));
    }
    for handle in handles {
        // Every waiter of the failed cycle sees the same error.
        assert_eq!(
            handle.await.unwrap().unwrap_err(),
            Error::Migration("transient".into())
        );
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    // A fresh load is allowed to try again.
    assert_eq!(store.load().await.unwrap(), Some(vec![1]));
}

#[tokio::test]
async fn sequential_loads_each_read_fresh_state() {
    let dir = tempfile::tempdir().unwrap();
    write_record(&dir, "things", 1, json!([5]));

    let store: Store<Vec<u32>> = Store::builder(dir.path(), 1, "things").build();
    assert_eq!(store.load().await.unwrap(), Some(vec![5]));

    // Disk changes between cycles are observed, proving the slot was cleared.
    write_record(&dir, "things", 1, json!([6]));
    assert_eq!(store.load().await.unwrap(), Some(vec![6]));
}
