//! Coalescing and debounce behavior of the save path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use json_coalesce::Store;

fn store_in(dir: &tempfile::TempDir) -> Store<Vec<u32>> {
    Store::builder(dir.path(), 1, "counters").build()
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn on_disk(store: &Store<Vec<u32>>) -> Option<Vec<u32>> {
    let raw = std::fs::read(store.path()).ok()?;
    let record: serde_json::Value = serde_json::from_slice(&raw).ok()?;
    serde_json::from_value(record["data"].clone()).ok()
}

#[tokio::test]
async fn last_save_wins() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    store.save(vec![1]).await;
    store.save(vec![2]).await;
    assert_eq!(on_disk(&store), Some(vec![2]));
}

#[tokio::test]
async fn delayed_save_eventually_lands() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    store.save_delayed(|| vec![7], Duration::from_millis(50));

    assert!(wait_until(|| on_disk(&store) == Some(vec![7])).await);
}

#[tokio::test]
async fn immediate_save_supersedes_delayed_save() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let produced = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&produced);
    store.save_delayed(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![1]
        },
        Duration::from_millis(100),
    );
    store.save(vec![2]).await;

    // Give the cancelled timer ample time to have fired if it were alive.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(on_disk(&store), Some(vec![2]));
    assert_eq!(produced.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn newer_delayed_save_supersedes_older() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let produced = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&produced);
    store.save_delayed(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![1]
        },
        Duration::from_millis(100),
    );
    store.save_delayed(|| vec![2], Duration::from_millis(50));

    assert!(wait_until(|| on_disk(&store) == Some(vec![2])).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(on_disk(&store), Some(vec![2]));
    assert_eq!(produced.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn producer_runs_lazily_and_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let produced = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&produced);
    store.save_delayed(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![9]
        },
        Duration::from_millis(50),
    );
    assert_eq!(produced.load(Ordering::SeqCst), 0);

    assert!(wait_until(|| on_disk(&store) == Some(vec![9])).await);
    assert_eq!(produced.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn save_racing_a_firing_timer_never_loses_data() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    // Supersede a timer that is right at (or past) its deadline, over and
    // over. Whichever side claims the staged data, the newest value must end
    // up on disk; a superseded timer waking up mid-save must back off rather
    // than swallow it.
    for round in 0..25u32 {
        store.save_delayed(move || vec![round], Duration::from_millis(2));
        tokio::time::sleep(Duration::from_millis(2)).await;
        let newest = Some(vec![round + 1000]);
        store.save(vec![round + 1000]).await;
        assert!(wait_until(|| on_disk(&store) == newest).await);
    }
}

#[tokio::test]
async fn load_serves_staged_data_without_reading_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    // Disk holds garbage: a load that touched it would fail loudly.
    std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    std::fs::write(store.path(), b"definitely not json").unwrap();

    store.save_delayed(|| vec![3, 4], Duration::from_secs(60));
    assert_eq!(store.load().await.unwrap(), Some(vec![3, 4]));
}

#[tokio::test]
async fn load_materializes_producer_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let produced = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&produced);
    store.save_delayed(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![5]
        },
        Duration::from_millis(50),
    );

    // Two loads before the timer fires: the thunk runs once, the flush then
    // writes the already-materialized value.
    assert_eq!(store.load().await.unwrap(), Some(vec![5]));
    assert_eq!(store.load().await.unwrap(), Some(vec![5]));
    assert_eq!(produced.load(Ordering::SeqCst), 1);

    assert!(wait_until(|| on_disk(&store) == Some(vec![5])).await);
    assert_eq!(produced.load(Ordering::SeqCst), 1);
}
