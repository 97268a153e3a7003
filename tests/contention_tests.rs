
use std::time::{Duration, Instant};

use queuectl::scheduler::{epoch_now, JobState};
use test_harness::{hold_write_lock, TestStore};

const HOLD: Duration = Duration::from_millis(300);

#[tokio::test]
async fn test_enqueue_waits_for_foreign_write_lock() {
    let t = TestStore::new().await;
    let holder = hold_write_lock(t.db_path(), HOLD).await;

    let started = Instant::now();
    let receipt = t
        .queue()
        .enqueue(r#"{"id":"late","command":"true"}"#)
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(receipt.id, "late");
    holder.await.unwrap();
    assert!(t.store.get("late").await.unwrap().is_some());
}

#[tokio::test]
async fn test_claim_waits_for_foreign_write_lock() {
    let t = TestStore::new().await;
    let now = epoch_now();
    t.enqueue_at("queued", "true", now).await;
    let holder = hold_write_lock(t.db_path(), HOLD).await;

    let started = Instant::now();
    let job = t.store.claim_next_at(now).await.unwrap().unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(job.id, "queued");
    holder.await.unwrap();
    assert_eq!(
        t.store.get("queued").await.unwrap().unwrap().state,
        JobState::Processing
    );
}

#[tokio::test]
async fn test_finalize_waits_for_foreign_write_lock() {
    let t = TestStore::new().await;
    let now = epoch_now();
    t.enqueue_at("running", "true", now).await;
    t.store.claim_next_at(now).await.unwrap().unwrap();
    let holder = hold_write_lock(t.db_path(), HOLD).await;

    assert!(t.store.complete("running", "", now).await.unwrap());
    holder.await.unwrap();
    assert_eq!(
        t.store.get("running").await.unwrap().unwrap().state,
        JobState::Completed
    );
}
