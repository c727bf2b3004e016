// tests/pipeline_idempotence.rs
mod common;

use channel_digest::ingest::CollectWindow;
use channel_digest::pipeline::{Phase, PhaseStatus};
use common::*;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn second_run_over_same_window_writes_nothing() {
    let mut h = Harness::new((1..=4).map(noise).collect()).with_quota(0);
    h.collect_window = CollectWindow::Days { days: 2 };
    let p = h.pipeline();
    let cancel = CancellationToken::new();

    let first = p.run_once(&cancel).await;
    assert_eq!(first.phase(Phase::Writing).unwrap().succeeded, 4);

    let second = p.run_once(&cancel).await;
    assert_eq!(second.phase(Phase::Deduping).unwrap().skipped, 4);
    let write = second.phase(Phase::Writing).unwrap();
    assert_eq!(write.status, PhaseStatus::Skipped);
    assert_eq!(write.succeeded, 0);
    assert_eq!(h.ledger.active_rows().len(), 4);
}

#[tokio::test]
async fn archived_items_are_not_ingested_again() {
    let mut h = Harness::new(vec![launch(1), noise(2)]);
    h.collect_window = CollectWindow::Hours { hours: 12 };
    let p = h.pipeline();
    let cancel = CancellationToken::new();

    let first = p.run_once(&cancel).await;
    assert!(first.success);
    assert_eq!(h.ledger.archive_cells().len(), 2);
    assert!(h.ledger.active_rows().is_empty());

    // Same messages again: both links live only in the archive now.
    let second = p.run_once(&cancel).await;
    assert_eq!(second.phase(Phase::Deduping).unwrap().skipped, 2);
    assert!(h.ledger.active_rows().is_empty());
    assert_eq!(h.ledger.archive_cells().len(), 2);
    assert_eq!(h.classifier.calls(), 2);
    assert_eq!(h.publisher.published.lock().len(), 1);
}

#[tokio::test]
async fn since_last_mode_starts_after_newest_stored_row() {
    let h = Harness::new(vec![noise(1), noise(2)]).with_quota(0);
    let p = h.pipeline();
    let cancel = CancellationToken::new();

    p.run_once(&cancel).await;
    h.source.messages.lock().push(noise(3));
    let second = p.run_once(&cancel).await;

    // Only the newer message reaches dedup; nothing is counted twice.
    let dedup = second.phase(Phase::Deduping).unwrap();
    assert_eq!((dedup.succeeded, dedup.skipped), (1, 0));
    assert_eq!(h.ledger.active_rows().len(), 3);
    assert_eq!(h.source.clients_built.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(h.source.disconnects(), 2);
}

#[tokio::test]
async fn since_last_mode_counts_archived_rows() {
    let h = Harness::new(vec![launch(1), noise(2)]);
    let p = h.pipeline();
    let cancel = CancellationToken::new();

    assert!(p.run_once(&cancel).await.success);
    assert!(h.ledger.active_rows().is_empty(), "everything was archived");

    h.source.messages.lock().push(noise(3));
    let second = p.run_once(&cancel).await;

    // The bound comes from the archive, so the two archived messages are not refetched.
    let dedup = second.phase(Phase::Deduping).unwrap();
    assert_eq!((dedup.succeeded, dedup.skipped), (1, 0));
}
