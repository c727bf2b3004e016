// tests/archive_atomicity.rs
mod common;

use channel_digest::archive::Archiver;
use channel_digest::error::PipelineError;
use channel_digest::ledger::memory::LedgerOp;
use channel_digest::model::{ArchiveRow, ClassificationState, LedgerRow, Receipt, NO_MATCH_SENTINEL};
use common::*;

fn processed(n: u32) -> LedgerRow {
    let mut row = LedgerRow::new(candidate(n));
    row.state = ClassificationState::NoMatch;
    row.summary = Some(NO_MATCH_SENTINEL.to_string());
    row
}

fn receipt() -> Receipt {
    Receipt {
        id: "77".into(),
        url: Some("https://typefully.com/t/77".into()),
    }
}

#[tokio::test]
async fn only_processed_rows_move_and_get_the_run_receipt() {
    let h = Harness::new(vec![]);
    h.ledger
        .seed_active(&[processed(1), LedgerRow::new(candidate(2)), processed(3)]);

    let res = Archiver::new(10)
        .archive_processed(&h.writer(), Some(&receipt()))
        .await
        .unwrap();
    assert_eq!(res.selected, 2);
    assert_eq!(res.archived, 2);
    assert!(res.partial_commits.is_empty());

    assert_eq!(h.archived_links(), vec![link(1), link(3)]);
    for cells in h.ledger.archive_cells() {
        assert_eq!(cells[7], "https://typefully.com/t/77");
        assert!(chrono::DateTime::parse_from_rfc3339(&cells[6]).is_ok());
    }
    let left = h.ledger.active_rows();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].item.post_link, link(2));
}

#[tokio::test]
async fn failed_append_leaves_rows_active() {
    let h = Harness::new(vec![]);
    h.ledger.seed_active(&[processed(1), processed(2)]);
    h.ledger
        .fail_always(LedgerOp::AppendArchive, PipelineError::TransientNetwork("502".into()));

    let res = Archiver::new(10)
        .archive_processed(&h.writer(), None)
        .await
        .unwrap();
    assert_eq!(res.archived, 0);
    assert_eq!(res.failed, 2);
    assert!(res.first_error.is_some());
    assert!(h.ledger.archive_cells().is_empty());
    assert_eq!(h.ledger.active_rows().len(), 2);
    assert_eq!(h.ledger.calls(LedgerOp::DeleteActive), 0, "no delete without a good append");
}

#[tokio::test]
async fn failed_append_still_removes_rows_already_in_archive() {
    let h = Harness::new(vec![]);
    h.ledger
        .seed_archive(&[ArchiveRow::from_ledger(&processed(1), chrono::Utc::now(), None)]);
    h.ledger.seed_active(&[processed(1), processed(2)]);
    h.ledger
        .fail_always(LedgerOp::AppendArchive, PipelineError::TransientNetwork("502".into()));

    let res = Archiver::new(10)
        .archive_processed(&h.writer(), None)
        .await
        .unwrap();
    assert_eq!(res.failed, 1, "only the row that needed appending failed");
    assert_eq!(res.already_archived, 1);
    assert_eq!(res.archived, 0);
    assert!(res.first_error.is_some());

    let left = h.ledger.active_rows();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].item.post_link, link(2));
    assert_eq!(h.archived_links(), vec![link(1)]);
}

#[tokio::test]
async fn failed_delete_is_a_partial_commit_reconciled_next_run() {
    let h = Harness::new(vec![]);
    h.ledger.seed_active(&[processed(1), processed(2)]);
    h.ledger
        .fail_always(LedgerOp::DeleteActive, PipelineError::TransientNetwork("timeout".into()));

    let archiver = Archiver::new(10);
    let res = archiver.archive_processed(&h.writer(), None).await.unwrap();
    assert_eq!(res.partial_commits, vec![link(1), link(2)]);
    assert!(matches!(res.first_error, Some(PipelineError::PartialCommit(_))));
    assert_eq!(h.ledger.archive_cells().len(), 2);
    assert_eq!(h.ledger.active_rows().len(), 2);

    h.ledger.clear_faults();
    let res = archiver.archive_processed(&h.writer(), None).await.unwrap();
    assert_eq!(res.archived, 0);
    assert_eq!(res.already_archived, 2);
    assert_eq!(h.ledger.archive_cells().len(), 2, "not appended twice");
    assert!(h.ledger.active_rows().is_empty());
}

#[tokio::test]
async fn batches_are_committed_independently() {
    let h = Harness::new(vec![]);
    let rows: Vec<LedgerRow> = (1..=5).map(processed).collect();
    h.ledger.seed_active(&rows);
    // the first batch append fails three times (all retries), later batches succeed
    h.ledger
        .fail(LedgerOp::AppendArchive, PipelineError::TransientNetwork("503".into()), 3);

    let res = Archiver::new(2)
        .archive_processed(&h.writer(), None)
        .await
        .unwrap();
    assert_eq!(res.failed, 2);
    assert_eq!(res.archived, 3);
    assert_eq!(h.archived_links(), vec![link(3), link(4), link(5)]);
    let left: Vec<String> = h.ledger.active_rows().into_iter().map(|r| r.item.post_link).collect();
    assert_eq!(left, vec![link(1), link(2)]);
}

#[tokio::test]
async fn transient_columns_cleared_on_pending_rows_only() {
    let h = Harness::new(vec![]);
    let mut stale = LedgerRow::new(candidate(1));
    stale.summary = Some("half-written".into());
    stale.draft_ref = Some("draft-20250101T000000Z".into());
    h.ledger.seed_active(&[stale, LedgerRow::new(candidate(2))]);

    let res = Archiver::new(10)
        .archive_processed(&h.writer(), None)
        .await
        .unwrap();
    assert_eq!(res.selected, 0);
    assert_eq!(res.cleared, 1);
    let rows = h.ledger.active_rows();
    assert_eq!(rows[0].summary, None);
    assert_eq!(rows[0].draft_ref, None);
    assert_eq!(rows[0].state, ClassificationState::Unprocessed);
}
