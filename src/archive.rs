// src/archive.rs
//! Moves processed rows from the active ledger to the archive sheet.
//!
//! Per batch the archive append must succeed before the active rows are
//! deleted. A delete that fails after a good append leaves the rows in both
//! sheets; the next run sees their links in the archive and only deletes.

use std::collections::HashSet;

use chrono::Utc;

use crate::error::{PipelineError, Result};
use crate::ingest::dedup::normalize_link;
use crate::ledger::LedgerWriter;
use crate::model::{ArchiveRow, LedgerRow, Receipt, RowKey, RowPatch};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveResult {
    pub selected: usize,
    pub archived: usize,
    /// Already in the archive from an earlier partial commit; only deleted now.
    pub already_archived: usize,
    /// Rows whose append failed; they stay in the active ledger.
    pub failed: usize,
    /// Links present in both sheets after a failed delete.
    pub partial_commits: Vec<String>,
    pub cleared: usize,
    pub first_error: Option<PipelineError>,
}

#[derive(Debug, Clone)]
pub struct Archiver {
    batch_size: usize,
}

impl Archiver {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// `receipt` is this run's publication receipt, stamped on every archived row.
    pub async fn archive_processed(
        &self,
        ledger: &LedgerWriter,
        receipt: Option<&Receipt>,
    ) -> Result<ArchiveResult> {
        let snap = ledger.read_active().await?;
        let mut in_archive: HashSet<String> = ledger
            .archive_links()
            .await?
            .iter()
            .map(|l| normalize_link(l))
            .collect();

        let (selected, pending): (Vec<LedgerRow>, Vec<LedgerRow>) =
            snap.rows.into_iter().partition(LedgerRow::is_processed);
        let mut res = ArchiveResult {
            selected: selected.len(),
            ..Default::default()
        };
        let receipt_text = receipt.map(Receipt::to_string);

        for batch in selected.chunks(self.batch_size) {
            let (fresh, reconcile): (Vec<&LedgerRow>, Vec<&LedgerRow>) = batch
                .iter()
                .partition(|r| !in_archive.contains(&normalize_link(&r.item.post_link)));

            let mut appended = fresh.is_empty();
            if !fresh.is_empty() {
                let now = Utc::now();
                let rows: Vec<ArchiveRow> = fresh
                    .iter()
                    .map(|r| ArchiveRow::from_ledger(r, now, receipt_text.clone()))
                    .collect();
                match ledger.append_archive(&rows).await {
                    Ok(()) => {
                        appended = true;
                        in_archive.extend(fresh.iter().map(|r| normalize_link(&r.item.post_link)));
                    }
                    Err(e) => {
                        tracing::error!(rows = rows.len(), error = %e, "archive append failed; rows stay active");
                        res.failed += fresh.len();
                        res.first_error.get_or_insert(e);
                    }
                }
            }

            // Rows already in the archive are removed even when this batch's append failed.
            let archived_now: &[&LedgerRow] = if appended { &fresh } else { &[] };
            let keys: Vec<RowKey> = archived_now
                .iter()
                .chain(reconcile.iter())
                .map(|r| r.key())
                .collect();
            if keys.is_empty() {
                continue;
            }
            match ledger.delete(&keys).await {
                Ok(n) => {
                    if n < keys.len() {
                        tracing::warn!(expected = keys.len(), deleted = n, "fewer active rows deleted than archived");
                    }
                    res.archived += archived_now.len();
                    res.already_archived += reconcile.len();
                }
                Err(e) => {
                    let links: Vec<String> = archived_now.iter().map(|r| r.item.post_link.clone()).collect();
                    let err = PipelineError::PartialCommit(format!(
                        "{} row(s) archived but not removed from the active ledger: {e}",
                        links.len()
                    ));
                    tracing::error!(links = ?links, error = %err, "rows duplicated in archive and active ledger; next run will reconcile");
                    res.partial_commits.extend(links);
                    res.first_error.get_or_insert(err);
                }
            }
        }

        res.cleared = self.clear_transient(ledger, &pending).await;
        tracing::info!(
            archived = res.archived,
            already_archived = res.already_archived,
            failed = res.failed,
            partial_commits = res.partial_commits.len(),
            cleared = res.cleared,
            "archival finished"
        );
        Ok(res)
    }

    /// Clear summary, draft reference and receipt on rows still waiting for classification.
    async fn clear_transient(&self, ledger: &LedgerWriter, pending: &[LedgerRow]) -> usize {
        let patch = RowPatch::clear_transient();
        let mut cleared = 0;
        for row in pending
            .iter()
            .filter(|r| r.summary.is_some() || r.draft_ref.is_some() || r.receipt.is_some())
        {
            match ledger.update(&row.key(), &patch).await {
                Ok(()) => cleared += 1,
                Err(e) => tracing::warn!(row = %row.key(), error = %e, "could not clear transient columns"),
            }
        }
        cleared
    }
}
