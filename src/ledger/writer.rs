// src/ledger/writer.rs
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{ActiveSnapshot, LedgerStore, SchemaReport};
use crate::error::{PipelineError, Result};
use crate::ingest::dedup::normalize_link;
use crate::model::{ArchiveRow, CandidateItem, LedgerRow, RowKey, RowPatch};
use crate::retry::{with_timeout, RetryPolicy};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteResult {
    pub written: usize,
    pub failed: usize,
    pub failed_batches: usize,
    pub first_error: Option<PipelineError>,
}

/// Appends new items in bounded batches and owns the ledger read paths
/// other phases need.
#[derive(Clone)]
pub struct LedgerWriter {
    store: Arc<dyn LedgerStore>,
    batch_size: usize,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl LedgerWriter {
    pub fn new(store: Arc<dyn LedgerStore>, batch_size: usize, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            retry,
            call_timeout,
        }
    }

    /// Oldest first. A batch that still fails after retries is counted and skipped.
    pub async fn append(&self, mut items: Vec<CandidateItem>) -> WriteResult {
        items.sort_by_key(|c| c.timestamp);
        let rows: Vec<LedgerRow> = items.into_iter().map(LedgerRow::new).collect();
        let mut res = WriteResult::default();
        let total_batches = rows.len().div_ceil(self.batch_size);

        for (i, batch) in rows.chunks(self.batch_size).enumerate() {
            let out = self
                .retry
                .run("ledger.append_active", || {
                    with_timeout(self.call_timeout, self.store.append_active(batch))
                })
                .await;
            match out {
                Ok(()) => {
                    res.written += batch.len();
                    tracing::debug!(batch = i + 1, total_batches, rows = batch.len(), "ledger batch written");
                }
                Err(e) => {
                    tracing::error!(batch = i + 1, total_batches, rows = batch.len(), error = %e, "ledger batch failed");
                    res.failed += batch.len();
                    res.failed_batches += 1;
                    res.first_error.get_or_insert(e);
                }
            }
        }
        res
    }

    pub async fn ensure_schema(&self) -> Result<SchemaReport> {
        self.retry
            .run("ledger.ensure_schema", || {
                with_timeout(self.call_timeout, self.store.ensure_schema())
            })
            .await
    }

    pub async fn update(&self, key: &RowKey, patch: &RowPatch) -> Result<()> {
        self.retry
            .run("ledger.update_active", || {
                with_timeout(self.call_timeout, self.store.update_active(key, patch))
            })
            .await
    }

    pub async fn delete(&self, keys: &[RowKey]) -> Result<usize> {
        self.retry
            .run("ledger.delete_active", || {
                with_timeout(self.call_timeout, self.store.delete_active(keys))
            })
            .await
    }

    pub async fn append_archive(&self, rows: &[ArchiveRow]) -> Result<()> {
        self.retry
            .run("ledger.append_archive", || {
                with_timeout(self.call_timeout, self.store.append_archive(rows))
            })
            .await
    }

    /// Raw (unnormalized) links already in the archive.
    pub async fn archive_links(&self) -> Result<Vec<String>> {
        self.retry
            .run("ledger.read_archive_links", || {
                with_timeout(self.call_timeout, self.store.read_archive_links())
            })
            .await
    }

    pub async fn read_active(&self) -> Result<ActiveSnapshot> {
        self.retry
            .run("ledger.read_active", || {
                with_timeout(self.call_timeout, self.store.read_active())
            })
            .await
    }

    /// Normalized links from the active ledger (malformed rows included) and the archive.
    pub async fn existing_links(&self) -> Result<HashSet<String>> {
        let snap = self.read_active().await?;
        let archived = self.archive_links().await?;

        let links = snap
            .rows
            .iter()
            .map(|r| r.item.post_link.as_str())
            .chain(snap.malformed.iter().map(|m| m.post_link.as_str()))
            .chain(archived.iter().map(String::as_str))
            .map(normalize_link)
            .filter(|l| !l.is_empty())
            .collect();
        Ok(links)
    }

    /// Newest stored timestamp across the active ledger and the archive. Any
    /// undecodable active row makes this a `DataIntegrity` error.
    pub async fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        let snap = self.read_active().await?;
        if let Some(bad) = snap.malformed.first() {
            return Err(PipelineError::DataIntegrity(format!(
                "{} malformed row(s), first at row {}: {}",
                snap.malformed.len(),
                bad.row_number,
                bad.error
            )));
        }
        let active = snap.rows.iter().map(|r| r.item.timestamp).max();
        let archived = self
            .retry
            .run("ledger.read_archive_latest", || {
                with_timeout(self.call_timeout, self.store.read_archive_latest())
            })
            .await?;
        Ok(active.max(archived))
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::{LedgerOp, MemoryLedger};
    use chrono::TimeZone;

    fn cand(n: u32) -> CandidateItem {
        CandidateItem {
            timestamp: Utc.with_ymd_and_hms(2025, 9, 1, 12, n, 0).unwrap(),
            content: format!("c{n}"),
            post_link: format!("https://x.com/q/status/{n}"),
            author: "fay".into(),
            author_link: "https://discord.com/users/4".into(),
        }
    }

    fn writer(mem: &Arc<MemoryLedger>, batch: usize) -> LedgerWriter {
        LedgerWriter::new(mem.clone(), batch, RetryPolicy::immediate(2), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn writes_oldest_first_in_batches() {
        let mem = Arc::new(MemoryLedger::with_schema());
        let w = writer(&mem, 2);
        let res = w.append(vec![cand(5), cand(1), cand(3)]).await;
        assert_eq!(res.written, 3);
        assert_eq!(mem.calls(LedgerOp::AppendActive), 2);
        let contents: Vec<_> = mem.active_rows().into_iter().map(|r| r.item.content).collect();
        assert_eq!(contents, vec!["c1", "c3", "c5"]);
    }

    #[tokio::test]
    async fn failed_batch_does_not_stop_the_rest() {
        let mem = Arc::new(MemoryLedger::with_schema());
        mem.fail(LedgerOp::AppendActive, PipelineError::TransientNetwork("503".into()), 2);
        let w = writer(&mem, 1);
        let res = w.append(vec![cand(1), cand(2)]).await;
        assert_eq!(res.written, 1);
        assert_eq!(res.failed, 1);
        assert_eq!(res.failed_batches, 1);
        assert!(res.first_error.is_some());
        assert_eq!(mem.active_rows()[0].item.content, "c2");
    }

    #[tokio::test]
    async fn latest_timestamp_rejects_malformed_rows() {
        let mem = Arc::new(MemoryLedger::with_schema());
        let w = writer(&mem, 10);
        assert_eq!(w.latest_timestamp().await.unwrap(), None);
        w.append(vec![cand(1), cand(9)]).await;
        assert_eq!(w.latest_timestamp().await.unwrap(), Some(cand(9).timestamp));
        mem.push_raw_active(vec!["2025-09-01".into(), "noon".into(), "x".into(), "https://x.com/q/status/77".into()]);
        assert!(matches!(w.latest_timestamp().await, Err(PipelineError::DataIntegrity(_))));
        assert!(w.existing_links().await.unwrap().contains("https://x.com/q/status/77"));
    }

    #[tokio::test]
    async fn latest_timestamp_includes_archived_rows() {
        let mem = Arc::new(MemoryLedger::with_schema());
        let w = writer(&mem, 10);
        mem.seed_archive(&[ArchiveRow::from_ledger(&LedgerRow::new(cand(30)), Utc::now(), None)]);
        assert_eq!(w.latest_timestamp().await.unwrap(), Some(cand(30).timestamp));

        w.append(vec![cand(5)]).await;
        assert_eq!(w.latest_timestamp().await.unwrap(), Some(cand(30).timestamp));
        w.append(vec![cand(45)]).await;
        assert_eq!(w.latest_timestamp().await.unwrap(), Some(cand(45).timestamp));
    }
}
