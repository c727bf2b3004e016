// src/analyze/mod.rs
//! Rate-limited classification of unprocessed ledger rows.
//!
//! Rows are classified strictly one at a time under a daily call budget and a
//! fixed pause between calls. Matches are collected into one `DailyDraft`.

pub mod classifier;
pub mod draft;
pub mod gemini;
pub mod quota;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::ledger::LedgerWriter;
use crate::model::{
    ClassificationState, DailyDraft, LedgerRow, RowPatch, FAILED_SENTINEL, NO_MATCH_SENTINEL,
};
use crate::retry::with_timeout;

pub use classifier::{Classification, Classifier};
pub use draft::{build_draft, DraftEntry};
pub use quota::DailyQuota;

/// Why the loop ended before every pending row was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    QuotaExhausted,
    /// The quota counter could not be persisted.
    QuotaUnavailable,
    ProviderThrottled,
    AuthRejected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifyOutcome {
    pub pending: usize,
    /// Rows whose processed flag is now set.
    pub processed: usize,
    pub matches: usize,
    /// Processed with the failure sentinel.
    pub failed_calls: usize,
    /// Left unprocessed because the loop stopped early.
    pub deferred: usize,
    /// Classified, but the write-back failed; retried next run.
    pub writeback_failed: usize,
    pub stop: Option<StopReason>,
    pub draft: Option<DailyDraft>,
    pub first_error: Option<PipelineError>,
}

impl ClassifyOutcome {
    pub fn is_complete(&self) -> bool {
        self.deferred == 0 && self.writeback_failed == 0
    }
}

/// Result of one classifier call, mapped to a row patch.
enum Verdict {
    Match { entity: String, summary: String },
    NoMatch,
    Failed,
}

pub struct ClassifierLoop {
    classifier: Arc<dyn Classifier>,
    quota: Arc<DailyQuota>,
    min_interval: Duration,
    call_timeout: Duration,
}

impl ClassifierLoop {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        quota: Arc<DailyQuota>,
        min_interval: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            quota,
            min_interval,
            call_timeout,
        }
    }

    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    pub fn quota_remaining(&self, now: DateTime<Utc>) -> u32 {
        self.quota.remaining(now)
    }

    /// Errors only for a classifier that is not configured or an unreadable ledger.
    pub async fn classify_pending(&self, ledger: &LedgerWriter) -> Result<ClassifyOutcome> {
        self.classifier.check_ready()?;
        let snap = ledger.read_active().await?;
        let pending: Vec<LedgerRow> = snap.rows.into_iter().filter(|r| !r.is_processed()).collect();

        let mut out = ClassifyOutcome {
            pending: pending.len(),
            ..Default::default()
        };
        let mut entries: Vec<(LedgerRow, DraftEntry)> = Vec::new();
        let mut calls = 0usize;

        tracing::info!(
            pending = pending.len(),
            quota_remaining = self.quota.remaining(Utc::now()),
            classifier = self.classifier.name(),
            "classification started"
        );

        for row in &pending {
            match self.quota.try_acquire(Utc::now()) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(limit = self.quota.limit(), "daily classifier quota exhausted; deferring remaining rows");
                    out.stop = Some(StopReason::QuotaExhausted);
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "quota counter unavailable; stopping");
                    out.stop = Some(StopReason::QuotaUnavailable);
                    out.first_error.get_or_insert(e);
                    break;
                }
            }
            if calls > 0 {
                tokio::time::sleep(self.min_interval).await;
            }
            calls += 1;

            let verdict = match with_timeout(self.call_timeout, self.classifier.classify(&row.item.content)).await {
                Ok(Classification::Entity { name, summary }) => {
                    counter!("classifier_calls_total", "outcome" => "match").increment(1);
                    Verdict::Match { entity: name, summary }
                }
                Ok(Classification::NoEntity) => {
                    counter!("classifier_calls_total", "outcome" => "no_match").increment(1);
                    Verdict::NoMatch
                }
                Err(e @ PipelineError::RateLimited { .. }) => {
                    counter!("classifier_calls_total", "outcome" => "throttled").increment(1);
                    tracing::warn!(error = %e, "classifier throttled; stopping early");
                    out.stop = Some(StopReason::ProviderThrottled);
                    out.first_error.get_or_insert(e);
                    break;
                }
                Err(e @ PipelineError::AuthFailure(_)) => {
                    counter!("classifier_calls_total", "outcome" => "auth").increment(1);
                    tracing::error!(error = %e, "classifier rejected credentials; stopping");
                    out.stop = Some(StopReason::AuthRejected);
                    out.first_error.get_or_insert(e);
                    break;
                }
                Err(e) => {
                    counter!("classifier_calls_total", "outcome" => "error").increment(1);
                    tracing::warn!(row = %row.key(), error = %e, kind = e.kind(), "classification failed; marking row");
                    out.first_error.get_or_insert(e);
                    Verdict::Failed
                }
            };

            let patch = match &verdict {
                Verdict::Match { entity, summary } => {
                    RowPatch::classified(ClassificationState::Match, format!("@{entity}: {summary}"))
                }
                Verdict::NoMatch => RowPatch::classified(ClassificationState::NoMatch, NO_MATCH_SENTINEL),
                Verdict::Failed => RowPatch::classified(ClassificationState::NoMatch, FAILED_SENTINEL),
            };

            if let Err(e) = ledger.update(&row.key(), &patch).await {
                tracing::error!(row = %row.key(), error = %e, "classification write-back failed; row stays pending");
                out.writeback_failed += 1;
                out.first_error.get_or_insert(e);
                continue;
            }
            out.processed += 1;
            match verdict {
                Verdict::Match { entity, summary } => {
                    out.matches += 1;
                    entries.push((
                        row.clone(),
                        DraftEntry {
                            entity,
                            post_link: row.item.post_link.clone(),
                            summary,
                        },
                    ));
                }
                Verdict::Failed => out.failed_calls += 1,
                Verdict::NoMatch => {}
            }
        }

        out.deferred = out.pending - out.processed - out.writeback_failed;
        out.draft = self.finish_draft(ledger, &entries, Utc::now()).await;

        tracing::info!(
            processed = out.processed,
            matches = out.matches,
            failed_calls = out.failed_calls,
            deferred = out.deferred,
            stop = ?out.stop,
            "classification finished"
        );
        Ok(out)
    }

    /// Build the draft and stamp its id on every matched row.
    async fn finish_draft(
        &self,
        ledger: &LedgerWriter,
        entries: &[(LedgerRow, DraftEntry)],
        now: DateTime<Utc>,
    ) -> Option<DailyDraft> {
        let just_entries: Vec<DraftEntry> = entries.iter().map(|(_, e)| e.clone()).collect();
        let draft = build_draft(&just_entries, now)?;
        let patch = RowPatch::draft(&draft.id);
        for (row, _) in entries {
            if let Err(e) = ledger.update(&row.key(), &patch).await {
                tracing::warn!(row = %row.key(), draft = %draft.id, error = %e, "could not record draft reference");
            }
        }
        Some(draft)
    }
}
