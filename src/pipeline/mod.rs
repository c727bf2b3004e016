// src/pipeline/mod.rs
//! One daily run: collect, dedupe, write, classify, publish, archive.
//!
//! Only the collect phase runs on its own task; it owns the source client
//! and is joined before any ledger phase starts. Every later phase is awaited
//! in order. Cancellation is observed between phases.

pub mod summary;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::analyze::ClassifierLoop;
use crate::archive::Archiver;
use crate::error::{PipelineError, Result};
use crate::ingest::dedup;
use crate::ingest::types::SourceFactory;
use crate::ingest::{resolve_lower_bound, CollectOutcome, CollectWindow, SourceCollector};
use crate::ledger::{LedgerWriter, SchemaReport};
use crate::model::{CandidateItem, DailyDraft, Receipt};
use crate::publish::{PublishOutcome, PublishPhase};
use crate::retry::with_timeout;

pub use summary::{Phase, PhaseReport, PhaseStatus, RunSummary};

/// Everything a run needs. Built once by the binary or by tests.
pub struct PipelineDeps {
    pub source: SourceFactory,
    pub collector: SourceCollector,
    pub window: CollectWindow,
    pub ledger: LedgerWriter,
    pub classifier: ClassifierLoop,
    pub publisher: PublishPhase,
    pub archiver: Archiver,
}

/// Result of one connectivity probe in `check` mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentCheck {
    pub component: &'static str,
    pub ok: bool,
    pub detail: String,
}

impl ComponentCheck {
    fn from_result(component: &'static str, res: Result<String>) -> Self {
        match res {
            Ok(detail) => Self {
                component,
                ok: true,
                detail,
            },
            Err(e) => Self {
                component,
                ok: false,
                detail: e.to_string(),
            },
        }
    }
}

/// Clears the run flag when the run ends, panics included.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Collected {
    Items(Vec<CandidateItem>),
    Failed,
    Abort,
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

pub struct Pipeline {
    source: SourceFactory,
    collector: SourceCollector,
    window: CollectWindow,
    ledger: LedgerWriter,
    classifier: ClassifierLoop,
    publisher: PublishPhase,
    archiver: Archiver,
    running: AtomicBool,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            source: deps.source,
            collector: deps.collector,
            window: deps.window,
            ledger: deps.ledger,
            classifier: deps.classifier,
            publisher: deps.publisher,
            archiver: deps.archiver,
            running: AtomicBool::new(false),
        }
    }

    pub fn ledger(&self) -> &LedgerWriter {
        &self.ledger
    }

    pub fn publisher_name(&self) -> &'static str {
        self.publisher.publisher().name()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Startup precondition; safe to repeat.
    pub async fn ensure_schema(&self) -> Result<SchemaReport> {
        let report = self.ledger.ensure_schema().await?;
        if !report.created.is_empty() || !report.headers_written.is_empty() {
            tracing::info!(created = ?report.created, headers_written = ?report.headers_written, "ledger schema updated");
        }
        Ok(report)
    }

    fn try_guard(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(&self.running))
    }

    /// Run unless another run is in progress.
    pub async fn run_exclusive(&self, cancel: &CancellationToken) -> Option<RunSummary> {
        let Some(_guard) = self.try_guard() else {
            tracing::warn!("a run is already in progress; skipping trigger");
            counter!("pipeline_runs_skipped_total").increment(1);
            return None;
        };
        Some(self.run_once(cancel).await)
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> RunSummary {
        crate::metrics::ensure_metrics_described();
        let mut summary = RunSummary::new(Utc::now());
        tracing::info!(run_id = %summary.run_id, "pipeline run started");

        if self.stop_if_cancelled(cancel, &mut summary) {
            return self.finish(summary);
        }

        let collected = self.collect_phase(&mut summary).await;
        let items = match collected {
            Collected::Abort => {
                summary.aborted = true;
                summary.skip_remaining("run aborted");
                return self.finish(summary);
            }
            Collected::Failed => None,
            Collected::Items(items) => Some(items),
        };

        if self.stop_if_cancelled(cancel, &mut summary) {
            return self.finish(summary);
        }
        let new_items = self.dedup_phase(&mut summary, items).await;

        if self.stop_if_cancelled(cancel, &mut summary) {
            return self.finish(summary);
        }
        if let Some(new_items) = new_items {
            self.write_phase(&mut summary, new_items).await;
        }

        if self.stop_if_cancelled(cancel, &mut summary) {
            return self.finish(summary);
        }
        let draft = self.classify_phase(&mut summary).await;

        if self.stop_if_cancelled(cancel, &mut summary) {
            return self.finish(summary);
        }
        let receipt = self.publish_phase(&mut summary, draft.as_ref()).await;

        if self.stop_if_cancelled(cancel, &mut summary) {
            return self.finish(summary);
        }
        self.archive_phase(&mut summary, receipt.as_ref()).await;

        self.finish(summary)
    }

    fn stop_if_cancelled(&self, cancel: &CancellationToken, summary: &mut RunSummary) -> bool {
        if !cancel.is_cancelled() {
            return false;
        }
        tracing::warn!(run_id = %summary.run_id, done = summary.phases.len(), "run cancelled; skipping remaining phases");
        summary.cancelled = true;
        summary.skip_remaining("cancelled");
        true
    }

    fn finish(&self, mut summary: RunSummary) -> RunSummary {
        summary.finish(Utc::now());
        summary.emit();
        summary
    }

    async fn collect_phase(&self, summary: &mut RunSummary) -> Collected {
        let start = Instant::now();
        let now = Utc::now();
        let latest = if self.window.needs_latest_timestamp() {
            self.ledger.latest_timestamp().await
        } else {
            Ok(None)
        };
        let bound = resolve_lower_bound(&self.window, now, latest);

        let factory = self.source.clone();
        let collector = self.collector.clone();
        let after = bound.at;
        let task = tokio::spawn(async move {
            let mut client = factory();
            collector.collect(client.as_mut(), after).await
        });

        let res = match task.await {
            Ok(res) => res,
            Err(e) => Err(PipelineError::Provider(format!("collector task failed: {e}"))),
        };
        match res {
            Ok(CollectOutcome {
                items,
                fetched,
                irrelevant,
            }) => {
                let mut report = PhaseReport::new(Phase::Collecting, PhaseStatus::Succeeded)
                    .counts(items.len(), irrelevant, 0)
                    .elapsed(elapsed_ms(start));
                report.note = Some(match bound.note {
                    Some(n) => format!("{fetched} fetched since {after}; {n}"),
                    None => format!("{fetched} fetched since {after}"),
                });
                summary.push(report);
                Collected::Items(items)
            }
            Err(e) => {
                let abort = e.is_fatal();
                if abort {
                    tracing::error!(error = %e, kind = e.kind(), "collecting failed fatally; aborting run");
                } else {
                    tracing::error!(error = %e, kind = e.kind(), "collecting failed; continuing with ledger phases");
                }
                summary.push(PhaseReport::failed(Phase::Collecting, &e).elapsed(elapsed_ms(start)));
                if abort {
                    Collected::Abort
                } else {
                    Collected::Failed
                }
            }
        }
    }

    /// `None` means nothing may be written this run.
    async fn dedup_phase(
        &self,
        summary: &mut RunSummary,
        items: Option<Vec<CandidateItem>>,
    ) -> Option<Vec<CandidateItem>> {
        let Some(items) = items else {
            summary.push(PhaseReport::skipped(Phase::Deduping, "collecting failed"));
            summary.push(PhaseReport::skipped(Phase::Writing, "collecting failed"));
            return None;
        };
        let start = Instant::now();
        let existing = match self.ledger.existing_links().await {
            Ok(links) => links,
            Err(e) => {
                tracing::error!(error = %e, "existing links unreadable; nothing will be written");
                summary.push(
                    PhaseReport::skipped(Phase::Deduping, "existing links unreadable")
                        .with_error(&e)
                        .elapsed(elapsed_ms(start)),
                );
                summary.push(PhaseReport::skipped(Phase::Writing, "dedup unavailable"));
                return None;
            }
        };
        let out = dedup::filter(items, &existing);
        tracing::info!(new = out.new_items.len(), duplicates = out.duplicate_count, "dedup finished");
        summary.push(
            PhaseReport::new(Phase::Deduping, PhaseStatus::Succeeded)
                .counts(out.new_items.len(), out.duplicate_count, 0)
                .elapsed(elapsed_ms(start)),
        );
        Some(out.new_items)
    }

    async fn write_phase(&self, summary: &mut RunSummary, items: Vec<CandidateItem>) {
        if items.is_empty() {
            summary.push(PhaseReport::skipped(Phase::Writing, "nothing new"));
            return;
        }
        let start = Instant::now();
        let res = self.ledger.append(items).await;
        let status = if res.failed == 0 {
            PhaseStatus::Succeeded
        } else if res.written > 0 {
            PhaseStatus::Partial
        } else {
            PhaseStatus::Failed
        };
        let mut report = PhaseReport::new(Phase::Writing, status)
            .counts(res.written, 0, res.failed)
            .with_optional_error(res.first_error.as_ref())
            .elapsed(elapsed_ms(start));
        if res.failed_batches > 0 {
            report.note = Some(format!("{} batch(es) failed", res.failed_batches));
        }
        summary.push(report);
    }

    async fn classify_phase(&self, summary: &mut RunSummary) -> Option<DailyDraft> {
        let start = Instant::now();
        match self.classifier.classify_pending(&self.ledger).await {
            Ok(out) => {
                let status = if out.is_complete() {
                    PhaseStatus::Succeeded
                } else {
                    PhaseStatus::Partial
                };
                let mut report = PhaseReport::new(Phase::Classifying, status)
                    .counts(out.processed, out.deferred + out.writeback_failed, out.failed_calls)
                    .with_optional_error(out.first_error.as_ref())
                    .elapsed(elapsed_ms(start));
                if !out.is_complete() {
                    let why = out
                        .stop
                        .map(|s| format!("{s:?}"))
                        .unwrap_or_else(|| "write-back failures".to_string());
                    report.note = Some(format!(
                        "classification incomplete ({why}); {} row(s) left for next run",
                        out.deferred + out.writeback_failed
                    ));
                } else if out.matches > 0 {
                    report.note = Some(format!("{} match(es)", out.matches));
                }
                summary.push(report);
                out.draft
            }
            Err(e) => {
                tracing::error!(error = %e, kind = e.kind(), "classification could not start");
                summary.push(PhaseReport::failed(Phase::Classifying, &e).elapsed(elapsed_ms(start)));
                None
            }
        }
    }

    async fn publish_phase(&self, summary: &mut RunSummary, draft: Option<&DailyDraft>) -> Option<Receipt> {
        let start = Instant::now();
        let outcome = self.publisher.publish(draft, &self.ledger).await;
        let receipt = outcome.receipt().cloned();
        let report = match outcome {
            PublishOutcome::Published { receipt, rows_tagged } => {
                PhaseReport::new(Phase::Publishing, PhaseStatus::Succeeded)
                    .counts(rows_tagged, 0, 0)
                    .with_note(receipt.to_string())
            }
            PublishOutcome::NothingToPublish => PhaseReport::skipped(Phase::Publishing, "no matches to publish"),
            PublishOutcome::NotConfigured(why) => {
                PhaseReport::skipped(Phase::Publishing, format!("not configured: {why}"))
            }
            PublishOutcome::Throttled(why) => PhaseReport::skipped(Phase::Publishing, format!("throttled: {why}")),
            PublishOutcome::Failed(e) => PhaseReport::failed(Phase::Publishing, &e),
        };
        summary.push(report.elapsed(elapsed_ms(start)));
        receipt
    }

    async fn archive_phase(&self, summary: &mut RunSummary, receipt: Option<&Receipt>) {
        let start = Instant::now();
        let report = match self.archiver.archive_processed(&self.ledger, receipt).await {
            Ok(res) => {
                let status = if res.failed > 0 || !res.partial_commits.is_empty() {
                    PhaseStatus::Partial
                } else {
                    PhaseStatus::Succeeded
                };
                let mut report = PhaseReport::new(Phase::Archiving, status)
                    .counts(res.archived + res.already_archived, 0, res.failed + res.partial_commits.len())
                    .with_optional_error(res.first_error.as_ref());
                if !res.partial_commits.is_empty() {
                    report.note = Some(format!(
                        "{} row(s) in both sheets; reconciled next run",
                        res.partial_commits.len()
                    ));
                } else if res.already_archived > 0 {
                    report.note = Some(format!("{} reconciled", res.already_archived));
                }
                report
            }
            Err(e) => {
                tracing::error!(error = %e, "archival failed");
                PhaseReport::failed(Phase::Archiving, &e)
            }
        };
        summary.push(report.elapsed(elapsed_ms(start)));
    }

    /// Probe every collaborator without mutating anything.
    pub async fn check(&self, call_timeout: Duration) -> Vec<ComponentCheck> {
        let mut out = Vec::with_capacity(5);

        let mut client = (self.source)();
        let name = client.name();
        let res = with_timeout(call_timeout, client.connect()).await;
        client.disconnect().await;
        out.push(ComponentCheck::from_result(
            "source",
            res.map(|_| format!("{name} reachable")),
        ));

        let ledger = self.ledger.read_active().await.map(|snap| {
            format!(
                "{}: {} active row(s), {} malformed",
                self.ledger.store().name(),
                snap.rows.len(),
                snap.malformed.len()
            )
        });
        out.push(ComponentCheck::from_result("ledger", ledger));

        let classifier = self.classifier.classifier();
        out.push(ComponentCheck::from_result(
            "classifier",
            classifier.check_ready().map(|_| format!("{} configured", classifier.name())),
        ));
        out.push(ComponentCheck::from_result(
            "quota",
            Ok(format!("{} call(s) left today", self.classifier.quota_remaining(Utc::now()))),
        ));

        let publisher = self.publisher.publisher();
        let probe = with_timeout(call_timeout, publisher.probe())
            .await
            .map(|_| format!("{} reachable", publisher.name()));
        out.push(ComponentCheck::from_result("publisher", probe));

        for c in &out {
            if c.ok {
                tracing::info!(component = c.component, detail = %c.detail, "check passed");
            } else {
                tracing::error!(component = c.component, detail = %c.detail, "check failed");
            }
        }
        out
    }
}
