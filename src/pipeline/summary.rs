// src/pipeline/summary.rs
//! Per-run result record: one report per phase, logged, counted and optionally
//! printed as JSON. Never persisted.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Collecting,
    Deduping,
    Writing,
    Classifying,
    Publishing,
    Archiving,
}

impl Phase {
    pub const ORDER: [Phase; 6] = [
        Phase::Collecting,
        Phase::Deduping,
        Phase::Writing,
        Phase::Classifying,
        Phase::Publishing,
        Phase::Archiving,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Collecting => "collecting",
            Phase::Deduping => "deduping",
            Phase::Writing => "writing",
            Phase::Classifying => "classifying",
            Phase::Publishing => "publishing",
            Phase::Archiving => "archiving",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Succeeded,
    Partial,
    Skipped,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::Succeeded => "succeeded",
            PhaseStatus::Partial => "partial",
            PhaseStatus::Skipped => "skipped",
            PhaseStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub error: Option<String>,
    pub note: Option<String>,
}

impl PhaseReport {
    pub fn new(phase: Phase, status: PhaseStatus) -> Self {
        Self {
            phase,
            status,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            elapsed_ms: 0,
            error: None,
            note: None,
        }
    }

    pub fn skipped(phase: Phase, note: impl Into<String>) -> Self {
        Self::new(phase, PhaseStatus::Skipped).with_note(note)
    }

    pub fn failed(phase: Phase, err: &PipelineError) -> Self {
        Self::new(phase, PhaseStatus::Failed).with_error(err)
    }

    pub fn counts(mut self, succeeded: usize, skipped: usize, failed: usize) -> Self {
        self.succeeded = succeeded;
        self.skipped = skipped;
        self.failed = failed;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_error(mut self, err: &PipelineError) -> Self {
        self.error = Some(err.to_string());
        self
    }

    pub fn with_optional_error(self, err: Option<&PipelineError>) -> Self {
        match err {
            Some(e) => self.with_error(e),
            None => self,
        }
    }

    pub fn elapsed(mut self, ms: u64) -> Self {
        self.elapsed_ms = ms;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub aborted: bool,
    pub cancelled: bool,
    pub success: bool,
    pub phases: Vec<PhaseReport>,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: format!("run-{}", started_at.format("%Y%m%dT%H%M%SZ")),
            started_at,
            finished_at: None,
            aborted: false,
            cancelled: false,
            success: false,
            phases: Vec::with_capacity(Phase::ORDER.len()),
        }
    }

    pub fn push(&mut self, report: PhaseReport) {
        tracing::info!(
            run_id = %self.run_id,
            phase = report.phase.as_str(),
            status = report.status.as_str(),
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_ms = report.elapsed_ms,
            error = report.error.as_deref().unwrap_or(""),
            note = report.note.as_deref().unwrap_or(""),
            "phase finished"
        );
        self.phases.push(report);
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|r| r.phase == phase)
    }

    /// Report every phase not yet reported as skipped.
    pub fn skip_remaining(&mut self, note: &str) {
        for phase in Phase::ORDER {
            if self.phase(phase).is_none() {
                self.push(PhaseReport::skipped(phase, note));
            }
        }
    }

    /// Not aborted, not cancelled, and nothing before archiving failed.
    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.finished_at = Some(now);
        self.success = !self.aborted
            && !self.cancelled
            && self
                .phases
                .iter()
                .filter(|r| r.phase != Phase::Archiving)
                .all(|r| r.status != PhaseStatus::Failed);
    }

    /// Record metrics for the finished run and log the table.
    pub fn emit(&self) {
        let outcome = if self.success { "success" } else { "failure" };
        counter!("pipeline_runs_total", "outcome" => outcome).increment(1);
        for r in &self.phases {
            let phase = r.phase.as_str();
            counter!("pipeline_phase_items_total", "phase" => phase, "outcome" => "succeeded")
                .increment(r.succeeded as u64);
            counter!("pipeline_phase_items_total", "phase" => phase, "outcome" => "skipped")
                .increment(r.skipped as u64);
            counter!("pipeline_phase_items_total", "phase" => phase, "outcome" => "failed")
                .increment(r.failed as u64);
            histogram!("pipeline_phase_ms", "phase" => phase).record(r.elapsed_ms as f64);
        }
        if let Some(done) = self.finished_at {
            gauge!("pipeline_last_run_ts").set(done.timestamp() as f64);
        }
        tracing::info!(
            run_id = %self.run_id,
            success = self.success,
            aborted = self.aborted,
            cancelled = self.cancelled,
            "run finished\n{}",
            self.render_table()
        );
    }

    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<12} {:<10} {:>6} {:>6} {:>6} {:>8}  detail",
            "phase", "status", "ok", "skip", "fail", "ms"
        );
        for r in &self.phases {
            let detail = match (&r.error, &r.note) {
                (Some(e), Some(n)) => format!("{n}; {e}"),
                (Some(e), None) => e.clone(),
                (None, Some(n)) => n.clone(),
                (None, None) => String::new(),
            };
            let _ = writeln!(
                out,
                "{:<12} {:<10} {:>6} {:>6} {:>6} {:>8}  {}",
                r.phase.as_str(),
                r.status.as_str(),
                r.succeeded,
                r.skipped,
                r.failed,
                r.elapsed_ms,
                detail
            );
        }
        out
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}
