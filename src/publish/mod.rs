// src/publish/mod.rs
pub mod format;
pub mod log;
pub mod typefully;
pub mod window;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::ledger::LedgerWriter;
use crate::model::{DailyDraft, Receipt, RowPatch};
use crate::retry::{with_timeout, RetryPolicy};

pub use format::PostFormat;
pub use window::{PublishWindow, WindowCheck};

pub const MAX_PUBLISH_CHARS: usize = 10_000;

/// Which provider receives the daily post. Posting to X directly is not
/// supported; Typefully schedules to X on the account's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublisherKind {
    #[default]
    Typefully,
    /// Log the post and hand back a local receipt.
    Log,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Configuration probe; no network call.
    fn check_ready(&self) -> Result<()>;
    async fn publish(&self, text: &str) -> Result<Receipt>;
    /// Cheap authenticated request used by `check`.
    async fn probe(&self) -> Result<()>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { receipt: Receipt, rows_tagged: usize },
    NothingToPublish,
    NotConfigured(String),
    /// Local window or provider throttling; archival continues without a receipt.
    Throttled(String),
    Failed(PipelineError),
}

impl PublishOutcome {
    pub fn receipt(&self) -> Option<&Receipt> {
        match self {
            PublishOutcome::Published { receipt, .. } => Some(receipt),
            _ => None,
        }
    }
}

pub fn validate_content(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(PipelineError::DataIntegrity("draft text is empty".into()));
    }
    let n = text.chars().count();
    if n > MAX_PUBLISH_CHARS {
        return Err(PipelineError::DataIntegrity(format!(
            "draft is {n} chars; limit is {MAX_PUBLISH_CHARS}"
        )));
    }
    Ok(())
}

fn is_transient(e: &PipelineError) -> bool {
    matches!(e, PipelineError::TransientNetwork(_))
}

pub struct PublishPhase {
    publisher: Arc<dyn Publisher>,
    window: Arc<PublishWindow>,
    retry: RetryPolicy,
    call_timeout: Duration,
    format: PostFormat,
}

impl PublishPhase {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        window: Arc<PublishWindow>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            publisher,
            window,
            retry,
            call_timeout,
            format: PostFormat::plain(),
        }
    }

    pub fn with_format(mut self, format: PostFormat) -> Self {
        self.format = format;
        self
    }

    pub fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }

    pub async fn publish(&self, draft: Option<&DailyDraft>, ledger: &LedgerWriter) -> PublishOutcome {
        let Some(draft) = draft else {
            tracing::info!("no draft this run; nothing to publish");
            return PublishOutcome::NothingToPublish;
        };
        let text = self.format.apply(&draft.text);
        if let Err(e) = validate_content(&text) {
            tracing::error!(draft = %draft.id, error = %e, "draft rejected before publishing");
            return PublishOutcome::Failed(e);
        }
        if let Err(e) = self.publisher.check_ready() {
            tracing::warn!(publisher = self.publisher.name(), error = %e, "publisher not configured; skipping");
            return PublishOutcome::NotConfigured(e.to_string());
        }

        let now = Utc::now();
        match self.window.check(now) {
            WindowCheck::Open => {}
            WindowCheck::DailyLimit { used } => {
                tracing::warn!(used, "daily publish limit reached");
                return PublishOutcome::Throttled(format!("daily publish limit reached ({used})"));
            }
            WindowCheck::WindowLimit { used, reopens_at } => {
                tracing::warn!(used, %reopens_at, "publish window full");
                return PublishOutcome::Throttled(format!("publish window full until {reopens_at}"));
            }
        }

        let res = self
            .retry
            .run_if("publisher.publish", is_transient, || {
                with_timeout(self.call_timeout, self.publisher.publish(&text))
            })
            .await;
        let receipt = match res {
            Ok(r) => r,
            Err(PipelineError::RateLimited { message, .. }) => {
                tracing::warn!(publisher = self.publisher.name(), %message, "publisher throttled; archiving without receipt");
                return PublishOutcome::Throttled(message);
            }
            Err(e) => {
                tracing::error!(publisher = self.publisher.name(), error = %e, "publishing failed");
                return PublishOutcome::Failed(e);
            }
        };
        tracing::info!(draft = %draft.id, receipt = %receipt, entries = draft.entries, "draft published");

        if let Err(e) = self.window.record(now, &receipt) {
            tracing::warn!(error = %e, "could not persist publish window");
        }
        let rows_tagged = self.tag_rows(draft, &receipt, ledger).await;
        PublishOutcome::Published { receipt, rows_tagged }
    }

    /// Write the receipt to every row referencing the draft.
    async fn tag_rows(&self, draft: &DailyDraft, receipt: &Receipt, ledger: &LedgerWriter) -> usize {
        let snap = match ledger.read_active().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "could not read ledger to record receipt");
                return 0;
            }
        };
        let patch = RowPatch::receipt(receipt);
        let mut tagged = 0;
        for row in snap.rows.iter().filter(|r| r.draft_ref.as_deref() == Some(draft.id.as_str())) {
            match ledger.update(&row.key(), &patch).await {
                Ok(()) => tagged += 1,
                Err(e) => tracing::warn!(row = %row.key(), error = %e, "could not record receipt on row"),
            }
        }
        tagged
    }
}
