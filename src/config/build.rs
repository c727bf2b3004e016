// src/config/build.rs
//! Wires the production adapters from a loaded config.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use super::{LedgerBackend, PipelineConfig, Secrets};
use crate::analyze::gemini::GeminiClassifier;
use crate::analyze::{ClassifierLoop, DailyQuota};
use crate::archive::Archiver;
use crate::ingest::providers::discord::{http_client, DiscordClient};
use crate::ingest::types::{SourceClient, SourceFactory};
use crate::ingest::SourceCollector;
use crate::ledger::file::FileLedger;
use crate::ledger::google_auth::SheetsAuth;
use crate::ledger::sheets::SheetsLedger;
use crate::ledger::{LedgerStore, LedgerWriter};
use crate::pipeline::{Pipeline, PipelineDeps};
use crate::publish::log::LogPublisher;
use crate::publish::typefully::TypefullyPublisher;
use crate::publish::{PublishPhase, PublishWindow, Publisher, PublisherKind};

/// Service account key when given, else the static token.
fn sheets_auth(secrets: &Secrets) -> anyhow::Result<SheetsAuth> {
    if let Some(path) = &secrets.google_service_account_file {
        return SheetsAuth::service_account_file(path).context("loading google service account");
    }
    if secrets.sheets_token.is_some() {
        tracing::warn!("using GOOGLE_SHEETS_ACCESS_TOKEN; it is not refreshed and expires after about an hour");
    }
    Ok(SheetsAuth::Static(secrets.sheets_token.clone().unwrap_or_default()))
}

fn ledger_store(cfg: &PipelineConfig, secrets: &Secrets) -> anyhow::Result<Arc<dyn LedgerStore>> {
    let store: Arc<dyn LedgerStore> = match cfg.ledger.backend {
        LedgerBackend::Sheets => Arc::new(
            SheetsLedger::new(cfg.ledger.spreadsheet_id.clone(), sheets_auth(secrets)?, cfg.call_timeout())
            .context("creating sheets ledger")?
            .with_sheet_names(&cfg.ledger.active_sheet, &cfg.ledger.archive_sheet),
        ),
        LedgerBackend::File => Arc::new(
            FileLedger::open(&cfg.ledger.file_path)
                .with_context(|| format!("opening file ledger {}", cfg.ledger.file_path.display()))?,
        ),
    };
    Ok(store)
}

pub fn build_pipeline(cfg: &PipelineConfig, secrets: &Secrets) -> anyhow::Result<Pipeline> {
    let timeout = cfg.call_timeout();

    let http = http_client(timeout).context("creating discord http client")?;
    let token = secrets.discord_token.clone().unwrap_or_default();
    let channel = cfg.source.channel_id.clone();
    let source: SourceFactory = Arc::new(move || -> Box<dyn SourceClient> {
        Box::new(DiscordClient::with_http(http.clone(), token.clone(), channel.clone()))
    });

    let ledger = LedgerWriter::new(ledger_store(cfg, secrets)?, cfg.ledger.batch_size, cfg.retry, timeout);

    let gemini = GeminiClassifier::new(
        secrets.gemini_api_key.clone().unwrap_or_default(),
        cfg.classifier.model.clone(),
        timeout,
    )
    .context("creating gemini classifier")?;
    let quota = DailyQuota::open(&cfg.classifier.quota_state_path, cfg.classifier.daily_quota)
        .with_context(|| format!("loading quota state {}", cfg.classifier.quota_state_path.display()))?;
    let classifier = ClassifierLoop::new(
        Arc::new(gemini),
        Arc::new(quota),
        Duration::from_millis(cfg.classifier.min_interval_ms),
        timeout,
    );

    let publisher: Arc<dyn Publisher> = match cfg.publish.publisher {
        PublisherKind::Typefully => Arc::new(
            TypefullyPublisher::new(
                secrets.typefully_api_key.clone().unwrap_or_default(),
                cfg.publish.schedule.clone(),
                timeout,
            )
            .context("creating typefully publisher")?,
        ),
        PublisherKind::Log => Arc::new(LogPublisher),
    };
    let window = PublishWindow::open(
        &cfg.publish.state_path,
        cfg.publish.daily_limit,
        cfg.publish.window_limit,
        cfg.publish.window_minutes,
    )
    .with_context(|| format!("loading publish window {}", cfg.publish.state_path.display()))?;
    let publisher = PublishPhase::new(publisher, Arc::new(window), cfg.retry, timeout)
        .with_format(cfg.publish.format.clone());

    Ok(Pipeline::new(PipelineDeps {
        source,
        collector: SourceCollector::new(cfg.retry, timeout, cfg.source.fetch_limit),
        window: cfg.source.window,
        ledger,
        classifier,
        publisher,
        archiver: Archiver::new(cfg.ledger.archive_batch_size),
    }))
}
