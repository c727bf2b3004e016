// src/config/mod.rs
//! Pipeline configuration: a TOML file with defaults for every field, a few
//! environment overrides, and secrets that only ever come from the environment.

pub mod build;
pub mod secrets;

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::ingest::CollectWindow;
use crate::publish::{PostFormat, PublisherKind};
use crate::retry::RetryPolicy;
use crate::scheduler::DailySchedule;

pub use build::build_pipeline;
pub use secrets::Secrets;

pub const ENV_PATH: &str = "CHANNEL_DIGEST_CONFIG";
pub const DEFAULT_PATH: &str = "config/pipeline.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    #[default]
    Sheets,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub channel_id: String,
    pub fetch_limit: usize,
    pub window: CollectWindow,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            channel_id: String::new(),
            fetch_limit: 200,
            window: CollectWindow::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub spreadsheet_id: String,
    pub active_sheet: String,
    pub archive_sheet: String,
    /// Only for the file backend.
    pub file_path: PathBuf,
    pub batch_size: usize,
    pub archive_batch_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Sheets,
            spreadsheet_id: String::new(),
            active_sheet: "Sheet1".into(),
            archive_sheet: "Archives".into(),
            file_path: PathBuf::from("state/ledger.json"),
            batch_size: 100,
            archive_batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub model: String,
    pub daily_quota: u32,
    pub min_interval_ms: u64,
    pub quota_state_path: PathBuf,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".into(),
            daily_quota: 1400,
            min_interval_ms: 4000,
            quota_state_path: PathBuf::from("state/classifier_quota.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// `typefully` or `log`.
    pub publisher: PublisherKind,
    pub daily_limit: u32,
    pub window_limit: u32,
    pub window_minutes: u32,
    pub state_path: PathBuf,
    /// Typefully `schedule-date`: an ISO timestamp or `next-free-slot`.
    pub schedule: String,
    pub format: PostFormat,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            publisher: PublisherKind::Typefully,
            daily_limit: 50,
            window_limit: 5,
            window_minutes: 15,
            state_path: PathBuf::from("state/publish_window.json"),
            schedule: "next-free-slot".into(),
            format: PostFormat::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// `HH:MM`
    pub time: String,
    /// `UTC`, `local`, a fixed offset like `+08:00` or an IANA name.
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            time: "20:00".into(),
            timezone: "UTC".into(),
        }
    }
}

fn default_call_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Prometheus listener, e.g. `0.0.0.0:9000`. Disabled when absent.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            ledger: LedgerConfig::default(),
            classifier: ClassifierConfig::default(),
            publish: PublishConfig::default(),
            schedule: ScheduleConfig::default(),
            retry: RetryPolicy::default(),
            call_timeout_secs: default_call_timeout_secs(),
            metrics_addr: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("parsing pipeline config")
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("in {}", path.display()))
    }

    /// Load using the CLI path, then `$CHANNEL_DIGEST_CONFIG`, then
    /// `config/pipeline.toml`, else defaults. Environment overrides are applied last.
    pub fn load(cli_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match resolve_path(cli_path)? {
            Some(p) => {
                tracing::info!(path = %p.display(), "loading config");
                Self::load_from(&p)?
            }
            None => {
                tracing::info!("no config file found; using defaults");
                Self::default()
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        if let Some(v) = var("DISCORD_CHANNEL_ID") {
            self.source.channel_id = v;
        }
        if let Some(v) = var("GOOGLE_SHEETS_ID") {
            self.ledger.spreadsheet_id = v;
        }
        if let Some(v) = var("SCHEDULE_TIME") {
            self.schedule.time = v;
        }
        if let Some(v) = var("SCHEDULE_TIMEZONE") {
            self.schedule.timezone = v;
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn daily_schedule(&self) -> Result<DailySchedule> {
        DailySchedule::parse(&self.schedule.time, &self.schedule.timezone)
    }

    pub fn metrics_socket(&self) -> Result<Option<SocketAddr>> {
        self.metrics_addr
            .as_deref()
            .map(|a| {
                a.parse()
                    .map_err(|e| PipelineError::Config(format!("metrics_addr `{a}`: {e}")))
            })
            .transpose()
    }

    /// Every problem at once, as a single `Config` error.
    pub fn validate(&self, secrets: &Secrets) -> Result<()> {
        let mut problems: Vec<String> = Vec::new();

        if self.source.channel_id.trim().is_empty() {
            problems.push("source.channel_id is empty (or set DISCORD_CHANNEL_ID)".into());
        }
        if self.source.fetch_limit == 0 {
            problems.push("source.fetch_limit must be positive".into());
        }
        match self.source.window {
            CollectWindow::Days { days: 0 } | CollectWindow::Hours { hours: 0 } => {
                problems.push("source.window lookback must be positive".into())
            }
            CollectWindow::SinceLast { fallback_hours: 0 } => {
                problems.push("source.window.fallback_hours must be positive".into())
            }
            _ => {}
        }
        if self.ledger.backend == LedgerBackend::Sheets && self.ledger.spreadsheet_id.trim().is_empty() {
            problems.push("ledger.spreadsheet_id is empty (or set GOOGLE_SHEETS_ID)".into());
        }
        if self.ledger.batch_size == 0 || self.ledger.archive_batch_size == 0 {
            problems.push("ledger batch sizes must be positive".into());
        }
        if self.ledger.active_sheet.trim().is_empty() || self.ledger.active_sheet == self.ledger.archive_sheet {
            problems.push("ledger.active_sheet must be set and differ from archive_sheet".into());
        }
        if self.classifier.model.trim().is_empty() {
            problems.push("classifier.model is empty".into());
        }
        if self.publish.daily_limit == 0 || self.publish.window_limit == 0 || self.publish.window_minutes == 0 {
            problems.push("publish limits must be positive".into());
        }
        if self.publish.format.max_chars == 0 {
            problems.push("publish.format.max_chars must be positive".into());
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1".into());
        }
        if self.call_timeout_secs == 0 {
            problems.push("call_timeout_secs must be positive".into());
        }
        if let Err(e) = self.daily_schedule() {
            problems.push(e.to_string());
        }
        if let Err(e) = self.metrics_socket() {
            problems.push(e.to_string());
        }
        problems.extend(secrets.missing(self.ledger.backend).into_iter().map(|k| format!("{k} is not set")));
        if let (LedgerBackend::Sheets, Some(key)) = (self.ledger.backend, &secrets.google_service_account_file) {
            if !key.is_file() {
                problems.push(format!("GOOGLE_SERVICE_ACCOUNT_FILE {} does not exist", key.display()));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Config(problems.join("; ")))
        }
    }
}

/// CLI path and env path must exist when given; the default path is optional.
pub fn resolve_path(cli_path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(p) = cli_path {
        if !p.exists() {
            return Err(anyhow!("config file {} does not exist", p.display()));
        }
        return Ok(Some(p.to_path_buf()));
    }
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_PATH} points to non-existent path {}", pb.display()));
        }
        return Ok(Some(pb));
    }
    let default = PathBuf::from(DEFAULT_PATH);
    Ok(default.exists().then_some(default))
}
