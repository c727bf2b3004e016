// tests/common/mod.rs
// In-memory fakes for the four external collaborators plus a harness that
// wires them into a Pipeline.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use channel_digest::analyze::{Classification, Classifier, ClassifierLoop, DailyQuota};
use channel_digest::archive::Archiver;
use channel_digest::error::{PipelineError, Result};
use channel_digest::ingest::types::{RawMessage, SourceClient, SourceFactory};
use channel_digest::ingest::{CollectWindow, SourceCollector};
use channel_digest::ledger::memory::MemoryLedger;
use channel_digest::ledger::LedgerWriter;
use channel_digest::model::{CandidateItem, Receipt};
use channel_digest::pipeline::{Pipeline, PipelineDeps};
use channel_digest::publish::{PostFormat, PublishPhase, PublishWindow, Publisher};
use channel_digest::retry::RetryPolicy;

/// Minute-aligned instant two hours ago; the ledger stores minute precision.
pub fn base_time() -> DateTime<Utc> {
    let t = Utc::now() - ChronoDuration::hours(2);
    t.with_second(0).unwrap().with_nanosecond(0).unwrap()
}

pub fn link(n: u32) -> String {
    format!("https://x.com/acct{n}/status/{n}")
}

/// Relevant message; `launch` content makes the scripted classifier report a match.
pub fn msg(n: u32, body: &str) -> RawMessage {
    RawMessage {
        id: format!("{}", 1000 + n),
        timestamp: base_time() + ChronoDuration::minutes(i64::from(n)),
        content: format!("{body} {}", link(n)),
        author_id: format!("{}", 500 + n),
        author_name: format!("user{n}"),
        embeds: vec![],
    }
}

pub fn launch(n: u32) -> RawMessage {
    msg(n, &format!("launch proj{n}"))
}

pub fn noise(n: u32) -> RawMessage {
    msg(n, "noise")
}

pub fn candidate(n: u32) -> CandidateItem {
    CandidateItem {
        timestamp: base_time() + ChronoDuration::minutes(i64::from(n)),
        content: format!("launch proj{n} {}", link(n)),
        post_link: link(n),
        author: format!("user{n}"),
        author_link: format!("https://discord.com/users/{}", 500 + n),
    }
}

// ---------------- source ----------------

#[derive(Default)]
pub struct SourceScript {
    pub messages: Mutex<Vec<RawMessage>>,
    pub connect_errors: Mutex<VecDeque<PipelineError>>,
    pub fetch_errors: Mutex<VecDeque<PipelineError>>,
    pub fetch_delay: Mutex<Option<Duration>>,
    pub connects: AtomicUsize,
    pub fetches: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub clients_built: AtomicUsize,
}

impl SourceScript {
    pub fn new(messages: Vec<RawMessage>) -> Arc<Self> {
        let s = Self::default();
        *s.messages.lock() = messages;
        Arc::new(s)
    }

    pub fn factory(self: &Arc<Self>) -> SourceFactory {
        let script = self.clone();
        Arc::new(move || -> Box<dyn SourceClient> {
            script.clients_built.fetch_add(1, Ordering::SeqCst);
            Box::new(FakeSource {
                script: script.clone(),
                connected: false,
            })
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

pub struct FakeSource {
    script: Arc<SourceScript>,
    connected: bool,
}

#[async_trait]
impl SourceClient for FakeSource {
    async fn connect(&mut self) -> Result<()> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.script.connect_errors.lock().pop_front() {
            return Err(e);
        }
        self.connected = true;
        Ok(())
    }

    async fn fetch_messages(&mut self, after: DateTime<Utc>, limit: usize) -> Result<Vec<RawMessage>> {
        self.script.fetches.fetch_add(1, Ordering::SeqCst);
        assert!(self.connected, "fetch before connect");
        let delay = *self.script.fetch_delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if let Some(e) = self.script.fetch_errors.lock().pop_front() {
            return Err(e);
        }
        let mut out: Vec<RawMessage> = self
            .script
            .messages
            .lock()
            .iter()
            .filter(|m| m.timestamp > after)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.timestamp);
        out.truncate(limit);
        Ok(out)
    }

    async fn disconnect(&mut self) {
        self.script.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
    }

    fn name(&self) -> &'static str {
        "fake-source"
    }
}

// ---------------- classifier ----------------

/// `launch <name> ...` is a match, anything else is not; scripted replies win.
#[derive(Default)]
pub struct ScriptedClassifier {
    pub replies: Mutex<VecDeque<Result<Classification>>>,
    pub seen: Mutex<Vec<String>>,
    pub call_times: Mutex<Vec<tokio::time::Instant>>,
    pub not_ready: Mutex<Option<PipelineError>>,
    /// Cancelled on the first call, to simulate Ctrl-C mid-run.
    pub cancel_on_call: Mutex<Option<CancellationToken>>,
}

impl ScriptedClassifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, reply: Result<Classification>) {
        self.replies.lock().push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    fn check_ready(&self) -> Result<()> {
        match self.not_ready.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn classify(&self, text: &str) -> Result<Classification> {
        self.seen.lock().push(text.to_string());
        self.call_times.lock().push(tokio::time::Instant::now());
        if let Some(token) = self.cancel_on_call.lock().as_ref() {
            token.cancel();
        }
        if let Some(reply) = self.replies.lock().pop_front() {
            return reply;
        }
        let mut words = text.split_whitespace();
        match (words.next(), words.next()) {
            (Some("launch"), Some(name)) => Ok(Classification::Entity {
                name: name.to_string(),
                summary: format!("{name} launched."),
            }),
            _ => Ok(Classification::NoEntity),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

// ---------------- publisher ----------------

#[derive(Default)]
pub struct FakePublisher {
    pub replies: Mutex<VecDeque<Result<Receipt>>>,
    pub published: Mutex<Vec<String>>,
    pub attempts: AtomicUsize,
    pub unconfigured: Mutex<bool>,
}

impl FakePublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, reply: Result<Receipt>) {
        self.replies.lock().push_back(reply);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    fn check_ready(&self) -> Result<()> {
        if *self.unconfigured.lock() {
            return Err(PipelineError::Config("TYPEFULLY_API_KEY is not set".into()));
        }
        Ok(())
    }

    async fn publish(&self, text: &str) -> Result<Receipt> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(reply) = self.replies.lock().pop_front() {
            if reply.is_ok() {
                self.published.lock().push(text.to_string());
            }
            return reply;
        }
        self.published.lock().push(text.to_string());
        Ok(Receipt {
            id: format!("r{n}"),
            url: Some(format!("https://typefully.com/t/r{n}")),
        })
    }

    async fn probe(&self) -> Result<()> {
        self.check_ready()
    }

    fn name(&self) -> &'static str {
        "fake-publisher"
    }
}

// ---------------- harness ----------------

pub struct Harness {
    pub source: Arc<SourceScript>,
    pub ledger: Arc<MemoryLedger>,
    pub classifier: Arc<ScriptedClassifier>,
    pub publisher: Arc<FakePublisher>,
    pub quota: Arc<DailyQuota>,
    pub window: Arc<PublishWindow>,
    pub collect_window: CollectWindow,
    pub min_interval: Duration,
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub post_format: PostFormat,
}

impl Harness {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            source: SourceScript::new(messages),
            ledger: Arc::new(MemoryLedger::with_schema()),
            classifier: ScriptedClassifier::new(),
            publisher: FakePublisher::new(),
            quota: Arc::new(DailyQuota::in_memory(100)),
            window: Arc::new(PublishWindow::in_memory(50, 5, 15)),
            collect_window: CollectWindow::default(),
            min_interval: Duration::ZERO,
            batch_size: 100,
            retry: RetryPolicy::immediate(3),
            post_format: PostFormat::plain(),
        }
    }

    pub fn with_quota(mut self, limit: u32) -> Self {
        self.quota = Arc::new(DailyQuota::in_memory(limit));
        self
    }

    pub fn writer(&self) -> LedgerWriter {
        LedgerWriter::new(self.ledger.clone(), self.batch_size, self.retry, Duration::from_secs(5))
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_with_source(self.source.factory())
    }

    pub fn pipeline_with_source(&self, source: SourceFactory) -> Pipeline {
        let timeout = Duration::from_secs(5);
        Pipeline::new(PipelineDeps {
            source,
            collector: SourceCollector::new(self.retry, timeout, 200),
            window: self.collect_window,
            ledger: self.writer(),
            classifier: ClassifierLoop::new(self.classifier.clone(), self.quota.clone(), self.min_interval, timeout),
            publisher: PublishPhase::new(self.publisher.clone(), self.window.clone(), self.retry, timeout)
                .with_format(self.post_format.clone()),
            archiver: Archiver::new(50),
        })
    }

    pub fn archived_links(&self) -> Vec<String> {
        self.ledger.archive_cells().iter().map(|c| c[3].clone()).collect()
    }
}
