// src/ingest/types.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;

/// A message as returned by the chat source, before relevance filtering.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub author_id: String,
    pub author_name: String,
    #[serde(default)]
    pub embeds: Vec<RawEmbed>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RawEmbed {
    /// "rich", "link", "image", ...
    #[serde(default)]
    pub kind: String,
    pub url: Option<String>,
    pub description: Option<String>,
}

/// Connection-oriented chat source. One instance serves one collect run.
#[async_trait::async_trait]
pub trait SourceClient: Send {
    async fn connect(&mut self) -> Result<()>;
    /// Messages strictly after `after`, oldest first, at most `limit`.
    async fn fetch_messages(&mut self, after: DateTime<Utc>, limit: usize) -> Result<Vec<RawMessage>>;
    /// Must be safe to call after a failed connect or fetch.
    async fn disconnect(&mut self);
    fn name(&self) -> &'static str;
}

/// Builds a fresh client for each run; the client never outlives the collect task.
pub type SourceFactory = Arc<dyn Fn() -> Box<dyn SourceClient> + Send + Sync>;
