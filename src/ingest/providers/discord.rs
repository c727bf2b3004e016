// src/ingest/providers/discord.rs
//! Discord REST v10 channel reader authenticated as a bot.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{check_response, PipelineError, Result};
use crate::ingest::types::{RawEmbed, RawMessage, SourceClient};

const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";
/// Discord caps one history page at 100 messages.
const PAGE_SIZE: usize = 100;
/// 2015-01-01T00:00:00Z in unix milliseconds.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

#[derive(Debug, Deserialize)]
struct UserDto {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct EmbedDto {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    url: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDto {
    id: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    content: String,
    author: UserDto,
    #[serde(default)]
    embeds: Vec<EmbedDto>,
}

impl From<MessageDto> for RawMessage {
    fn from(m: MessageDto) -> Self {
        RawMessage {
            id: m.id,
            timestamp: m.timestamp,
            content: m.content,
            author_id: m.author.id,
            author_name: m.author.username,
            embeds: m
                .embeds
                .into_iter()
                .map(|e| RawEmbed {
                    kind: e.kind.unwrap_or_default(),
                    url: e.url,
                    description: e.description,
                })
                .collect(),
        }
    }
}

/// Smallest snowflake that could belong to a message sent at `ts`.
pub fn snowflake_at(ts: DateTime<Utc>) -> u64 {
    let ms = ts.timestamp_millis() - DISCORD_EPOCH_MS;
    if ms <= 0 {
        return 0;
    }
    (ms as u64) << 22
}

fn snowflake_of(id: &str) -> u64 {
    id.parse().unwrap_or(0)
}

pub fn http_client(call_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("channel-digest/0.1")
        .connect_timeout(Duration::from_secs(5))
        .timeout(call_timeout)
        .build()
        .map_err(|e| PipelineError::Config(format!("building http client: {e}")))
}

pub struct DiscordClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    channel_id: String,
    bot_user: Option<String>,
}

impl DiscordClient {
    pub fn new(token: String, channel_id: String, call_timeout: Duration) -> Result<Self> {
        Ok(Self::with_http(http_client(call_timeout)?, token, channel_id))
    }

    /// Reuse a shared connection pool; the factory builds one client per run this way.
    pub fn with_http(http: reqwest::Client, token: String, channel_id: String) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
            channel_id,
            bot_user: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
            .query(query)
            .send()
            .await?;
        let resp = check_response(resp).await?;
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl SourceClient for DiscordClient {
    async fn connect(&mut self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(PipelineError::Config("DISCORD_TOKEN is not set".into()));
        }
        if self.channel_id.trim().is_empty() {
            return Err(PipelineError::Config("discord channel id is not set".into()));
        }
        let me: UserDto = self.get("/users/@me", &[]).await?;
        tracing::debug!(bot = %me.username, channel = %self.channel_id, "discord connected");
        self.bot_user = Some(me.username);
        Ok(())
    }

    async fn fetch_messages(&mut self, after: DateTime<Utc>, limit: usize) -> Result<Vec<RawMessage>> {
        let path = format!("/channels/{}/messages", self.channel_id);
        let mut cursor = snowflake_at(after);
        let mut out: Vec<MessageDto> = Vec::new();

        while out.len() < limit {
            let page_size = (limit - out.len()).min(PAGE_SIZE);
            let page: Vec<MessageDto> = self
                .get(
                    &path,
                    &[("after", cursor.to_string()), ("limit", page_size.to_string())],
                )
                .await?;
            let n = page.len();
            if let Some(max_id) = page.iter().map(|m| snowflake_of(&m.id)).max() {
                cursor = cursor.max(max_id);
            }
            out.extend(page);
            if n < page_size {
                break;
            }
        }

        out.sort_by_key(|m| snowflake_of(&m.id));
        out.truncate(limit);
        tracing::debug!(channel = %self.channel_id, count = out.len(), "discord history fetched");
        Ok(out.into_iter().map(RawMessage::from).collect())
    }

    async fn disconnect(&mut self) {
        if let Some(bot) = self.bot_user.take() {
            tracing::debug!(bot = %bot, "discord disconnected");
        }
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}
