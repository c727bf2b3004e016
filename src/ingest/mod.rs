// src/ingest/mod.rs
pub mod dedup;
pub mod providers;
pub mod types;

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::ingest::types::{RawMessage, SourceClient};
use crate::model::{CandidateItem, MAX_CONTENT_CHARS};
use crate::retry::{with_timeout, RetryPolicy};

static RE_POST_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)https?://(?:www\.)?(?:twitter|x)\.com/[^\s<>]+").expect("post link regex")
});
static RE_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[@\s*([^\]]+)\]").expect("mention regex"));
static RE_INLINE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("ws regex"));

fn default_fallback_hours() -> u32 {
    24
}

/// How far back a collect run reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CollectWindow {
    Days { days: u32 },
    Hours { hours: u32 },
    /// Newest stored timestamp, or `fallback_hours` back when the ledger has none.
    SinceLast {
        #[serde(default = "default_fallback_hours")]
        fallback_hours: u32,
    },
}

impl Default for CollectWindow {
    fn default() -> Self {
        CollectWindow::SinceLast {
            fallback_hours: default_fallback_hours(),
        }
    }
}

impl CollectWindow {
    pub fn needs_latest_timestamp(&self) -> bool {
        matches!(self, CollectWindow::SinceLast { .. })
    }
}

/// Resolved lower bound plus an explanation when a fallback was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowerBound {
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// `latest` is the ledger's newest timestamp read; ignored for fixed lookbacks.
pub fn resolve_lower_bound(
    window: &CollectWindow,
    now: DateTime<Utc>,
    latest: Result<Option<DateTime<Utc>>>,
) -> LowerBound {
    match *window {
        CollectWindow::Days { days } => LowerBound {
            at: now - ChronoDuration::days(i64::from(days)),
            note: None,
        },
        CollectWindow::Hours { hours } => LowerBound {
            at: now - ChronoDuration::hours(i64::from(hours)),
            note: None,
        },
        CollectWindow::SinceLast { fallback_hours } => {
            let fallback = now - ChronoDuration::hours(i64::from(fallback_hours));
            match latest {
                Ok(Some(ts)) => LowerBound { at: ts, note: None },
                Ok(None) => LowerBound {
                    at: fallback,
                    note: Some(format!("ledger empty; using {fallback_hours}h lookback")),
                },
                Err(e) => {
                    tracing::warn!(error = %e, kind = e.kind(), fallback_hours, "latest timestamp unreadable; using fallback lookback");
                    LowerBound {
                        at: fallback,
                        note: Some(format!("{}; using {fallback_hours}h lookback", e.kind())),
                    }
                }
            }
        }
    }
}

/// Clean message text: decode entities, drop zero-width characters, collapse
/// inline whitespace per line, keep paragraph breaks, cap the length.
pub fn clean_content(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s).to_string();
    let visible: String = decoded
        .chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}'))
        .collect();
    let mentions = RE_MENTION.replace_all(&visible, "[@$1]");

    let lines: Vec<String> = mentions
        .split('\n')
        .map(|line| RE_INLINE_WS.replace_all(line, " ").trim().to_string())
        .collect();
    let out = lines.join("\n").trim().to_string();

    if out.chars().count() > MAX_CONTENT_CHARS {
        out.chars().take(MAX_CONTENT_CHARS).collect()
    } else {
        out
    }
}

/// First x.com / twitter.com link in the content, then in embed urls and descriptions.
pub fn extract_post_link(msg: &RawMessage) -> Option<String> {
    let from_content = RE_POST_LINK.find(&msg.content).map(|m| m.as_str());
    let from_embeds = || {
        msg.embeds.iter().find_map(|e| {
            e.url
                .as_deref()
                .and_then(|u| RE_POST_LINK.find(u))
                .or_else(|| e.description.as_deref().and_then(|d| RE_POST_LINK.find(d)))
                .map(|m| m.as_str())
        })
    };
    from_content
        .or_else(from_embeds)
        .map(dedup::normalize_link)
        .filter(|l| !l.is_empty())
}

/// `None` for messages without a post link.
pub fn to_candidate(msg: &RawMessage) -> Option<CandidateItem> {
    let post_link = extract_post_link(msg)?;

    let rich = msg
        .embeds
        .iter()
        .find(|e| e.kind == "rich" && e.description.as_deref().is_some_and(|d| !d.trim().is_empty()));
    let linked = || {
        msg.embeds.iter().find(|e| {
            e.url.as_deref().map(dedup::normalize_link).as_deref() == Some(post_link.as_str())
                && e.description.is_some()
        })
    };
    let body = rich
        .or_else(linked)
        .and_then(|e| e.description.as_deref())
        .unwrap_or(msg.content.as_str());

    Some(CandidateItem {
        timestamp: msg.timestamp,
        content: clean_content(body),
        post_link,
        author: msg.author_name.clone(),
        author_link: format!("https://discord.com/users/{}", msg.author_id),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectOutcome {
    pub items: Vec<CandidateItem>,
    pub fetched: usize,
    pub irrelevant: usize,
}

/// Runs one connect -> fetch -> disconnect cycle against a source client.
#[derive(Debug, Clone)]
pub struct SourceCollector {
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    pub fetch_limit: usize,
}

impl SourceCollector {
    pub fn new(retry: RetryPolicy, call_timeout: Duration, fetch_limit: usize) -> Self {
        Self {
            retry,
            call_timeout,
            fetch_limit,
        }
    }

    /// Relevant messages strictly after `after`, oldest first. The client is
    /// disconnected on every path.
    pub async fn collect(
        &self,
        client: &mut dyn SourceClient,
        after: DateTime<Utc>,
    ) -> Result<CollectOutcome> {
        let source = client.name();
        let res = self.connect_and_fetch(client, after).await;
        client.disconnect().await;

        let mut raw = res?;
        raw.retain(|m| m.timestamp > after);
        raw.sort_by_key(|m| m.timestamp);
        raw.truncate(self.fetch_limit);

        let fetched = raw.len();
        let items: Vec<CandidateItem> = raw.iter().filter_map(to_candidate).collect();
        let irrelevant = fetched - items.len();
        tracing::info!(source, %after, fetched, relevant = items.len(), "collected messages");

        Ok(CollectOutcome {
            items,
            fetched,
            irrelevant,
        })
    }

    async fn connect_and_fetch(
        &self,
        client: &mut dyn SourceClient,
        after: DateTime<Utc>,
    ) -> Result<Vec<RawMessage>> {
        if self.fetch_limit == 0 {
            return Err(PipelineError::Config("fetch_limit must be positive".into()));
        }
        let timeout = self.call_timeout;
        let limit = self.fetch_limit;

        self.retry
            .run_on("source.connect", client, |c| {
                Box::pin(with_timeout(timeout, c.connect()))
            })
            .await?;
        self.retry
            .run_on("source.fetch", client, |c| {
                Box::pin(with_timeout(timeout, c.fetch_messages(after, limit)))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::RawEmbed;
    use chrono::TimeZone;

    fn msg(content: &str, embeds: Vec<RawEmbed>) -> RawMessage {
        RawMessage {
            id: "1".into(),
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            content: content.into(),
            author_id: "77".into(),
            author_name: "carol".into(),
            embeds,
        }
    }

    #[test]
    fn clean_content_keeps_paragraphs() {
        let s = "  Big&amp;new \u{200B}[@ acme]\t\tlaunch  \n\n second   line ";
        assert_eq!(clean_content(s), "Big&new [@acme] launch\n\nsecond line");
    }

    #[test]
    fn clean_content_caps_length() {
        let long = "a".repeat(MAX_CONTENT_CHARS + 50);
        assert_eq!(clean_content(&long).chars().count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn message_without_link_is_irrelevant() {
        assert!(to_candidate(&msg("gm https://example.com/x", vec![])).is_none());
    }

    #[test]
    fn rich_embed_description_wins() {
        let m = msg(
            "look https://x.com/acme/status/42).",
            vec![RawEmbed {
                kind: "rich".into(),
                url: None,
                description: Some("Acme ships a new L2".into()),
            }],
        );
        let c = to_candidate(&m).unwrap();
        assert_eq!(c.post_link, "https://x.com/acme/status/42");
        assert_eq!(c.content, "Acme ships a new L2");
        assert_eq!(c.author_link, "https://discord.com/users/77");
    }

    #[test]
    fn link_may_come_from_embed_url() {
        let m = msg(
            "",
            vec![RawEmbed {
                kind: "link".into(),
                url: Some("https://twitter.com/acme/status/7".into()),
                description: Some("tweet text".into()),
            }],
        );
        let c = to_candidate(&m).unwrap();
        assert_eq!(c.post_link, "https://twitter.com/acme/status/7");
        assert_eq!(c.content, "tweet text");
    }

    #[test]
    fn lower_bound_modes() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        let latest = Utc.with_ymd_and_hms(2025, 6, 1, 20, 15, 0).unwrap();

        let b = resolve_lower_bound(&CollectWindow::Days { days: 2 }, now, Ok(Some(latest)));
        assert_eq!(b.at, now - ChronoDuration::days(2));

        let since = CollectWindow::default();
        assert_eq!(resolve_lower_bound(&since, now, Ok(Some(latest))).at, latest);

        let empty = resolve_lower_bound(&since, now, Ok(None));
        assert_eq!(empty.at, now - ChronoDuration::hours(24));
        assert!(empty.note.is_some());

        let broken = resolve_lower_bound(
            &since,
            now,
            Err(PipelineError::DataIntegrity("bad time".into())),
        );
        assert_eq!(broken.at, now - ChronoDuration::hours(24));
        assert!(broken.note.unwrap().contains("data_integrity"));
    }
}
