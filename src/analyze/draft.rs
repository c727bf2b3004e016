// src/analyze/draft.rs
use chrono::{DateTime, Utc};

use crate::model::DailyDraft;

/// One matched post, in processing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftEntry {
    pub entity: String,
    pub post_link: String,
    pub summary: String,
}

pub fn draft_id(now: DateTime<Utc>) -> String {
    format!("draft-{}", now.format("%Y%m%dT%H%M%SZ"))
}

/// `None` when there is nothing to report.
pub fn build_draft(entries: &[DraftEntry], now: DateTime<Utc>) -> Option<DailyDraft> {
    if entries.is_empty() {
        return None;
    }
    let mut text = format!("New projects spotted on {}:", now.format("%Y-%m-%d"));
    for e in entries {
        text.push('\n');
        text.push_str(&format!("- @{} ({}): {}", e.entity, e.post_link, e.summary));
    }
    Some(DailyDraft {
        id: draft_id(now),
        text,
        entries: entries.len(),
    })
}
