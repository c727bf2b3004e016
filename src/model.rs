// src/model.rs
//! Records that flow between phases, and their fixed sheet encoding.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, Result};
use crate::ingest::dedup::normalize_link;

/// Bumped whenever the header rows below change.
pub const SCHEMA_VERSION: u32 = 1;

pub const ACTIVE_HEADERS: [&str; 10] = [
    "date",
    "time",
    "content",
    "post_link",
    "author",
    "author_link",
    "AI Summary",
    "AI processed",
    "Daily Post Draft",
    "Publication Receipt",
];

pub const ARCHIVE_HEADERS: [&str; 8] = [
    "date",
    "time",
    "author",
    "post_link",
    "content",
    "AI Summary",
    "Date Processed (UTC)",
    "Publication Receipt",
];

pub const MAX_CONTENT_CHARS: usize = 1000;

pub const NO_MATCH_SENTINEL: &str = "No new project identified";
pub const FAILED_SENTINEL: &str = "Classification failed";

const PROCESSED_MARK: &str = "TRUE";
const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M";

/// One fetched source message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub timestamp: DateTime<Utc>,
    pub content: String,
    /// Empty when the message carried no external link.
    pub post_link: String,
    pub author: String,
    pub author_link: String,
}

impl CandidateItem {
    pub fn key(&self) -> RowKey {
        RowKey::from_link(&self.post_link)
    }
}

/// SHA-256 of the normalized link, hex encoded. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(String);

impl RowKey {
    pub fn from_link(link: &str) -> Self {
        let digest = Sha256::digest(normalize_link(link).as_bytes());
        let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        RowKey(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form is enough to find a row in the logs
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationState {
    Unprocessed,
    NoMatch,
    Match,
}

impl ClassificationState {
    pub fn is_processed(self) -> bool {
        !matches!(self, Self::Unprocessed)
    }

    /// Match vs no-match is read back from the stored summary.
    fn from_sheet(processed: bool, summary: Option<&str>) -> Self {
        if !processed {
            return Self::Unprocessed;
        }
        match summary.map(str::trim) {
            None | Some("") => Self::NoMatch,
            Some(s) if s == NO_MATCH_SENTINEL || s == FAILED_SENTINEL => Self::NoMatch,
            Some(_) => Self::Match,
        }
    }
}

/// One active-ledger record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub item: CandidateItem,
    pub summary: Option<String>,
    pub state: ClassificationState,
    pub draft_ref: Option<String>,
    pub receipt: Option<String>,
}

impl LedgerRow {
    pub fn new(item: CandidateItem) -> Self {
        Self {
            item,
            summary: None,
            state: ClassificationState::Unprocessed,
            draft_ref: None,
            receipt: None,
        }
    }

    pub fn key(&self) -> RowKey {
        self.item.key()
    }

    pub fn is_processed(&self) -> bool {
        self.state.is_processed()
    }

    pub fn to_cells(&self) -> Vec<String> {
        let it = &self.item;
        vec![
            it.timestamp.format(DATE_FMT).to_string(),
            it.timestamp.format(TIME_FMT).to_string(),
            it.content.clone(),
            it.post_link.clone(),
            it.author.clone(),
            it.author_link.clone(),
            self.summary.clone().unwrap_or_default(),
            if self.is_processed() {
                PROCESSED_MARK.to_string()
            } else {
                String::new()
            },
            self.draft_ref.clone().unwrap_or_default(),
            self.receipt.clone().unwrap_or_default(),
        ]
    }

    /// Decode one sheet row. Trailing empty cells may be missing.
    pub fn from_cells(cells: &[String]) -> Result<Self> {
        let cell = |i: usize| cells.get(i).map(|s| s.trim()).unwrap_or("");
        let opt = |i: usize| {
            let v = cell(i);
            (!v.is_empty()).then(|| v.to_string())
        };

        let timestamp = parse_timestamp(cell(0), cell(1))?;
        let summary = opt(6);
        let processed = cell(7).eq_ignore_ascii_case(PROCESSED_MARK);
        let state = ClassificationState::from_sheet(processed, summary.as_deref());

        Ok(Self {
            item: CandidateItem {
                timestamp,
                content: cells.get(2).cloned().unwrap_or_default(),
                post_link: cell(3).to_string(),
                author: cell(4).to_string(),
                author_link: cell(5).to_string(),
            },
            summary,
            state,
            draft_ref: opt(8),
            receipt: opt(9),
        })
    }
}

/// Date + minute-precision time, always UTC.
pub fn parse_timestamp(date: &str, time: &str) -> Result<DateTime<Utc>> {
    let d = NaiveDate::parse_from_str(date, DATE_FMT)
        .map_err(|e| PipelineError::DataIntegrity(format!("bad date {date:?}: {e}")))?;
    let t = NaiveTime::parse_from_str(time, TIME_FMT)
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
        .map_err(|e| PipelineError::DataIntegrity(format!("bad time {time:?}: {e}")))?;
    Ok(d.and_time(t).and_utc())
}

/// Partial update of one active row. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowPatch {
    pub state: Option<ClassificationState>,
    pub summary: Option<String>,
    pub draft_ref: Option<String>,
    pub receipt: Option<String>,
    /// Drop summary, draft reference and receipt.
    pub clear_transient: bool,
}

impl RowPatch {
    pub fn classified(state: ClassificationState, summary: impl Into<String>) -> Self {
        Self {
            state: Some(state),
            summary: Some(summary.into()),
            ..Default::default()
        }
    }

    pub fn draft(id: impl Into<String>) -> Self {
        Self {
            draft_ref: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn receipt(receipt: &Receipt) -> Self {
        Self {
            receipt: Some(receipt.to_string()),
            ..Default::default()
        }
    }

    pub fn clear_transient() -> Self {
        Self {
            clear_transient: true,
            ..Default::default()
        }
    }

    /// Apply to `row`. A patch may never take a processed row back to unprocessed.
    pub fn apply(&self, row: &mut LedgerRow) -> Result<()> {
        if row.is_processed() {
            if self.state == Some(ClassificationState::Unprocessed) {
                return Err(PipelineError::DataIntegrity(format!(
                    "row {} is processed; refusing to reset the flag",
                    row.key()
                )));
            }
            if self.clear_transient {
                return Err(PipelineError::DataIntegrity(format!(
                    "row {} is processed; transient columns stay until archival",
                    row.key()
                )));
            }
        }

        if self.clear_transient {
            row.summary = None;
            row.draft_ref = None;
            row.receipt = None;
        }
        if let Some(state) = self.state {
            row.state = state;
        }
        if let Some(s) = &self.summary {
            row.summary = Some(s.clone());
        }
        if let Some(d) = &self.draft_ref {
            row.draft_ref = Some(d.clone());
        }
        if let Some(r) = &self.receipt {
            row.receipt = Some(r.clone());
        }
        Ok(())
    }
}

/// Terminal record in the archive sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRow {
    pub item: CandidateItem,
    pub summary: Option<String>,
    pub processed_at: DateTime<Utc>,
    pub receipt: Option<String>,
}

impl ArchiveRow {
    pub fn from_ledger(row: &LedgerRow, processed_at: DateTime<Utc>, receipt: Option<String>) -> Self {
        Self {
            item: row.item.clone(),
            summary: row.summary.clone(),
            processed_at,
            receipt: receipt.or_else(|| row.receipt.clone()),
        }
    }

    pub fn to_cells(&self) -> Vec<String> {
        let it = &self.item;
        vec![
            it.timestamp.format(DATE_FMT).to_string(),
            it.timestamp.format(TIME_FMT).to_string(),
            it.author.clone(),
            it.post_link.clone(),
            it.content.clone(),
            self.summary.clone().unwrap_or_default(),
            self.processed_at.to_rfc3339(),
            self.receipt.clone().unwrap_or_default(),
        ]
    }

    /// Column index of `post_link` in the archive sheet.
    pub const LINK_COLUMN: usize = 3;
}

/// Consolidated summary of one run's matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyDraft {
    pub id: String,
    pub text: String,
    pub entries: usize,
}

/// Token returned by the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub url: Option<String>,
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.url {
            Some(u) => f.write_str(u),
            None => f.write_str(&self.id),
        }
    }
}
