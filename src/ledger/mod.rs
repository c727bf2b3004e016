// src/ledger/mod.rs
//! Durable ledger: the active sheet every phase reads and mutates, plus the
//! append-only archive sheet.

pub mod file;
pub mod google_auth;
pub mod memory;
pub mod sheets;
pub mod writer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{PipelineError, Result};
use crate::model::{parse_timestamp, ArchiveRow, LedgerRow, RowKey, RowPatch};

pub use writer::{LedgerWriter, WriteResult};

/// A stored row that failed to decode. The link is kept so dedup still sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRow {
    /// 1-based sheet row number, header included.
    pub row_number: usize,
    pub post_link: String,
    pub error: PipelineError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveSnapshot {
    pub rows: Vec<LedgerRow>,
    pub malformed: Vec<MalformedRow>,
}

impl ActiveSnapshot {
    /// Decode raw data rows (header excluded). Row numbers start at 2.
    pub fn from_cells(data: &[Vec<String>]) -> Self {
        let mut snap = ActiveSnapshot::default();
        for (i, cells) in data.iter().enumerate() {
            if cells.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            match LedgerRow::from_cells(cells) {
                Ok(row) => snap.rows.push(row),
                Err(error) => {
                    let row_number = i + 2;
                    tracing::warn!(row_number, error = %error, "skipping malformed ledger row");
                    snap.malformed.push(MalformedRow {
                        row_number,
                        post_link: cells.get(3).cloned().unwrap_or_default(),
                        error,
                    });
                }
            }
        }
        snap
    }
}

/// What `ensure_schema` had to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    pub created: Vec<String>,
    pub headers_written: Vec<String>,
}

/// Decision for one sheet's header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderAction {
    Keep,
    /// Missing, a strict prefix of the current schema, or the same columns
    /// spelled differently (`Post Link` for `post_link`).
    Write,
}

/// Case, surrounding space and `_` versus space do not distinguish columns.
fn header_key(h: &str) -> String {
    h.trim()
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn reconcile_header(sheet: &str, existing: &[String], expected: &[&str]) -> Result<HeaderAction> {
    let existing: Vec<&str> = existing.iter().map(|s| s.trim()).collect();
    if existing.len() == expected.len() && existing.iter().zip(expected).all(|(a, b)| a == b) {
        return Ok(HeaderAction::Keep);
    }
    let matches = existing.len() <= expected.len()
        && existing
            .iter()
            .zip(expected)
            .all(|(a, b)| header_key(a) == header_key(b));
    if matches {
        return Ok(HeaderAction::Write);
    }
    Err(PipelineError::Config(format!(
        "sheet {sheet:?} has a conflicting header {existing:?}; expected {expected:?}"
    )))
}

/// Newest item timestamp among archive rows. Rows that do not decode are skipped.
pub fn latest_archived(cells: &[Vec<String>]) -> Option<DateTime<Utc>> {
    cells
        .iter()
        .filter_map(|c| parse_timestamp(c.first()?.trim(), c.get(1)?.trim()).ok())
        .max()
}

/// Row-oriented store holding the active and archive sheets.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Idempotent: create missing sheets and header rows, migrate legacy prefixes.
    async fn ensure_schema(&self) -> Result<SchemaReport>;
    async fn read_active(&self) -> Result<ActiveSnapshot>;
    async fn append_active(&self, rows: &[LedgerRow]) -> Result<()>;
    /// Errors with `DataIntegrity` when the row is missing or the patch is rejected.
    async fn update_active(&self, key: &RowKey, patch: &RowPatch) -> Result<()>;
    /// Returns the number of rows removed.
    async fn delete_active(&self, keys: &[RowKey]) -> Result<usize>;
    async fn append_archive(&self, rows: &[ArchiveRow]) -> Result<()>;
    async fn read_archive_links(&self) -> Result<Vec<String>>;
    /// Newest item timestamp in the archive.
    async fn read_archive_latest(&self) -> Result<Option<DateTime<Utc>>>;
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ACTIVE_HEADERS, ARCHIVE_HEADERS};

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn header_reconciliation() {
        let full = strings(&ACTIVE_HEADERS);
        assert_eq!(reconcile_header("Sheet1", &full, &ACTIVE_HEADERS).unwrap(), HeaderAction::Keep);
        assert_eq!(reconcile_header("Sheet1", &[], &ACTIVE_HEADERS).unwrap(), HeaderAction::Write);
        let legacy = strings(&ACTIVE_HEADERS[..6]);
        assert_eq!(reconcile_header("Sheet1", &legacy, &ACTIVE_HEADERS).unwrap(), HeaderAction::Write);
        let wrong = strings(&["date", "when"]);
        assert!(matches!(
            reconcile_header("Sheet1", &wrong, &ACTIVE_HEADERS),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn header_spelling_differences_are_migrated() {
        let titled = strings(&["Date", "Time", "Content", "Post Link", "Author", "Author Link"]);
        assert_eq!(reconcile_header("Sheet1", &titled, &ACTIVE_HEADERS).unwrap(), HeaderAction::Write);

        let mut shouty = strings(&ACTIVE_HEADERS);
        shouty[6] = "ai_summary".into();
        shouty[9] = " PUBLICATION  RECEIPT ".into();
        assert_eq!(reconcile_header("Sheet1", &shouty, &ACTIVE_HEADERS).unwrap(), HeaderAction::Write);

        let archive = strings(&["Date", "Time", "Author", "Post Link", "Content", "AI Summary"]);
        assert_eq!(reconcile_header("Archives", &archive, &ARCHIVE_HEADERS).unwrap(), HeaderAction::Write);

        let swapped = strings(&["Time", "Date"]);
        assert!(reconcile_header("Sheet1", &swapped, &ACTIVE_HEADERS).is_err());
    }

    #[test]
    fn snapshot_keeps_links_of_malformed_rows() {
        let data = vec![
            strings(&["2025-01-02", "10:00", "ok", "https://x.com/a/status/1"]),
            strings(&["yesterday", "10:00", "bad", "https://x.com/a/status/2"]),
            strings(&["", ""]),
        ];
        let snap = ActiveSnapshot::from_cells(&data);
        assert_eq!(snap.rows.len(), 1);
        assert_eq!(snap.malformed.len(), 1);
        assert_eq!(snap.malformed[0].row_number, 3);
        assert_eq!(snap.malformed[0].post_link, "https://x.com/a/status/2");
    }
}
