// src/ledger/sheets.rs
//! Google Sheets v4 values API. Bearer tokens come from [`SheetsAuth`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::google_auth::SheetsAuth;
use super::memory::{ACTIVE_SHEET, ARCHIVE_SHEET};
use super::{latest_archived, reconcile_header, ActiveSnapshot, HeaderAction, LedgerStore, SchemaReport};
use crate::error::{check_response, PipelineError, Result};
use crate::model::{ArchiveRow, LedgerRow, RowKey, RowPatch, ACTIVE_HEADERS, ARCHIVE_HEADERS};

const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

/// Last column letter for a header of `n` columns (n <= 26).
fn last_column(n: usize) -> char {
    (b'A' + (n.saturating_sub(1) as u8).min(25)) as char
}

pub struct SheetsLedger {
    http: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    auth: SheetsAuth,
    active_sheet: String,
    archive_sheet: String,
}

impl SheetsLedger {
    pub fn new(spreadsheet_id: String, auth: SheetsAuth, call_timeout: Duration) -> Result<Self> {
        if spreadsheet_id.trim().is_empty() {
            return Err(PipelineError::Config("GOOGLE_SHEETS_ID is not set".into()));
        }
        let http = reqwest::Client::builder()
            .user_agent("channel-digest/0.1")
            .timeout(call_timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("building http client: {e}")))?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            spreadsheet_id,
            auth,
            active_sheet: ACTIVE_SHEET.to_string(),
            archive_sheet: ARCHIVE_SHEET.to_string(),
        })
    }

    pub fn with_sheet_names(mut self, active: impl Into<String>, archive: impl Into<String>) -> Self {
        self.active_sheet = active.into();
        self.archive_sheet = archive.into();
        self
    }

    /// Spreadsheet URL with `segments` appended, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| PipelineError::Config(format!("bad sheets base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| PipelineError::Config("sheets base url cannot be a base".into()))?
            .push(&self.spreadsheet_id)
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.auth.bearer().await?;
        let resp = req.bearer_auth(token).send().await?;
        check_response(resp).await
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let url = self.url(&["values", range])?;
        let vr: ValueRange = self.send(self.http.get(url)).await?.json().await?;
        Ok(vr.values)
    }

    async fn put_values(&self, range: &str, values: Vec<Vec<String>>) -> Result<()> {
        let mut url = self.url(&["values", range])?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        self.send(self.http.put(url).json(&json!({ "values": values })))
            .await?;
        Ok(())
    }

    async fn append_values(&self, sheet: &str, width: usize, values: Vec<Vec<String>>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let range = format!("{sheet}!A:{}", last_column(width));
        let mut url = self.url(&["values", &format!("{range}:append")])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        self.send(self.http.post(url).json(&json!({ "values": values })))
            .await?;
        Ok(())
    }

    async fn batch_update(&self, requests: serde_json::Value) -> Result<()> {
        let mut url = self.url(&[])?;
        let last = format!("{}:batchUpdate", self.spreadsheet_id);
        url.path_segments_mut()
            .map_err(|_| PipelineError::Config("sheets base url cannot be a base".into()))?
            .pop()
            .push(&last);
        self.send(self.http.post(url).json(&json!({ "requests": requests })))
            .await?;
        Ok(())
    }

    async fn sheet_ids(&self) -> Result<Vec<(String, i64)>> {
        let mut url = self.url(&[])?;
        url.query_pairs_mut().append_pair("fields", "sheets.properties");
        let meta: SpreadsheetMeta = self.send(self.http.get(url)).await?.json().await?;
        Ok(meta
            .sheets
            .into_iter()
            .map(|s| (s.properties.title, s.properties.sheet_id))
            .collect())
    }

    async fn active_data(&self) -> Result<Vec<Vec<String>>> {
        let range = format!("{}!A2:{}", self.active_sheet, last_column(ACTIVE_HEADERS.len()));
        self.get_values(&range).await
    }

    /// 1-based sheet row number of the row with `key`.
    fn find_row(data: &[Vec<String>], key: &RowKey) -> Option<(usize, LedgerRow)> {
        data.iter().enumerate().find_map(|(i, cells)| {
            LedgerRow::from_cells(cells)
                .ok()
                .filter(|r| &r.key() == key)
                .map(|r| (i + 2, r))
        })
    }
}

#[async_trait]
impl LedgerStore for SheetsLedger {
    async fn ensure_schema(&self) -> Result<SchemaReport> {
        let mut report = SchemaReport::default();
        let existing = self.sheet_ids().await?;
        let missing: Vec<&String> = [&self.active_sheet, &self.archive_sheet]
            .into_iter()
            .filter(|name| !existing.iter().any(|(t, _)| t == *name))
            .collect();
        if !missing.is_empty() {
            let reqs: Vec<_> = missing
                .iter()
                .map(|title| json!({ "addSheet": { "properties": { "title": title } } }))
                .collect();
            self.batch_update(serde_json::Value::Array(reqs)).await?;
            report.created = missing.iter().map(|s| s.to_string()).collect();
            tracing::info!(sheets = ?report.created, "created missing sheets");
        }

        for (sheet, expected) in [
            (&self.active_sheet, &ACTIVE_HEADERS[..]),
            (&self.archive_sheet, &ARCHIVE_HEADERS[..]),
        ] {
            let first = self.get_values(&format!("{sheet}!1:1")).await?;
            let header = first.into_iter().next().unwrap_or_default();
            if reconcile_header(sheet, &header, expected)? == HeaderAction::Write {
                let row = expected.iter().map(|s| s.to_string()).collect();
                self.put_values(&format!("{sheet}!A1"), vec![row]).await?;
                tracing::info!(sheet = %sheet, legacy_columns = header.len(), "header row written");
                report.headers_written.push(sheet.clone());
            }
        }
        Ok(report)
    }

    async fn read_active(&self) -> Result<ActiveSnapshot> {
        Ok(ActiveSnapshot::from_cells(&self.active_data().await?))
    }

    async fn append_active(&self, rows: &[LedgerRow]) -> Result<()> {
        let values = rows.iter().map(LedgerRow::to_cells).collect();
        self.append_values(&self.active_sheet, ACTIVE_HEADERS.len(), values)
            .await
    }

    async fn update_active(&self, key: &RowKey, patch: &RowPatch) -> Result<()> {
        let data = self.active_data().await?;
        let (row_number, mut row) = Self::find_row(&data, key)
            .ok_or_else(|| PipelineError::DataIntegrity(format!("row {key} not in active ledger")))?;
        patch.apply(&mut row)?;
        let range = format!(
            "{}!A{row_number}:{}{row_number}",
            self.active_sheet,
            last_column(ACTIVE_HEADERS.len())
        );
        self.put_values(&range, vec![row.to_cells()]).await
    }

    async fn delete_active(&self, keys: &[RowKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let sheet_id = self
            .sheet_ids()
            .await?
            .into_iter()
            .find(|(t, _)| *t == self.active_sheet)
            .map(|(_, id)| id)
            .ok_or_else(|| PipelineError::Config(format!("sheet {:?} missing", self.active_sheet)))?;

        let data = self.active_data().await?;
        let mut indices: Vec<usize> = keys
            .iter()
            .filter_map(|k| Self::find_row(&data, k).map(|(n, _)| n - 1))
            .collect();
        // bottom-up so earlier deletions do not shift later indices
        indices.sort_unstable_by(|a, b| b.cmp(a));
        indices.dedup();
        if indices.is_empty() {
            return Ok(0);
        }
        let reqs: Vec<_> = indices
            .iter()
            .map(|&start| {
                json!({ "deleteDimension": { "range": {
                    "sheetId": sheet_id,
                    "dimension": "ROWS",
                    "startIndex": start,
                    "endIndex": start + 1,
                } } })
            })
            .collect();
        self.batch_update(serde_json::Value::Array(reqs)).await?;
        Ok(indices.len())
    }

    async fn append_archive(&self, rows: &[ArchiveRow]) -> Result<()> {
        let values = rows.iter().map(ArchiveRow::to_cells).collect();
        self.append_values(&self.archive_sheet, ARCHIVE_HEADERS.len(), values)
            .await
    }

    async fn read_archive_links(&self) -> Result<Vec<String>> {
        let col = last_column(ArchiveRow::LINK_COLUMN + 1);
        let values = self
            .get_values(&format!("{}!{col}2:{col}", self.archive_sheet))
            .await?;
        Ok(values
            .into_iter()
            .filter_map(|r| r.into_iter().next())
            .filter(|l| !l.trim().is_empty())
            .collect())
    }

    async fn read_archive_latest(&self) -> Result<Option<DateTime<Utc>>> {
        let values = self.get_values(&format!("{}!A2:B", self.archive_sheet)).await?;
        Ok(latest_archived(&values))
    }

    fn name(&self) -> &'static str {
        "google_sheets"
    }
}
