// src/ledger/memory.rs
//! In-process ledger. Backs `FileLedger` and doubles as the fault-injecting
//! store for pipeline tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{latest_archived, reconcile_header, ActiveSnapshot, HeaderAction, LedgerStore, SchemaReport};
use crate::error::{PipelineError, Result};
use crate::model::{
    ArchiveRow, LedgerRow, RowKey, RowPatch, ACTIVE_HEADERS, ARCHIVE_HEADERS,
};

pub const ACTIVE_SHEET: &str = "Sheet1";
pub const ARCHIVE_SHEET: &str = "Archives";

/// Both sheets as raw cells, the same shape a spreadsheet returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub active_header: Option<Vec<String>>,
    #[serde(default)]
    pub active: Vec<Vec<String>>,
    #[serde(default)]
    pub archive_header: Option<Vec<String>>,
    #[serde(default)]
    pub archive: Vec<Vec<String>>,
}

fn header_row(h: &[&str]) -> Vec<String> {
    h.iter().map(|s| s.to_string()).collect()
}

impl Tables {
    pub fn ensure_schema(&mut self) -> Result<SchemaReport> {
        let mut report = SchemaReport::default();
        for (sheet, slot, expected) in [
            (ACTIVE_SHEET, &mut self.active_header, &ACTIVE_HEADERS[..]),
            (ARCHIVE_SHEET, &mut self.archive_header, &ARCHIVE_HEADERS[..]),
        ] {
            match slot {
                None => {
                    *slot = Some(header_row(expected));
                    report.created.push(sheet.to_string());
                    report.headers_written.push(sheet.to_string());
                }
                Some(existing) => {
                    if reconcile_header(sheet, existing, expected)? == HeaderAction::Write {
                        *existing = header_row(expected);
                        report.headers_written.push(sheet.to_string());
                    }
                }
            }
        }
        Ok(report)
    }

    pub fn read_active(&self) -> ActiveSnapshot {
        ActiveSnapshot::from_cells(&self.active)
    }

    pub fn append_active(&mut self, rows: &[LedgerRow]) {
        self.active.extend(rows.iter().map(LedgerRow::to_cells));
    }

    pub fn update_active(&mut self, key: &RowKey, patch: &RowPatch) -> Result<()> {
        let idx = self
            .active
            .iter()
            .position(|cells| {
                LedgerRow::from_cells(cells).is_ok_and(|r| &r.key() == key)
            })
            .ok_or_else(|| PipelineError::DataIntegrity(format!("row {key} not in active ledger")))?;
        let mut row = LedgerRow::from_cells(&self.active[idx])?;
        patch.apply(&mut row)?;
        self.active[idx] = row.to_cells();
        Ok(())
    }

    pub fn delete_active(&mut self, keys: &[RowKey]) -> usize {
        let doomed: HashSet<&RowKey> = keys.iter().collect();
        let before = self.active.len();
        self.active.retain(|cells| match LedgerRow::from_cells(cells) {
            Ok(r) => !doomed.contains(&r.key()),
            Err(_) => true,
        });
        before - self.active.len()
    }

    pub fn append_archive(&mut self, rows: &[ArchiveRow]) {
        self.archive.extend(rows.iter().map(ArchiveRow::to_cells));
    }

    pub fn archive_links(&self) -> Vec<String> {
        self.archive
            .iter()
            .filter_map(|cells| cells.get(ArchiveRow::LINK_COLUMN).cloned())
            .filter(|l| !l.trim().is_empty())
            .collect()
    }

    pub fn archive_latest(&self) -> Option<DateTime<Utc>> {
        latest_archived(&self.archive)
    }
}

/// Store operations, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    EnsureSchema,
    ReadActive,
    AppendActive,
    UpdateActive,
    DeleteActive,
    AppendArchive,
    ReadArchiveLinks,
    ReadArchiveLatest,
}

#[derive(Debug, Default)]
struct Inner {
    tables: Tables,
    /// (error, remaining failures); `u32::MAX` never runs out.
    faults: HashMap<LedgerOp, (PipelineError, u32)>,
    calls: HashMap<LedgerOp, usize>,
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger with schema already in place.
    pub fn with_schema() -> Self {
        let ledger = Self::default();
        // a fresh table set cannot conflict
        let _ = ledger.lock().tables.ensure_schema();
        ledger
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make the next `times` calls of `op` fail with `err`.
    pub fn fail(&self, op: LedgerOp, err: PipelineError, times: u32) {
        self.lock().faults.insert(op, (err, times));
    }

    pub fn fail_always(&self, op: LedgerOp, err: PipelineError) {
        self.fail(op, err, u32::MAX);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    pub fn calls(&self, op: LedgerOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn seed_active(&self, rows: &[LedgerRow]) {
        self.lock().tables.append_active(rows);
    }

    /// Push raw cells, e.g. a row with a malformed timestamp.
    pub fn push_raw_active(&self, cells: Vec<String>) {
        self.lock().tables.active.push(cells);
    }

    pub fn seed_archive(&self, rows: &[ArchiveRow]) {
        self.lock().tables.append_archive(rows);
    }

    pub fn active_rows(&self) -> Vec<LedgerRow> {
        self.lock().tables.read_active().rows
    }

    pub fn archive_cells(&self) -> Vec<Vec<String>> {
        self.lock().tables.archive.clone()
    }

    pub fn tables(&self) -> Tables {
        self.lock().tables.clone()
    }

    /// Count the call, then fail if a fault is armed; otherwise run `f`.
    fn op<T>(&self, op: LedgerOp, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut g = self.lock();
        *g.calls.entry(op).or_default() += 1;
        if let Some((err, remaining)) = g.faults.get_mut(&op) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(err.clone());
            }
        }
        f(&mut g.tables)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn ensure_schema(&self) -> Result<SchemaReport> {
        self.op(LedgerOp::EnsureSchema, Tables::ensure_schema)
    }

    async fn read_active(&self) -> Result<ActiveSnapshot> {
        self.op(LedgerOp::ReadActive, |t| Ok(t.read_active()))
    }

    async fn append_active(&self, rows: &[LedgerRow]) -> Result<()> {
        self.op(LedgerOp::AppendActive, |t| {
            t.append_active(rows);
            Ok(())
        })
    }

    async fn update_active(&self, key: &RowKey, patch: &RowPatch) -> Result<()> {
        self.op(LedgerOp::UpdateActive, |t| t.update_active(key, patch))
    }

    async fn delete_active(&self, keys: &[RowKey]) -> Result<usize> {
        self.op(LedgerOp::DeleteActive, |t| Ok(t.delete_active(keys)))
    }

    async fn append_archive(&self, rows: &[ArchiveRow]) -> Result<()> {
        self.op(LedgerOp::AppendArchive, |t| {
            t.append_archive(rows);
            Ok(())
        })
    }

    async fn read_archive_links(&self) -> Result<Vec<String>> {
        self.op(LedgerOp::ReadArchiveLinks, |t| Ok(t.archive_links()))
    }

    async fn read_archive_latest(&self) -> Result<Option<DateTime<Utc>>> {
        self.op(LedgerOp::ReadArchiveLatest, |t| Ok(t.archive_latest()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
