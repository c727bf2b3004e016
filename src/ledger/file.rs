// src/ledger/file.rs
//! Local JSON ledger for dry runs and single-machine setups.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::memory::Tables;
use super::{ActiveSnapshot, LedgerStore, SchemaReport};
use crate::error::{PipelineError, Result};
use crate::model::{ArchiveRow, LedgerRow, RowKey, RowPatch};
use crate::state_file::{load_json, save_json};

pub struct FileLedger {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl FileLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = load_json::<Tables>(&path)
            .map_err(|e| PipelineError::DataIntegrity(format!("reading {}: {e}", path.display())))?
            .unwrap_or_default();
        Ok(Self {
            path,
            tables: Mutex::new(tables),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Mutate a copy, persist it, then swap it in; a failed write leaves memory untouched.
    fn commit<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut g = self.lock();
        let mut next = g.clone();
        let out = f(&mut next)?;
        save_json(&self.path, &next)
            .map_err(|e| PipelineError::Provider(format!("writing {}: {e}", self.path.display())))?;
        *g = next;
        Ok(out)
    }
}

#[async_trait]
impl LedgerStore for FileLedger {
    async fn ensure_schema(&self) -> Result<SchemaReport> {
        self.commit(Tables::ensure_schema)
    }

    async fn read_active(&self) -> Result<ActiveSnapshot> {
        Ok(self.lock().read_active())
    }

    async fn append_active(&self, rows: &[LedgerRow]) -> Result<()> {
        self.commit(|t| {
            t.append_active(rows);
            Ok(())
        })
    }

    async fn update_active(&self, key: &RowKey, patch: &RowPatch) -> Result<()> {
        self.commit(|t| t.update_active(key, patch))
    }

    async fn delete_active(&self, keys: &[RowKey]) -> Result<usize> {
        self.commit(|t| Ok(t.delete_active(keys)))
    }

    async fn append_archive(&self, rows: &[ArchiveRow]) -> Result<()> {
        self.commit(|t| {
            t.append_archive(rows);
            Ok(())
        })
    }

    async fn read_archive_links(&self) -> Result<Vec<String>> {
        Ok(self.lock().archive_links())
    }

    async fn read_archive_latest(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.lock().archive_latest())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
