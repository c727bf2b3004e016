// src/analyze/quota.rs
//! Daily classifier call budget, persisted so restarts within a UTC day keep counting.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::state_file::{load_json, save_json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct DailyCounter {
    date: NaiveDate,
    count: u32,
}

impl Default for DailyCounter {
    /// Rolls over to the real date on first use.
    fn default() -> Self {
        Self {
            date: NaiveDate::MIN,
            count: 0,
        }
    }
}

impl DailyCounter {
    fn today(now: DateTime<Utc>) -> Self {
        Self {
            date: now.date_naive(),
            count: 0,
        }
    }

    /// Reset on a new UTC day. Never decreases within a day.
    fn roll(&mut self, now: DateTime<Utc>) {
        if now.date_naive() > self.date {
            *self = Self::today(now);
        }
    }
}

pub struct DailyQuota {
    limit: u32,
    path: Option<PathBuf>,
    counter: Mutex<DailyCounter>,
}

impl DailyQuota {
    /// Load the counter from `path`; a missing file starts at zero.
    pub fn open(path: impl AsRef<Path>, limit: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let counter = load_json::<DailyCounter>(&path)
            .map_err(|e| PipelineError::DataIntegrity(format!("quota state {}: {e}", path.display())))?
            .unwrap_or_default();
        Ok(Self {
            limit,
            path: Some(path),
            counter: Mutex::new(counter),
        })
    }

    pub fn in_memory(limit: u32) -> Self {
        Self {
            limit,
            path: None,
            counter: Mutex::new(DailyCounter::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DailyCounter> {
        self.counter.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Take one slot. `Ok(false)` once today's budget is spent. The slot is only
    /// granted after the new count is on disk.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> Result<bool> {
        let mut g = self.lock();
        g.roll(now);
        if g.count >= self.limit {
            return Ok(false);
        }
        let next = DailyCounter {
            date: g.date,
            count: g.count + 1,
        };
        if let Some(p) = &self.path {
            save_json(p, &next)
                .map_err(|e| PipelineError::Provider(format!("persisting quota {}: {e}", p.display())))?;
        }
        *g = next;
        metrics::gauge!("classifier_quota_used").set(f64::from(next.count));
        Ok(true)
    }

    pub fn used(&self, now: DateTime<Utc>) -> u32 {
        let mut g = self.lock();
        g.roll(now);
        g.count
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> u32 {
        self.limit.saturating_sub(self.used(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn budget_holds_across_reopen_and_resets_next_day() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("quota.json");
        let day1 = Utc.with_ymd_and_hms(2025, 10, 1, 23, 0, 0).unwrap();

        let q = DailyQuota::open(&p, 3).unwrap();
        assert!(q.try_acquire(day1).unwrap());
        assert!(q.try_acquire(day1).unwrap());
        drop(q);

        let q = DailyQuota::open(&p, 3).unwrap();
        assert_eq!(q.remaining(day1), 1);
        assert!(q.try_acquire(day1).unwrap());
        assert!(!q.try_acquire(day1).unwrap());

        let day2 = day1 + chrono::Duration::hours(2);
        assert_eq!(q.remaining(day2), 3);
    }
}
