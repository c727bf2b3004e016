// src/publish/window.rs
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::model::Receipt;
use crate::state_file::{load_json, save_json};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PostRecord {
    at: DateTime<Utc>,
    receipt: Receipt,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct WindowState {
    #[serde(default)]
    posts: Vec<PostRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCheck {
    Open,
    DailyLimit { used: u32 },
    /// Sliding window full; the oldest post in it leaves at `reopens_at`.
    WindowLimit { used: u32, reopens_at: DateTime<Utc> },
}

/// Local publishing gate: `daily_limit` per UTC day and `window_limit` per
/// sliding `window_minutes`. Checking never mutates; `record` is called after
/// a successful publish.
pub struct PublishWindow {
    daily_limit: u32,
    window_limit: u32,
    window: ChronoDuration,
    path: Option<PathBuf>,
    state: Mutex<WindowState>,
}

impl PublishWindow {
    pub fn open(path: impl AsRef<Path>, daily_limit: u32, window_limit: u32, window_minutes: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = load_json::<WindowState>(&path)
            .map_err(|e| PipelineError::DataIntegrity(format!("publish window {}: {e}", path.display())))?
            .unwrap_or_default();
        let mut w = Self::in_memory(daily_limit, window_limit, window_minutes);
        w.path = Some(path);
        w.state = Mutex::new(state);
        Ok(w)
    }

    pub fn in_memory(daily_limit: u32, window_limit: u32, window_minutes: u32) -> Self {
        Self {
            daily_limit,
            window_limit,
            window: ChronoDuration::minutes(i64::from(window_minutes)),
            path: None,
            state: Mutex::new(WindowState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn check(&self, now: DateTime<Utc>) -> WindowCheck {
        let g = self.lock();
        let today = now.date_naive();
        let used_today = g.posts.iter().filter(|p| p.at.date_naive() == today).count() as u32;
        if used_today >= self.daily_limit {
            return WindowCheck::DailyLimit { used: used_today };
        }
        let since = now - self.window;
        let in_window: Vec<&PostRecord> = g.posts.iter().filter(|p| p.at > since).collect();
        if in_window.len() as u32 >= self.window_limit {
            let oldest = in_window.iter().map(|p| p.at).min().unwrap_or(now);
            return WindowCheck::WindowLimit {
                used: in_window.len() as u32,
                reopens_at: oldest + self.window,
            };
        }
        WindowCheck::Open
    }

    /// Remember a successful publish. Entries older than both limits are pruned.
    pub fn record(&self, now: DateTime<Utc>, receipt: &Receipt) -> Result<()> {
        let mut g = self.lock();
        let keep_after = now - self.window.max(ChronoDuration::days(1));
        let mut next = g.clone();
        next.posts.retain(|p| p.at > keep_after);
        next.posts.push(PostRecord {
            at: now,
            receipt: receipt.clone(),
        });
        if let Some(p) = &self.path {
            save_json(p, &next)
                .map_err(|e| PipelineError::Provider(format!("persisting publish window {}: {e}", p.display())))?;
        }
        *g = next;
        Ok(())
    }

    pub fn last_receipt(&self) -> Option<Receipt> {
        self.lock().posts.last().map(|p| p.receipt.clone())
    }
}
