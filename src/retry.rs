// src/retry.rs
//! Exponential backoff for external calls, plus the per-call timeout wrapper.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    3
}

/// Base delay, capped doubling, fixed attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts; handy for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            max_attempts,
        }
    }

    /// Delay after the `attempt`-th failure (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Retry `op` while the error is retryable (transient or throttled).
    pub async fn run<T, F, Fut>(&self, op_name: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_if(op_name, PipelineError::is_retryable, op).await
    }

    /// Same as [`run`](Self::run) for calls that need `&mut` access to a client.
    pub async fn run_on<C, T, F>(&self, op_name: &str, target: &mut C, mut op: F) -> Result<T>
    where
        C: ?Sized,
        F: for<'c> FnMut(&'c mut C) -> BoxFut<'c, T>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op(&mut *target).await {
                Ok(v) => return Ok(v),
                Err(e) => match self.backoff(op_name, attempt, PipelineError::is_retryable, &e) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return Err(e),
                },
            }
        }
    }

    /// Retry `op` while `retryable(&err)` holds.
    pub async fn run_if<T, F, Fut>(
        &self,
        op_name: &str,
        retryable: fn(&PipelineError) -> bool,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match self.backoff(op_name, attempt, retryable, &e) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return Err(e),
                },
            }
        }
    }

    /// Delay before the next attempt, or `None` when the error is final.
    fn backoff(
        &self,
        op_name: &str,
        attempt: u32,
        retryable: fn(&PipelineError) -> bool,
        e: &PipelineError,
    ) -> Option<Duration> {
        let max_attempts = self.max_attempts.max(1);
        if !retryable(e) || attempt >= max_attempts {
            if attempt > 1 {
                tracing::error!(op = op_name, attempts = attempt, error = %e, "giving up");
            }
            return None;
        }
        let mut delay = self.delay_for(attempt);
        if let PipelineError::RateLimited {
            retry_after: Some(hint),
            ..
        } = e
        {
            let cap = Duration::from_millis(self.max_delay_ms);
            delay = delay.max((*hint).min(cap));
        }
        counter!("retry_attempts_total", "op" => op_name.to_string()).increment(1);
        tracing::warn!(
            op = op_name,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "retrying after error"
        );
        Some(delay)
    }
}

/// Bound one external call; an elapsed timer counts as a connection failure.
pub async fn with_timeout<T, Fut>(limit: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut).await?
}
