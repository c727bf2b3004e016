// src/scheduler.rs
//! Daily trigger for the daemon mode.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Local, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};
use crate::pipeline::{Pipeline, RunSummary};

/// Zone the daily time is read in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleZone {
    Utc,
    Local,
    Fixed(FixedOffset),
    /// IANA name such as `America/New_York`; follows daylight saving.
    Named(Tz),
}

impl FromStr for ScheduleZone {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("utc") || s == "Z" {
            return Ok(ScheduleZone::Utc);
        }
        if s.eq_ignore_ascii_case("local") {
            return Ok(ScheduleZone::Local);
        }
        if let Some(off) = parse_offset(s) {
            return Ok(ScheduleZone::Fixed(off));
        }
        s.parse::<Tz>().map(ScheduleZone::Named).map_err(|_| {
            PipelineError::Config(format!(
                "schedule timezone `{s}`: expected UTC, local, +HH:MM or an IANA name"
            ))
        })
    }
}

impl fmt::Display for ScheduleZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleZone::Utc => f.write_str("UTC"),
            ScheduleZone::Local => f.write_str("local"),
            ScheduleZone::Fixed(off) => write!(f, "{off}"),
            ScheduleZone::Named(tz) => f.write_str(tz.name()),
        }
    }
}

/// `+08:00`, `-0530`, `+9`.
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let (h, m) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 && rest.is_ascii() => rest.split_at(2),
        None => (rest, "0"),
    };
    let h: i32 = h.parse().ok()?;
    let m: i32 = m.parse().ok()?;
    if !(0..=14).contains(&h) || !(0..60).contains(&m) {
        return None;
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60))
}

pub fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| PipelineError::Config(format!("schedule time `{s}`: expected HH:MM ({e})")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    pub time: NaiveTime,
    pub zone: ScheduleZone,
}

impl DailySchedule {
    pub fn parse(time: &str, zone: &str) -> Result<Self> {
        Ok(Self {
            time: parse_time(time)?,
            zone: zone.parse()?,
        })
    }

    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        next_run_after(now, self.time, self.zone)
    }
}

/// First instant strictly after `now` whose wall-clock time in `zone` is `at`.
pub fn next_run_after(now: DateTime<Utc>, at: NaiveTime, zone: ScheduleZone) -> DateTime<Utc> {
    match zone {
        ScheduleZone::Utc => next_in(now, at, &Utc),
        ScheduleZone::Local => next_in(now, at, &Local),
        ScheduleZone::Fixed(off) => next_in(now, at, &off),
        ScheduleZone::Named(tz) => next_in(now, at, &tz),
    }
}

fn next_in<Tz: TimeZone>(now: DateTime<Utc>, at: NaiveTime, tz: &Tz) -> DateTime<Utc> {
    let today = now.with_timezone(tz).date_naive();
    for days in 0..=2 {
        let day = today + ChronoDuration::days(days);
        // Skipped wall-clock times (DST gaps) have no instant; try the next day.
        if let Some(t) = tz.from_local_datetime(&day.and_time(at)).earliest() {
            let t = t.with_timezone(&Utc);
            if t > now {
                return t;
            }
        }
    }
    now + ChronoDuration::days(1)
}

/// Sleep until each trigger and start a run. A trigger that fires while the
/// previous run still holds the run guard is skipped. Returns after `cancel`
/// fires and any in-flight run has finished.
pub async fn run_daily(pipeline: Arc<Pipeline>, schedule: DailySchedule, cancel: CancellationToken) {
    let mut in_flight: Option<JoinHandle<Option<RunSummary>>> = None;
    tracing::info!(time = %schedule.time, zone = %schedule.zone, "daily scheduler started");

    loop {
        let now = Utc::now();
        let next = schedule.next_after(now);
        let wait = (next - now).to_std().unwrap_or_default();
        gauge!("scheduler_next_run_ts").set(next.timestamp() as f64);
        tracing::info!(%next, wait_secs = wait.as_secs(), "next run scheduled");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        counter!("scheduler_triggers_total").increment(1);
        if in_flight.as_ref().is_some_and(|h| h.is_finished()) {
            in_flight = None;
        }
        let p = pipeline.clone();
        let c = cancel.clone();
        let handle = tokio::spawn(async move { p.run_exclusive(&c).await });
        if in_flight.is_none() {
            in_flight = Some(handle);
        }
    }

    tracing::info!("scheduler stopping");
    if let Some(h) = in_flight {
        if let Err(e) = h.await {
            tracing::error!(error = %e, "in-flight run ended abnormally");
        }
    }
}
