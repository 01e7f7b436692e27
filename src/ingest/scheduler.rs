// src/ingest/scheduler.rs
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeDelta, TimeZone};
use metrics::counter;

use crate::ingest::types::RunStats;
use crate::ingest::Pipeline;

/// When the next pass starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Every day at this local wall-clock time.
    DailyAt(NaiveTime),
    /// Fixed pause between the end of one pass and the start of the next.
    Every(Duration),
}

impl Trigger {
    /// `"09:00"` → `DailyAt(09:00)`.
    pub fn daily_at(hhmm: &str) -> Result<Self> {
        let t = NaiveTime::parse_from_str(hhmm.trim(), "%H:%M")
            .with_context(|| format!("invalid daily time '{hhmm}', expected HH:MM"))?;
        Ok(Trigger::DailyAt(t))
    }

    pub fn every_secs(secs: u64) -> Result<Self> {
        if secs == 0 {
            bail!("interval must be at least one second");
        }
        Ok(Trigger::Every(Duration::from_secs(secs)))
    }

    /// Time to wait from `now` until the trigger fires.
    ///
    /// A daily time is resolved in `now`'s zone on the day it fires, so across a DST change
    /// the delay stretches or shrinks and the wall-clock time stays put.
    pub fn next_delay<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Duration {
        match *self {
            Trigger::Every(d) => d,
            Trigger::DailyAt(t) => {
                let tz = now.timezone();
                for ahead in 0..=2 {
                    let day = now.date_naive() + TimeDelta::days(ahead);
                    let Some(fire) = resolve_local(&tz, day.and_time(t)) else {
                        continue;
                    };
                    if fire > *now {
                        return fire
                            .signed_duration_since(now.clone())
                            .to_std()
                            .unwrap_or_default();
                    }
                }
                Duration::from_secs(24 * 3600)
            }
        }
    }
}

/// Wall-clock time in `tz`; a time skipped by a spring-forward gap lands just after the gap.
fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + TimeDelta::hours(1))).earliest())
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::DailyAt(t) => write!(f, "daily at {}", t.format("%H:%M")),
            Trigger::Every(d) => write!(f, "every {}s", d.as_secs()),
        }
    }
}

/// How a pass ended, as seen from the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(RunStats),
    /// Something escaped the per-feed/per-entry handling.
    Failed(String),
}

/// Totals over the lifetime of a loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub passes: usize,
    pub failed_passes: usize,
    pub articles_added: usize,
}

/// Run one pass on its own task so that a panic ends the pass, not the process.
pub async fn run_pass(pipeline: Arc<Pipeline>) -> PassOutcome {
    let handle = tokio::spawn(async move { pipeline.run_once().await });
    match handle.await {
        Ok(stats) => PassOutcome::Completed(stats),
        Err(e) if e.is_panic() => PassOutcome::Failed(panic_message(e.into_panic())),
        Err(e) => PassOutcome::Failed(e.to_string()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "pass panicked".to_string()
    }
}

/// Pass now, then one pass per trigger until `shutdown` resolves.
///
/// `shutdown` is only looked at between passes; a running pass always finishes.
pub async fn run_forever<F>(pipeline: Arc<Pipeline>, trigger: Trigger, shutdown: F) -> LoopSummary
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut summary = LoopSummary::default();

    loop {
        summary.passes += 1;
        match run_pass(pipeline.clone()).await {
            PassOutcome::Completed(stats) => {
                summary.articles_added += stats.articles_added;
            }
            PassOutcome::Failed(reason) => {
                summary.failed_passes += 1;
                counter!("ingest_pass_failures_total").increment(1);
                tracing::error!(target: "ingest", pass = summary.passes, %reason, "pass aborted");
            }
        }

        let delay = trigger.next_delay(&Local::now());
        tracing::info!(
            target: "ingest",
            %trigger,
            next_in_secs = delay.as_secs(),
            "waiting for next pass"
        );

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!(target: "ingest", passes = summary.passes, "shutdown requested, stopping");
                break;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    summary
}
