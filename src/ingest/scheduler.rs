// src/ingest/scheduler.rs
//! Due-ness per source in the source's own timezone, and the loop that
//! triggers due sources.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use metrics::gauge;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::IngestConfig;
use crate::error::IngestResult;
use crate::ingest::orchestrator::Orchestrator;
use crate::ingest::run::Run;
use crate::ingest::store::{RunStore, SourceStore};
use crate::ingest::types::{Frequency, Source};

/// Fallbacks for sources that do not configure their own schedule.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleDefaults {
    pub run_at: NaiveTime,
    pub run_day: Weekday,
    pub timezone: Tz,
}

impl ScheduleDefaults {
    pub fn from_config(cfg: &IngestConfig) -> Self {
        Self {
            run_at: cfg.default_run_at(),
            run_day: Weekday::Mon,
            timezone: cfg.default_tz(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueDecision {
    pub due: bool,
    pub reason: &'static str,
}

impl DueDecision {
    fn due(reason: &'static str) -> Self {
        Self { due: true, reason }
    }

    fn wait(reason: &'static str) -> Self {
        Self { due: false, reason }
    }
}

/// Decide whether `source` should run at `now`.
///
/// `last_success` is when the last successful Run finished.
pub fn evaluate(
    source: &Source,
    last_success: Option<DateTime<Utc>>,
    outstanding: bool,
    now: DateTime<Utc>,
    defaults: &ScheduleDefaults,
) -> DueDecision {
    if !source.enabled {
        return DueDecision::wait("disabled");
    }
    if outstanding {
        return DueDecision::wait("run outstanding");
    }

    let tz = source.timezone(defaults.timezone);
    let local_now = now.with_timezone(&tz);
    let run_at = run_at(source).unwrap_or(defaults.run_at);
    let last_local = last_success.map(|t| t.with_timezone(&tz).date_naive());

    match source.frequency {
        Frequency::Hourly => match last_success {
            None => DueDecision::due("never succeeded"),
            Some(t) if now - t >= Duration::minutes(60) => DueDecision::due("hour elapsed"),
            Some(_) => DueDecision::wait("ran within the hour"),
        },
        Frequency::Daily => {
            if local_now.time() < run_at {
                DueDecision::wait("before run_at")
            } else if last_local == Some(local_now.date_naive()) {
                DueDecision::wait("already ran today")
            } else {
                DueDecision::due("daily run_at passed")
            }
        }
        Frequency::Weekly => {
            let run_day = run_day(source).unwrap_or(defaults.run_day);
            let today = local_now.date_naive();
            let week_start =
                today - Duration::days(i64::from(today.weekday().num_days_from_sunday()));
            if today.weekday() != run_day {
                DueDecision::wait("not the run day")
            } else if local_now.time() < run_at {
                DueDecision::wait("before run_at")
            } else if last_local.is_some_and(|d| d >= week_start) {
                DueDecision::wait("already ran this week")
            } else {
                DueDecision::due("weekly run_at passed")
            }
        }
    }
}

/// `config.run_at` as `HH:MM`; invalid values count as missing.
fn run_at(source: &Source) -> Option<NaiveTime> {
    let raw = source.config_str("run_at")?;
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

/// `config.run_day_of_week`: a day name or 0 (Sunday) through 6.
fn run_day(source: &Source) -> Option<Weekday> {
    let v = source.config.get("run_day_of_week")?;
    let from_index = |n: u64| (n < 7).then(|| (0..n).fold(Weekday::Sun, |d, _| d.succ()));
    match v {
        serde_json::Value::Number(n) => n.as_u64().and_then(from_index),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .and_then(from_index)
                .or_else(|| s.parse::<Weekday>().ok())
        }
        _ => None,
    }
}

/// A source and its decision at one instant.
#[derive(Debug, Clone)]
pub struct DueSource {
    pub source: Source,
    pub decision: DueDecision,
}

#[derive(Clone)]
pub struct Scheduler {
    orchestrator: Orchestrator,
    defaults: ScheduleDefaults,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let cfg = orchestrator.config();
        Self {
            defaults: ScheduleDefaults::from_config(cfg),
            permits: Arc::new(Semaphore::new(cfg.schedule.max_concurrent_runs.max(1))),
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Every source with its decision at `now`.
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> IngestResult<Vec<DueSource>> {
        let store = self.orchestrator.store();
        let mut out = Vec::new();
        for source in store.list_sources().await? {
            let last = store
                .last_success(source.id)
                .await?
                .and_then(|r| r.finished_at);
            let outstanding = store.outstanding_run(source.id).await?.is_some();
            let decision = evaluate(&source, last, outstanding, now, &self.defaults);
            out.push(DueSource { source, decision });
        }
        Ok(out)
    }

    pub async fn due_sources(&self, now: DateTime<Utc>) -> IngestResult<Vec<Source>> {
        Ok(self
            .evaluate_all(now)
            .await?
            .into_iter()
            .filter(|d| d.decision.due)
            .map(|d| d.source)
            .collect())
    }

    /// Trigger every due source, at most `max_concurrent_runs` at a time.
    /// Returns the Runs that were executed; trigger errors are logged.
    pub async fn tick(&self, now: DateTime<Utc>) -> IngestResult<Vec<Run>> {
        let due = self.due_sources(now).await?;
        gauge!("ingest_scheduler_last_tick_ts").set(now.timestamp() as f64);
        tracing::info!(target: "ingest", due = due.len(), "scheduler tick");

        let mut set = JoinSet::new();
        for source in due {
            let permits = self.permits.clone();
            let orchestrator = self.orchestrator.clone();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                match orchestrator.trigger(&source).await {
                    Ok(run) => Some(run),
                    Err(e) => {
                        tracing::warn!(
                            target: "ingest",
                            source_id = source.id,
                            error = %e,
                            "trigger failed"
                        );
                        None
                    }
                }
            });
        }

        let mut runs = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(run)) => runs.push(run),
                Ok(None) => {}
                Err(e) => tracing::warn!(target: "ingest", error = %e, "run task panicked"),
            }
        }
        Ok(runs)
    }
}

/// Run `tick` every `schedule.tick_secs` until the task is aborted.
/// `after_tick` runs after each pass (snapshots, for instance).
pub fn spawn_scheduler<F>(scheduler: Scheduler, after_tick: F) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let every = std::time::Duration::from_secs(scheduler.orchestrator.config().schedule.tick_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = scheduler.tick(Utc::now()).await {
                tracing::warn!(target: "ingest", error = %e, "scheduler tick failed");
            }
            after_tick();
        }
    })
}
