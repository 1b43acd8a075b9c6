// src/scheduler.rs
//! Periodic driver for the Fetch→Classify cycle.
//!
//! Two states: idle (no timer) and running (timer task alive). Every tick,
//! and every manual trigger, tries to take the single "cycle in progress"
//! flag; if another cycle still holds it the tick is dropped and counted.
//! `stop()` cancels the timer only, so an in-flight cycle runs to completion.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::SchedulerConfig;
use crate::history::CycleHistory;
use crate::ingest::FetchReport;
use crate::pipeline::{BatchReport, CycleReport};

/// Work performed on every tick.
#[async_trait]
pub trait CycleJob: Send + Sync + 'static {
    async fn run_cycle(&self) -> Result<CycleReport>;
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub period: Duration,
    pub initial_delay: Duration,
    pub history: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(600),
            initial_delay: Duration::from_secs(3),
            history: 20,
        }
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(c: &SchedulerConfig) -> Self {
        Self {
            period: Duration::from_secs(c.period_secs.max(1)),
            initial_delay: Duration::from_secs(c.initial_delay_secs),
            history: c.history,
        }
    }
}

/// Sums over every successful cycle since the scheduler was built.
/// Unlike `recent`, never truncated.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunTotals {
    pub cycles: u64,
    pub fetch: FetchReport,
    pub batch: BatchReport,
}

impl RunTotals {
    fn add(&mut self, r: &CycleReport) {
        self.cycles += 1;
        self.fetch.appended += r.fetch.appended;
        self.fetch.incomplete += r.fetch.incomplete;
        self.fetch.duplicates += r.fetch.duplicates;
        self.fetch.failed_feeds += r.fetch.failed_feeds;
        self.fetch.queue_len = r.fetch.queue_len;
        self.batch.merge(r.batch.clone());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub in_progress: bool,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub next_run: Option<DateTime<Utc>>,
    pub recent: Vec<CycleReport>,
    pub totals: RunTotals,
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("scheduler_cycles_total", "Cycles that finished successfully.");
        describe_counter!("scheduler_cycle_failures_total", "Cycles that returned an error.");
        describe_counter!(
            "scheduler_cycles_skipped_total",
            "Ticks dropped because a cycle was still running."
        );
        describe_counter!("scheduler_retry_failures_total", "Failed drain attempts.");
        describe_gauge!("scheduler_last_cycle_ts", "Unix ts of the last finished cycle.");
    });
}

struct Shared {
    job: Arc<dyn CycleJob>,
    in_progress: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    next_run: Mutex<Option<DateTime<Utc>>>,
    history: CycleHistory,
    totals: Mutex<RunTotals>,
}

/// Clears the in-progress flag when the cycle task ends, even by panic.
struct InProgress(Arc<Shared>);

impl Drop for InProgress {
    fn drop(&mut self) {
        self.0.in_progress.store(false, Ordering::SeqCst);
    }
}

impl Shared {
    fn set_next_run(&self, at: Option<DateTime<Utc>>) {
        if let Ok(mut n) = self.next_run.lock() {
            *n = at;
        }
    }

    /// Spawn one cycle unless another is running.
    fn try_spawn(self: &Arc<Self>, origin: &'static str) -> Option<JoinHandle<()>> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            counter!("scheduler_cycles_skipped_total").increment(1);
            tracing::warn!(origin, "previous cycle still running, skipping");
            return None;
        }
        let guard = InProgress(Arc::clone(self));
        Some(tokio::spawn(async move {
            let shared = Arc::clone(&guard.0);
            tracing::info!(origin, "cycle started");
            match shared.job.run_cycle().await {
                Ok(report) => {
                    shared.completed.fetch_add(1, Ordering::Relaxed);
                    counter!("scheduler_cycles_total").increment(1);
                    gauge!("scheduler_last_cycle_ts").set(Utc::now().timestamp() as f64);
                    tracing::info!(
                        origin,
                        appended = report.fetch.appended,
                        processed = report.batch.processed,
                        skipped = report.batch.skipped,
                        queue_remaining = report.batch.queue_remaining,
                        "cycle finished"
                    );
                    if let Ok(mut t) = shared.totals.lock() {
                        t.add(&report);
                    }
                    shared.history.push(report);
                }
                Err(e) => {
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                    counter!("scheduler_cycle_failures_total").increment(1);
                    tracing::error!(origin, error = %format!("{e:#}"), "cycle failed");
                }
            }
            drop(guard);
        }))
    }
}

pub struct Scheduler {
    settings: SchedulerSettings,
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(job: Arc<dyn CycleJob>, settings: SchedulerSettings) -> Self {
        ensure_metrics_described();
        Self {
            settings,
            shared: Arc::new(Shared {
                job,
                in_progress: AtomicBool::new(false),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                next_run: Mutex::new(None),
                history: CycleHistory::with_capacity(settings.history),
                totals: Mutex::new(RunTotals::default()),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Idle → running. First cycle after `initial_delay`, then every `period`.
    /// Calling it while running is a no-op.
    pub fn start(&self) {
        let Ok(mut timer) = self.timer.lock() else {
            return;
        };
        if timer.is_some() {
            tracing::warn!("scheduler already running");
            return;
        }

        let SchedulerSettings {
            period,
            initial_delay,
            ..
        } = self.settings;
        let shared = Arc::clone(&self.shared);
        shared.set_next_run(Some(after(initial_delay)));

        *timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + initial_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                shared.set_next_run(Some(after(period)));
                shared.try_spawn("timer");
            }
        }));
        tracing::info!(
            period_secs = period.as_secs(),
            initial_delay_secs = initial_delay.as_secs(),
            "scheduler started"
        );
    }

    /// Running → idle. Pending ticks are cancelled; a cycle already running continues.
    pub fn stop(&self) {
        let handle = self.timer.lock().ok().and_then(|mut t| t.take());
        if let Some(h) = handle {
            h.abort();
            self.shared.set_next_run(None);
            tracing::info!("scheduler stopped");
        }
    }

    /// Run a cycle now unless one is already in progress.
    pub fn trigger_now(&self) -> Option<JoinHandle<()>> {
        self.shared.try_spawn("manual")
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().map(|t| t.is_some()).unwrap_or(false)
    }

    pub fn status(&self) -> SchedulerStatus {
        let s = &self.shared;
        SchedulerStatus {
            running: self.is_running(),
            in_progress: s.in_progress.load(Ordering::SeqCst),
            completed: s.completed.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
            skipped: s.skipped.load(Ordering::Relaxed),
            next_run: s.next_run.lock().ok().and_then(|n| *n),
            recent: s.history.snapshot_last_n(self.settings.history),
            totals: s.totals.lock().map(|t| t.clone()).unwrap_or_default(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn after(d: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(d).unwrap_or_default()
}
