//! Live timer set for enabled jobs.
//!
//! Each armed job owns exactly one tokio task: a repeating ticker for
//! interval jobs, a single sleep for one-shot jobs, and a cadence watcher for
//! cron jobs. Cancelling a job aborts its task. Executions are spawned as
//! separate tasks, so cancellation stops future fires but never an execution
//! that is already in flight.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::events::{CronEvent, EventHub};
use super::schedule::format_timestamp;
use super::store::CronStore;
use super::types::{CronJob, JobStatus, ScheduleKind, Trigger};

pub type SharedStore = Arc<Mutex<CronStore>>;

/// A due job handed to the execution sink.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job_id: String,
    pub job_name: String,
    pub payload: String,
}

/// Consumer of due jobs. An `Err` marks the execution as failed.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn deliver(&self, delivery: Delivery) -> AnyResult<()>;
}

struct TimerHandle {
    generation: u64,
    handle: JoinHandle<()>,
}

struct CronWatcher {
    generation: u64,
    schedule: Schedule,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct LiveTimers {
    running: bool,
    next_generation: u64,
    /// Cron jobs.
    watchers: HashMap<String, CronWatcher>,
    /// Interval and once jobs.
    timers: HashMap<String, TimerHandle>,
}

impl LiveTimers {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn disarm(&mut self, id: &str) -> bool {
        let mut found = false;
        if let Some(w) = self.watchers.remove(id) {
            w.handle.abort();
            found = true;
        }
        if let Some(t) = self.timers.remove(id) {
            t.handle.abort();
            found = true;
        }
        found
    }

    fn disarm_all(&mut self) -> usize {
        let count = self.watchers.len() + self.timers.len();
        for (_, w) in self.watchers.drain() {
            w.handle.abort();
        }
        for (_, t) in self.timers.drain() {
            t.handle.abort();
        }
        count
    }
}

struct EngineInner {
    store: SharedStore,
    sink: Arc<dyn ExecutionSink>,
    events: EventHub,
    live: Mutex<LiveTimers>,
}

#[derive(Clone)]
pub struct CronEngine {
    inner: Arc<EngineInner>,
}

impl CronEngine {
    pub fn new(store: SharedStore, sink: Arc<dyn ExecutionSink>, events: EventHub) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                sink,
                events,
                live: Mutex::new(LiveTimers::default()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CronEvent> {
        self.inner.events.subscribe()
    }

    /// Load the store and arm every enabled job.
    pub async fn start(&self) {
        let jobs = {
            let mut store = self.inner.store.lock().await;
            store.all()
        };
        {
            let mut live = self.inner.live.lock().await;
            if live.running {
                warn!("Cron engine already running");
                return;
            }
            live.running = true;
        }

        for job in jobs.iter().filter(|j| j.enabled) {
            self.arm(job).await;
        }
        info!(
            "Cron engine started with {} jobs ({} armed)",
            jobs.len(),
            self.armed_count().await
        );
    }

    /// Cancel every live timer. Safe to call more than once.
    pub async fn stop(&self) {
        let mut live = self.inner.live.lock().await;
        let was_running = live.running;
        live.running = false;
        let cancelled = live.disarm_all();
        if was_running {
            info!("Cron engine stopped ({} timers cancelled)", cancelled);
        }
    }

    pub async fn add_job(&self, job: &CronJob) {
        if job.enabled {
            self.arm(job).await;
        }
        self.inner.events.publish(CronEvent::Added {
            job_id: job.id.clone(),
        });
    }

    pub async fn remove_job(&self, id: &str) {
        if self.inner.live.lock().await.disarm(id) {
            debug!(job_id = %id, "disarmed");
        }
        self.inner.events.publish(CronEvent::Removed {
            job_id: id.to_string(),
        });
    }

    /// Replace whatever is armed for `job.id` with the new state.
    pub async fn update_job(&self, job: &CronJob) {
        self.inner.live.lock().await.disarm(&job.id);
        if job.enabled {
            self.arm(job).await;
        }
        self.inner.events.publish(CronEvent::Updated {
            job_id: job.id.clone(),
        });
    }

    /// Next fire of a live cron job. Interval and once jobs have no watcher
    /// and report `None`.
    pub async fn next_run(&self, id: &str) -> Option<DateTime<Utc>> {
        let live = self.inner.live.lock().await;
        live.watchers
            .get(id)
            .and_then(|w| w.schedule.upcoming(Utc).next())
    }

    /// Earliest upcoming fire across all cron watchers.
    pub async fn next_wake(&self) -> Option<DateTime<Utc>> {
        let live = self.inner.live.lock().await;
        live.watchers
            .values()
            .filter_map(|w| w.schedule.upcoming(Utc).next())
            .min()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.live.lock().await.running
    }

    pub async fn is_armed(&self, id: &str) -> bool {
        let live = self.inner.live.lock().await;
        live.watchers.contains_key(id) || live.timers.contains_key(id)
    }

    pub async fn armed_count(&self) -> usize {
        let live = self.inner.live.lock().await;
        live.watchers.len() + live.timers.len()
    }

    async fn arm(&self, job: &CronJob) {
        let mut live = self.inner.live.lock().await;
        if !live.running {
            debug!(job_id = %job.id, "engine not running, deferring arm");
            return;
        }
        live.disarm(&job.id);
        let trigger = match job.trigger() {
            Ok(trigger) => trigger,
            Err(e) => {
                drop(live);
                self.arming_failed(job, &e.to_string());
                return;
            }
        };
        let generation = live.next_generation();

        match trigger {
            Trigger::Interval(period) => {
                let handle = tokio::spawn(self.clone().run_interval(job.id.clone(), period));
                live.timers
                    .insert(job.id.clone(), TimerHandle { generation, handle });
                info!(job_id = %job.id, "Armed interval job {} every {:?}", job.name, period);
            }
            Trigger::Once(at) => {
                let delay = match (at - Utc::now()).to_std() {
                    Ok(delay) if !delay.is_zero() => delay,
                    _ => {
                        drop(live);
                        self.lapse(job, at).await;
                        return;
                    }
                };
                let handle =
                    tokio::spawn(self.clone().run_once(job.id.clone(), at, delay, generation));
                live.timers
                    .insert(job.id.clone(), TimerHandle { generation, handle });
                info!(
                    job_id = %job.id,
                    "Armed one-shot job {} for {}",
                    job.name,
                    format_timestamp(&at)
                );
            }
            Trigger::Cron(expr) => match Schedule::from_str(&expr) {
                Ok(schedule) => {
                    let handle = tokio::spawn(self.clone().run_cadence(
                        job.id.clone(),
                        schedule.clone(),
                        generation,
                    ));
                    live.watchers.insert(
                        job.id.clone(),
                        CronWatcher {
                            generation,
                            schedule,
                            handle,
                        },
                    );
                    info!(job_id = %job.id, "Armed cron job {} ({})", job.name, expr);
                }
                Err(e) => {
                    drop(live);
                    self.arming_failed(job, &e.to_string());
                }
            },
        }
    }

    /// Leaves the job enabled but unarmed.
    fn arming_failed(&self, job: &CronJob, reason: &str) {
        let message = format!(
            "failed to arm job \"{}\" with schedule \"{}\": {}",
            job.name, job.schedule, reason
        );
        warn!(job_id = %job.id, "{}", message);
        self.inner.events.publish(CronEvent::Error {
            job_id: job.id.clone(),
            message,
        });
    }

    /// A one-shot whose instant passed while nothing was armed.
    async fn lapse(&self, job: &CronJob, at: DateTime<Utc>) {
        let message = format!(
            "one-shot job \"{}\" was scheduled for {}, which has already passed",
            job.name,
            format_timestamp(&at)
        );
        warn!(job_id = %job.id, "{}", message);
        let err = message.clone();
        self.record(&job.id, move |j| {
            j.enabled = false;
            j.last_status = Some(JobStatus::Error);
            j.last_error = Some(err);
            j.next_run_at = None;
        })
        .await;
        self.inner.events.publish(CronEvent::Error {
            job_id: job.id.clone(),
            message,
        });
    }

    async fn run_interval(self, id: String, period: Duration) {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.dispatch(&id).await;
        }
    }

    async fn run_once(self, id: String, at: DateTime<Utc>, delay: Duration, generation: u64) {
        time::sleep(delay).await;
        {
            let mut live = self.inner.live.lock().await;
            if live
                .timers
                .get(&id)
                .is_some_and(|t| t.generation == generation)
            {
                live.timers.remove(&id);
            }
        }
        let engine = self.clone();
        tokio::spawn(async move {
            engine.execute(&id).await;
            engine.retire_once(&id, at).await;
        });
    }

    async fn run_cadence(self, id: String, schedule: Schedule, generation: u64) {
        let mut cursor = Utc::now();
        loop {
            let Some(next) = schedule.after(&cursor).next() else {
                debug!(job_id = %id, "cron schedule has no upcoming fire");
                let mut live = self.inner.live.lock().await;
                if live
                    .watchers
                    .get(&id)
                    .is_some_and(|w| w.generation == generation)
                {
                    live.watchers.remove(&id);
                }
                return;
            };
            let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            time::sleep(delay).await;
            self.dispatch(&id).await;
            cursor = next.max(Utc::now());
        }
    }

    /// Run one execution as its own task and wait for it, so that aborting
    /// the calling timer does not abort the execution.
    async fn dispatch(&self, id: &str) {
        let engine = self.clone();
        let id = id.to_string();
        if let Err(e) = tokio::spawn(async move { engine.execute(&id).await }).await {
            error!("Cron execution task failed: {}", e);
        }
    }

    async fn execute(&self, id: &str) {
        let job = {
            let mut store = self.inner.store.lock().await;
            store.get(id)
        };
        let Some(job) = job.filter(|j| j.enabled) else {
            debug!(job_id = %id, "job gone or disabled, skipping fire");
            return;
        };

        self.record(id, |j| j.last_status = Some(JobStatus::Running))
            .await;
        self.inner.events.publish(CronEvent::Fired {
            job_id: job.id.clone(),
        });
        info!("Executing cron job: {} ({})", job.name, job.id);

        let result = self
            .inner
            .sink
            .deliver(Delivery {
                job_id: job.id.clone(),
                job_name: job.name.clone(),
                payload: job.payload.clone(),
            })
            .await;
        let now = Utc::now();

        match result {
            Ok(()) => {
                let next = self.next_run(id).await;
                self.record(id, move |j| {
                    j.last_run_at = Some(now);
                    j.last_status = Some(JobStatus::Success);
                    j.last_error = None;
                    j.run_count += 1;
                    j.next_run_at = next;
                })
                .await;
                self.inner.events.publish(CronEvent::Fired {
                    job_id: job.id.clone(),
                });
            }
            Err(e) => {
                let message = format!("{e:#}");
                warn!(job_id = %job.id, "Cron job {} failed: {}", job.name, message);
                let err = message.clone();
                self.record(id, move |j| {
                    j.last_run_at = Some(now);
                    j.last_status = Some(JobStatus::Error);
                    j.last_error = Some(err);
                    j.run_count += 1;
                })
                .await;
                self.inner.events.publish(CronEvent::Error {
                    job_id: job.id.clone(),
                    message,
                });
            }
        }
    }

    /// Disable a one-shot after its fire at `at`. A job rescheduled while the
    /// execution was in flight keeps its new schedule and timer.
    async fn retire_once(&self, id: &str, at: DateTime<Utc>) {
        let fired = format_timestamp(&at);
        let mut retired = false;
        self.record(id, |j| {
            if j.kind == ScheduleKind::Once && j.schedule == fired {
                j.enabled = false;
                j.next_run_at = None;
                retired = true;
            }
        })
        .await;
        if !retired {
            debug!(job_id = %id, "one-shot was rescheduled during its run, not retiring");
        } else {
            self.inner.events.publish(CronEvent::Updated {
                job_id: id.to_string(),
            });
        }
    }

    /// Read-modify-write one job under the store lock. Returns whether the
    /// job still existed and the write succeeded.
    async fn record<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut CronJob),
    {
        let mut store = self.inner.store.lock().await;
        match store.update(id, f) {
            Ok(updated) => updated.is_some(),
            Err(e) => {
                error!(job_id = %id, "Failed to save cron store: {}", e);
                false
            }
        }
    }
}
