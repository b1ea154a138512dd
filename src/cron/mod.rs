pub mod engine;
pub mod error;
pub mod events;
pub mod schedule;
pub mod store;
pub mod types;

pub use engine::{CronEngine, Delivery, ExecutionSink};
pub use error::CronError;
pub use events::CronEvent;
pub use types::{CronJob, JobPatch, NewJob, ScheduleKind};

use crate::config::AppConfig;
use chrono::{DateTime, Utc};
use engine::SharedStore;
use error::Result;
use events::EventHub;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::info;
use types::Trigger;

struct CronInner {
    store: SharedStore,
    engine: CronEngine,
    /// Held across a store write and the matching engine call, so the live
    /// timers are armed in the same order the store was written.
    ops: Mutex<()>,
}

/// Job management API: validates requests, persists them and keeps the
/// engine's live timers in step with the store.
#[derive(Clone)]
pub struct CronService {
    inner: Arc<CronInner>,
}

pub struct CronStatus {
    pub jobs: usize,
    pub enabled_jobs: usize,
    pub running: bool,
    /// Live timers; `None` when the engine is not running in this process.
    pub armed_jobs: Option<usize>,
    pub next_wake_at: Option<DateTime<Utc>>,
}

impl CronService {
    pub fn new(cfg: &AppConfig, sink: Arc<dyn ExecutionSink>) -> Self {
        let store: SharedStore = Arc::new(Mutex::new(store::CronStore::new(cfg.data_dir.clone())));
        let engine = CronEngine::new(store.clone(), sink, EventHub::new(cfg.event_capacity));
        Self {
            inner: Arc::new(CronInner {
                store,
                engine,
                ops: Mutex::new(()),
            }),
        }
    }

    pub async fn start(&self) {
        self.inner.engine.start().await;
    }

    pub async fn stop(&self) {
        self.inner.engine.stop().await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CronEvent> {
        self.inner.engine.subscribe()
    }

    /// Validate and persist a new job, then arm it. Nothing is written when
    /// validation fails.
    pub async fn create(&self, req: NewJob) -> Result<CronJob> {
        let now = Utc::now();
        let trigger = schedule::resolve(&req.schedule, req.kind, now)?;

        let payload = req.payload.trim().to_string();
        if payload.is_empty() {
            return Err(CronError::Validation("payload must not be empty".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let name = match req.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => format!("{}-{}", trigger.kind(), &id[..8]),
        };

        let job = CronJob {
            id,
            name,
            kind: trigger.kind(),
            schedule: schedule::spec_string(&trigger),
            interval_ms: interval_ms(&trigger),
            payload,
            enabled: true,
            created_at: now,
            last_run_at: None,
            last_status: None,
            last_error: None,
            run_count: 0,
            next_run_at: None,
            description: req
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
        };

        let _ops = self.inner.ops.lock().await;
        {
            let mut store = self.inner.store.lock().await;
            if store.has_job_with_name(&job.name) {
                return Err(CronError::DuplicateName(job.name));
            }
            store.add(job.clone())?;
        }
        info!("Added job: {} ({})", job.name, job.id);

        self.inner.engine.add_job(&job).await;
        Ok(job)
    }

    /// Delete a job and its timer. Unknown ids are not an error.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let _ops = self.inner.ops.lock().await;
        let removed = self.inner.store.lock().await.remove(id)?;
        if removed {
            self.inner.engine.remove_job(id).await;
            info!("Removed job: {}", id);
        }
        Ok(removed)
    }

    pub async fn enable(&self, id: &str) -> Result<CronJob> {
        self.update(id, JobPatch::enabled(true)).await
    }

    pub async fn disable(&self, id: &str) -> Result<CronJob> {
        self.update(id, JobPatch::enabled(false)).await
    }

    /// Apply a partial update and re-arm from the resulting state.
    ///
    /// The schedule kind never changes; a new schedule string is validated
    /// against the job's existing kind. Rescheduling a one-shot job enables it
    /// again unless the patch says otherwise.
    pub async fn update(&self, id: &str, patch: JobPatch) -> Result<CronJob> {
        let _ops = self.inner.ops.lock().await;
        let updated = {
            let mut store = self.inner.store.lock().await;
            let current = store
                .get(id)
                .ok_or_else(|| CronError::NotFound(id.to_string()))?;
            if patch.is_empty() {
                return Ok(current);
            }

            let mut next = current.clone();
            if let Some(name) = patch.name {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(CronError::Validation("name must not be empty".to_string()));
                }
                if name != current.name && store.jobs.iter().any(|j| j.id != id && j.name == name)
                {
                    return Err(CronError::DuplicateName(name));
                }
                next.name = name;
            }
            if let Some(payload) = patch.payload {
                let payload = payload.trim().to_string();
                if payload.is_empty() {
                    return Err(CronError::Validation("payload must not be empty".to_string()));
                }
                next.payload = payload;
            }
            if let Some(description) = patch.description {
                let description = description.trim().to_string();
                next.description = (!description.is_empty()).then_some(description);
            }
            if let Some(spec) = patch.schedule {
                let trigger = schedule::resolve(&spec, Some(current.kind), Utc::now())?;
                next.schedule = schedule::spec_string(&trigger);
                next.interval_ms = interval_ms(&trigger);
                if current.kind == ScheduleKind::Once && patch.enabled.is_none() {
                    next.enabled = true;
                }
            }
            if let Some(enabled) = patch.enabled {
                next.enabled = enabled;
            }

            store
                .update(id, |j| *j = next)?
                .ok_or_else(|| CronError::NotFound(id.to_string()))?
        };

        self.inner.engine.update_job(&updated).await;
        info!("Updated job: {} ({})", updated.name, updated.id);

        // Arming may have changed the record (a lapsed one-shot is disabled).
        Ok(self.get(id).await.unwrap_or(updated))
    }

    pub async fn get(&self, id: &str) -> Result<CronJob> {
        self.inner
            .store
            .lock()
            .await
            .get(id)
            .ok_or_else(|| CronError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<CronJob> {
        self.inner.store.lock().await.all()
    }

    /// Remove every disabled job. Returns how many were removed.
    pub async fn cleanup(&self) -> Result<usize> {
        let _ops = self.inner.ops.lock().await;
        let removed = self.inner.store.lock().await.remove_disabled()?;
        for job in &removed {
            self.inner.engine.remove_job(&job.id).await;
        }
        if !removed.is_empty() {
            info!("Cleaned up {} disabled jobs", removed.len());
        }
        Ok(removed.len())
    }

    pub async fn next_run(&self, id: &str) -> Option<DateTime<Utc>> {
        self.inner.engine.next_run(id).await
    }

    /// Job counts plus the next cron wake. A running engine reports its live
    /// watchers; otherwise the next wake is worked out from the enabled cron
    /// jobs in the store.
    pub async fn status(&self) -> CronStatus {
        let jobs = self.list().await;
        let engine = &self.inner.engine;
        let running = engine.is_running().await;
        let (armed_jobs, next_wake_at) = if running {
            (Some(engine.armed_count().await), engine.next_wake().await)
        } else {
            let now = Utc::now();
            let next = jobs
                .iter()
                .filter(|j| j.enabled && j.kind == ScheduleKind::Cron)
                .filter_map(|j| schedule::next_cron_fire(&j.schedule, now))
                .min();
            (None, next)
        };
        CronStatus {
            jobs: jobs.len(),
            enabled_jobs: jobs.iter().filter(|j| j.enabled).count(),
            running,
            armed_jobs,
            next_wake_at,
        }
    }

    #[cfg(test)]
    pub(crate) fn engine(&self) -> &CronEngine {
        &self.inner.engine
    }
}

fn interval_ms(trigger: &Trigger) -> Option<u64> {
    match trigger {
        Trigger::Interval(period) => u64::try_from(period.as_millis()).ok(),
        _ => None,
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
