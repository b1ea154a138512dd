use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::error::{CronError, Result};
use super::schedule;

pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Cron,
    Interval,
    Once,
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleKind::Cron => "cron",
            ScheduleKind::Interval => "interval",
            ScheduleKind::Once => "once",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScheduleKind {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cron" => Ok(ScheduleKind::Cron),
            "interval" | "every" => Ok(ScheduleKind::Interval),
            "once" | "at" => Ok(ScheduleKind::Once),
            other => Err(CronError::Validation(format!(
                "unknown schedule type \"{other}\" (expected cron, interval or once)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Error,
    Running,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Success => "success",
            JobStatus::Error => "error",
            JobStatus::Running => "running",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    #[serde(rename = "scheduleKind")]
    pub kind: ScheduleKind,
    #[serde(rename = "scheduleSpec")]
    pub schedule: String,
    #[serde(rename = "intervalMs", default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    pub payload: String,
    pub enabled: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "lastRunAt", default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastStatus", default)]
    pub last_status: Option<JobStatus>,
    #[serde(rename = "lastError", default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(rename = "runCount", default)]
    pub run_count: u64,
    #[serde(rename = "nextRunAt", default)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CronJob {
    /// Rebuild the runtime trigger from the persisted schedule fields.
    ///
    /// Unlike creation-time validation this never rejects a lapsed `Once`
    /// instant; the engine decides what to do with it.
    pub fn trigger(&self) -> Result<Trigger> {
        match self.kind {
            ScheduleKind::Cron => Ok(Trigger::Cron(self.schedule.clone())),
            ScheduleKind::Interval => {
                let ms = match self.interval_ms {
                    Some(ms) => ms,
                    None => schedule::parse_interval(&self.schedule).ok_or_else(|| {
                        CronError::Validation(format!("invalid interval \"{}\"", self.schedule))
                    })?,
                };
                if ms == 0 {
                    return Err(CronError::Validation(
                        "interval must be greater than zero".to_string(),
                    ));
                }
                Ok(Trigger::Interval(Duration::from_millis(ms)))
            }
            ScheduleKind::Once => schedule::parse_timestamp(&self.schedule).map(Trigger::Once),
        }
    }
}

/// Normalized, engine-usable form of a schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// 6-field cron expression, seconds first.
    Cron(String),
    Interval(Duration),
    Once(DateTime<Utc>),
}

impl Trigger {
    pub fn kind(&self) -> ScheduleKind {
        match self {
            Trigger::Cron(_) => ScheduleKind::Cron,
            Trigger::Interval(_) => ScheduleKind::Interval,
            Trigger::Once(_) => ScheduleKind::Once,
        }
    }
}

/// Partial update applied by `CronService::update`.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub name: Option<String>,
    pub schedule: Option<String>,
    pub payload: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

impl JobPatch {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.schedule.is_none()
            && self.payload.is_none()
            && self.description.is_none()
            && self.enabled.is_none()
    }
}

/// Creation request accepted by `CronService::create`.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub schedule: String,
    /// Declared type; inferred from the schedule string when absent.
    pub kind: Option<ScheduleKind>,
    pub payload: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronStoreData {
    pub jobs: Vec<CronJob>,
    pub version: u32,
}
