//! Scheduled job definitions.
//!
//! Defines the [`Schedule`] algebra inputs, the [`JobPayload`] a job carries,
//! and the in-memory [`ScheduledJob`] record together with its conversion to
//! and from the persisted [`JobRecord`] layout.

use crate::error::{PresenceError, Result};
use crate::storage::JobRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

/// When a job should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Run once at a fixed instant.
    Once {
        #[serde(rename = "executeAt")]
        execute_at: DateTime<Utc>,
    },
    /// Run every `interval_ms`, anchored at the last run (or `start_at`).
    Interval {
        #[serde(rename = "intervalMs")]
        interval_ms: u64,
        #[serde(rename = "startAt", default, skip_serializing_if = "Option::is_none")]
        start_at: Option<DateTime<Utc>>,
    },
    /// Run on a cron expression evaluated in the scheduler's timezone.
    Cron {
        #[serde(rename = "cronExpression")]
        expression: String,
    },
    /// Run after exponentially distributed delays with the given mean.
    Exponential {
        #[serde(rename = "meanIntervalMs")]
        mean_interval_ms: u64,
    },
}

impl Schedule {
    /// Persisted discriminator.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Once { .. } => "once",
            Self::Interval { .. } => "interval",
            Self::Cron { .. } => "cron",
            Self::Exponential { .. } => "exponential",
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Once { execute_at } => write!(f, "once at {}", execute_at.to_rfc3339()),
            Self::Interval { interval_ms, .. } => {
                let secs = interval_ms / 1000;
                if secs >= 3600 && secs % 3600 == 0 {
                    write!(f, "every {} hours", secs / 3600)
                } else if secs >= 60 && secs % 60 == 0 {
                    write!(f, "every {} minutes", secs / 60)
                } else {
                    write!(f, "every {interval_ms} ms")
                }
            }
            Self::Cron { expression } => write!(f, "cron '{expression}'"),
            Self::Exponential { mean_interval_ms } => {
                write!(f, "randomly, about every {} minutes", mean_interval_ms / 60_000)
            }
        }
    }
}

/// What a job does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    /// Deliver free text to the agent.
    Reminder { content: String },
    /// Emit an activity digest while watching.
    ActivityTick,
    /// Possibly promote the agent into watching.
    PromotionTick,
    /// Re-evaluate sleep-window membership.
    SleepWindowTick,
}

impl JobPayload {
    #[must_use]
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Reminder { .. } => PayloadKind::Reminder,
            Self::ActivityTick => PayloadKind::ActivityTick,
            Self::PromotionTick => PayloadKind::PromotionTick,
            Self::SleepWindowTick => PayloadKind::SleepWindowTick,
        }
    }
}

/// Payload discriminator, used to key job handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Reminder,
    ActivityTick,
    PromotionTick,
    SleepWindowTick,
}

impl PayloadKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reminder => "reminder",
            Self::ActivityTick => "activity_tick",
            Self::PromotionTick => "promotion_tick",
            Self::SleepWindowTick => "sleep_window_tick",
        }
    }
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for [`Scheduler::add_job`](super::Scheduler::add_job).
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Unique job name.
    pub name: String,
    /// When the job fires.
    pub schedule: Schedule,
    /// What the job does when it fires.
    pub payload: JobPayload,
    /// Disabled jobs are stored but never armed.
    pub enabled: bool,
}

/// A job known to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// Random UUID assigned on creation.
    pub id: String,
    /// Unique across all jobs.
    pub name: String,
    /// When the job fires.
    pub schedule: Schedule,
    /// What the job does when it fires.
    pub payload: JobPayload,
    /// Disabled jobs are kept but never armed. One-shot jobs disable
    /// themselves after firing.
    pub enabled: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last time the job fired, if ever.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Next planned fire. `None` means the job is dormant.
    pub next_run_at: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    /// Encode into the persisted record layout.
    pub fn to_record(&self) -> Result<JobRecord> {
        let (schedule_type, schedule_data) = split_tagged(&self.schedule)?;
        let (payload_type, payload_data) = split_tagged(&self.payload)?;
        Ok(JobRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            schedule_type,
            schedule_data,
            payload_type,
            payload_data,
            enabled: self.enabled,
            created_at: self.created_at,
            last_run_at: self.last_run_at,
            next_run_at: self.next_run_at,
        })
    }

    /// Decode a persisted record, failing loudly on unknown or malformed blobs.
    pub fn from_record(record: JobRecord) -> Result<Self> {
        let corrupt = |reason: String| PresenceError::CorruptJob {
            id: record.id.clone(),
            reason,
        };
        let schedule: Schedule = join_tagged(&record.schedule_type, &record.schedule_data)
            .map_err(|e| corrupt(format!("schedule '{}': {e}", record.schedule_type)))?;
        let payload: JobPayload = join_tagged(&record.payload_type, &record.payload_data)
            .map_err(|e| corrupt(format!("payload '{}': {e}", record.payload_type)))?;

        Ok(Self {
            id: record.id,
            name: record.name,
            schedule,
            payload,
            enabled: record.enabled,
            created_at: record.created_at,
            last_run_at: record.last_run_at,
            next_run_at: record.next_run_at,
        })
    }
}

/// Split an internally tagged value into `(type, data-json)`.
fn split_tagged<T: Serialize>(value: &T) -> Result<(String, String)> {
    let mut json = serde_json::to_value(value)
        .map_err(|e| PresenceError::Scheduler(format!("cannot serialize job field: {e}")))?;
    let object = json
        .as_object_mut()
        .ok_or_else(|| PresenceError::Scheduler("tagged value is not an object".to_owned()))?;
    let kind = match object.remove("type") {
        Some(serde_json::Value::String(kind)) => kind,
        _ => return Err(PresenceError::Scheduler("tagged value has no type".to_owned())),
    };
    Ok((kind, json.to_string()))
}

/// Inverse of [`split_tagged`].
fn join_tagged<T: DeserializeOwned>(kind: &str, data: &str) -> std::result::Result<T, String> {
    let mut json: serde_json::Value = serde_json::from_str(data).map_err(|e| e.to_string())?;
    let object = json
        .as_object_mut()
        .ok_or_else(|| "data is not a JSON object".to_owned())?;
    object.insert("type".to_owned(), serde_json::Value::String(kind.to_owned()));
    serde_json::from_value(json).map_err(|e| e.to_string())
}
