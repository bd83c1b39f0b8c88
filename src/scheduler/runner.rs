//! Job scheduler.
//!
//! Keeps the in-memory job map, the persisted job rows and the armed timers
//! in lockstep. Timers are plain deadlines; the owner sleeps until
//! [`Scheduler::next_deadline`] and then calls [`Scheduler::run_due`], so all
//! firing happens on the owner's task and tests can drive a virtual clock.

use crate::clock::Clock;
use crate::error::{PresenceError, Result};
use crate::scheduler::compute::{compute_next_run_at, is_repeating_schedule};
use crate::scheduler::types::{NewJob, PayloadKind, ScheduledJob};
use crate::storage::{JobUpdate, Persistence};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Work performed when a job of a given payload kind fires.
///
/// Errors are logged by the scheduler and never affect rescheduling.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &ScheduledJob) -> anyhow::Result<()>;
}

/// Persistence-backed job scheduler.
pub struct Scheduler {
    store: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    /// Known jobs by id.
    jobs: HashMap<String, ScheduledJob>,
    /// Armed timers: job id to fire time.
    timers: HashMap<String, DateTime<Utc>>,
    handlers: HashMap<PayloadKind, Arc<dyn JobHandler>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Persistence>, clock: Arc<dyn Clock>, timezone: Tz) -> Self {
        Self {
            store,
            clock,
            timezone,
            jobs: HashMap::new(),
            timers: HashMap::new(),
            handlers: HashMap::new(),
        }
    }

    /// Bind the handler for one payload kind, replacing any previous one.
    pub fn register_handler(&mut self, kind: PayloadKind, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Load every enabled job, recompute its next run and arm it.
    ///
    /// Stored `next_run_at` values are never trusted. One-shot jobs that
    /// came due while the process was down are disabled, not fired. A
    /// corrupt job row fails the whole call.
    pub async fn initialize(&mut self) -> Result<()> {
        let now = self.clock.now();
        let records = self.store.list_enabled_jobs().await?;
        let mut loaded = Vec::with_capacity(records.len());
        for record in records {
            loaded.push(ScheduledJob::from_record(record)?);
        }

        for mut job in loaded {
            let next = compute_next_run_at(&job.schedule, now, job.last_run_at, self.timezone);
            job.next_run_at = next;
            let mut update = JobUpdate {
                next_run_at: Some(next),
                ..JobUpdate::default()
            };

            match next {
                Some(at) => {
                    self.timers.insert(job.id.clone(), at);
                    debug!(job = %job.name, job_id = %job.id, next_run_at = %at, "job armed");
                }
                None if !is_repeating_schedule(&job.schedule) => {
                    warn!(job = %job.name, job_id = %job.id, "one-shot job overdue after restart; disabling");
                    job.enabled = false;
                    update.enabled = Some(false);
                }
                None => {
                    warn!(
                        job = %job.name,
                        job_id = %job.id,
                        schedule = %job.schedule,
                        "job has no next occurrence and will stay dormant"
                    );
                }
            }

            self.store.update_job(&job.id, &update).await?;
            self.jobs.insert(job.id.clone(), job);
        }

        info!(
            jobs = self.jobs.len(),
            armed = self.timers.len(),
            "scheduler initialized"
        );
        Ok(())
    }

    /// Create, persist and (if enabled) arm a new job.
    pub async fn add_job(&mut self, new: NewJob) -> Result<ScheduledJob> {
        if self.find_job_by_name(&new.name).is_some() {
            return Err(PresenceError::Validation(format!(
                "a job named '{}' already exists",
                new.name
            )));
        }

        let now = self.clock.now();
        let next_run_at = if new.enabled {
            compute_next_run_at(&new.schedule, now, None, self.timezone)
        } else {
            None
        };
        let job = ScheduledJob {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            schedule: new.schedule,
            payload: new.payload,
            enabled: new.enabled,
            created_at: now,
            last_run_at: None,
            next_run_at,
        };

        self.store.create_job(&job.to_record()?).await?;
        info!(job = %job.name, job_id = %job.id, schedule = %job.schedule, "job added");
        if job.enabled && next_run_at.is_none() {
            warn!(job = %job.name, job_id = %job.id, "new job has no next occurrence");
        }
        self.arm(&job);
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    /// Delete a job and cancel its timer. Returns `false` if it was unknown.
    pub async fn remove_job(&mut self, id: &str) -> Result<bool> {
        self.timers.remove(id);
        let known = self.jobs.remove(id).is_some();
        let deleted = self.store.delete_job(id).await?;
        if known || deleted {
            info!(job_id = %id, "job removed");
        }
        Ok(known || deleted)
    }

    /// Enable (recompute and arm) or disable (cancel timer, keep record) a job.
    pub async fn set_job_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        let now = self.clock.now();
        let timezone = self.timezone;
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| PresenceError::Scheduler(format!("unknown job '{id}'")))?;

        let update = if enabled {
            let next = compute_next_run_at(&job.schedule, now, job.last_run_at, timezone);
            job.enabled = true;
            job.next_run_at = next;
            JobUpdate {
                enabled: Some(true),
                next_run_at: Some(next),
                ..JobUpdate::default()
            }
        } else {
            job.enabled = false;
            JobUpdate {
                enabled: Some(false),
                ..JobUpdate::default()
            }
        };

        let job = job.clone();
        self.timers.remove(id);
        self.arm(&job);
        debug!(job = %job.name, job_id = %id, enabled, "job enablement changed");
        self.store.update_job(id, &update).await?;
        Ok(())
    }

    /// Return the job named `new.name`, adopting a persisted row (even a
    /// disabled one) before creating a fresh job.
    pub async fn ensure_job(&mut self, new: NewJob) -> Result<ScheduledJob> {
        if let Some(job) = self.find_job_by_name(&new.name) {
            return Ok(job.clone());
        }

        if let Some(record) = self.store.find_job_by_name(&new.name).await? {
            let mut job = ScheduledJob::from_record(record)?;
            if job.enabled {
                job.next_run_at = compute_next_run_at(
                    &job.schedule,
                    self.clock.now(),
                    job.last_run_at,
                    self.timezone,
                );
                self.store
                    .update_job(
                        &job.id,
                        &JobUpdate {
                            next_run_at: Some(job.next_run_at),
                            ..JobUpdate::default()
                        },
                    )
                    .await?;
                self.arm(&job);
            }
            debug!(job = %job.name, job_id = %job.id, "adopted persisted job");
            self.jobs.insert(job.id.clone(), job.clone());
            return Ok(job);
        }

        self.add_job(new).await
    }

    #[must_use]
    pub fn get_job(&self, id: &str) -> Option<&ScheduledJob> {
        self.jobs.get(id)
    }

    #[must_use]
    pub fn find_job_by_name(&self, name: &str) -> Option<&ScheduledJob> {
        self.jobs.values().find(|job| job.name == name)
    }

    /// All known jobs, oldest first.
    #[must_use]
    pub fn list_jobs(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<_> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        jobs
    }

    #[must_use]
    pub fn is_armed(&self, id: &str) -> bool {
        self.timers.contains_key(id)
    }

    /// Earliest armed deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.values().min().copied()
    }

    /// Fire every armed job whose deadline has passed, earliest first.
    ///
    /// Returns the number of jobs whose handler was dispatched. Bookkeeping
    /// failures of one job are logged and do not stop the others.
    pub async fn run_due(&mut self) -> usize {
        let now = self.clock.now();
        let mut due: Vec<(DateTime<Utc>, String)> = self
            .timers
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, at)| (*at, id.clone()))
            .collect();
        due.sort();

        let mut fired = 0;
        for (_, id) in due {
            // An earlier handler may have cancelled or re-armed this job.
            if !self.timers.get(&id).is_some_and(|at| *at <= now) {
                continue;
            }
            match self.execute_job(&id).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => {
                    // The handler ran before persistence failed.
                    error!(job_id = %id, "job bookkeeping failed: {e}");
                    fired += 1;
                }
            }
        }
        fired
    }

    /// Run one job now and reschedule or retire it.
    ///
    /// Returns `false` without touching the job when it is disabled or gone.
    pub async fn execute_job(&mut self, id: &str) -> Result<bool> {
        self.timers.remove(id);
        let job = match self.jobs.get(id) {
            Some(job) if job.enabled => job.clone(),
            Some(_) => {
                debug!(job_id = %id, "skipping disabled job");
                return Ok(false);
            }
            None => {
                debug!(job_id = %id, "skipping removed job");
                return Ok(false);
            }
        };

        let now = self.clock.now();
        let kind = job.payload.kind();
        debug!(job = %job.name, job_id = %id, payload = %kind, "firing job");
        match self.handlers.get(&kind).cloned() {
            Some(handler) => {
                if let Err(e) = handler.handle(&job).await {
                    error!(job = %job.name, job_id = %id, "job handler failed: {e:#}");
                }
            }
            None => warn!(job = %job.name, job_id = %id, payload = %kind, "no handler registered"),
        }

        let update = if is_repeating_schedule(&job.schedule) {
            let next = compute_next_run_at(&job.schedule, now, Some(now), self.timezone);
            if next.is_none() {
                warn!(job = %job.name, job_id = %id, "job has no next occurrence and will stay dormant");
            }
            JobUpdate {
                last_run_at: Some(Some(now)),
                next_run_at: Some(next),
                ..JobUpdate::default()
            }
        } else {
            JobUpdate {
                enabled: Some(false),
                last_run_at: Some(Some(now)),
                next_run_at: Some(None),
            }
        };

        if let Some(current) = self.jobs.get_mut(id) {
            current.last_run_at = Some(now);
            if let Some(next) = update.next_run_at {
                current.next_run_at = next;
            }
            if let Some(enabled) = update.enabled {
                current.enabled = enabled;
            }
            let current = current.clone();
            self.arm(&current);
        }
        self.store.update_job(id, &update).await?;
        Ok(true)
    }

    /// Cancel every armed timer. Idempotent.
    pub fn cleanup(&mut self) {
        if !self.timers.is_empty() {
            debug!(count = self.timers.len(), "cancelling scheduler timers");
        }
        self.timers.clear();
    }

    fn arm(&mut self, job: &ScheduledJob) {
        match (job.enabled, job.next_run_at) {
            (true, Some(at)) => {
                self.timers.insert(job.id.clone(), at);
                debug!(job = %job.name, job_id = %job.id, next_run_at = %at, "job armed");
            }
            _ => {
                self.timers.remove(&job.id);
            }
        }
    }
}
