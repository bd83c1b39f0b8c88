//! Lifecycle controller.
//!
//! The imperative shell around [`reduce`]: it loads and persists state,
//! translates inputs into [`LifeEvent`]s, applies the resulting outputs to an
//! [`OutputHandler`], keeps the standing system jobs enabled or disabled to
//! match the current mode, and owns reminder CRUD.
//!
//! The controller is not `Sync`-shared; callers serialize access by owning it
//! (see [`crate::lifecycle::runtime`]). Job handlers never call back into it:
//! system-job fires arrive as [`SystemTick`]s and are drained in
//! [`LifecycleController::run_due_jobs`].

use crate::clock::Clock;
use crate::config::{LifecycleConfig, PresenceConfig};
use crate::error::{PresenceError, Result};
use crate::lifecycle::reducer::reduce;
use crate::lifecycle::types::{
    AgentMode, ChannelId, LifeEvent, LifeOutput, LifeState, MessageId, UnreadSummaryWithDetails,
    UserId,
};
use crate::lifecycle::window::SleepWindow;
use crate::scheduler::compute::{is_past_time, parse_cron};
use crate::scheduler::{
    JobPayload, NewJob, PayloadKind, ReminderJobHandler, Schedule, ScheduledJob, Scheduler,
    SystemTick, TickForwarder,
};
use crate::storage::{MessageRecord, Persistence};
use crate::unread::{UnreadTracker, format_unread_summary};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Standing job emitting activity digests while watching.
pub const SYSTEM_ACTIVITY_TICK: &str = "system:activity_tick";
/// Standing job attempting random promotion while awake.
pub const SYSTEM_PROMOTION_TICK: &str = "system:promotion_tick";
/// Standing job re-evaluating the sleep window.
pub const SYSTEM_SLEEP_WINDOW_TICK: &str = "system:sleep_window_tick";

const REMINDER_NAME_PREFIX: &str = "reminder:";

/// Side-effect sink for lifecycle outputs. Calls are fire-and-forget.
pub trait OutputHandler: Send + Sync + 'static {
    fn on_watching_started(&self, channel_id: &ChannelId);
    fn on_watching_ended(&self);
    fn on_focus_message(&self, channel_id: &ChannelId, message_id: &MessageId);
    fn on_activity_digest(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        summary: &[UnreadSummaryWithDetails],
    );
    /// Deliver free text to the agent.
    fn send_to_agent(&self, text: &str);
}

/// Output handler that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOutputHandler;

impl OutputHandler for TracingOutputHandler {
    fn on_watching_started(&self, channel_id: &ChannelId) {
        info!(focus = %channel_id, "watching started");
    }

    fn on_watching_ended(&self) {
        info!("watching ended");
    }

    fn on_focus_message(&self, channel_id: &ChannelId, message_id: &MessageId) {
        info!(channel = %channel_id, message = %message_id, "focus message");
    }

    fn on_activity_digest(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        summary: &[UnreadSummaryWithDetails],
    ) {
        let unread: usize = summary.iter().map(|s| s.unread_count).sum();
        info!(
            start = %window_start,
            end = %window_end,
            channels = summary.len(),
            unread,
            "activity digest"
        );
    }

    fn send_to_agent(&self, text: &str) {
        info!(target: "presence::agent", "{text}");
    }
}

/// Owns the presence state and everything that drives it.
///
/// Events go through the pure reducer and the resulting outputs are
/// dispatched to the [`OutputHandler`]. The controller also owns the
/// scheduler, the unread ledger, and the system jobs that produce
/// activity, promotion, and sleep-window ticks.
pub struct LifecycleController {
    /// Current lifecycle state.
    state: LifeState,
    config: LifecycleConfig,
    /// Zone for the sleep window and reminder stamps.
    timezone: Tz,
    window: SleepWindow,
    store: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
    /// Receives every reducer output.
    handler: Arc<dyn OutputHandler>,
    scheduler: Scheduler,
    unread: UnreadTracker,
    /// Ticks forwarded from system jobs, drained after each fire.
    tick_rx: mpsc::UnboundedReceiver<SystemTick>,
    /// Whether the last window check found the clock inside the sleep window.
    in_sleep_window: bool,
    /// Sleep deferred until watching ends.
    sleep_pending: bool,
    /// Start of the current activity digest window.
    activity_window_start: Option<DateTime<Utc>>,
}

impl LifecycleController {
    /// Build a controller. Nothing is loaded until [`initialize`](Self::initialize).
    pub fn new(
        config: &PresenceConfig,
        store: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
        handler: Arc<dyn OutputHandler>,
    ) -> Result<Self> {
        config.validate()?;
        let timezone = config.scheduler.tz()?;
        let window = config.lifecycle.sleep_window()?;

        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let forwarder = Arc::new(TickForwarder::new(tick_tx));
        let mut scheduler = Scheduler::new(store.clone(), clock.clone(), timezone);
        scheduler.register_handler(PayloadKind::ActivityTick, forwarder.clone());
        scheduler.register_handler(PayloadKind::PromotionTick, forwarder.clone());
        scheduler.register_handler(PayloadKind::SleepWindowTick, forwarder);
        scheduler.register_handler(
            PayloadKind::Reminder,
            Arc::new(ReminderJobHandler::new(
                handler.clone(),
                clock.clone(),
                timezone,
            )),
        );

        Ok(Self {
            state: LifeState::off(),
            config: config.lifecycle.clone(),
            timezone,
            window,
            unread: UnreadTracker::new(store.clone(), clock.clone()),
            store,
            clock,
            handler,
            scheduler,
            tick_rx,
            in_sleep_window: false,
            sleep_pending: false,
            activity_window_start: None,
        })
    }

    /// Restore state, reconcile it with the sleep window, recover jobs and
    /// make sure the standing system jobs exist.
    pub async fn initialize(&mut self) -> Result<()> {
        let now = self.clock.now();
        if let Some(saved) = self.store.load_life_state().await? {
            self.state = saved;
        }
        self.in_sleep_window = self.window.contains(now, self.timezone);
        info!(
            mode = %self.state.mode,
            in_sleep_window = self.in_sleep_window,
            "restoring lifecycle state"
        );
        self.reconcile_sleep_window();

        self.scheduler.initialize().await?;
        self.ensure_system_jobs().await?;
        self.update_system_job_states().await?;
        self.save_state().await
    }

    /// Handle an incoming chat message.
    pub async fn on_external_message(
        &mut self,
        channel_id: ChannelId,
        message_id: MessageId,
        author_id: UserId,
        guild_id: &str,
        is_mention_or_reply: bool,
    ) -> Result<()> {
        let prev_mode = self.state.mode;
        self.dispatch(LifeEvent::DiscordMessage {
            channel_id: channel_id.clone(),
            message_id: message_id.clone(),
            author_id,
            is_mention_or_reply,
        });

        let on_focus = self.state.is_focus(&channel_id);
        if !on_focus && !is_mention_or_reply {
            self.unread
                .add_unread(&channel_id, &message_id, guild_id)
                .await?;
        }

        if prev_mode != AgentMode::AwakeWatching
            && self.state.mode == AgentMode::AwakeWatching
            && is_mention_or_reply
        {
            self.handler.send_to_agent(&format!(
                "[Lifecycle] {} Switched to AWAKE_WATCHING. (focus: {channel_id})",
                self.local_time()
            ));
            self.send_unread_summary().await?;
        }

        if is_mention_or_reply || on_focus {
            self.unread.mark_read(&channel_id, &message_id).await?;
        }

        self.handle_sleep_pending();
        if prev_mode != self.state.mode {
            self.update_system_job_states().await?;
        }
        self.save_state().await
    }

    /// Archive a message's author and text for digests.
    pub async fn record_message(&mut self, message: MessageRecord) -> Result<()> {
        self.unread.record_message(&message).await
    }

    pub async fn set_not_watching(&mut self) -> Result<()> {
        let prev_mode = self.state.mode;
        self.dispatch(LifeEvent::SetNotWatching);
        self.handle_sleep_pending();
        self.save_state().await?;
        if prev_mode != self.state.mode {
            self.update_system_job_states().await?;
        }
        Ok(())
    }

    pub async fn set_focus_channel(&mut self, channel_id: ChannelId) -> Result<()> {
        self.dispatch(LifeEvent::SetFocusChannel { channel_id });
        self.save_state().await
    }

    /// The agent read a channel up to `last_message_id`.
    pub async fn on_channel_read(
        &mut self,
        channel_id: ChannelId,
        last_message_id: MessageId,
    ) -> Result<()> {
        self.unread.mark_read(&channel_id, &last_message_id).await
    }

    /// Schedule free text to be delivered to the agent.
    ///
    /// Invalid schedules are rejected before anything is persisted.
    pub async fn create_reminder(
        &mut self,
        content: String,
        schedule: Schedule,
    ) -> Result<ScheduledJob> {
        self.validate_reminder_schedule(&schedule)?;
        let job = self
            .scheduler
            .add_job(NewJob {
                name: format!("{REMINDER_NAME_PREFIX}{}", uuid::Uuid::new_v4()),
                schedule,
                payload: JobPayload::Reminder { content },
                enabled: true,
            })
            .await?;
        info!(job_id = %job.id, schedule = %job.schedule, "reminder created");
        Ok(job)
    }

    /// Enabled reminders, oldest first.
    #[must_use]
    pub fn list_reminders(&self) -> Vec<ScheduledJob> {
        self.scheduler
            .list_jobs()
            .into_iter()
            .filter(|job| job.enabled && matches!(job.payload, JobPayload::Reminder { .. }))
            .collect()
    }

    /// Delete a reminder. Returns `false` for unknown ids and non-reminder jobs.
    pub async fn delete_reminder(&mut self, id: &str) -> Result<bool> {
        match self.scheduler.get_job(id) {
            Some(job) if matches!(job.payload, JobPayload::Reminder { .. }) => {
                self.scheduler.remove_job(id).await
            }
            _ => Ok(false),
        }
    }

    #[must_use]
    pub fn get_state(&self) -> LifeState {
        self.state.clone()
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    #[must_use]
    pub fn unread(&self) -> &UnreadTracker {
        &self.unread
    }

    /// Earliest armed job deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.scheduler.next_deadline()
    }

    /// Fire every due job, then apply the system ticks they produced.
    pub async fn run_due_jobs(&mut self) -> Result<usize> {
        let fired = self.scheduler.run_due().await;
        while let Ok(tick) = self.tick_rx.try_recv() {
            self.handle_tick(tick).await?;
        }
        Ok(fired)
    }

    /// Cancel all timers. Safe before `initialize` and when repeated.
    pub fn cleanup(&mut self) {
        self.scheduler.cleanup();
    }

    // -----------------------------------------------------------------------
    // System jobs
    // -----------------------------------------------------------------------

    async fn handle_tick(&mut self, tick: SystemTick) -> Result<()> {
        match tick {
            SystemTick::Activity => self.handle_activity_tick().await,
            SystemTick::Promotion => self.handle_promotion_tick().await,
            SystemTick::SleepWindow => self.handle_sleep_window_tick().await,
        }
    }

    async fn handle_promotion_tick(&mut self) -> Result<()> {
        if self.state.mode != AgentMode::AwakeNotWatching {
            return Ok(());
        }

        let summary = self.unread.get_summary().await?;
        let focus_channel_id = summary
            .first()
            .map(|entry| entry.channel_id.clone())
            .unwrap_or_else(|| ChannelId::new(self.config.default_focus_channel.clone()));

        self.dispatch(LifeEvent::PromoteToWatching {
            focus_channel_id: focus_channel_id.clone(),
        });
        self.handler.send_to_agent(&format!(
            "[Lifecycle] {} Promoted to AWAKE_WATCHING. Start acting. (focus: {focus_channel_id})",
            self.local_time()
        ));
        if let Some(text) = format_unread_summary(&summary) {
            self.handler.send_to_agent(&text);
        }

        self.update_system_job_states().await?;
        self.save_state().await
    }

    async fn handle_activity_tick(&mut self) -> Result<()> {
        if self.state.mode != AgentMode::AwakeWatching {
            return Ok(());
        }

        let now = self.clock.now();
        let window_start = self.activity_window_start.unwrap_or(now);
        let elapsed_ms = (now - window_start).num_milliseconds().max(0);
        let elapsed_minutes = (elapsed_ms + 59_999) / 60_000;
        let lookback = elapsed_minutes.max(self.config.activity_min_lookback_minutes);

        let summary = self.unread.get_recent_with_details(lookback).await?;
        self.dispatch(LifeEvent::ActivityTick {
            window_start,
            window_end: now,
            summary,
        });
        self.activity_window_start = Some(now);
        self.save_state().await
    }

    async fn handle_sleep_window_tick(&mut self) -> Result<()> {
        let now = self.clock.now();
        let in_window = self.window.contains(now, self.timezone);
        if in_window != self.in_sleep_window {
            info!(in_sleep_window = in_window, "sleep window boundary crossed");
        }
        self.in_sleep_window = in_window;
        self.reconcile_sleep_window();
        self.update_system_job_states().await?;
        self.save_state().await
    }

    async fn ensure_system_jobs(&mut self) -> Result<()> {
        let standing = [
            NewJob {
                name: SYSTEM_ACTIVITY_TICK.to_owned(),
                schedule: Schedule::Interval {
                    interval_ms: self.config.activity_tick_interval_ms,
                    start_at: None,
                },
                payload: JobPayload::ActivityTick,
                enabled: false,
            },
            NewJob {
                name: SYSTEM_PROMOTION_TICK.to_owned(),
                schedule: Schedule::Exponential {
                    mean_interval_ms: self.config.promotion_mean_interval_ms,
                },
                payload: JobPayload::PromotionTick,
                enabled: false,
            },
            NewJob {
                name: SYSTEM_SLEEP_WINDOW_TICK.to_owned(),
                schedule: Schedule::Interval {
                    interval_ms: self.config.sleep_check_interval_ms,
                    start_at: None,
                },
                payload: JobPayload::SleepWindowTick,
                enabled: true,
            },
        ];
        for job in standing {
            self.scheduler.ensure_job(job).await?;
        }
        Ok(())
    }

    /// Activity digests only while watching; promotion only while awake,
    /// not watching and outside the sleep window; the sleep check always.
    async fn update_system_job_states(&mut self) -> Result<()> {
        let watching = self.state.mode == AgentMode::AwakeWatching;
        let promotable = self.state.mode == AgentMode::AwakeNotWatching && !self.in_sleep_window;

        if self.set_system_job(SYSTEM_ACTIVITY_TICK, watching).await? && watching {
            self.activity_window_start = Some(self.clock.now());
        }
        self.set_system_job(SYSTEM_PROMOTION_TICK, promotable).await?;
        self.set_system_job(SYSTEM_SLEEP_WINDOW_TICK, true).await?;
        Ok(())
    }

    /// Returns whether the job's enablement changed.
    async fn set_system_job(&mut self, name: &str, enabled: bool) -> Result<bool> {
        let Some(job) = self.scheduler.find_job_by_name(name) else {
            warn!(job = %name, "system job missing");
            return Ok(false);
        };
        if job.enabled == enabled {
            return Ok(false);
        }
        let id = job.id.clone();
        self.scheduler.set_job_enabled(&id, enabled).await?;
        debug!(job = %name, enabled, "system job toggled");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn dispatch(&mut self, event: LifeEvent) {
        let result = reduce(&self.state, &event);
        if result.state.mode != self.state.mode {
            info!(from = %self.state.mode, to = %result.state.mode, "lifecycle transition");
        }
        self.state = result.state;
        for output in &result.outputs {
            self.apply_output(output);
        }
    }

    fn apply_output(&self, output: &LifeOutput) {
        match output {
            LifeOutput::Noop => {}
            LifeOutput::WatchingStarted { focus_channel_id } => {
                self.handler.on_watching_started(focus_channel_id);
            }
            LifeOutput::WatchingEnded => self.handler.on_watching_ended(),
            LifeOutput::FocusMessage {
                channel_id,
                message_id,
            } => self.handler.on_focus_message(channel_id, message_id),
            LifeOutput::ActivityDigest {
                window_start,
                window_end,
                summary,
            } => self
                .handler
                .on_activity_digest(*window_start, *window_end, summary),
        }
    }

    /// Align the mode with the current sleep-window membership.
    fn reconcile_sleep_window(&mut self) {
        match (self.state.mode, self.in_sleep_window) {
            (AgentMode::Off, false) => self.dispatch(LifeEvent::Wake),
            (AgentMode::AwakeNotWatching, true) => self.dispatch(LifeEvent::Sleep),
            (AgentMode::AwakeWatching, true) => {
                if !self.sleep_pending {
                    debug!("sleep deferred until watching ends");
                }
                self.sleep_pending = true;
            }
            _ => {}
        }
        if !self.in_sleep_window {
            self.sleep_pending = false;
        }
    }

    fn handle_sleep_pending(&mut self) {
        if self.sleep_pending
            && self.in_sleep_window
            && self.state.mode == AgentMode::AwakeNotWatching
        {
            self.dispatch(LifeEvent::Sleep);
            self.sleep_pending = false;
        }
    }

    async fn send_unread_summary(&self) -> Result<()> {
        let summary = self.unread.get_summary().await?;
        if let Some(text) = format_unread_summary(&summary) {
            self.handler.send_to_agent(&text);
        }
        Ok(())
    }

    fn validate_reminder_schedule(&self, schedule: &Schedule) -> Result<()> {
        match schedule {
            Schedule::Once { execute_at } => {
                if is_past_time(*execute_at, self.clock.now()) {
                    return Err(PresenceError::Validation(
                        "cannot set a reminder in the past".to_owned(),
                    ));
                }
            }
            Schedule::Cron { expression } => {
                parse_cron(expression).map_err(PresenceError::Validation)?;
            }
            Schedule::Interval { interval_ms, .. } => {
                if *interval_ms == 0 {
                    return Err(PresenceError::Validation(
                        "reminder interval must be positive".to_owned(),
                    ));
                }
            }
            Schedule::Exponential { mean_interval_ms } => {
                if *mean_interval_ms == 0 {
                    return Err(PresenceError::Validation(
                        "reminder mean interval must be positive".to_owned(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn local_time(&self) -> String {
        self.clock
            .now()
            .with_timezone(&self.timezone)
            .format("%H:%M:%S")
            .to_string()
    }

    async fn save_state(&self) -> Result<()> {
        self.store
            .save_life_state(&self.state, self.clock.now())
            .await?;
        Ok(())
    }
}
