//! Scheduler→lifecycle bridge.
//!
//! Job handlers run on the scheduler's task but must not touch lifecycle
//! state directly. [`TickForwarder`] turns system-job fires into
//! [`SystemTick`] messages that the controller drains on its own turn;
//! [`ReminderJobHandler`] only talks to the output handler.

use crate::clock::Clock;
use crate::lifecycle::controller::OutputHandler;
use crate::scheduler::runner::JobHandler;
use crate::scheduler::types::{JobPayload, ScheduledJob};
use async_trait::async_trait;
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// A standing system job fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemTick {
    Activity,
    Promotion,
    SleepWindow,
}

/// Forwards system-job fires into the controller's tick queue.
pub struct TickForwarder {
    tick_tx: mpsc::UnboundedSender<SystemTick>,
}

impl TickForwarder {
    pub fn new(tick_tx: mpsc::UnboundedSender<SystemTick>) -> Self {
        Self { tick_tx }
    }
}

#[async_trait]
impl JobHandler for TickForwarder {
    async fn handle(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        let tick = match job.payload {
            JobPayload::ActivityTick => SystemTick::Activity,
            JobPayload::PromotionTick => SystemTick::Promotion,
            JobPayload::SleepWindowTick => SystemTick::SleepWindow,
            JobPayload::Reminder { .. } => {
                anyhow::bail!("tick forwarder cannot handle reminder job {}", job.id)
            }
        };
        debug!(job = %job.name, ?tick, "forwarding system tick");
        self.tick_tx
            .send(tick)
            .map_err(|_| anyhow::anyhow!("tick queue closed"))
    }
}

/// Delivers reminder text to the agent.
pub struct ReminderJobHandler {
    output: Arc<dyn OutputHandler>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
}

impl ReminderJobHandler {
    pub fn new(output: Arc<dyn OutputHandler>, clock: Arc<dyn Clock>, timezone: Tz) -> Self {
        Self {
            output,
            clock,
            timezone,
        }
    }
}

#[async_trait]
impl JobHandler for ReminderJobHandler {
    async fn handle(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        let JobPayload::Reminder { content } = &job.payload else {
            anyhow::bail!("job {} is not a reminder", job.id);
        };
        let time = self
            .clock
            .now()
            .with_timezone(&self.timezone)
            .format("%H:%M:%S");
        self.output.send_to_agent(&format!("[Reminder] {time} {content}"));
        Ok(())
    }
}
