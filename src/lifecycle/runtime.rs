//! Mailbox runtime for the lifecycle controller.
//!
//! A single task owns the [`LifecycleController`]. Inputs arrive through a
//! cloneable [`LifecycleClient`] and are handled one at a time, interleaved
//! with scheduler fires, so no two operations ever overlap.

use crate::clock::Clock;
use crate::error::{PresenceError, Result};
use crate::lifecycle::controller::LifecycleController;
use crate::lifecycle::types::{ChannelId, LifeState, MessageId, UserId};
use crate::scheduler::{Schedule, ScheduledJob};
use crate::storage::MessageRecord;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest the loop sleeps before re-reading the clock.
const MAX_IDLE: Duration = Duration::from_secs(60);

type Reply<T> = oneshot::Sender<T>;

enum LifecycleRequest {
    ExternalMessage {
        channel_id: ChannelId,
        message_id: MessageId,
        author_id: UserId,
        guild_id: String,
        is_mention_or_reply: bool,
        reply: Reply<Result<()>>,
    },
    RecordMessage {
        message: MessageRecord,
        reply: Reply<Result<()>>,
    },
    SetNotWatching {
        reply: Reply<Result<()>>,
    },
    SetFocusChannel {
        channel_id: ChannelId,
        reply: Reply<Result<()>>,
    },
    ChannelRead {
        channel_id: ChannelId,
        last_message_id: MessageId,
        reply: Reply<Result<()>>,
    },
    CreateReminder {
        content: String,
        schedule: Schedule,
        reply: Reply<Result<ScheduledJob>>,
    },
    ListReminders {
        reply: Reply<Vec<ScheduledJob>>,
    },
    DeleteReminder {
        id: String,
        reply: Reply<Result<bool>>,
    },
    GetState {
        reply: Reply<LifeState>,
    },
}

impl LifecycleRequest {
    fn name(&self) -> &'static str {
        match self {
            Self::ExternalMessage { .. } => "external_message",
            Self::RecordMessage { .. } => "record_message",
            Self::SetNotWatching { .. } => "set_not_watching",
            Self::SetFocusChannel { .. } => "set_focus_channel",
            Self::ChannelRead { .. } => "channel_read",
            Self::CreateReminder { .. } => "create_reminder",
            Self::ListReminders { .. } => "list_reminders",
            Self::DeleteReminder { .. } => "delete_reminder",
            Self::GetState { .. } => "get_state",
        }
    }
}

/// Handle for submitting inputs to a running [`LifecycleServer`].
#[derive(Clone)]
pub struct LifecycleClient {
    request_tx: mpsc::Sender<LifecycleRequest>,
}

impl LifecycleClient {
    pub async fn on_external_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        author_id: UserId,
        guild_id: impl Into<String>,
        is_mention_or_reply: bool,
    ) -> Result<()> {
        let guild_id = guild_id.into();
        self.request(|reply| LifecycleRequest::ExternalMessage {
            channel_id,
            message_id,
            author_id,
            guild_id,
            is_mention_or_reply,
            reply,
        })
        .await?
    }

    pub async fn record_message(&self, message: MessageRecord) -> Result<()> {
        self.request(|reply| LifecycleRequest::RecordMessage { message, reply })
            .await?
    }

    pub async fn set_not_watching(&self) -> Result<()> {
        self.request(|reply| LifecycleRequest::SetNotWatching { reply })
            .await?
    }

    pub async fn set_focus_channel(&self, channel_id: ChannelId) -> Result<()> {
        self.request(|reply| LifecycleRequest::SetFocusChannel { channel_id, reply })
            .await?
    }

    pub async fn on_channel_read(
        &self,
        channel_id: ChannelId,
        last_message_id: MessageId,
    ) -> Result<()> {
        self.request(|reply| LifecycleRequest::ChannelRead {
            channel_id,
            last_message_id,
            reply,
        })
        .await?
    }

    pub async fn create_reminder(
        &self,
        content: impl Into<String>,
        schedule: Schedule,
    ) -> Result<ScheduledJob> {
        let content = content.into();
        self.request(|reply| LifecycleRequest::CreateReminder {
            content,
            schedule,
            reply,
        })
        .await?
    }

    pub async fn list_reminders(&self) -> Result<Vec<ScheduledJob>> {
        self.request(|reply| LifecycleRequest::ListReminders { reply })
            .await
    }

    pub async fn delete_reminder(&self, id: impl Into<String>) -> Result<bool> {
        let id = id.into();
        self.request(|reply| LifecycleRequest::DeleteReminder { id, reply })
            .await?
    }

    pub async fn get_state(&self) -> Result<LifeState> {
        self.request(|reply| LifecycleRequest::GetState { reply })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> LifecycleRequest,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(build(reply_tx))
            .await
            .map_err(|e| PresenceError::Channel(format!("lifecycle server stopped: {e}")))?;
        reply_rx
            .await
            .map_err(|e| PresenceError::Channel(format!("lifecycle response dropped: {e}")))
    }
}

/// Owns the controller and drives it from the mailbox and the job timers.
pub struct LifecycleServer {
    request_rx: mpsc::Receiver<LifecycleRequest>,
    controller: LifecycleController,
}

/// Wrap an initialized controller in a mailbox.
#[must_use]
pub fn lifecycle_channel(
    request_capacity: usize,
    controller: LifecycleController,
) -> (LifecycleClient, LifecycleServer) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));
    (
        LifecycleClient { request_tx },
        LifecycleServer {
            request_rx,
            controller,
        },
    )
}

impl LifecycleServer {
    /// Serve until `shutdown` fires or every client is dropped, then cancel
    /// all timers and hand the controller back.
    pub async fn run(mut self, shutdown: CancellationToken) -> LifecycleController {
        info!("lifecycle server started");
        let clock = self.controller.clock();
        loop {
            let deadline = self.controller.next_deadline();
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("lifecycle server shutdown requested");
                    break;
                }
                // Overdue fires go ahead of any queued requests.
                () = wait_for(clock.as_ref(), deadline) => {
                    if let Err(e) = self.controller.run_due_jobs().await {
                        error!("system tick failed: {e}");
                    }
                }
                request = self.request_rx.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => {
                        debug!("all lifecycle clients dropped");
                        break;
                    }
                },
            }
        }
        self.controller.cleanup();
        info!("lifecycle server stopped");
        self.controller
    }

    async fn handle(&mut self, request: LifecycleRequest) {
        let name = request.name();
        let controller = &mut self.controller;
        let delivered = match request {
            LifecycleRequest::ExternalMessage {
                channel_id,
                message_id,
                author_id,
                guild_id,
                is_mention_or_reply,
                reply,
            } => {
                let result = controller
                    .on_external_message(
                        channel_id,
                        message_id,
                        author_id,
                        &guild_id,
                        is_mention_or_reply,
                    )
                    .await;
                log_failure(name, &result);
                reply.send(result).is_ok()
            }
            LifecycleRequest::RecordMessage { message, reply } => {
                let result = controller.record_message(message).await;
                log_failure(name, &result);
                reply.send(result).is_ok()
            }
            LifecycleRequest::SetNotWatching { reply } => {
                let result = controller.set_not_watching().await;
                log_failure(name, &result);
                reply.send(result).is_ok()
            }
            LifecycleRequest::SetFocusChannel { channel_id, reply } => {
                let result = controller.set_focus_channel(channel_id).await;
                log_failure(name, &result);
                reply.send(result).is_ok()
            }
            LifecycleRequest::ChannelRead {
                channel_id,
                last_message_id,
                reply,
            } => {
                let result = controller.on_channel_read(channel_id, last_message_id).await;
                log_failure(name, &result);
                reply.send(result).is_ok()
            }
            LifecycleRequest::CreateReminder {
                content,
                schedule,
                reply,
            } => {
                let result = controller.create_reminder(content, schedule).await;
                log_failure(name, &result);
                reply.send(result).is_ok()
            }
            LifecycleRequest::ListReminders { reply } => {
                reply.send(controller.list_reminders()).is_ok()
            }
            LifecycleRequest::DeleteReminder { id, reply } => {
                let result = controller.delete_reminder(&id).await;
                log_failure(name, &result);
                reply.send(result).is_ok()
            }
            LifecycleRequest::GetState { reply } => reply.send(controller.get_state()).is_ok(),
        };
        if !delivered {
            debug!(request = name, "caller went away before the reply");
        }
    }
}

fn log_failure<T>(request: &str, result: &Result<T>) {
    if let Err(e) = result {
        warn!(request, "lifecycle request failed: {e}");
    }
}

/// Resolve at `deadline` (capped at [`MAX_IDLE`]); never when there is none.
async fn wait_for(clock: &dyn Clock, deadline: Option<DateTime<Utc>>) {
    match deadline {
        Some(at) => {
            let delay = (at - clock.now()).to_std().unwrap_or_default();
            if !delay.is_zero() {
                tokio::time::sleep(delay.min(MAX_IDLE)).await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}
