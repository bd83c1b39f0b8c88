//! Shared helpers for integration tests.

use chrono::{DateTime, TimeZone, Utc};
use presence::clock::ManualClock;
use presence::lifecycle::{
    ChannelId, LifecycleClient, LifecycleController, MessageId, OutputHandler,
    UnreadSummaryWithDetails, lifecycle_channel,
};
use presence::{LifeState, PresenceConfig, SqliteStore};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything an output handler was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Output {
    WatchingStarted(String),
    WatchingEnded,
    FocusMessage(String, String),
    Digest(Vec<UnreadSummaryWithDetails>),
    Agent(String),
}

#[derive(Default)]
pub(crate) struct RecordingOutput {
    outputs: Mutex<Vec<Output>>,
}

impl RecordingOutput {
    pub(crate) fn snapshot(&self) -> Vec<Output> {
        self.outputs.lock().unwrap().clone()
    }

    pub(crate) fn agent_texts(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter_map(|o| match o {
                Output::Agent(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn push(&self, output: Output) {
        self.outputs.lock().unwrap().push(output);
    }
}

impl OutputHandler for RecordingOutput {
    fn on_watching_started(&self, channel_id: &ChannelId) {
        self.push(Output::WatchingStarted(channel_id.to_string()));
    }

    fn on_watching_ended(&self) {
        self.push(Output::WatchingEnded);
    }

    fn on_focus_message(&self, channel_id: &ChannelId, message_id: &MessageId) {
        self.push(Output::FocusMessage(
            channel_id.to_string(),
            message_id.to_string(),
        ));
    }

    fn on_activity_digest(
        &self,
        _window_start: DateTime<Utc>,
        _window_end: DateTime<Utc>,
        summary: &[UnreadSummaryWithDetails],
    ) {
        self.push(Output::Digest(summary.to_vec()));
    }

    fn send_to_agent(&self, text: &str) {
        self.push(Output::Agent(text.to_owned()));
    }
}

/// UTC config with promotion pushed far out so tests stay deterministic.
pub(crate) fn test_config() -> PresenceConfig {
    let mut config = PresenceConfig::default();
    config.scheduler.timezone = "UTC".to_owned();
    config.lifecycle.promotion_mean_interval_ms = 1_000_000_000_000;
    config
}

/// 12:00 UTC, outside the default sleep window.
pub(crate) fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 2, 12, 0, 0).unwrap()
}

/// Open the file-backed store at `db` and initialize a controller on it.
pub(crate) async fn boot(
    db: &Path,
    clock: Arc<ManualClock>,
    output: Arc<RecordingOutput>,
) -> LifecycleController {
    let store = Arc::new(SqliteStore::open(db).expect("open store"));
    let mut controller =
        LifecycleController::new(&test_config(), store, clock, output).expect("build controller");
    controller.initialize().await.expect("initialize");
    controller
}

pub(crate) struct Running {
    pub(crate) client: LifecycleClient,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) output: Arc<RecordingOutput>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) task: JoinHandle<LifecycleController>,
    pub(crate) _dir: tempfile::TempDir,
}

/// Boot a controller on a fresh database and serve it from a mailbox.
pub(crate) async fn spawn_server(start: DateTime<Utc>) -> Running {
    let dir = tempfile::tempdir().expect("create temp dir");
    let clock = Arc::new(ManualClock::new(start));
    let output = Arc::new(RecordingOutput::default());
    let controller = boot(&dir.path().join("presence.db"), clock.clone(), output.clone()).await;
    let (client, server) = lifecycle_channel(16, controller);
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(server.run(shutdown.clone()));
    Running {
        client,
        clock,
        output,
        shutdown,
        task,
        _dir: dir,
    }
}

impl Running {
    /// Advance the virtual clock and let the server loop observe it.
    pub(crate) async fn advance(&self, by: chrono::Duration) {
        self.clock.advance(by);
        self.client.get_state().await.expect("server alive");
    }

    /// Poll until `done` holds for the recorded outputs.
    pub(crate) async fn wait_for_outputs(&self, done: impl Fn(&[Output]) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done(&self.output.snapshot()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for outputs");
    }

    /// Poll until the lifecycle reaches `expected`.
    pub(crate) async fn wait_for_state(&self, expected: LifeState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.client.get_state().await.expect("server alive") != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for state");
    }

    pub(crate) async fn stop(self) -> LifecycleController {
        self.shutdown.cancel();
        self.task.await.expect("server task")
    }
}
