//! Durable storage port.
//!
//! The controller, scheduler and unread tracker only talk to storage through
//! [`Persistence`]. [`SqliteStore`] is the production adapter.

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::lifecycle::types::{ChannelId, LifeState, MessageId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Current schema version written to `schema_meta`.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Persisted job row.
///
/// `schedule_data` and `payload_data` are JSON objects without the `type`
/// discriminator, which lives in `schedule_type` / `payload_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    /// Primary key.
    pub id: String,
    /// Unique job name.
    pub name: String,
    /// Schedule discriminator, e.g. `once` or `cron`.
    pub schedule_type: String,
    /// Schedule fields as a JSON object.
    pub schedule_data: String,
    /// Payload discriminator, e.g. `reminder`.
    pub payload_type: String,
    /// Payload fields as a JSON object.
    pub payload_data: String,
    /// Whether the job may be armed.
    pub enabled: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last fire time, if any.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Next planned fire, if any.
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Partial update for a job row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub enabled: Option<bool>,
    pub last_run_at: Option<Option<DateTime<Utc>>>,
    pub next_run_at: Option<Option<DateTime<Utc>>>,
}

/// One unread ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadRecord {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub guild_id: String,
    pub created_at: DateTime<Utc>,
}

/// Unread rows grouped per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadCount {
    pub channel_id: ChannelId,
    pub guild_id: String,
    pub unread_count: usize,
}

/// Unread row joined with its archived message, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadRow {
    pub channel_id: ChannelId,
    pub guild_id: String,
    pub message_id: MessageId,
    pub created_at: DateTime<Utc>,
    pub author_username: Option<String>,
    pub content: Option<String>,
}

/// Archived chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: String,
    pub author_id: UserId,
    pub author_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Last read position of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPosition {
    pub channel_id: ChannelId,
    pub last_read_message_id: MessageId,
    pub updated_at: DateTime<Utc>,
}

/// Storage operations used by the core.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load_life_state(&self) -> Result<Option<LifeState>, StorageError>;
    async fn save_life_state(&self, state: &LifeState, at: DateTime<Utc>)
    -> Result<(), StorageError>;

    async fn list_enabled_jobs(&self) -> Result<Vec<JobRecord>, StorageError>;
    async fn find_job_by_name(&self, name: &str) -> Result<Option<JobRecord>, StorageError>;
    async fn create_job(&self, job: &JobRecord) -> Result<(), StorageError>;
    async fn update_job(&self, id: &str, update: &JobUpdate) -> Result<(), StorageError>;
    /// Returns `false` when no such job existed.
    async fn delete_job(&self, id: &str) -> Result<bool, StorageError>;

    /// Insert an unread row; a duplicate `(channel, message)` is a no-op.
    async fn upsert_unread(&self, record: &UnreadRecord) -> Result<(), StorageError>;
    /// Delete every unread row of `channel_id` and record the read position,
    /// both or neither.
    async fn clear_channel_atomic(
        &self,
        channel_id: &ChannelId,
        last_read_message_id: &MessageId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    /// Per-channel counts, descending by count then ascending by channel id.
    async fn group_unread_counts(&self) -> Result<Vec<UnreadCount>, StorageError>;
    /// Unread rows created at or after `since`, newest first.
    async fn query_unread_since(&self, since: DateTime<Utc>)
    -> Result<Vec<UnreadRow>, StorageError>;

    async fn save_message(&self, message: &MessageRecord) -> Result<(), StorageError>;
    async fn read_position(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Option<ReadPosition>, StorageError>;
}

/// Errors from the storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("job name already exists: {0}")]
    DuplicateName(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("lock poisoned: {0}")]
    Lock(String),
}
