//! SQLite-backed [`Persistence`] adapter.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::schema::{apply_schema, read_schema_version};
use super::{
    JobRecord, JobUpdate, MessageRecord, Persistence, ReadPosition, StorageError, UnreadCount,
    UnreadRecord, UnreadRow,
};
use crate::lifecycle::types::{AgentMode, ChannelId, LifeState, MessageId};

const JOB_COLUMNS: &str = "id, name, schedule_type, schedule_data, payload_type, payload_data, \
                           enabled, created_at, last_run_at, next_run_at";

/// SQLite store.
///
/// Thread-safe via an internal `Mutex<Connection>`; every operation holds the
/// lock for its whole statement or transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> Result<Option<u32>, StorageError> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    /// Acquire the connection mutex.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }
}

#[async_trait]
impl Persistence for SqliteStore {
    async fn load_life_state(&self) -> Result<Option<LifeState>, StorageError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT mode, focus_channel_id FROM agent_state WHERE id = 1",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;

        let Some((mode, focus)) = row else {
            return Ok(None);
        };
        let mode = AgentMode::parse(&mode)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown agent mode '{mode}'")))?;
        let state = LifeState {
            mode,
            focus_channel_id: focus.map(ChannelId::from),
        };
        if !state.is_consistent() {
            return Err(StorageError::Corrupt(format!(
                "focus channel does not match mode {mode}"
            )));
        }
        Ok(Some(state))
    }

    async fn save_life_state(
        &self,
        state: &LifeState,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO agent_state (id, mode, focus_channel_id, last_wake_at, last_sleep_at, updated_at)
             VALUES (1, ?1, ?2, CASE WHEN ?1 != 'OFF' THEN ?3 END, NULL, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 mode = excluded.mode,
                 focus_channel_id = excluded.focus_channel_id,
                 last_wake_at = CASE
                     WHEN agent_state.mode = 'OFF' AND excluded.mode != 'OFF' THEN excluded.updated_at
                     ELSE agent_state.last_wake_at END,
                 last_sleep_at = CASE
                     WHEN agent_state.mode != 'OFF' AND excluded.mode = 'OFF' THEN excluded.updated_at
                     ELSE agent_state.last_sleep_at END,
                 updated_at = excluded.updated_at",
            params![
                state.mode.as_str(),
                state.focus_channel_id.as_ref().map(ChannelId::as_str),
                at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    async fn list_enabled_jobs(&self) -> Result<Vec<JobRecord>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE enabled = 1 ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map([], row_to_job)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn find_job_by_name(&self, name: &str) -> Result<Option<JobRecord>, StorageError> {
        let conn = self.lock()?;
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE name = ?1"),
                params![name],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    async fn create_job(&self, job: &JobRecord) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let taken: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM scheduled_jobs WHERE name = ?1",
                params![job.name],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(StorageError::DuplicateName(job.name.clone()));
        }

        conn.execute(
            &format!(
                "INSERT INTO scheduled_jobs ({JOB_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                job.id,
                job.name,
                job.schedule_type,
                job.schedule_data,
                job.payload_type,
                job.payload_data,
                job.enabled,
                job.created_at.timestamp_millis(),
                job.last_run_at.map(|t| t.timestamp_millis()),
                job.next_run_at.map(|t| t.timestamp_millis()),
            ],
        )?;
        Ok(())
    }

    async fn update_job(&self, id: &str, update: &JobUpdate) -> Result<(), StorageError> {
        let mut sets = Vec::new();
        let mut values = Vec::new();
        if let Some(enabled) = update.enabled {
            sets.push("enabled = ?");
            values.push(Value::Integer(i64::from(enabled)));
        }
        if let Some(last) = update.last_run_at {
            sets.push("last_run_at = ?");
            values.push(optional_millis(last));
        }
        if let Some(next) = update.next_run_at {
            sets.push("next_run_at = ?");
            values.push(optional_millis(next));
        }
        if sets.is_empty() {
            return Ok(());
        }
        values.push(Value::Text(id.to_owned()));

        let conn = self.lock()?;
        let sql = format!("UPDATE scheduled_jobs SET {} WHERE id = ?", sets.join(", "));
        let rows = conn.execute(&sql, params_from_iter(values.iter()))?;
        if rows == 0 {
            return Err(StorageError::NotFound(id.to_owned()));
        }
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM scheduled_jobs WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    async fn upsert_unread(&self, record: &UnreadRecord) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO unread_messages (channel_id, message_id, guild_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(channel_id, message_id) DO NOTHING",
            params![
                record.channel_id.as_str(),
                record.message_id.as_str(),
                record.guild_id,
                record.created_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    async fn clear_channel_atomic(
        &self,
        channel_id: &ChannelId,
        last_read_message_id: &MessageId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM unread_messages WHERE channel_id = ?1",
            params![channel_id.as_str()],
        )?;
        tx.execute(
            "INSERT INTO channel_read_state (channel_id, last_read_message_id, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(channel_id) DO UPDATE SET
                 last_read_message_id = excluded.last_read_message_id,
                 updated_at = excluded.updated_at",
            params![
                channel_id.as_str(),
                last_read_message_id.as_str(),
                at.timestamp_millis()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn group_unread_counts(&self) -> Result<Vec<UnreadCount>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT channel_id, MAX(guild_id), COUNT(*) AS n
             FROM unread_messages
             GROUP BY channel_id
             ORDER BY n DESC, channel_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let count: i64 = row.get(2)?;
            Ok(UnreadCount {
                channel_id: ChannelId::from(row.get::<_, String>(0)?),
                guild_id: row.get(1)?,
                unread_count: usize::try_from(count).unwrap_or(0),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn query_unread_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<UnreadRow>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT u.channel_id, u.guild_id, u.message_id, u.created_at,
                    m.author_username, m.content
             FROM unread_messages u
             LEFT JOIN messages m
                 ON m.message_id = u.message_id AND m.channel_id = u.channel_id
             WHERE u.created_at >= ?1
             ORDER BY u.created_at DESC, u.message_id DESC",
        )?;
        let rows = stmt.query_map(params![since.timestamp_millis()], |row| {
            Ok(UnreadRow {
                channel_id: ChannelId::from(row.get::<_, String>(0)?),
                guild_id: row.get(1)?,
                message_id: MessageId::from(row.get::<_, String>(2)?),
                created_at: from_millis(3, row.get(3)?)?,
                author_username: row.get(4)?,
                content: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn save_message(&self, message: &MessageRecord) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO messages
                 (message_id, channel_id, guild_id, author_id, author_username, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.message_id.as_str(),
                message.channel_id.as_str(),
                message.guild_id,
                message.author_id.as_str(),
                message.author_username,
                message.content,
                message.created_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    async fn read_position(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Option<ReadPosition>, StorageError> {
        let conn = self.lock()?;
        let position = conn
            .query_row(
                "SELECT last_read_message_id, updated_at FROM channel_read_state
                 WHERE channel_id = ?1",
                params![channel_id.as_str()],
                |row| {
                    Ok(ReadPosition {
                        channel_id: channel_id.clone(),
                        last_read_message_id: MessageId::from(row.get::<_, String>(0)?),
                        updated_at: from_millis(1, row.get(1)?)?,
                    })
                },
            )
            .optional()?;
        Ok(position)
    }
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        schedule_type: row.get(2)?,
        schedule_data: row.get(3)?,
        payload_type: row.get(4)?,
        payload_data: row.get(5)?,
        enabled: row.get(6)?,
        created_at: from_millis(7, row.get(7)?)?,
        last_run_at: row
            .get::<_, Option<i64>>(8)?
            .map(|ms| from_millis(8, ms))
            .transpose()?,
        next_run_at: row
            .get::<_, Option<i64>>(9)?
            .map(|ms| from_millis(9, ms))
            .transpose()?,
    })
}

fn from_millis(column: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, ms))
}

fn optional_millis(at: Option<DateTime<Utc>>) -> Value {
    match at {
        Some(at) => Value::Integer(at.timestamp_millis()),
        None => Value::Null,
    }
}
