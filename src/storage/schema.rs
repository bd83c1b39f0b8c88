//! SQLite DDL for the presence store.

use rusqlite::Connection;

/// Complete DDL. Uses `IF NOT EXISTS` throughout so `apply_schema` is
/// idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Singleton row (id = 1).
CREATE TABLE IF NOT EXISTS agent_state (
    id               INTEGER PRIMARY KEY CHECK (id = 1),
    mode             TEXT NOT NULL,
    focus_channel_id TEXT,
    last_wake_at     INTEGER,
    last_sleep_at    INTEGER,
    updated_at       INTEGER NOT NULL
);

-- Times are epoch millis.
CREATE TABLE IF NOT EXISTS scheduled_jobs (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE,
    schedule_type TEXT NOT NULL,
    schedule_data TEXT NOT NULL,
    payload_type  TEXT NOT NULL,
    payload_data  TEXT NOT NULL,
    enabled       INTEGER NOT NULL DEFAULT 1,
    created_at    INTEGER NOT NULL,
    last_run_at   INTEGER,
    next_run_at   INTEGER
);

CREATE INDEX IF NOT EXISTS idx_jobs_enabled ON scheduled_jobs(enabled);

CREATE TABLE IF NOT EXISTS unread_messages (
    channel_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    guild_id   TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (channel_id, message_id)
);

CREATE INDEX IF NOT EXISTS idx_unread_created_at ON unread_messages(created_at);

CREATE TABLE IF NOT EXISTS channel_read_state (
    channel_id           TEXT PRIMARY KEY,
    last_read_message_id TEXT NOT NULL,
    updated_at           INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    message_id      TEXT PRIMARY KEY,
    channel_id      TEXT NOT NULL,
    guild_id        TEXT NOT NULL,
    author_id       TEXT NOT NULL,
    author_username TEXT NOT NULL,
    content         TEXT NOT NULL,
    created_at      INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages(channel_id, created_at);
"#;

/// Apply the full schema and seed the schema version on a fresh database.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![super::CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Read the stored schema version, if any.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let raw: String = row.get(0)?;
            Ok(raw.parse().ok())
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn schema_applies_twice() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();
        assert_eq!(
            read_schema_version(&conn).unwrap(),
            Some(super::super::CURRENT_SCHEMA_VERSION)
        );
    }

    #[test]
    fn job_names_are_unique() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        let insert = "INSERT INTO scheduled_jobs \
            (id, name, schedule_type, schedule_data, payload_type, payload_data, created_at) \
            VALUES (?1, 'dup', 'once', '{}', 'activity_tick', '{}', 0)";
        conn.execute(insert, ["a"]).unwrap();
        assert!(conn.execute(insert, ["b"]).is_err());
    }
}
