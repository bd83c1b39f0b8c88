//! Unread tracker.
//!
//! A durable per-message ledger: one row per `(channel, message)` that the
//! agent has not seen, plus the last read position of each channel.

use crate::clock::Clock;
use crate::error::Result;
use crate::lifecycle::types::{ChannelId, MessageId, UnreadDetail, UnreadSummaryWithDetails};
use crate::storage::{MessageRecord, Persistence, ReadPosition, UnreadCount, UnreadRecord};
use chrono::Duration;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

/// Author shown for unread messages missing from the archive.
const UNKNOWN_AUTHOR: &str = "unknown";

pub struct UnreadTracker {
    store: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
}

impl UnreadTracker {
    pub fn new(store: Arc<dyn Persistence>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record an unread message. Repeating the same `(channel, message)` is
    /// a no-op.
    pub async fn add_unread(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
        guild_id: &str,
    ) -> Result<()> {
        self.store
            .upsert_unread(&UnreadRecord {
                channel_id: channel_id.clone(),
                message_id: message_id.clone(),
                guild_id: guild_id.to_owned(),
                created_at: self.clock.now(),
            })
            .await?;
        Ok(())
    }

    /// Archive message text so digests can show author and content.
    pub async fn record_message(&self, message: &MessageRecord) -> Result<()> {
        self.store.save_message(message).await?;
        Ok(())
    }

    /// Clear every unread row of the channel and move its read position.
    pub async fn mark_read(&self, channel_id: &ChannelId, last_message_id: &MessageId) -> Result<()> {
        self.store
            .clear_channel_atomic(channel_id, last_message_id, self.clock.now())
            .await?;
        debug!(channel = %channel_id, last_read = %last_message_id, "channel marked read");
        Ok(())
    }

    /// Unread counts per channel, highest first.
    pub async fn get_summary(&self) -> Result<Vec<UnreadCount>> {
        Ok(self.store.group_unread_counts().await?)
    }

    /// Unread messages from the last `lookback_minutes`, grouped per channel.
    ///
    /// Channels are ordered by descending count (ties by channel id); the
    /// messages within a channel are newest first.
    pub async fn get_recent_with_details(
        &self,
        lookback_minutes: i64,
    ) -> Result<Vec<UnreadSummaryWithDetails>> {
        let since = self.clock.now() - Duration::minutes(lookback_minutes);
        let rows = self.store.query_unread_since(since).await?;

        let mut order: Vec<ChannelId> = Vec::new();
        let mut grouped: HashMap<ChannelId, UnreadSummaryWithDetails> = HashMap::new();
        for row in rows {
            let entry = grouped.entry(row.channel_id.clone()).or_insert_with(|| {
                order.push(row.channel_id.clone());
                UnreadSummaryWithDetails {
                    channel_id: row.channel_id.clone(),
                    guild_id: row.guild_id.clone(),
                    unread_count: 0,
                    messages: Vec::new(),
                }
            });
            entry.unread_count += 1;
            entry.messages.push(UnreadDetail {
                message_id: row.message_id,
                author_username: row
                    .author_username
                    .unwrap_or_else(|| UNKNOWN_AUTHOR.to_owned()),
                content: row.content.unwrap_or_default(),
                created_at: row.created_at,
            });
        }

        let mut summary: Vec<_> = order
            .into_iter()
            .filter_map(|channel| grouped.remove(&channel))
            .collect();
        summary.sort_by(|a, b| {
            b.unread_count
                .cmp(&a.unread_count)
                .then_with(|| a.channel_id.cmp(&b.channel_id))
        });
        Ok(summary)
    }

    pub async fn read_position(&self, channel_id: &ChannelId) -> Result<Option<ReadPosition>> {
        Ok(self.store.read_position(channel_id).await?)
    }
}

/// Plain-text unread block for agent notifications, `None` when empty.
#[must_use]
pub fn format_unread_summary(summary: &[UnreadCount]) -> Option<String> {
    if summary.is_empty() {
        return None;
    }
    let mut out = String::from("=== Unread summary ===");
    for entry in summary {
        let _ = write!(out, "\nch:{} - {} unread", entry.channel_id, entry.unread_count);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::clock::ManualClock;
    use crate::lifecycle::types::UserId;
    use crate::storage::SqliteStore;
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<ManualClock>, UnreadTracker) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap(),
        ));
        (clock.clone(), UnreadTracker::new(store, clock))
    }

    fn ch(id: &str) -> ChannelId {
        ChannelId::from(id)
    }

    fn msg(id: &str) -> MessageId {
        MessageId::from(id)
    }

    #[tokio::test]
    async fn duplicates_do_not_double_count() {
        let (_clock, tracker) = setup();
        tracker.add_unread(&ch("c1"), &msg("m1"), "g").await.unwrap();
        tracker.add_unread(&ch("c1"), &msg("m1"), "g").await.unwrap();
        let summary = tracker.get_summary().await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].unread_count, 1);
    }

    #[tokio::test]
    async fn summary_is_descending() {
        let (_clock, tracker) = setup();
        tracker.add_unread(&ch("a"), &msg("1"), "g").await.unwrap();
        for id in ["2", "3", "4"] {
            tracker.add_unread(&ch("b"), &msg(id), "g").await.unwrap();
        }
        let summary = tracker.get_summary().await.unwrap();
        assert_eq!(summary[0].channel_id, ch("b"));
        assert_eq!(summary[0].unread_count, 3);
        assert_eq!(summary[1].channel_id, ch("a"));
    }

    #[tokio::test]
    async fn mark_read_clears_channel_and_records_position() {
        let (_clock, tracker) = setup();
        tracker.add_unread(&ch("a"), &msg("1"), "g").await.unwrap();
        tracker.add_unread(&ch("a"), &msg("2"), "g").await.unwrap();
        tracker.add_unread(&ch("b"), &msg("3"), "g").await.unwrap();

        tracker.mark_read(&ch("a"), &msg("2")).await.unwrap();
        let summary = tracker.get_summary().await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].channel_id, ch("b"));

        let position = tracker.read_position(&ch("a")).await.unwrap().unwrap();
        assert_eq!(position.last_read_message_id, msg("2"));
        assert!(tracker.read_position(&ch("b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_details_respect_lookback_and_archive() {
        let (clock, tracker) = setup();
        tracker.add_unread(&ch("a"), &msg("old"), "g").await.unwrap();
        clock.advance(Duration::minutes(30));

        tracker
            .record_message(&MessageRecord {
                message_id: msg("m1"),
                channel_id: ch("b"),
                guild_id: "g".to_owned(),
                author_id: UserId::from("u1"),
                author_username: "alice".to_owned(),
                content: "hi there".to_owned(),
                created_at: clock.now(),
            })
            .await
            .unwrap();
        tracker.add_unread(&ch("b"), &msg("m1"), "g").await.unwrap();
        clock.advance(Duration::minutes(1));
        tracker.add_unread(&ch("b"), &msg("m2"), "g").await.unwrap();
        tracker.add_unread(&ch("c"), &msg("m3"), "g").await.unwrap();

        let recent = tracker.get_recent_with_details(5).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].channel_id, ch("b"));
        assert_eq!(recent[0].unread_count, 2);
        assert_eq!(recent[0].messages[0].message_id, msg("m2"));
        assert_eq!(recent[0].messages[0].author_username, "unknown");
        assert_eq!(recent[0].messages[0].content, "");
        assert_eq!(recent[0].messages[1].author_username, "alice");
        assert_eq!(recent[0].messages[1].content, "hi there");
        assert_eq!(recent[1].channel_id, ch("c"));
    }

    #[test]
    fn formats_summary_block() {
        let summary = vec![
            UnreadCount {
                channel_id: ch("123"),
                guild_id: "g".to_owned(),
                unread_count: 4,
            },
            UnreadCount {
                channel_id: ch("456"),
                guild_id: "g".to_owned(),
                unread_count: 1,
            },
        ];
        assert_eq!(
            format_unread_summary(&summary).unwrap(),
            "=== Unread summary ===\nch:123 - 4 unread\nch:456 - 1 unread"
        );
        assert_eq!(format_unread_summary(&[]), None);
    }
}
