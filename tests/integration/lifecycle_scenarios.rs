//! End-to-end lifecycle flows through the mailbox runtime.

use crate::helpers::{Output, noon, spawn_server};
use chrono::{Duration, TimeZone, Utc};
use presence::lifecycle::{ChannelId, MessageId, UserId};
use presence::{LifeState, Schedule};

fn reminder_count(outputs: &[Output], text: &str) -> usize {
    outputs
        .iter()
        .filter(|o| matches!(o, Output::Agent(t) if t.ends_with(text)))
        .count()
}

#[tokio::test]
async fn mention_focus_and_release() {
    let server = spawn_server(noon()).await;
    let client = &server.client;

    client
        .on_external_message(
            ChannelId::from("chB"),
            MessageId::from("b1"),
            UserId::from("u2"),
            "g1",
            false,
        )
        .await
        .unwrap();
    client
        .on_external_message(
            ChannelId::from("chA"),
            MessageId::from("a1"),
            UserId::from("u1"),
            "g1",
            true,
        )
        .await
        .unwrap();
    client
        .on_external_message(
            ChannelId::from("chA"),
            MessageId::from("a2"),
            UserId::from("u1"),
            "g1",
            false,
        )
        .await
        .unwrap();
    client.set_not_watching().await.unwrap();

    assert_eq!(client.get_state().await.unwrap(), LifeState::awake_not_watching());
    assert_eq!(
        server.output.snapshot(),
        vec![
            Output::WatchingStarted("chA".to_owned()),
            Output::FocusMessage("chA".to_owned(), "a1".to_owned()),
            Output::Agent(
                "[Lifecycle] 12:00:00 Switched to AWAKE_WATCHING. (focus: chA)".to_owned()
            ),
            Output::Agent("=== Unread summary ===\nch:chB - 1 unread".to_owned()),
            Output::FocusMessage("chA".to_owned(), "a2".to_owned()),
            Output::WatchingEnded,
        ]
    );

    client
        .on_channel_read(ChannelId::from("chB"), MessageId::from("b1"))
        .await
        .unwrap();
    let controller = server.stop().await;
    assert!(controller.unread().get_summary().await.unwrap().is_empty());
}

#[tokio::test]
async fn once_reminder_fires_exactly_once() {
    let server = spawn_server(noon()).await;
    server
        .client
        .create_reminder(
            "ping",
            Schedule::Once {
                execute_at: noon() + Duration::milliseconds(100),
            },
        )
        .await
        .unwrap();

    server.advance(Duration::milliseconds(100)).await;
    server
        .wait_for_outputs(|o| reminder_count(o, "ping") == 1)
        .await;
    assert!(server.client.list_reminders().await.unwrap().is_empty());

    server.advance(Duration::seconds(1)).await;
    server.advance(Duration::seconds(1)).await;
    assert_eq!(reminder_count(&server.output.snapshot(), "ping"), 1);
    server.stop().await;
}

#[tokio::test]
async fn interval_reminder_fires_once_per_period() {
    let server = spawn_server(noon()).await;
    server
        .client
        .create_reminder(
            "tick",
            Schedule::Interval {
                interval_ms: 100,
                start_at: None,
            },
        )
        .await
        .unwrap();

    for expected in 1..=3 {
        server.advance(Duration::milliseconds(100)).await;
        server
            .wait_for_outputs(|o| reminder_count(o, "tick") == expected)
            .await;
    }
    // Another round trip through the loop must not produce a fourth fire.
    server.client.get_state().await.unwrap();
    assert_eq!(reminder_count(&server.output.snapshot(), "tick"), 3);
    assert_eq!(server.client.list_reminders().await.unwrap().len(), 1);
    server.stop().await;
}

#[tokio::test]
async fn entering_sleep_window_turns_agent_off() {
    let start = Utc.with_ymd_and_hms(2026, 4, 2, 2, 29, 0).unwrap();
    let server = spawn_server(start).await;
    assert_eq!(
        server.client.get_state().await.unwrap(),
        LifeState::awake_not_watching()
    );

    server.advance(Duration::minutes(2)).await;
    server.wait_for_state(LifeState::off()).await;

    // A mention still wakes the agent inside the window.
    server
        .client
        .on_external_message(
            ChannelId::from("chA"),
            MessageId::from("m1"),
            UserId::from("u1"),
            "g1",
            true,
        )
        .await
        .unwrap();
    assert_eq!(
        server.client.get_state().await.unwrap(),
        LifeState::watching(ChannelId::from("chA"))
    );
    server.stop().await;
}

#[tokio::test]
async fn activity_digest_reports_other_channels() {
    let server = spawn_server(noon()).await;
    let client = &server.client;
    client
        .on_external_message(
            ChannelId::from("chA"),
            MessageId::from("a1"),
            UserId::from("u1"),
            "g1",
            true,
        )
        .await
        .unwrap();
    client
        .on_external_message(
            ChannelId::from("chB"),
            MessageId::from("b1"),
            UserId::from("u2"),
            "g1",
            false,
        )
        .await
        .unwrap();

    server.advance(Duration::minutes(5)).await;
    server
        .wait_for_outputs(|o| o.iter().any(|x| matches!(x, Output::Digest(_))))
        .await;

    let digest = server
        .output
        .snapshot()
        .into_iter()
        .find_map(|o| match o {
            Output::Digest(summary) => Some(summary),
            _ => None,
        })
        .unwrap();
    assert_eq!(digest.len(), 1);
    assert_eq!(digest[0].channel_id, ChannelId::from("chB"));
    assert_eq!(digest[0].messages[0].author_username, "unknown");
    server.stop().await;
}
