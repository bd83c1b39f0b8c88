//! State, jobs and unread rows survive a process restart.

use crate::helpers::{RecordingOutput, boot, noon};
use chrono::Duration;
use presence::clock::ManualClock;
use presence::lifecycle::controller::{
    SYSTEM_ACTIVITY_TICK, SYSTEM_PROMOTION_TICK, SYSTEM_SLEEP_WINDOW_TICK,
};
use presence::lifecycle::{ChannelId, MessageId, UserId};
use presence::{LifeState, Schedule};
use std::path::Path;
use std::sync::Arc;

fn count_jobs(db: &Path, pattern: &str) -> i64 {
    let conn = rusqlite::Connection::open(db).unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM scheduled_jobs WHERE name LIKE ?1",
        [pattern],
        |row| row.get(0),
    )
    .unwrap()
}

#[tokio::test]
async fn system_jobs_are_adopted_not_duplicated() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("presence.db");
    let clock = Arc::new(ManualClock::new(noon()));

    let mut first = boot(&db, clock.clone(), Arc::new(RecordingOutput::default())).await;
    first
        .on_external_message(
            ChannelId::from("chA"),
            MessageId::from("m1"),
            UserId::from("u1"),
            "g1",
            true,
        )
        .await
        .unwrap();
    first.cleanup();
    drop(first);
    assert_eq!(count_jobs(&db, "system:%"), 3);

    for _ in 0..2 {
        clock.advance(Duration::minutes(1));
        let restarted = boot(&db, clock.clone(), Arc::new(RecordingOutput::default())).await;
        assert_eq!(
            restarted.get_state(),
            LifeState::watching(ChannelId::from("chA"))
        );
        let scheduler = restarted.scheduler();
        assert_eq!(scheduler.list_jobs().len(), 3);
        assert!(scheduler.find_job_by_name(SYSTEM_ACTIVITY_TICK).unwrap().enabled);
        assert!(!scheduler.find_job_by_name(SYSTEM_PROMOTION_TICK).unwrap().enabled);
        assert!(scheduler.find_job_by_name(SYSTEM_SLEEP_WINDOW_TICK).unwrap().enabled);
        assert_eq!(count_jobs(&db, "system:%"), 3);
    }
}

#[tokio::test]
async fn reminders_survive_restart_and_overdue_once_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("presence.db");
    let clock = Arc::new(ManualClock::new(noon()));

    let mut first = boot(&db, clock.clone(), Arc::new(RecordingOutput::default())).await;
    let daily = first
        .create_reminder(
            "daily standup".to_owned(),
            Schedule::Cron {
                expression: "0 9 * * *".to_owned(),
            },
        )
        .await
        .unwrap();
    first
        .create_reminder(
            "soon".to_owned(),
            Schedule::Once {
                execute_at: noon() + Duration::minutes(5),
            },
        )
        .await
        .unwrap();
    let later = first
        .create_reminder(
            "later".to_owned(),
            Schedule::Once {
                execute_at: noon() + Duration::hours(3),
            },
        )
        .await
        .unwrap();
    first.cleanup();
    drop(first);

    // Down for an hour: "soon" came due while nothing was running.
    clock.advance(Duration::hours(1));
    let output = Arc::new(RecordingOutput::default());
    let mut second = boot(&db, clock.clone(), output.clone()).await;

    let mut ids: Vec<String> = second.list_reminders().into_iter().map(|j| j.id).collect();
    ids.sort();
    let mut expected = vec![daily.id.clone(), later.id.clone()];
    expected.sort();
    assert_eq!(ids, expected);
    assert!(output.agent_texts().is_empty(), "overdue reminder must not fire");

    let daily_job = second.scheduler().get_job(&daily.id).unwrap();
    assert_eq!(
        daily_job.next_run_at,
        Some(noon() + Duration::hours(21)),
        "next 09:00 UTC after 13:00"
    );

    clock.advance(Duration::hours(2));
    second.run_due_jobs().await.unwrap();
    assert_eq!(output.agent_texts(), vec!["[Reminder] 15:00:00 later".to_owned()]);
    assert_eq!(second.list_reminders().len(), 1);
}

#[tokio::test]
async fn unread_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("presence.db");
    let clock = Arc::new(ManualClock::new(noon()));

    let mut first = boot(&db, clock.clone(), Arc::new(RecordingOutput::default())).await;
    for id in ["b1", "b2"] {
        first
            .on_external_message(
                ChannelId::from("chB"),
                MessageId::from(id),
                UserId::from("u1"),
                "g1",
                false,
            )
            .await
            .unwrap();
    }
    first.cleanup();
    drop(first);

    let output = Arc::new(RecordingOutput::default());
    let mut second = boot(&db, clock.clone(), output.clone()).await;
    let summary = second.unread().get_summary().await.unwrap();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].unread_count, 2);

    second
        .on_external_message(
            ChannelId::from("chA"),
            MessageId::from("m9"),
            UserId::from("u1"),
            "g1",
            true,
        )
        .await
        .unwrap();
    assert_eq!(
        output.agent_texts(),
        vec![
            "[Lifecycle] 12:00:00 Switched to AWAKE_WATCHING. (focus: chA)".to_owned(),
            "=== Unread summary ===\nch:chB - 2 unread".to_owned(),
        ]
    );
}

#[tokio::test]
async fn restart_in_sleep_window_defers_sleep_until_watching_ends() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("presence.db");
    let clock = Arc::new(ManualClock::new(noon()));

    let mut first = boot(&db, clock.clone(), Arc::new(RecordingOutput::default())).await;
    first
        .on_external_message(
            ChannelId::from("chA"),
            MessageId::from("m1"),
            UserId::from("u1"),
            "g1",
            true,
        )
        .await
        .unwrap();
    first.cleanup();
    drop(first);

    // 03:00 the next day, inside the 02:30-10:30 window.
    clock.advance(Duration::hours(15));
    let mut second = boot(&db, clock.clone(), Arc::new(RecordingOutput::default())).await;
    assert_eq!(
        second.get_state(),
        LifeState::watching(ChannelId::from("chA"))
    );

    second.set_not_watching().await.unwrap();
    assert_eq!(second.get_state(), LifeState::off());

    let third = boot(&db, clock.clone(), Arc::new(RecordingOutput::default())).await;
    assert_eq!(third.get_state(), LifeState::off());
}
