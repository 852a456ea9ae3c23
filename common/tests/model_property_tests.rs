// Property-based tests for models, templates, and retry bounds

use chrono::{TimeZone, Utc};
use common::mailer::templates;
use common::models::{MemberRole, RunState, TaskDetail, TaskStatus};
use common::retry::{ExponentialBackoff, RetryStrategy};
use proptest::prelude::*;
use std::str::FromStr;
use uuid::Uuid;

fn any_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Todo),
        Just(TaskStatus::InProgress),
        Just(TaskStatus::Done),
    ]
}

fn any_run_state() -> impl Strategy<Value = RunState> {
    prop_oneof![
        Just(RunState::Running),
        Just(RunState::Waiting),
        Just(RunState::Resuming),
        Just(RunState::Completed),
        Just(RunState::Cancelled),
        Just(RunState::Failed),
    ]
}

/// Every enum stored as text in the database round-trips through its
/// string form.
#[test]
fn property_status_strings_round_trip() {
    proptest!(|(status in any_status(), state in any_run_state())| {
        prop_assert_eq!(TaskStatus::from_str(&status.to_string()).unwrap(), status);
        prop_assert_eq!(RunState::from_str(&state.to_string()).unwrap(), state);
    });

    for role in [MemberRole::Admin, MemberRole::Member] {
        assert_eq!(MemberRole::from_str(&role.to_string()).unwrap(), role);
    }
}

/// Both templates always carry the informational fields the flow promises,
/// whatever the task contents are.
#[test]
fn property_templates_always_carry_the_task_fields() {
    proptest!(|(
        title in "[a-zA-Z0-9 ]{1,60}",
        description in "[a-zA-Z0-9 ]{0,120}",
        assignee_name in "[a-zA-Z ]{1,40}",
        project_name in "[a-zA-Z0-9 ]{1,40}",
        due_offset_days in 0i64..365,
    )| {
        let task = TaskDetail {
            id: Uuid::new_v4(),
            title: title.clone(),
            description: description.clone(),
            due_date: Utc::now() + chrono::Duration::days(due_offset_days),
            status: TaskStatus::Todo,
            assignee_id: "user_1".to_string(),
            assignee_name: assignee_name.clone(),
            assignee_email: "a@x.com".to_string(),
            project_id: Uuid::new_v4(),
            project_name: project_name.clone(),
        };
        let origin = "https://app.example.com/tasks";

        for message in [
            templates::assignment_email(&task, origin, chrono_tz::UTC),
            templates::reminder_email(&task, origin, chrono_tz::UTC),
        ] {
            prop_assert_eq!(&message.to, "a@x.com");
            prop_assert!(message.subject.contains(&project_name));
            prop_assert!(message.body_html.contains(&title));
            prop_assert!(message.body_html.contains(&description));
            prop_assert!(message.body_html.contains(&assignee_name));
            prop_assert!(message.body_html.contains(origin));
        }
    });
}

/// The calendar date rendered into emails matches the configured zone's
/// view of the timestamp.
#[test]
fn property_due_date_formatting_respects_the_zone() {
    proptest!(|(secs in 0i64..4_000_000_000)| {
        let due = Utc.timestamp_opt(secs, 0).unwrap();
        for tz in [chrono_tz::UTC, chrono_tz::Asia::Tokyo, chrono_tz::America::New_York] {
            let formatted = templates::format_due_date(due, tz);
            let expected = due.with_timezone(&tz).format("%B %d, %Y").to_string();
            prop_assert_eq!(formatted, expected);
        }
    });
}

/// Retry delays stay within [base, max + jitter] and the budget is finite.
#[test]
fn property_retry_delays_are_bounded() {
    proptest!(|(
        base_ms in 1u64..5_000,
        max_ms in 5_000u64..60_000,
        max_retries in 0u32..10,
    )| {
        let strategy = ExponentialBackoff::with_config(base_ms, max_ms, 0.1, max_retries);

        for attempt in 0..max_retries {
            let delay = strategy.next_delay(attempt);
            prop_assert!(delay.is_some());
            let ms = delay.unwrap().as_millis() as u64;
            prop_assert!(ms >= base_ms);
            // Jitter adds at most 10% on top of the cap
            prop_assert!(ms <= max_ms + max_ms / 10 + 1);
        }

        prop_assert!(strategy.next_delay(max_retries).is_none());
    });
}
