// HTML email templates for the notification flow.
// The visual markup is a presentation detail; the informational fields
// (assignee, project, title, description, due date, link) are the contract.

use crate::mailer::EmailMessage;
use crate::models::TaskDetail;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Render a due date as a calendar date in the configured zone
pub fn format_due_date(due_date: DateTime<Utc>, timezone: Tz) -> String {
    due_date.with_timezone(&timezone).format("%B %d, %Y").to_string()
}

/// Email sent immediately when a task is assigned
pub fn assignment_email(task: &TaskDetail, origin: &str, timezone: Tz) -> EmailMessage {
    let due = format_due_date(task.due_date, timezone);

    let body_html = format!(
        r#"<div style="max-width: 600px; padding: 20px; font-family: Arial, sans-serif; color: #333;">

  <h2 style="margin-bottom: 10px;">
    Hi {assignee},
  </h2>

  <p style="font-size: 16px; margin: 0 0 12px;">
    You have been assigned a new task.
  </p>

  <p style="font-size: 20px; font-weight: bold; color: #0078ff; margin: 8px 0;">
    {title}
  </p>

  <div style="border: 1px solid #ddd; padding: 12px 16px; border-radius: 6px; margin: 20px 0; background: #fafafa;">
    <p style="margin: 6px 0;">
      <strong>Description:</strong><br/>
      {description}
    </p>

    <p style="margin: 6px 0;">
      <strong>Due Date:</strong> {due}
    </p>
  </div>

  <a href="{origin}" style="display: inline-block; padding: 12px 20px; background-color: #0078ff; color: #fff; text-decoration: none; border-radius: 6px; font-weight: bold;">
    View Task
  </a>

  <p style="margin-top: 30px; font-size: 12px; color: #777;">
    This is an automated message. Please do not reply.
  </p>

</div>
"#,
        assignee = task.assignee_name,
        title = task.title,
        description = task.description,
        due = due,
        origin = origin,
    );

    EmailMessage {
        to: task.assignee_email.clone(),
        subject: format!("New Task Assignment in {}", task.project_name),
        body_html,
    }
}

/// Follow-up email sent at the due date when the task is still not done.
/// Same informational content as the assignment email plus an urgency note.
pub fn reminder_email(task: &TaskDetail, origin: &str, timezone: Tz) -> EmailMessage {
    let due = format_due_date(task.due_date, timezone);

    let body_html = format!(
        r#"<div style="max-width: 600px; padding: 20px; font-family: Arial, sans-serif; color: #333;">

  <h2 style="margin-bottom: 10px;">
    Hi {assignee},
  </h2>

  <p style="font-size: 16px; margin: 0 0 12px;">
    This is a reminder for a pending task in <strong>{project}</strong>.
  </p>

  <p style="font-size: 20px; font-weight: bold; color: #007bff; margin: 8px 0;">
    {title}
  </p>

  <div style="border: 1px solid #ddd; padding: 12px 16px; border-radius: 6px; margin: 20px 0; background: #fafafa;">
    <p style="margin: 6px 0;">
      <strong>Description:</strong><br/>
      {description}
    </p>

    <p style="margin: 6px 0;">
      <strong>Due Date:</strong> {due}
    </p>

    <p style="margin: 6px 0; color: #cc0000; font-weight: bold;">
      Please take action: the deadline has been reached.
    </p>
  </div>

  <a href="{origin}" style="display: inline-block; padding: 12px 20px; background-color: #007bff; color: #fff !important; text-decoration: none; border-radius: 6px; font-weight: bold;">
    View Task
  </a>

  <p style="margin-top: 30px; font-size: 12px; color: #777;">
    This is an automated reminder. Please do not reply to this email.
  </p>

</div>
"#,
        assignee = task.assignee_name,
        project = task.project_name,
        title = task.title,
        description = task.description,
        due = due,
        origin = origin,
    );

    EmailMessage {
        to: task.assignee_email.clone(),
        subject: format!("Reminder for {}", task.project_name),
        body_html,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn sample_task() -> TaskDetail {
        TaskDetail {
            id: Uuid::new_v4(),
            title: "Ship the release notes".to_string(),
            description: "Summarize the changes for 2.4".to_string(),
            due_date: Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap(),
            status: TaskStatus::Todo,
            assignee_id: "user_1".to_string(),
            assignee_name: "Ana".to_string(),
            assignee_email: "a@x.com".to_string(),
            project_id: Uuid::new_v4(),
            project_name: "Docs".to_string(),
        }
    }

    #[test]
    fn test_assignment_email_carries_all_fields() {
        let task = sample_task();
        let message = assignment_email(&task, "https://app.example.com/t/1", chrono_tz::UTC);

        assert_eq!(message.to, "a@x.com");
        assert_eq!(message.subject, "New Task Assignment in Docs");
        assert!(message.body_html.contains("Ana"));
        assert!(message.body_html.contains("Ship the release notes"));
        assert!(message.body_html.contains("Summarize the changes for 2.4"));
        assert!(message.body_html.contains("March 10, 2025"));
        assert!(message.body_html.contains("https://app.example.com/t/1"));
    }

    #[test]
    fn test_reminder_email_has_urgency_note() {
        let task = sample_task();
        let message = reminder_email(&task, "https://app.example.com/t/1", chrono_tz::UTC);

        assert_eq!(message.subject, "Reminder for Docs");
        assert!(message.body_html.contains("reminder for a pending task"));
        assert!(message.body_html.contains("deadline has been reached"));
        assert!(message.body_html.contains("March 10, 2025"));
    }

    #[test]
    fn test_due_date_uses_configured_zone() {
        // 2025-03-10 01:30 UTC is still March 9 in Los Angeles
        let due = Utc.with_ymd_and_hms(2025, 3, 10, 1, 30, 0).unwrap();
        let formatted = format_due_date(due, chrono_tz::America::Los_Angeles);
        assert_eq!(formatted, "March 09, 2025");
    }
}
