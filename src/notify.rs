use rusqlite::Connection;
use uuid::Uuid;

/// Outbound delivery is somebody else's job; the daemon only queues.
/// A separate worker drains outbox_emails.
pub fn queue_welcome_email(
    conn: &Connection,
    recipient: &str,
    parent_name: &str,
) -> anyhow::Result<()> {
    let id = Uuid::new_v4().to_string();
    let body = format!(
        "Hello {},\n\nAn account was created for you so you can follow your \
         student's registrations and event check-ins. Use this email address \
         to sign in and set a password.\n",
        parent_name
    );
    conn.execute(
        "INSERT INTO outbox_emails(id, recipient, subject, body, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &id,
            recipient,
            "Welcome to the registration portal",
            &body,
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    log::info!("queued welcome email for {}", recipient);
    Ok(())
}
