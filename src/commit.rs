use crate::mapping::StudentRowInput;
use crate::notify;
use crate::resolve::ResolvedRefs;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub account_type: String,
}

/// A row that passed validation and resolution and is ready to persist.
#[derive(Debug, Clone)]
pub struct PreparedRow {
    pub input: StudentRowInput,
    pub formatted_dob: String,
    pub refs: ResolvedRefs,
}

#[derive(Debug, Clone)]
pub struct RowError {
    pub row: usize,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct CommitOutcome {
    pub success_count: usize,
    pub errors: Vec<RowError>,
}

pub fn load_actor(conn: &Connection, account_id: &str) -> anyhow::Result<Option<Actor>> {
    let actor = conn
        .query_row(
            "SELECT id, account_type FROM accounts WHERE id = ?",
            [account_id],
            |r| {
                Ok(Actor {
                    id: r.get(0)?,
                    account_type: r.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(actor)
}

pub fn uid_exists(conn: &Connection, uid: &str) -> anyhow::Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM students WHERE uid = ?", [uid], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?;
    Ok(found.is_some())
}

/// Persist accepted rows in file order. Each row is its own unit of work:
/// the batch is deliberately not wrapped in a transaction so a partial
/// failure leaves earlier rows committed, and the uid check here (not the
/// preview's) is the authoritative one — it also makes later rows observe
/// uids committed earlier in the same batch, so re-running a partially
/// failed batch is safe.
pub fn commit_rows(
    conn: &Connection,
    actor: &Actor,
    rows: &[PreparedRow],
) -> anyhow::Result<CommitOutcome> {
    let mut outcome = CommitOutcome::default();

    for prepared in rows {
        let row_number = prepared.input.row_number;
        match commit_one(conn, actor, prepared) {
            Ok(()) => outcome.success_count += 1,
            Err(e) => outcome.errors.push(RowError {
                row: row_number,
                error: e.to_string(),
            }),
        }
    }

    Ok(outcome)
}

fn commit_one(conn: &Connection, actor: &Actor, prepared: &PreparedRow) -> anyhow::Result<()> {
    let input = &prepared.input;
    let uid = input.uid.trim();

    if uid_exists(conn, uid)? {
        anyhow::bail!("UID already exists: {}", uid);
    }

    let is_school = actor.account_type == "school";
    let guardian_id = if is_school {
        resolve_or_create_parent(conn, input)?
    } else {
        actor.id.clone()
    };

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(
            id, uid, name, dob, gender, nationality, city, class_grade,
            blood_group, sport_id, distance_id, sport_sub_type_id,
            age_category_id, medical_conditions, created_at
        ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &student_id,
            uid,
            input.name.trim(),
            &prepared.formatted_dob,
            input.gender.trim().to_lowercase(),
            input.nationality.trim(),
            input.city.trim(),
            input.class_grade.trim(),
            input.blood_group.trim(),
            &prepared.refs.sport_id,
            &prepared.refs.distance_id,
            &prepared.refs.sport_sub_type_id,
            &prepared.refs.age_category_id,
            input.medical_conditions.trim(),
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;

    let relationship = match input.relationship.trim() {
        "father" | "mother" | "guardian" | "coach" | "other" => input.relationship.trim(),
        _ => "guardian",
    };
    let school_id = if is_school { Some(actor.id.as_str()) } else { None };
    let link_id = Uuid::new_v4().to_string();
    let link = conn.execute(
        "INSERT INTO parent_students(id, parent_id, student_id, school_id, relationship)
         VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![&link_id, &guardian_id, &student_id, school_id, relationship],
    );

    if let Err(link_err) = link {
        // Compensating action: a student without a responsible guardian
        // must not survive the failed link.
        if let Err(del_err) = conn.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
            log::error!(
                "orphan risk: student {} (uid {}) kept after link failure and compensating delete failed: {}",
                student_id,
                uid,
                del_err
            );
        }
        anyhow::bail!("failed to link parent to student: {}", link_err);
    }

    Ok(())
}

/// School uploads name the responsible parent per row; the account is
/// looked up by email and created on first reference, which queues the
/// welcome notification.
fn resolve_or_create_parent(conn: &Connection, input: &StudentRowInput) -> anyhow::Result<String> {
    let email = input.parent_email.trim();
    if email.is_empty() {
        anyhow::bail!("Parent email is required for school uploads");
    }

    let existing = conn
        .query_row(
            "SELECT id FROM accounts WHERE email = ?",
            [email],
            |r| r.get::<_, String>(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let parent_name = if input.parent_name.trim().is_empty() {
        email
    } else {
        input.parent_name.trim()
    };
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO accounts(id, account_type, name, email, phone_number, country_code)
         VALUES(?, 'parent', ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            parent_name,
            email,
            input.phone_number.trim(),
            input.country_code.trim(),
        ],
    )?;
    notify::queue_welcome_email(conn, email, parent_name)?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seed_actor(conn: &Connection, account_type: &str, email: &str) -> Actor {
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO accounts(id, account_type, name, email) VALUES(?, ?, ?, ?)",
            rusqlite::params![&id, account_type, "Seed Account", email],
        )
        .expect("seed actor");
        Actor {
            id,
            account_type: account_type.to_string(),
        }
    }

    fn seed_sport(conn: &Connection) -> String {
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO sports(id, name, hidden) VALUES(?, 'Running', 0)",
            [&id],
        )
        .expect("seed sport");
        id
    }

    fn prepared(uid: &str, row_number: usize, sport_id: &str) -> PreparedRow {
        PreparedRow {
            input: StudentRowInput {
                row_number,
                name: "Aisha Khan".into(),
                uid: uid.into(),
                dob: "14-Sep-2008".into(),
                gender: "female".into(),
                blood_group: "O+".into(),
                relationship: "mother".into(),
                parent_email: "parent@example.com".into(),
                parent_name: "Rehana Khan".into(),
                ..Default::default()
            },
            formatted_dob: "14-Sep-2008".into(),
            refs: ResolvedRefs {
                sport_id: sport_id.to_string(),
                ..Default::default()
            },
        }
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |r| r.get(0)).expect("count")
    }

    #[test]
    fn commits_link_student_to_submitting_parent() {
        let conn = db::open_in_memory().expect("db");
        let actor = seed_actor(&conn, "parent", "self@example.com");
        let sport = seed_sport(&conn);

        let out = commit_rows(&conn, &actor, &[prepared("NID-1", 2, &sport)]).expect("commit");
        assert_eq!(out.success_count, 1);
        assert!(out.errors.is_empty());
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM students"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM parent_students"), 1);
        // Submitting parent is the guardian; no new account, no email.
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM accounts"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM outbox_emails"), 0);
    }

    #[test]
    fn school_upload_creates_parent_account_once_and_queues_welcome() {
        let conn = db::open_in_memory().expect("db");
        let actor = seed_actor(&conn, "school", "school@example.com");
        let sport = seed_sport(&conn);

        let out = commit_rows(
            &conn,
            &actor,
            &[prepared("NID-1", 2, &sport), prepared("NID-2", 3, &sport)],
        )
        .expect("commit");
        assert_eq!(out.success_count, 2);
        // One school + one created parent shared by both rows.
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM accounts"), 2);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM outbox_emails"), 1);
        let school_links = count(
            &conn,
            "SELECT COUNT(*) FROM parent_students WHERE school_id IS NOT NULL",
        );
        assert_eq!(school_links, 2);
    }

    #[test]
    fn duplicate_uid_in_store_rejects_row_but_not_siblings() {
        let conn = db::open_in_memory().expect("db");
        let actor = seed_actor(&conn, "parent", "self@example.com");
        let sport = seed_sport(&conn);

        let first = commit_rows(&conn, &actor, &[prepared("NID-1", 2, &sport)]).expect("commit");
        assert_eq!(first.success_count, 1);

        let second = commit_rows(
            &conn,
            &actor,
            &[prepared("NID-1", 2, &sport), prepared("NID-9", 3, &sport)],
        )
        .expect("commit");
        assert_eq!(second.success_count, 1);
        assert_eq!(second.errors.len(), 1);
        assert_eq!(second.errors[0].row, 2);
        assert_eq!(second.errors[0].error, "UID already exists: NID-1");
    }

    #[test]
    fn same_uid_twice_in_one_batch_commits_only_the_first() {
        let conn = db::open_in_memory().expect("db");
        let actor = seed_actor(&conn, "parent", "self@example.com");
        let sport = seed_sport(&conn);

        let out = commit_rows(
            &conn,
            &actor,
            &[prepared("NID-1", 2, &sport), prepared("NID-1", 5, &sport)],
        )
        .expect("commit");
        assert_eq!(out.success_count, 1);
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].row, 5);
    }

    #[test]
    fn failed_link_rolls_back_the_student() {
        let conn = db::open_in_memory().expect("db");
        let actor = seed_actor(&conn, "parent", "self@example.com");
        let sport = seed_sport(&conn);

        conn.execute("DROP TABLE parent_students", [])
            .expect("drop link table");

        let out = commit_rows(&conn, &actor, &[prepared("NID-1", 2, &sport)]).expect("commit");
        assert_eq!(out.success_count, 0);
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].error.starts_with("failed to link parent to student"));
        // Compensating delete removed the half-committed student.
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM students"), 0);
    }

    #[test]
    fn school_upload_without_parent_email_is_a_row_error() {
        let conn = db::open_in_memory().expect("db");
        let actor = seed_actor(&conn, "school", "school@example.com");
        let sport = seed_sport(&conn);

        let mut row = prepared("NID-1", 2, &sport);
        row.input.parent_email.clear();
        let out = commit_rows(&conn, &actor, &[row]).expect("commit");
        assert_eq!(out.success_count, 0);
        assert_eq!(
            out.errors[0].error,
            "Parent email is required for school uploads"
        );
    }
}
