use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("roster.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

/// In-memory variant used by stage tests; same schema and migrations.
#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts(
            id TEXT PRIMARY KEY,
            account_type TEXT NOT NULL,
            name TEXT NOT NULL,
            email TEXT NOT NULL COLLATE NOCASE UNIQUE,
            phone_number TEXT,
            country_code TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sports(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT,
            hidden INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sports_name ON sports(name COLLATE NOCASE)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS distances(
            id TEXT PRIMARY KEY,
            sport_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(sport_id) REFERENCES sports(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_distances_sport ON distances(sport_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sport_sub_types(
            id TEXT PRIMARY KEY,
            sport_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(sport_id) REFERENCES sports(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sport_sub_types_sport ON sport_sub_types(sport_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS age_categories(
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            max_age INTEGER
        )",
        [],
    )?;
    ensure_age_categories_max_age(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            uid TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            dob TEXT NOT NULL,
            gender TEXT NOT NULL,
            nationality TEXT,
            city TEXT,
            class_grade TEXT,
            blood_group TEXT NOT NULL DEFAULT 'Unknown',
            sport_id TEXT NOT NULL,
            distance_id TEXT,
            sport_sub_type_id TEXT,
            age_category_id TEXT,
            medical_conditions TEXT,
            created_at TEXT,
            FOREIGN KEY(sport_id) REFERENCES sports(id),
            FOREIGN KEY(distance_id) REFERENCES distances(id),
            FOREIGN KEY(sport_sub_type_id) REFERENCES sport_sub_types(id),
            FOREIGN KEY(age_category_id) REFERENCES age_categories(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_sport ON students(sport_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parent_students(
            id TEXT PRIMARY KEY,
            parent_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            school_id TEXT,
            relationship TEXT NOT NULL,
            FOREIGN KEY(parent_id) REFERENCES accounts(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(school_id) REFERENCES accounts(id),
            UNIQUE(parent_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_parent_students_parent ON parent_students(parent_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_parent_students_student ON parent_students(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS outbox_emails(
            id TEXT PRIMARY KEY,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;

    Ok(())
}

/// Older workspaces carried the age ceiling only inside the label text
/// ("Under 17", "U17"). Add the explicit column and backfill it once;
/// runtime category selection reads max_age only.
fn ensure_age_categories_max_age(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "age_categories", "max_age")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE age_categories ADD COLUMN max_age INTEGER", [])?;

    let mut stmt = conn.prepare("SELECT id, label FROM age_categories")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (id, label) in rows {
        if let Some(ceiling) = crate::age::ceiling_from_label(&label) {
            conn.execute(
                "UPDATE age_categories SET max_age = ? WHERE id = ?",
                (ceiling, &id),
            )?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
