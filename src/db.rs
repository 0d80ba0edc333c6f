use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("homeroom.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            role TEXT NOT NULL,
            grade_level TEXT,
            parent_email TEXT,
            class_ids TEXT NOT NULL,
            password_hash TEXT,
            active INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    // Workspaces created before the parent-contact field existed lack
    // this column. Add without backfill.
    ensure_users_parent_email(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            event_type TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT,
            all_day INTEGER NOT NULL,
            location TEXT,
            created_by TEXT NOT NULL,
            creator_name TEXT NOT NULL,
            class_id TEXT,
            assignment_id TEXT,
            participant_ids TEXT NOT NULL,
            participant_emails TEXT NOT NULL,
            color TEXT NOT NULL,
            recurrence TEXT NOT NULL,
            recurrence_end TEXT,
            has_reminder INTEGER NOT NULL,
            reminder_minutes INTEGER NOT NULL,
            metadata TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            active INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_created_by ON events(created_by)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_start ON events(start_time)",
        [],
    )?;

    ensure_events_recurrence_end(&conn)?;

    Ok(conn)
}

fn ensure_users_parent_email(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "users", "parent_email")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE users ADD COLUMN parent_email TEXT", [])?;
    Ok(())
}

fn ensure_events_recurrence_end(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "events", "recurrence_end")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE events ADD COLUMN recurrence_end TEXT", [])?;
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
