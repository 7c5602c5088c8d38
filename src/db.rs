use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "attendance.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            roll_no INTEGER NOT NULL,
            course_type TEXT NOT NULL,
            year INTEGER NOT NULL,
            stream TEXT NOT NULL DEFAULT '',
            section TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class
         ON students(course_type, year, stream, section)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable_periods(
            course_type TEXT NOT NULL,
            year INTEGER NOT NULL,
            stream TEXT NOT NULL DEFAULT '',
            section TEXT NOT NULL DEFAULT '',
            weekday INTEGER NOT NULL,
            period_no INTEGER NOT NULL,
            subject_code TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            PRIMARY KEY(course_type, year, stream, section, weekday, period_no)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS holidays(
            date TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            affected_course_types TEXT NOT NULL DEFAULT 'all'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS leaves(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            from_date TEXT NOT NULL,
            to_date TEXT NOT NULL,
            reason TEXT NOT NULL,
            approved_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leaves_student ON leaves(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leaves_range ON leaves(from_date, to_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS emergency_leaves(
            course_type TEXT NOT NULL,
            year INTEGER NOT NULL,
            stream TEXT NOT NULL DEFAULT '',
            section TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL,
            affected_periods TEXT NOT NULL DEFAULT '',
            reason TEXT NOT NULL,
            declared_at TEXT NOT NULL,
            PRIMARY KEY(course_type, year, stream, section, date)
        )",
        [],
    )?;

    // Durable remote store. One row per (student, slot) natural key.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            student_id TEXT NOT NULL,
            course_type TEXT NOT NULL,
            year INTEGER NOT NULL,
            stream TEXT NOT NULL DEFAULT '',
            section TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL,
            period_no INTEGER NOT NULL,
            mark TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            audit_note TEXT,
            PRIMARY KEY(student_id, course_type, year, stream, section, date, period_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_slot
         ON attendance_records(course_type, year, stream, section, date, period_no)",
        [],
    )?;

    // Best-effort local mirror. pending=1 rows have not reached the
    // remote store yet and are replayed by reconciliation.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_cache(
            student_id TEXT NOT NULL,
            course_type TEXT NOT NULL,
            year INTEGER NOT NULL,
            stream TEXT NOT NULL DEFAULT '',
            section TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL,
            period_no INTEGER NOT NULL,
            mark TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            audit_note TEXT,
            pending INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(student_id, course_type, year, stream, section, date, period_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_cache_pending
         ON attendance_cache(pending)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_locks(
            course_type TEXT NOT NULL,
            year INTEGER NOT NULL,
            stream TEXT NOT NULL DEFAULT '',
            section TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL,
            period_no INTEGER NOT NULL,
            locked_at TEXT NOT NULL,
            unlocks_at TEXT NOT NULL,
            PRIMARY KEY(course_type, year, stream, section, date, period_no)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS missed_sections(
            course_type TEXT NOT NULL,
            year INTEGER NOT NULL,
            stream TEXT NOT NULL DEFAULT '',
            section TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL,
            period_no INTEGER NOT NULL,
            subject_name TEXT NOT NULL,
            day_of_week TEXT NOT NULL,
            detected_at TEXT NOT NULL,
            priority TEXT NOT NULL,
            is_completed INTEGER NOT NULL DEFAULT 0,
            completed_at TEXT,
            PRIMARY KEY(course_type, year, stream, section, date, period_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_missed_sections_open
         ON missed_sections(is_completed, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    ensure_audit_note_columns(&conn)?;

    Ok(conn)
}

// Workspaces created before the history-edit path shipped lack the
// audit_note column. Add it where missing.
fn ensure_audit_note_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "attendance_records", "audit_note")? {
        conn.execute(
            "ALTER TABLE attendance_records ADD COLUMN audit_note TEXT",
            [],
        )?;
    }
    if !table_has_column(conn, "attendance_cache", "audit_note")? {
        conn.execute("ALTER TABLE attendance_cache ADD COLUMN audit_note TEXT", [])?;
    }
    Ok(())
}

pub fn settings_get(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
    let v = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get::<_, String>(0)
        })
        .optional()?;
    Ok(v)
}

pub fn settings_set(conn: &Connection, key: &str, value: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, value),
    )?;
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
