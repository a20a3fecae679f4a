use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "academy.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            address TEXT,
            phone TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            schedule TEXT,
            monthly_fee REAL NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_school ON courses(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            control_no TEXT NOT NULL UNIQUE,
            school_id TEXT NOT NULL,
            course_id TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            tutor_name TEXT,
            tutor_phone TEXT,
            email TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            debt_months INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_course ON students(course_id)",
        [],
    )?;

    // Existing workspaces may predate the cached debt column. Add and leave at 0;
    // students.recomputeDebt refreshes it on demand.
    ensure_students_debt_months(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS banks(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            receipt_no TEXT NOT NULL UNIQUE,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            month TEXT NOT NULL,
            amount REAL NOT NULL,
            liquidated INTEGER NOT NULL DEFAULT 0,
            method TEXT NOT NULL DEFAULT 'cash',
            bank_id TEXT,
            reference TEXT,
            notes TEXT,
            paid_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(bank_id) REFERENCES banks(id)
        )",
        [],
    )?;
    ensure_payments_reference(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_course ON payments(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student_month ON payments(student_id, course_id, month)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS suppliers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            contact_name TEXT,
            phone TEXT,
            email TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS expenses(
            id TEXT PRIMARY KEY,
            supplier_id TEXT NOT NULL,
            concept TEXT NOT NULL,
            amount REAL NOT NULL,
            spent_at TEXT NOT NULL,
            receipt_ref TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(supplier_id) REFERENCES suppliers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_expenses_supplier ON expenses(supplier_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_expenses_spent_at ON expenses(spent_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            password_salt TEXT NOT NULL,
            role TEXT NOT NULL,
            display_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            entity TEXT NOT NULL,
            entity_id TEXT,
            detail TEXT,
            at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_at ON activities(at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS email_templates(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS email_outbox(
            id TEXT PRIMARY KEY,
            template_id TEXT,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            status TEXT NOT NULL,
            queued_at TEXT NOT NULL,
            FOREIGN KEY(template_id) REFERENCES email_templates(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_email_outbox_queued ON email_outbox(queued_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sequences(
            scope TEXT NOT NULL,
            prefix TEXT NOT NULL,
            last_value INTEGER NOT NULL,
            PRIMARY KEY(scope, prefix)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

/// Allocate the next value in a named sequence. The upsert is atomic at the
/// SQLite level, so two inserts in the same workspace can never observe the
/// same value; the UNIQUE constraints on receipt/control numbers are the
/// backstop. Values only ever grow, so deleting a row never frees its number.
pub fn next_sequence(conn: &Connection, scope: &str, prefix: &str) -> anyhow::Result<i64> {
    let v = conn.query_row(
        "INSERT INTO sequences(scope, prefix, last_value) VALUES(?, ?, 1)
         ON CONFLICT(scope, prefix) DO UPDATE SET last_value = last_value + 1
         RETURNING last_value",
        (scope, prefix),
        |r| r.get(0),
    )?;
    Ok(v)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

pub fn log_activity(
    conn: &Connection,
    actor: &str,
    action: &str,
    entity: &str,
    entity_id: Option<&str>,
    detail: Option<&str>,
) {
    // The activity log must never fail a mutation; drop the entry on error.
    let res = conn.execute(
        "INSERT INTO activities(id, actor, action, entity, entity_id, detail, at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            uuid::Uuid::new_v4().to_string(),
            actor,
            action,
            entity,
            entity_id,
            detail,
            now_iso(),
        ),
    );
    if let Err(e) = res {
        tracing::warn!(error = %e, action, entity, "failed to record activity");
    }
}

fn ensure_students_debt_months(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "debt_months")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN debt_months INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_payments_reference(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "payments", "reference")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE payments ADD COLUMN reference TEXT", [])?;
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
