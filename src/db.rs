use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("daybook.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates the schema idempotently. Account references in classes, students,
/// links and evaluations are plain text columns, not foreign keys: deleting an
/// account deliberately leaves those rows dangling, so enforcement would only
/// get in the way.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            full_name TEXT,
            managed_by TEXT,
            password_hash TEXT NOT NULL,
            password_salt TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    ensure_accounts_managed_by(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_accounts_managed_by ON accounts(managed_by)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS account_roles(
            account_id TEXT NOT NULL,
            role TEXT NOT NULL,
            PRIMARY KEY(account_id, role)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_account_roles_role ON account_roles(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token_hash TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_account ON sessions(account_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            school_year TEXT,
            teacher_id TEXT,
            coordinator_id TEXT,
            created_by TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_created_by ON classes(created_by)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_teacher ON classes(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_name TEXT,
            class_id TEXT,
            created_by TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_created_by ON students(created_by)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parent_student_links(
            parent_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(parent_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_parent_links_student ON parent_student_links(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_evaluations(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            evaluation_date TEXT NOT NULL,
            behavior_rating TEXT,
            eating_rating TEXT,
            sleep_rating TEXT,
            social_rating TEXT,
            daily_notes TEXT,
            created_by TEXT NOT NULL,
            updated_at TEXT,
            UNIQUE(student_id, evaluation_date)
        )",
        [],
    )?;
    ensure_evaluations_updated_at(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_student ON daily_evaluations(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_date ON daily_evaluations(evaluation_date)",
        [],
    )?;

    Ok(())
}

fn ensure_accounts_managed_by(conn: &Connection) -> anyhow::Result<()> {
    // Workspaces created before the supervision hierarchy existed lack this column.
    if table_has_column(conn, "accounts", "managed_by")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE accounts ADD COLUMN managed_by TEXT", [])?;
    Ok(())
}

fn ensure_evaluations_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "daily_evaluations", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE daily_evaluations ADD COLUMN updated_at TEXT", [])?;
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
