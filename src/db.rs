use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "mockexam.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            subject TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_stage_requirements(
            exam_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            form_data TEXT NOT NULL,
            notes TEXT,
            completed INTEGER NOT NULL DEFAULT 0,
            completed_at TEXT,
            updated_at TEXT,
            PRIMARY KEY(exam_id, stage),
            FOREIGN KEY(exam_id) REFERENCES exams(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_instructions(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            audience TEXT NOT NULL,
            instructions TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(exam_id) REFERENCES exams(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_instructions_exam ON exam_instructions(exam_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS question_bank(
            id TEXT PRIMARY KEY,
            subject TEXT,
            prompt TEXT NOT NULL,
            question_type TEXT NOT NULL,
            default_marks REAL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_question_bank_subject ON question_bank(subject)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_question_selections(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            source_type TEXT NOT NULL,
            question_id TEXT,
            custom_question TEXT,
            marks REAL NOT NULL,
            sequence INTEGER NOT NULL,
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(question_id) REFERENCES question_bank(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_question_selections_exam ON exam_question_selections(exam_id, sequence)",
        [],
    )?;
    // Workspaces created before optional questions existed lack the column.
    ensure_selections_is_optional(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_status_history(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            from_stage TEXT NOT NULL,
            to_stage TEXT NOT NULL,
            reason TEXT,
            completed INTEGER,
            changed_at TEXT NOT NULL,
            FOREIGN KEY(exam_id) REFERENCES exams(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_status_history_exam ON exam_status_history(exam_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_drafts(
            draft_key TEXT PRIMARY KEY,
            form_json TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            saved_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM workspace_settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO workspace_settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn ensure_selections_is_optional(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "exam_question_selections", "is_optional")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE exam_question_selections ADD COLUMN is_optional INTEGER NOT NULL DEFAULT 0",
        [],
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
