use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row as SqlRow};
use serde_json::Map;
use std::path::Path;

pub const DB_FILE: &str = "tracker.sqlite3";

/// Tables owned by the daemon itself; everything else in the store is a dataset.
pub const INTERNAL_PREFIX: &str = "app_";

pub type Row = Map<String, serde_json::Value>;

/// Stripped from both ends of identifier and division cells. SQLite's
/// one-argument `TRIM` only strips spaces, so SQL goes through
/// [`trimmed_text_sql`] with this same set.
pub const TRIM_CHARS: &[char] = &[' ', '\t', '\n', '\u{b}', '\u{c}', '\r', '\u{a0}'];

pub fn trim_cell(s: &str) -> &str {
    s.trim_matches(TRIM_CHARS)
}

/// `TRIM(CAST(expr AS TEXT), <TRIM_CHARS>)`. `quoted` must already be quoted.
pub fn trimmed_text_sql(quoted: &str) -> String {
    let set: String = TRIM_CHARS.iter().collect();
    format!("TRIM(CAST({quoted} AS TEXT), '{set}')")
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(DB_FILE))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS app_users(
            email TEXT PRIMARY KEY COLLATE NOCASE,
            name TEXT NOT NULL,
            division TEXT NOT NULL,
            password_sha256 TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS app_datasets(
            table_name TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            fixed_columns INTEGER NOT NULL,
            read_only INTEGER NOT NULL DEFAULT 0,
            is_unified INTEGER NOT NULL DEFAULT 0,
            prefix TEXT
        )",
        [],
    )?;
    // At most one unified dataset.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_app_datasets_unified
         ON app_datasets(is_unified) WHERE is_unified = 1",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS app_column_roles(
            table_name TEXT NOT NULL,
            role TEXT NOT NULL,
            column_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(table_name, role, column_name),
            FOREIGN KEY(table_name) REFERENCES app_datasets(table_name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS app_edit_log(
            id TEXT PRIMARY KEY,
            edited_at TEXT NOT NULL,
            user_email TEXT NOT NULL,
            table_name TEXT NOT NULL,
            row_id INTEGER NOT NULL,
            changes_json TEXT NOT NULL,
            sync_outcome TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_app_edit_log_table ON app_edit_log(table_name)",
        [],
    )?;

    crate::catalog::seed_defaults(conn)?;
    Ok(())
}

/// Quote a table or column name for interpolation into SQL text.
///
/// This is the only place identifiers are escaped; values are always bound.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Ordered column names of a table, read live from the store.
pub fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let mut stmt = conn.prepare(&sql)?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cols)
}

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Dataset tables present in the store, in name order.
pub fn dataset_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table'
           AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
           AND name NOT LIKE 'app\\_%' ESCAPE '\\'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

pub fn count_rows(conn: &Connection, table: &str) -> rusqlite::Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    conn.query_row(&sql, [], |r| r.get(0))
}

pub fn fetch_row_by_id(
    conn: &Connection,
    table: &str,
    columns: &[String],
    row_id: i64,
) -> rusqlite::Result<Option<Row>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE \"id\" = ?",
        select_list(columns),
        quote_ident(table)
    );
    conn.query_row(&sql, [row_id], |r| read_row(r, columns))
        .optional()
}

pub fn select_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn placeholders(n: usize) -> String {
    std::iter::repeat_n("?", n).collect::<Vec<_>>().join(",")
}

pub fn read_row(row: &SqlRow<'_>, columns: &[String]) -> rusqlite::Result<Row> {
    let mut out = Row::new();
    for (i, name) in columns.iter().enumerate() {
        out.insert(name.clone(), sql_to_json(row.get_ref(i)?));
    }
    Ok(out)
}

pub fn sql_to_json(v: ValueRef<'_>) -> serde_json::Value {
    match v {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => serde_json::Value::Null,
    }
}

pub fn json_to_sql(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

/// Text form of a cell, matching what SQLite's `CAST(x AS TEXT)` produces for
/// the common cases so Rust-side and SQL-side comparisons agree.
pub fn value_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => i64::from(*b).to_string(),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64() {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            } else {
                n.to_string()
            }
        }
        other => other.to_string(),
    }
}
