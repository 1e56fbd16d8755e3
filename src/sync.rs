//! Propagates subject-dataset edits into the unified dataset.
//!
//! Runs on the caller's transaction so the source update and the unified
//! upsert commit or roll back together.

use crate::catalog::{self, DatasetConfig};
use crate::columns::ID_COLUMN;
use crate::db::{self, Row};
use crate::identifier;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnifiedSource,
    NoIdentifier,
    NoUnifiedDataset,
    NoUnifiedIdentifierColumn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Updated {
        dataset: String,
        identifier: String,
        columns: Vec<String>,
    },
    Inserted {
        dataset: String,
        identifier: String,
        columns: Vec<String>,
    },
    Skipped {
        reason: SkipReason,
    },
}

impl SyncOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Updated { .. } => "updated",
            Self::Inserted { .. } => "inserted",
            Self::Skipped { .. } => "skipped",
        }
    }
}

fn unique_index_name(table: &str, column: &str) -> String {
    format!("uq_{table}_{column}_trimmed")
}

/// Unique index on the trimmed identifier so inserts can use `ON CONFLICT`.
/// Returns false when existing duplicates prevent it.
pub fn ensure_unique_identifier(conn: &Connection, table: &str, column: &str) -> bool {
    let sql = format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {}({})",
        db::quote_ident(&unique_index_name(table, column)),
        db::quote_ident(table),
        db::trimmed_text_sql(&db::quote_ident(column))
    );
    match conn.execute(&sql, []) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(
                table,
                column,
                error = %e,
                "cannot enforce one unified row per identifier; falling back to plain insert"
            );
            false
        }
    }
}

/// Upsert the unified row matching the edited row's identifier. Every column
/// shared by the unified schema and the merged row is copied, except `id`
/// and the identifier column itself.
pub fn sync_after_update(
    conn: &Connection,
    source: &DatasetConfig,
    source_columns: &[String],
    original: &Row,
    changes: &Row,
) -> rusqlite::Result<SyncOutcome> {
    if source.is_unified {
        return Ok(SyncOutcome::Skipped {
            reason: SkipReason::UnifiedSource,
        });
    }

    let mut merged = original.clone();
    for (k, v) in changes {
        merged.insert(k.clone(), v.clone());
    }

    let ident = identifier::find_identifier_column(source_columns, &source.roles)
        .and_then(|col| identifier::row_identifier(&merged, &col));
    let Some(ident) = ident else {
        return Ok(SyncOutcome::Skipped {
            reason: SkipReason::NoIdentifier,
        });
    };

    let Some(unified) = catalog::unified_dataset(conn)? else {
        return Ok(SyncOutcome::Skipped {
            reason: SkipReason::NoUnifiedDataset,
        });
    };
    let unified_columns = db::table_columns(conn, &unified.table_name)?;
    let Some(unified_ident) =
        identifier::find_identifier_column(&unified_columns, &unified.roles)
    else {
        return Ok(SyncOutcome::Skipped {
            reason: SkipReason::NoUnifiedIdentifierColumn,
        });
    };

    let matched: Vec<String> = unified_columns
        .iter()
        .filter(|c| c.as_str() != ID_COLUMN && **c != unified_ident && merged.contains_key(*c))
        .cloned()
        .collect();
    let values: Vec<Value> = matched.iter().map(|c| db::json_to_sql(&merged[c])).collect();

    let table = db::quote_ident(&unified.table_name);
    let ident_col = db::quote_ident(&unified_ident);
    let ident_expr = db::trimmed_text_sql(&ident_col);
    let indexed = ensure_unique_identifier(conn, &unified.table_name, &unified_ident);

    let updated = if !matched.is_empty() {
        let set = matched
            .iter()
            .map(|c| format!("{} = ?", db::quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut bind = values.clone();
        bind.push(Value::Text(ident.clone()));
        conn.execute(
            &format!("UPDATE {table} SET {set} WHERE {ident_expr} = ?"),
            params_from_iter(bind),
        )?
    } else if !indexed {
        let found: Option<i64> = conn
            .query_row(
                &format!("SELECT 1 FROM {table} WHERE {ident_expr} = ? LIMIT 1"),
                [&ident],
                |r| r.get(0),
            )
            .optional()?;
        usize::from(found.is_some())
    } else {
        // Nothing to copy; the guarded insert below reports whether the row exists.
        0
    };

    if updated > 0 {
        tracing::debug!(dataset = unified.table_name.as_str(), identifier = ident.as_str(), "unified row updated");
        return Ok(SyncOutcome::Updated {
            dataset: unified.table_name,
            identifier: ident,
            columns: matched,
        });
    }

    let mut insert_cols: Vec<String> = vec![ident_col.clone()];
    let mut insert_vals: Vec<String> = vec!["?".to_string()];
    let mut bind: Vec<Value> = vec![Value::Text(ident.clone())];
    if unified_columns.iter().any(|c| c == ID_COLUMN) {
        insert_cols.push("\"id\"".to_string());
        insert_vals.push(format!("(SELECT COALESCE(MAX(\"id\"), 0) + 1 FROM {table})"));
    }
    for (c, v) in matched.iter().zip(values) {
        insert_cols.push(db::quote_ident(c));
        insert_vals.push("?".to_string());
        bind.push(v);
    }

    let mut sql = format!(
        "INSERT INTO {table}({}) VALUES({})",
        insert_cols.join(", "),
        insert_vals.join(", ")
    );
    if indexed {
        if matched.is_empty() {
            sql.push_str(&format!(" ON CONFLICT({ident_expr}) DO NOTHING"));
        } else {
            let set = matched
                .iter()
                .map(|c| {
                    let q = db::quote_ident(c);
                    format!("{q} = excluded.{q}")
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ON CONFLICT({ident_expr}) DO UPDATE SET {set}"));
        }
    }
    let written = conn.execute(&sql, params_from_iter(bind))?;

    if written == 0 {
        tracing::debug!(dataset = unified.table_name.as_str(), identifier = ident.as_str(), "unified row already present");
        return Ok(SyncOutcome::Updated {
            dataset: unified.table_name,
            identifier: ident,
            columns: matched,
        });
    }
    tracing::info!(dataset = unified.table_name.as_str(), identifier = ident.as_str(), "unified row inserted");
    Ok(SyncOutcome::Inserted {
        dataset: unified.table_name,
        identifier: ident,
        columns: matched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn.execute_batch(
            "CREATE TABLE all_unique_schools(id INTEGER PRIMARY KEY, school_no TEXT, name TEXT, zone TEXT, status TEXT);
             INSERT INTO all_unique_schools VALUES(1, ' SCH-001', 'Hill', 'North', 'pending');

             CREATE TABLE asset_schools(id INTEGER PRIMARY KEY, school_no TEXT, name TEXT, zone TEXT, status TEXT, tested INTEGER);",
        )
        .expect("seed");
        conn
    }

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().expect("object")
    }

    fn unified_rows(conn: &Connection) -> Vec<(i64, String, Option<String>)> {
        let mut stmt = conn
            .prepare("SELECT id, TRIM(school_no), status FROM all_unique_schools ORDER BY id")
            .expect("prepare");
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("rows")
    }

    fn subject(conn: &Connection) -> (DatasetConfig, Vec<String>) {
        (
            catalog::config_for(conn, "asset_schools").expect("cfg"),
            db::table_columns(conn, "asset_schools").expect("cols"),
        )
    }

    #[test]
    fn updates_matching_unified_row() {
        let conn = store();
        let (cfg, cols) = subject(&conn);
        let original = row(json!({ "id": 7, "school_no": "SCH-001", "name": "Hill", "zone": "North", "status": "pending", "tested": 0 }));
        let changes = row(json!({ "status": "done" }));

        let outcome = sync_after_update(&conn, &cfg, &cols, &original, &changes).expect("sync");
        assert_eq!(
            outcome,
            SyncOutcome::Updated {
                dataset: "all_unique_schools".into(),
                identifier: "SCH-001".into(),
                columns: vec!["name".into(), "zone".into(), "status".into()],
            }
        );
        assert_eq!(
            unified_rows(&conn),
            vec![(1, "SCH-001".to_string(), Some("done".to_string()))]
        );
    }

    #[test]
    fn inserts_when_identifier_is_new_and_converges_on_repeat() {
        let conn = store();
        let (cfg, cols) = subject(&conn);
        let original = row(json!({ "id": 3, "school_no": "SCH-009", "name": "New", "zone": "South", "status": null }));
        let changes = row(json!({ "status": "visited" }));

        let first = sync_after_update(&conn, &cfg, &cols, &original, &changes).expect("sync");
        assert_eq!(first.label(), "inserted");
        let second = sync_after_update(&conn, &cfg, &cols, &original, &changes).expect("sync");
        assert_eq!(second.label(), "updated");

        let rows = unified_rows(&conn);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], (2, "SCH-009".to_string(), Some("visited".to_string())));
    }

    #[test]
    fn skips_without_identifier_or_unified_source() {
        let conn = store();
        let (cfg, cols) = subject(&conn);
        let blank = row(json!({ "id": 1, "school_no": "nan", "status": "x" }));
        let outcome = sync_after_update(&conn, &cfg, &cols, &blank, &Row::new()).expect("sync");
        assert_eq!(
            outcome,
            SyncOutcome::Skipped {
                reason: SkipReason::NoIdentifier
            }
        );

        let unified = catalog::config_for(&conn, "all_unique_schools").expect("cfg");
        let outcome = sync_after_update(
            &conn,
            &unified,
            &cols,
            &row(json!({ "school_no": "SCH-001" })),
            &Row::new(),
        )
        .expect("sync");
        assert_eq!(
            outcome,
            SyncOutcome::Skipped {
                reason: SkipReason::UnifiedSource
            }
        );
        assert_eq!(unified_rows(&conn).len(), 1);
    }

    #[test]
    fn control_whitespace_in_unified_identifier_still_matches() {
        let conn = store();
        conn.execute(
            "UPDATE all_unique_schools SET school_no = 'SCH-001' || char(9) WHERE id = 1",
            [],
        )
        .expect("retab");
        let (cfg, cols) = subject(&conn);
        let original = row(json!({ "id": 4, "school_no": "\u{a0}SCH-001\n", "status": "pending" }));
        let changes = row(json!({ "status": "checked" }));

        let outcome = sync_after_update(&conn, &cfg, &cols, &original, &changes).expect("sync");
        assert_eq!(outcome.label(), "updated");
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM all_unique_schools", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 1);
        let status: String = conn
            .query_row("SELECT status FROM all_unique_schools WHERE id = 1", [], |r| r.get(0))
            .expect("status");
        assert_eq!(status, "checked");
    }

    #[test]
    fn identifier_only_overlap_reports_existing_row_as_updated() {
        let conn = store();
        conn.execute_batch(
            "UPDATE all_unique_schools SET school_no = 'SCH-001' || char(10) WHERE id = 1;
             CREATE TABLE visit_log(id INTEGER PRIMARY KEY, school_no TEXT, visitor TEXT);",
        )
        .expect("seed");
        let cfg = catalog::config_for(&conn, "visit_log").expect("cfg");
        let cols = db::table_columns(&conn, "visit_log").expect("cols");

        let existing = row(json!({ "id": 1, "school_no": "SCH-001", "visitor": "A" }));
        let outcome = sync_after_update(&conn, &cfg, &cols, &existing, &Row::new()).expect("sync");
        assert_eq!(
            outcome,
            SyncOutcome::Updated {
                dataset: "all_unique_schools".into(),
                identifier: "SCH-001".into(),
                columns: Vec::new(),
            }
        );

        let fresh = row(json!({ "id": 2, "school_no": "SCH-050", "visitor": "B" }));
        let outcome = sync_after_update(&conn, &cfg, &cols, &fresh, &Row::new()).expect("sync");
        assert_eq!(outcome.label(), "inserted");
        assert_eq!(unified_rows(&conn).len(), 2);
    }

    #[test]
    fn duplicate_unified_identifiers_fall_back_to_plain_insert() {
        let conn = store();
        conn.execute_batch(
            "INSERT INTO all_unique_schools(id, school_no) VALUES(2, 'DUP');
             INSERT INTO all_unique_schools(id, school_no) VALUES(3, 'DUP');",
        )
        .expect("dups");
        assert!(!ensure_unique_identifier(&conn, "all_unique_schools", "school_no"));

        let (cfg, cols) = subject(&conn);
        let original = row(json!({ "school_no": "SCH-100", "status": "new" }));
        let outcome = sync_after_update(&conn, &cfg, &cols, &original, &Row::new()).expect("sync");
        assert_eq!(outcome.label(), "inserted");
        assert_eq!(unified_rows(&conn).len(), 4);
    }
}
