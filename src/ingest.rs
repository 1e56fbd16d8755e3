//! Replaces a dataset from JSON records.

use crate::catalog;
use crate::columns::ID_COLUMN;
use crate::db;
use crate::error::{Result, TrackerError};
use crate::identifier;
use crate::sync;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub dataset: String,
    pub columns: Vec<String>,
    pub rows: usize,
    pub generated_ids: bool,
}

/// Trimmed, lowercased, with spaces and dashes turned into underscores.
pub fn clean_column_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect::<String>()
        .to_lowercase()
}

pub fn valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(db::INTERNAL_PREFIX)
        && !name.starts_with("sqlite_")
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn cell(record: &serde_json::Value, index: usize, source: &str) -> serde_json::Value {
    match record {
        serde_json::Value::Object(map) => map.get(source).cloned().unwrap_or(serde_json::Value::Null),
        serde_json::Value::Array(items) => items.get(index).cloned().unwrap_or(serde_json::Value::Null),
        _ => serde_json::Value::Null,
    }
}

/// Drop and recreate `dataset` with `records`. `source_columns` gives the
/// column order; when empty it is taken from the first object's keys.
pub fn import_records(
    conn: &Connection,
    dataset: &str,
    source_columns: &[String],
    records: &[serde_json::Value],
) -> Result<ImportSummary> {
    let dataset = dataset.trim();
    if !valid_table_name(dataset) {
        return Err(TrackerError::Validation(format!(
            "invalid dataset name: {dataset:?}"
        )));
    }

    let source_columns: Vec<String> = if source_columns.is_empty() {
        records
            .iter()
            .find_map(|r| r.as_object())
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    } else {
        source_columns.to_vec()
    };
    if source_columns.is_empty() {
        return Err(TrackerError::Validation("no columns supplied".into()));
    }

    let cleaned: Vec<String> = source_columns.iter().map(|c| clean_column_name(c)).collect();
    let mut seen = HashSet::new();
    for c in &cleaned {
        if c.is_empty() {
            return Err(TrackerError::Validation("column names must not be blank".into()));
        }
        if !seen.insert(c.as_str()) {
            return Err(TrackerError::Validation(format!(
                "duplicate column after cleaning: {c}"
            )));
        }
    }

    let id_index = cleaned.iter().position(|c| c == ID_COLUMN);
    let generated_ids = id_index.is_none();
    let mut ids: Vec<i64> = Vec::with_capacity(records.len());
    match id_index {
        Some(i) => {
            let mut unique = HashSet::new();
            for record in records {
                let raw = cell(record, i, &source_columns[i]);
                let parsed = match &raw {
                    serde_json::Value::Number(n) => n.as_i64(),
                    serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                let Some(id) = parsed.filter(|id| unique.insert(*id)) else {
                    return Err(TrackerError::Validation(format!(
                        "id values must be unique integers (got {raw})"
                    )));
                };
                ids.push(id);
            }
        }
        None => ids.extend(1..=records.len() as i64),
    }

    let mut table_columns: Vec<String> = Vec::with_capacity(cleaned.len() + 1);
    if generated_ids {
        table_columns.push(ID_COLUMN.to_string());
    }
    table_columns.extend(cleaned.iter().cloned());

    let definition = table_columns
        .iter()
        .map(|c| {
            if c == ID_COLUMN {
                format!("{} INTEGER PRIMARY KEY", db::quote_ident(c))
            } else {
                db::quote_ident(c)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let table = db::quote_ident(dataset);

    let tx = conn.unchecked_transaction()?;
    tx.execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
    tx.execute(&format!("CREATE TABLE {table}({definition})"), [])?;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {table}({}) VALUES({})",
            db::select_list(&table_columns),
            db::placeholders(table_columns.len())
        ))?;
        for (record, id) in records.iter().zip(&ids) {
            let mut bind: Vec<Value> = Vec::with_capacity(table_columns.len());
            if generated_ids {
                bind.push(Value::Integer(*id));
            }
            for (i, source) in source_columns.iter().enumerate() {
                if Some(i) == id_index {
                    bind.push(Value::Integer(*id));
                } else {
                    bind.push(db::json_to_sql(&cell(record, i, source)));
                }
            }
            stmt.execute(params_from_iter(bind))?;
        }
    }

    let config = catalog::config_for(&tx, dataset)?;
    if config.is_unified {
        if let Some(ident) = identifier::find_identifier_column(&table_columns, &config.roles) {
            sync::ensure_unique_identifier(&tx, dataset, &ident);
        }
    }
    tx.commit()?;

    tracing::info!(dataset, rows = records.len(), columns = table_columns.len(), "dataset imported");
    Ok(ImportSummary {
        dataset: dataset.to_string(),
        columns: table_columns,
        rows: records.len(),
        generated_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn column_names_are_cleaned() {
        assert_eq!(clean_column_name("  School No "), "school_no");
        assert_eq!(clean_column_name("Block-Name"), "block_name");
        assert_eq!(clean_column_name("UDISE Code"), "udise_code");
    }

    #[test]
    fn import_generates_ids_and_replaces_table() {
        let conn = store();
        let cols = vec!["School No".to_string(), "Zone".to_string(), "Tested".to_string()];
        let rows = vec![
            json!({ "School No": "SCH-001", "Zone": "North", "Tested": 40 }),
            json!(["SCH-002", "South", null]),
        ];
        let summary = import_records(&conn, "asset_schools", &cols, &rows).expect("import");
        assert!(summary.generated_ids);
        assert_eq!(summary.columns, vec!["id", "school_no", "zone", "tested"]);
        assert_eq!(summary.rows, 2);

        let tested: Option<i64> = conn
            .query_row("SELECT tested FROM asset_schools WHERE id = 1", [], |r| r.get(0))
            .expect("row");
        assert_eq!(tested, Some(40));

        let again = import_records(&conn, "asset_schools", &cols, &rows[..1]).expect("replace");
        assert_eq!(again.rows, 1);
        assert_eq!(db::count_rows(&conn, "asset_schools").expect("count"), 1);
    }

    #[test]
    fn supplied_ids_must_be_unique_integers() {
        let conn = store();
        let cols = vec!["ID".to_string(), "name".to_string()];
        let ok = import_records(&conn, "notes", &cols, &[json!({ "ID": "5", "name": "a" })])
            .expect("import");
        assert!(!ok.generated_ids);
        let n: i64 = conn
            .query_row("SELECT id FROM notes", [], |r| r.get(0))
            .expect("id");
        assert_eq!(n, 5);

        let dup = [json!({ "ID": 1, "name": "a" }), json!({ "ID": 1, "name": "b" })];
        let err = import_records(&conn, "notes", &cols, &dup).expect_err("dup");
        assert_eq!(err.code(), "validation_failed");
        // Rejected before the old table was touched.
        assert_eq!(db::count_rows(&conn, "notes").expect("count"), 1);
    }

    #[test]
    fn internal_and_malformed_names_are_refused() {
        let conn = store();
        let cols = vec!["a".to_string()];
        for name in ["app_users", "sqlite_master", "bad name", ""] {
            let err = import_records(&conn, name, &cols, &[]).expect_err("refused");
            assert_eq!(err.code(), "validation_failed");
        }
        let dup = vec!["Zone".to_string(), "zone ".to_string()];
        assert!(import_records(&conn, "t", &dup, &[]).is_err());
    }
}
