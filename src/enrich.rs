use crate::catalog::DatasetConfig;
use crate::columns::ID_COLUMN;
use crate::db::{self, Row};
use crate::identifier;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

const LOOKUP_CHUNK: usize = 500;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnGroup {
    pub prefix: String,
    pub dataset: String,
    pub display_name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Enrichment {
    pub rows: Vec<Row>,
    pub groups: Vec<ColumnGroup>,
}

pub fn namespaced(prefix: &str, column: &str) -> String {
    format!("{prefix}__{column}")
}

struct Lookup {
    columns: Vec<String>,
    by_identifier: HashMap<String, Row>,
}

fn load_lookup(
    conn: &Connection,
    dataset: &DatasetConfig,
    wanted: &BTreeSet<String>,
) -> rusqlite::Result<Option<Lookup>> {
    let all = db::table_columns(conn, &dataset.table_name)?;
    let Some(ident) = identifier::find_identifier_column(&all, &dataset.roles) else {
        tracing::debug!(dataset = dataset.table_name.as_str(), "no identifier column; not enriching");
        return Ok(None);
    };
    let columns: Vec<String> = all
        .iter()
        .filter(|c| c.as_str() != ID_COLUMN && **c != ident)
        .cloned()
        .collect();

    let order = if all.iter().any(|c| c == ID_COLUMN) {
        " ORDER BY \"id\""
    } else {
        ""
    };
    let mut by_identifier: HashMap<String, Row> = HashMap::new();
    let wanted: Vec<&String> = wanted.iter().collect();
    for chunk in wanted.chunks(LOOKUP_CHUNK) {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} IN ({}){order}",
            db::select_list(&all),
            db::quote_ident(&dataset.table_name),
            db::trimmed_text_sql(&db::quote_ident(&ident)),
            db::placeholders(chunk.len()),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params_from_iter(chunk.iter().map(|s| Value::Text((*s).clone()))),
                |r| db::read_row(r, &all),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        for row in rows {
            if let Some(key) = identifier::row_identifier(&row, &ident) {
                // Duplicates in a subject table: the lowest id wins.
                by_identifier.entry(key).or_insert(row);
            }
        }
    }
    Ok(Some(Lookup {
        columns,
        by_identifier,
    }))
}

/// Attach namespaced columns from every related dataset to the unified rows.
///
/// A related dataset that cannot be read is logged and skipped; the base rows
/// are returned regardless and their own fields are never overwritten.
pub fn enrich(
    conn: &Connection,
    unified: &DatasetConfig,
    unified_columns: &[String],
    mut rows: Vec<Row>,
    related: &[DatasetConfig],
) -> Enrichment {
    let Some(unified_ident) = identifier::find_identifier_column(unified_columns, &unified.roles)
    else {
        tracing::warn!(
            dataset = unified.table_name.as_str(),
            "unified dataset has no identifier column; skipping enrichment"
        );
        return Enrichment {
            rows,
            groups: Vec::new(),
        };
    };

    let wanted: BTreeSet<String> = rows
        .iter()
        .filter_map(|r| identifier::row_identifier(r, &unified_ident))
        .collect();

    let mut groups = Vec::new();
    for dataset in related.iter().filter(|d| d.table_name != unified.table_name) {
        let lookup = match load_lookup(conn, dataset, &wanted) {
            Ok(Some(l)) => l,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(
                    dataset = dataset.table_name.as_str(),
                    error = %e,
                    "enrichment lookup failed; continuing without it"
                );
                continue;
            }
        };

        for row in rows.iter_mut() {
            let Some(key) = identifier::row_identifier(row, &unified_ident) else {
                continue;
            };
            let Some(hit) = lookup.by_identifier.get(&key) else {
                continue;
            };
            for column in &lookup.columns {
                let name = namespaced(&dataset.prefix, column);
                if row.contains_key(&name) {
                    continue;
                }
                let value = hit.get(column).cloned().unwrap_or(serde_json::Value::Null);
                row.insert(name, value);
            }
        }

        groups.push(ColumnGroup {
            prefix: dataset.prefix.clone(),
            dataset: dataset.table_name.clone(),
            display_name: dataset.display_name.clone(),
            columns: lookup
                .columns
                .iter()
                .map(|c| namespaced(&dataset.prefix, c))
                .collect(),
        });
    }

    Enrichment { rows, groups }
}
