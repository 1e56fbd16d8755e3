//! Per-dataset configuration: display name, fixed-column count, read-only and
//! unified flags, plus the declarative column-role mapping that takes
//! precedence over alias heuristics.

use crate::db;
use crate::error::TrackerError;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

/// Fixed-column count assigned to tables that were never configured.
pub const DEFAULT_FIXED_COLUMNS: i64 = 2;

/// `fixed_columns` value meaning "nothing is ever editable".
pub const ALL_FIXED: i64 = -1;

const SEED: &[(&str, &str, i64, bool)] = &[
    ("asset_schools", "ASSET Schools", 8, false),
    ("cares_schools", "CARES Schools", 10, false),
    ("mindspark_math_schools", "Mindspark Math Schools", 6, false),
    ("mindspark_english_schools", "Mindspark English Schools", 6, false),
    ("mindspark_science_schools", "Mindspark Science Schools", 6, false),
    ("all_unique_schools", "All Unique Schools", 6, true),
    ("summary_data", "Summary Data", ALL_FIXED, false),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Identifier,
    Division,
    Facet,
}

impl ColumnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identifier => "identifier",
            Self::Division => "division",
            Self::Facet => "facet",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRoles {
    pub identifier: Option<String>,
    pub division: Option<String>,
    pub facets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatasetConfig {
    pub table_name: String,
    pub display_name: String,
    pub fixed_columns: i64,
    pub read_only: bool,
    pub is_unified: bool,
    pub prefix: String,
    pub roles: ColumnRoles,
}

impl DatasetConfig {
    pub fn unconfigured(table: &str) -> Self {
        Self {
            table_name: table.to_string(),
            display_name: table.to_string(),
            fixed_columns: DEFAULT_FIXED_COLUMNS,
            read_only: false,
            is_unified: false,
            prefix: table.to_string(),
            roles: ColumnRoles::default(),
        }
    }

    /// A dataset whose fixed-column count is `-1` can never be edited.
    pub fn is_read_only(&self) -> bool {
        self.read_only || self.fixed_columns == ALL_FIXED
    }
}

pub fn seed_defaults(conn: &Connection) -> rusqlite::Result<()> {
    for (table, name, fixed, unified) in SEED {
        conn.execute(
            "INSERT INTO app_datasets(table_name, display_name, fixed_columns, read_only, is_unified, prefix)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(table_name) DO NOTHING",
            (
                table,
                name,
                fixed,
                i64::from(*fixed == ALL_FIXED),
                i64::from(*unified),
                table,
            ),
        )?;
    }
    Ok(())
}

fn load_roles(conn: &Connection, table: &str) -> rusqlite::Result<ColumnRoles> {
    let mut stmt = conn.prepare(
        "SELECT role, column_name FROM app_column_roles
         WHERE table_name = ?
         ORDER BY role, sort_order, column_name",
    )?;
    let pairs = stmt
        .query_map([table], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut roles = ColumnRoles::default();
    for (role, column) in pairs {
        match role.as_str() {
            "identifier" => roles.identifier = Some(column),
            "division" => roles.division = Some(column),
            "facet" => roles.facets.push(column),
            other => tracing::warn!(table, role = other, "ignoring unknown column role"),
        }
    }
    Ok(roles)
}

/// Configuration for `table`, falling back to defaults when it was never
/// configured. Does not check that the table exists.
pub fn config_for(conn: &Connection, table: &str) -> rusqlite::Result<DatasetConfig> {
    let row = conn
        .query_row(
            "SELECT display_name, fixed_columns, read_only, is_unified, prefix
             FROM app_datasets WHERE table_name = ?",
            [table],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, i64>(2)? != 0,
                    r.get::<_, i64>(3)? != 0,
                    r.get::<_, Option<String>>(4)?,
                ))
            },
        )
        .optional()?;

    let mut cfg = match row {
        Some((display_name, fixed_columns, read_only, is_unified, prefix)) => DatasetConfig {
            table_name: table.to_string(),
            display_name,
            fixed_columns,
            read_only,
            is_unified,
            prefix: prefix
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| table.to_string()),
            roles: ColumnRoles::default(),
        },
        None => DatasetConfig::unconfigured(table),
    };
    cfg.roles = load_roles(conn, table)?;
    Ok(cfg)
}

/// Configuration and live column list of an existing dataset.
pub fn resolve(
    conn: &Connection,
    table: &str,
) -> crate::error::Result<(DatasetConfig, Vec<String>)> {
    let internal = table.starts_with(db::INTERNAL_PREFIX) || table.starts_with("sqlite_");
    if internal || !db::table_exists(conn, table)? {
        return Err(TrackerError::not_found(
            "dataset",
            json!({ "dataset": table }),
        ));
    }
    let columns = db::table_columns(conn, table)?;
    Ok((config_for(conn, table)?, columns))
}

/// Configuration for every dataset table that exists in the store.
pub fn list_datasets(conn: &Connection) -> rusqlite::Result<Vec<DatasetConfig>> {
    db::dataset_tables(conn)?
        .iter()
        .map(|t| config_for(conn, t))
        .collect()
}

/// The unified dataset, if one is configured and its table exists.
pub fn unified_dataset(conn: &Connection) -> rusqlite::Result<Option<DatasetConfig>> {
    let table: Option<String> = conn
        .query_row(
            "SELECT table_name FROM app_datasets WHERE is_unified = 1",
            [],
            |r| r.get(0),
        )
        .optional()?;
    match table {
        Some(t) if db::table_exists(conn, &t)? => Ok(Some(config_for(conn, &t)?)),
        _ => Ok(None),
    }
}

#[derive(Debug, Default)]
pub struct ConfigPatch {
    pub display_name: Option<String>,
    pub fixed_columns: Option<i64>,
    pub read_only: Option<bool>,
    pub is_unified: Option<bool>,
    pub prefix: Option<String>,
    pub identifier_column: Option<String>,
    pub division_column: Option<String>,
    pub facet_columns: Option<Vec<String>>,
}

pub fn apply_patch(
    conn: &Connection,
    table: &str,
    patch: &ConfigPatch,
) -> rusqlite::Result<DatasetConfig> {
    let current = config_for(conn, table)?;
    let tx = conn.unchecked_transaction()?;

    if patch.is_unified == Some(true) {
        tx.execute(
            "UPDATE app_datasets SET is_unified = 0 WHERE table_name <> ?",
            [table],
        )?;
    }

    let fixed = patch.fixed_columns.unwrap_or(current.fixed_columns);
    tx.execute(
        "INSERT INTO app_datasets(table_name, display_name, fixed_columns, read_only, is_unified, prefix)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(table_name) DO UPDATE SET
           display_name = excluded.display_name,
           fixed_columns = excluded.fixed_columns,
           read_only = excluded.read_only,
           is_unified = excluded.is_unified,
           prefix = excluded.prefix",
        (
            table,
            patch.display_name.as_deref().unwrap_or(&current.display_name),
            fixed,
            i64::from(patch.read_only.unwrap_or(current.read_only)),
            i64::from(patch.is_unified.unwrap_or(current.is_unified)),
            patch.prefix.as_deref().unwrap_or(&current.prefix),
        ),
    )?;

    let single_roles = [
        (ColumnRole::Identifier, &patch.identifier_column),
        (ColumnRole::Division, &patch.division_column),
    ];
    for (role, column) in single_roles {
        let Some(column) = column else {
            continue;
        };
        tx.execute(
            "DELETE FROM app_column_roles WHERE table_name = ? AND role = ?",
            (table, role.as_str()),
        )?;
        if !column.trim().is_empty() {
            tx.execute(
                "INSERT INTO app_column_roles(table_name, role, column_name, sort_order)
                 VALUES(?, ?, ?, 0)",
                (table, role.as_str(), column.trim()),
            )?;
        }
    }

    if let Some(facets) = &patch.facet_columns {
        let role = ColumnRole::Facet.as_str();
        tx.execute(
            "DELETE FROM app_column_roles WHERE table_name = ? AND role = ?",
            (table, role),
        )?;
        for (i, column) in facets.iter().enumerate() {
            tx.execute(
                "INSERT OR IGNORE INTO app_column_roles(table_name, role, column_name, sort_order)
                 VALUES(?, ?, ?, ?)",
                (table, role, column, i as i64),
            )?;
        }
    }

    tx.commit()?;
    config_for(conn, table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn seeded_tables_carry_tracker_defaults() {
        let conn = store();
        let cares = config_for(&conn, "cares_schools").expect("cfg");
        assert_eq!(cares.fixed_columns, 10);
        assert_eq!(cares.display_name, "CARES Schools");

        let summary = config_for(&conn, "summary_data").expect("cfg");
        assert!(summary.is_read_only());

        let unknown = config_for(&conn, "fresh_sheet").expect("cfg");
        assert_eq!(unknown.fixed_columns, DEFAULT_FIXED_COLUMNS);
        assert!(!unknown.is_unified);
    }

    #[test]
    fn unified_requires_existing_table() {
        let conn = store();
        assert!(unified_dataset(&conn).expect("unified").is_none());
        conn.execute("CREATE TABLE all_unique_schools(id INTEGER)", [])
            .expect("create");
        let unified = unified_dataset(&conn).expect("unified").expect("present");
        assert_eq!(unified.table_name, "all_unique_schools");
    }

    #[test]
    fn resolve_hides_internal_tables() {
        let conn = store();
        conn.execute("CREATE TABLE cares_schools(id INTEGER, zone TEXT)", [])
            .expect("create");
        let (cfg, cols) = resolve(&conn, "cares_schools").expect("resolve");
        assert_eq!(cfg.fixed_columns, 10);
        assert_eq!(cols, vec!["id", "zone"]);

        for hidden in ["app_users", "missing"] {
            let err = resolve(&conn, hidden).expect_err("hidden");
            assert_eq!(err.code(), "not_found");
        }
    }

    #[test]
    fn patch_moves_unified_flag_and_records_roles() {
        let conn = store();
        let cfg = apply_patch(
            &conn,
            "schools",
            &ConfigPatch {
                is_unified: Some(true),
                identifier_column: Some("School No".into()),
                facet_columns: Some(vec!["zone".into(), "block".into()]),
                ..Default::default()
            },
        )
        .expect("patch");
        assert!(cfg.is_unified);
        assert_eq!(cfg.roles.identifier.as_deref(), Some("School No"));
        assert_eq!(cfg.roles.facets, vec!["zone", "block"]);

        let old = config_for(&conn, "all_unique_schools").expect("cfg");
        assert!(!old.is_unified);

        let cleared = apply_patch(
            &conn,
            "schools",
            &ConfigPatch {
                identifier_column: Some(String::new()),
                ..Default::default()
            },
        )
        .expect("patch");
        assert_eq!(cleared.roles.identifier, None);
        assert_eq!(cleared.roles.facets.len(), 2);
    }
}
