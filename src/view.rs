//! Read side: the dataset view, single-row detail, and the dataset/column
//! reports. Everything is read fresh from the store per request.

use crate::access::{self, User};
use crate::catalog::{self, DatasetConfig};
use crate::columns::{self, ID_COLUMN};
use crate::db::{self, Row};
use crate::enrich::{self, ColumnGroup};
use crate::error::{Result, TrackerError};
use crate::identifier;
use crate::query::{self, ColumnFilter, SortDir, ViewParams};
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRow {
    pub values: Row,
    pub can_edit: bool,
    pub edit_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Facet {
    pub column: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub q: String,
    pub filters: Vec<ColumnFilter>,
    pub sort: Option<String>,
    pub dir: SortDir,
    pub page: i64,
    pub per_page: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetView {
    pub dataset: DatasetConfig,
    pub columns: Vec<String>,
    pub fixed_columns: Vec<String>,
    pub editable_columns: Vec<String>,
    pub rows: Vec<ViewRow>,
    pub facets: Vec<Facet>,
    pub state: ViewState,
    pub total: i64,
    pub total_pages: i64,
    pub groups: Vec<ColumnGroup>,
}

/// Numeric row id usable for an edit request. Accepts integers, integral
/// floats and digit strings; anything else yields `None`.
pub fn edit_id(row: &Row) -> Option<i64> {
    match row.get(ID_COLUMN)? {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn editable_for(user: &User, config: &DatasetConfig, all_columns: &[String]) -> Vec<String> {
    if config.is_read_only() || user.email_only {
        return Vec::new();
    }
    if config.is_unified && !user.is_privileged {
        return Vec::new();
    }
    columns::editable_columns(all_columns, config.fixed_columns, user.is_privileged)
}

pub fn view_dataset(
    conn: &Connection,
    user: &User,
    dataset: &str,
    params: &ViewParams,
    facet_cap: usize,
) -> Result<DatasetView> {
    let (config, all_columns) = catalog::resolve(conn, dataset)?;
    let facet_cols = query::facet_columns(&all_columns, &config.roles);
    let scope = access::division_scope(user, &all_columns, &config.roles);

    let plan = query::build_query(dataset, &all_columns, &facet_cols, scope.as_ref(), params);
    let page = query::run(conn, &plan, &all_columns)?;

    let can_edit: Vec<bool> = page
        .rows
        .iter()
        .map(|r| access::can_edit(user, r, &config))
        .collect();
    let (rows, groups) = if config.is_unified {
        let related = catalog::list_datasets(conn)?;
        let out = enrich::enrich(conn, &config, &all_columns, page.rows, &related);
        (out.rows, out.groups)
    } else {
        (page.rows, Vec::new())
    };

    let rows = rows
        .into_iter()
        .zip(can_edit)
        .map(|(values, can_edit)| ViewRow {
            edit_id: edit_id(&values),
            can_edit,
            values,
        })
        .collect();

    let facets = query::facet_options(conn, dataset, &facet_cols, scope.as_ref(), facet_cap)?
        .into_iter()
        .map(|(column, values)| Facet { column, values })
        .collect();

    let total_pages = ((page.total + plan.per_page - 1) / plan.per_page).max(1);
    tracing::debug!(
        dataset,
        user = user.email.as_str(),
        total = page.total,
        page = plan.page,
        "dataset view"
    );

    Ok(DatasetView {
        fixed_columns: columns::fixed_columns(&all_columns, config.fixed_columns),
        editable_columns: editable_for(user, &config, &all_columns),
        columns: all_columns,
        rows,
        facets,
        state: ViewState {
            q: plan.q,
            filters: plan.filters,
            sort: plan.sort_column,
            dir: plan.dir,
            page: plan.page,
            per_page: plan.per_page,
        },
        total: page.total,
        total_pages,
        groups,
        dataset: config,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowDetail {
    pub dataset: DatasetConfig,
    pub columns: Vec<String>,
    pub row: Row,
    pub can_edit: bool,
    pub edit_id: Option<i64>,
    pub editable_columns: Vec<String>,
}

/// One row for the edit form. Rows outside the user's division are refused.
pub fn row_detail(conn: &Connection, user: &User, dataset: &str, row_id: i64) -> Result<RowDetail> {
    let (config, all_columns) = catalog::resolve(conn, dataset)?;
    let Some(row) = db::fetch_row_by_id(conn, dataset, &all_columns, row_id)? else {
        return Err(TrackerError::not_found(
            "row",
            serde_json::json!({ "dataset": dataset, "rowId": row_id }),
        ));
    };
    if !access::can_view(user, &row, &config.roles) {
        return Err(TrackerError::PermissionDenied(
            "You do not have permission to view this school".into(),
        ));
    }
    let can_edit = access::can_edit(user, &row, &config);
    let editable_columns = if can_edit {
        editable_for(user, &config, &all_columns)
    } else {
        Vec::new()
    };
    Ok(RowDetail {
        edit_id: edit_id(&row),
        can_edit,
        editable_columns,
        columns: all_columns,
        row,
        dataset: config,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSummary {
    #[serde(flatten)]
    pub config: DatasetConfig,
    pub row_count: i64,
}

pub fn dataset_summaries(conn: &Connection) -> Result<Vec<DatasetSummary>> {
    let mut out = Vec::new();
    for config in catalog::list_datasets(conn)? {
        let row_count = db::count_rows(conn, &config.table_name)?;
        out.push(DatasetSummary { config, row_count });
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnReport {
    pub dataset: String,
    pub display_name: String,
    pub columns: Vec<String>,
    pub fixed_columns: Vec<String>,
    pub editable_columns: Vec<String>,
    pub identifier_column: Option<String>,
    pub division_column: Option<String>,
    pub facet_columns: Vec<String>,
}

fn division_column(all_columns: &[String], config: &DatasetConfig) -> Option<String> {
    config
        .roles
        .division
        .as_deref()
        .into_iter()
        .chain(access::DIVISION_ALIASES.iter().copied())
        .find(|name| all_columns.iter().any(|c| c == name))
        .map(str::to_string)
}

/// Column layout per dataset, including which identifier and division
/// columns were picked so ingestion can be checked against them.
pub fn column_report(conn: &Connection, user: &User, dataset: Option<&str>) -> Result<Vec<ColumnReport>> {
    let tables = match dataset {
        Some(d) => vec![d.to_string()],
        None => db::dataset_tables(conn)?,
    };
    let mut out = Vec::with_capacity(tables.len());
    for table in tables {
        let (config, all_columns) = catalog::resolve(conn, &table)?;
        out.push(ColumnReport {
            dataset: table,
            display_name: config.display_name.clone(),
            fixed_columns: columns::fixed_columns(&all_columns, config.fixed_columns),
            editable_columns: editable_for(user, &config, &all_columns),
            identifier_column: identifier::find_identifier_column(&all_columns, &config.roles),
            division_column: division_column(&all_columns, &config),
            facet_columns: query::facet_columns(&all_columns, &config.roles),
            columns: all_columns,
        });
    }
    Ok(out)
}
