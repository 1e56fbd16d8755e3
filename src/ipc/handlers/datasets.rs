use super::{opt_str_param, str_param};
use crate::catalog::{self, ConfigPatch};
use crate::db;
use crate::error::{Result, TrackerError};
use crate::identifier;
use crate::ingest;
use crate::ipc::error::respond;
use crate::ipc::types::{AppState, Request};
use crate::query::ViewParams;
use crate::sync;
use crate::view;
use serde_json::{json, Value};

fn list(state: &AppState) -> Result<Value> {
    let (conn, _) = state.session()?;
    Ok(json!({ "datasets": view::dataset_summaries(conn)? }))
}

fn columns(state: &AppState, req: &Request) -> Result<Value> {
    let (conn, user) = state.session()?;
    let dataset = opt_str_param(&req.params, "dataset");
    Ok(json!({ "datasets": view::column_report(conn, user, dataset)? }))
}

fn string_list(v: &Value, key: &str) -> Result<Vec<String>> {
    let bad = || TrackerError::BadParams(format!("params.{key} must be an array of strings"));
    v.as_array()
        .ok_or_else(bad)?
        .iter()
        .map(|item| item.as_str().map(|s| s.trim().to_string()).ok_or_else(bad))
        .collect()
}

fn parse_patch(params: &Value) -> Result<ConfigPatch> {
    let text = |key: &str| -> Result<Option<String>> {
        match params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
            Some(_) => Err(TrackerError::BadParams(format!("params.{key} must be a string"))),
        }
    };
    let flag = |key: &str| -> Result<Option<bool>> {
        match params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(TrackerError::BadParams(format!("params.{key} must be a boolean"))),
        }
    };

    let fixed_columns = match params.get("fixedColumns") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(n) if n >= catalog::ALL_FIXED => Some(n),
            _ => {
                return Err(TrackerError::BadParams(
                    "params.fixedColumns must be an integer >= -1".into(),
                ))
            }
        },
    };
    let facet_columns = match params.get("facetColumns") {
        None | Some(Value::Null) => None,
        Some(v) => Some(string_list(v, "facetColumns")?),
    };
    let display_name = text("displayName")?.filter(|s| !s.is_empty());
    let prefix = text("prefix")?.filter(|s| !s.is_empty());

    Ok(ConfigPatch {
        display_name,
        fixed_columns,
        read_only: flag("readOnly")?,
        is_unified: flag("isUnified")?,
        prefix,
        identifier_column: text("identifierColumn")?,
        division_column: text("divisionColumn")?,
        facet_columns,
    })
}

fn configure(state: &AppState, req: &Request) -> Result<Value> {
    let (conn, _) = state.privileged()?;
    let dataset = str_param(&req.params, "dataset")?;
    if !ingest::valid_table_name(dataset) {
        return Err(TrackerError::Validation(format!("invalid dataset name: {dataset:?}")));
    }
    let patch = parse_patch(&req.params)?;
    let config = catalog::apply_patch(conn, dataset, &patch)?;

    if config.is_unified && db::table_exists(conn, dataset)? {
        let columns = db::table_columns(conn, dataset)?;
        if let Some(ident) = identifier::find_identifier_column(&columns, &config.roles) {
            sync::ensure_unique_identifier(conn, dataset, &ident);
        }
    }
    tracing::info!(dataset, fixed = config.fixed_columns, unified = config.is_unified, "dataset configured");
    Ok(json!({ "dataset": config }))
}

fn import(state: &AppState, req: &Request) -> Result<Value> {
    let (conn, _) = state.privileged()?;
    let dataset = str_param(&req.params, "dataset")?;
    let columns = match req.params.get("columns") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => string_list(v, "columns")?,
    };
    let rows = req
        .params
        .get("rows")
        .and_then(|v| v.as_array())
        .ok_or_else(|| TrackerError::BadParams("params.rows must be an array".into()))?;
    let summary = ingest::import_records(conn, dataset, &columns, rows)?;
    Ok(json!(summary))
}

fn view_dataset(state: &AppState, req: &Request) -> Result<Value> {
    let (conn, user) = state.session()?;
    let dataset = str_param(&req.params, "dataset")?;
    let params = ViewParams::from_json(&req.params);
    let view = view::view_dataset(conn, user, dataset, &params, state.config.max_facet_values)?;
    Ok(json!(view))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "datasets.list" => list(state),
        "datasets.columns" => columns(state, req),
        "datasets.configure" => configure(state, req),
        "dataset.import" => import(state, req),
        "dataset.view" => view_dataset(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
