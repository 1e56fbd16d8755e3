use super::{i64_param, opt_str_param, str_param};
use crate::audit;
use crate::edit;
use crate::error::{Result, TrackerError};
use crate::ipc::error::respond;
use crate::ipc::types::{AppState, Request};
use crate::view;
use serde_json::{json, Value};

const DEFAULT_AUDIT_LIMIT: i64 = 100;
const MAX_AUDIT_LIMIT: i64 = 1000;

fn get(state: &AppState, req: &Request) -> Result<Value> {
    let (conn, user) = state.session()?;
    let dataset = str_param(&req.params, "dataset")?;
    let row_id = i64_param(&req.params, "rowId")?;
    Ok(json!(view::row_detail(conn, user, dataset, row_id)?))
}

fn update(state: &AppState, req: &Request) -> Result<Value> {
    let (conn, user) = state.session()?;
    let dataset = str_param(&req.params, "dataset")?;
    let row_id = i64_param(&req.params, "rowId")?;
    let changes = req
        .params
        .get("changes")
        .and_then(|v| v.as_object())
        .ok_or_else(|| TrackerError::BadParams("params.changes must be an object".into()))?;

    let outcome = edit::apply_edit(conn, user, dataset, row_id, changes)?;
    Ok(json!({
        "success": true,
        "message": outcome.message,
        "applied": outcome.applied,
        "ignored": outcome.ignored,
        "sync": outcome.sync,
        "auditId": outcome.audit_id,
        "row": outcome.row,
    }))
}

fn audit_list(state: &AppState, req: &Request) -> Result<Value> {
    let (conn, _) = state.privileged()?;
    let dataset = opt_str_param(&req.params, "dataset");
    let limit = match req.params.get("limit") {
        None | Some(Value::Null) => DEFAULT_AUDIT_LIMIT,
        Some(_) => i64_param(&req.params, "limit")?.clamp(1, MAX_AUDIT_LIMIT),
    };
    Ok(json!({ "entries": audit::list(conn, dataset, limit)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "row.get" => get(state, req),
        "row.update" => update(state, req),
        "audit.list" => audit_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
