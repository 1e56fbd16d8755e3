use super::str_param;
use crate::error::{Result, TrackerError};
use crate::ipc::error::respond;
use crate::ipc::types::{AppState, Request};
use crate::users::{self, DirectoryEntry};
use serde_json::json;
use std::path::PathBuf;

/// Bootstrap: while the directory is empty anyone may load it.
fn import(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = state.conn()?;
    if !users::directory_is_empty(conn)? {
        state.privileged()?;
    }
    let path = PathBuf::from(str_param(&req.params, "path")?);
    let imported = users::import_file(conn, &path)
        .map_err(|e| TrackerError::Validation(format!("{e:#}")))?;
    tracing::info!(path = %path.display(), imported, "user directory imported");
    Ok(json!({ "imported": imported }))
}

fn upsert(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let (conn, _) = state.privileged()?;
    let entry: DirectoryEntry = serde_json::from_value(req.params.clone())
        .map_err(|e| TrackerError::BadParams(e.to_string()))?;
    if !entry.email.contains('@') {
        return Err(TrackerError::BadParams("params.email is not an email address".into()));
    }
    users::upsert(conn, &entry)?;
    Ok(json!({ "email": entry.email.trim() }))
}

fn list(state: &AppState) -> Result<serde_json::Value> {
    let (conn, _) = state.privileged()?;
    Ok(json!({ "users": users::list(conn)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.import" => Some(respond(&req.id, import(state, req))),
        "users.upsert" => Some(respond(&req.id, upsert(state, req))),
        "users.list" => Some(respond(&req.id, list(state))),
        _ => None,
    }
}
