use super::{opt_str_param, str_param};
use crate::error::{Result, TrackerError};
use crate::ipc::error::respond;
use crate::ipc::types::{AppState, Request};
use crate::users;
use serde_json::json;

fn login(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let conn = state.conn()?;
    let email = str_param(&req.params, "email")?;
    let privileged_email = state.config.privileged_email.as_str();

    let user = match opt_str_param(&req.params, "password") {
        Some(password) => users::authenticate(conn, email, password, privileged_email)?
            .ok_or_else(|| TrackerError::PermissionDenied("invalid email or password".into()))?,
        None => {
            if !email.contains('@') {
                return Err(TrackerError::BadParams("params.email is not an email address".into()));
            }
            users::email_only_session(conn, email, privileged_email)?.ok_or_else(|| {
                TrackerError::PermissionDenied("a password is required for this account".into())
            })?
        }
    };

    tracing::info!(
        user = user.email.as_str(),
        division = user.division.as_str(),
        privileged = user.is_privileged,
        view_only = user.email_only,
        "login"
    );
    let body = json!({ "user": user });
    state.user = Some(user);
    Ok(body)
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = login(state, req);
    if let Err(e) = &result {
        tracing::info!(code = e.code(), "login refused");
    }
    respond(&req.id, result)
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(user) = state.user.take() {
        tracing::info!(user = user.email.as_str(), "logout");
    }
    respond(&req.id, Ok(json!({ "loggedOut": true })))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(
        &req.id,
        state
            .user
            .as_ref()
            .map(|u| json!({ "user": u }))
            .ok_or(TrackerError::Unauthenticated),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.login" => Some(handle_login(state, req)),
        "session.logout" => Some(handle_logout(state, req)),
        "session.whoami" => Some(handle_whoami(state, req)),
        _ => None,
    }
}
