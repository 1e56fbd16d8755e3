use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::access::User;
use crate::config::Config;
use crate::error::{Result, TrackerError};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Session user; cleared whenever the workspace changes.
    pub user: Option<User>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            workspace: None,
            db: None,
            user: None,
        }
    }

    pub fn conn(&self) -> Result<&Connection> {
        self.db.as_ref().ok_or(TrackerError::NoWorkspace)
    }

    /// Open connection plus the logged-in user.
    pub fn session(&self) -> Result<(&Connection, &User)> {
        let conn = self.conn()?;
        let user = self.user.as_ref().ok_or(TrackerError::Unauthenticated)?;
        Ok((conn, user))
    }

    pub fn privileged(&self) -> Result<(&Connection, &User)> {
        let (conn, user) = self.session()?;
        if !user.is_privileged {
            return Err(TrackerError::PermissionDenied(
                "administrator access required".into(),
            ));
        }
        Ok((conn, user))
    }
}
