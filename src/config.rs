//! Daemon settings read from the environment.

use std::env;
use std::path::PathBuf;

use crate::query::DEFAULT_FACET_CAP;

pub const DEFAULT_PRIVILEGED_EMAIL: &str = "admin@tracker.local";

#[derive(Debug, Clone)]
pub struct Config {
    /// Identity that may edit every editable column of every dataset.
    pub privileged_email: String,

    /// Workspace opened at startup, before any `workspace.select`.
    pub workspace: Option<PathBuf>,

    /// Distinct values returned per facet column.
    pub max_facet_values: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            privileged_email: DEFAULT_PRIVILEGED_EMAIL.to_string(),
            workspace: None,
            max_facet_values: DEFAULT_FACET_CAP,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            privileged_email: env::var("TRACKER_PRIVILEGED_EMAIL")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_PRIVILEGED_EMAIL.to_string()),

            workspace: env::var_os("TRACKER_WORKSPACE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),

            max_facet_values: match env::var("TRACKER_MAX_FACET_VALUES") {
                Ok(v) => v.trim().parse::<usize>()?.max(1),
                Err(_) => DEFAULT_FACET_CAP,
            },
        })
    }
}
