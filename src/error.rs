use serde_json::json;

/// Failures surfaced by the tracker core. Each maps onto a stable wire code.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("select a workspace first")]
    NoWorkspace,

    #[error("log in first")]
    Unauthenticated,

    #[error("{0}")]
    BadParams(String),

    #[error("{what} not found")]
    NotFound {
        what: &'static str,
        details: Option<serde_json::Value>,
    },

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Validation(String),

    #[error("unified sync failed: {0}")]
    Sync(String),

    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl TrackerError {
    pub fn not_found(what: &'static str, details: serde_json::Value) -> Self {
        Self::NotFound {
            what,
            details: Some(details),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NoWorkspace => "no_workspace",
            Self::Unauthenticated => "not_logged_in",
            Self::BadParams(_) => "bad_params",
            Self::NotFound { .. } => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Validation(_) => "validation_failed",
            Self::Sync(_) => "sync_failed",
            Self::Store(_) => "db_query_failed",
        }
    }

    /// Message shown to the caller. Store failures stay generic; the cause is logged.
    pub fn public_message(&self) -> String {
        match self {
            Self::Store(e) => {
                tracing::error!("database error: {e}");
                "database operation failed".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::NotFound { details, .. } => details.clone(),
            Self::Sync(cause) => Some(json!({ "cause": cause })),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
