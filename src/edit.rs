//! Authorized single-row edits.
//!
//! An edit moves `Pending -> Authorizing -> ValidatingColumns ->
//! UpdatingSource -> SynchronizingUnified -> Committed`. It is `Rejected`
//! before anything is written and `Failed` when a write step errors, in which
//! case the source update and the unified upsert roll back together.

use crate::access::{self, User};
use crate::audit;
use crate::catalog;
use crate::columns;
use crate::db::{self, Row};
use crate::error::{Result, TrackerError};
use crate::sync::{self, SyncOutcome};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Transaction, TransactionBehavior};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditStage {
    Pending,
    Authorizing,
    ValidatingColumns,
    UpdatingSource,
    SynchronizingUnified,
    Committed,
    Rejected,
    Failed,
}

impl EditStage {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authorizing => "authorizing",
            Self::ValidatingColumns => "validating_columns",
            Self::UpdatingSource => "updating_source",
            Self::SynchronizingUnified => "synchronizing_unified",
            Self::Committed => "committed",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOutcome {
    pub message: String,
    pub applied: Vec<String>,
    pub ignored: Vec<String>,
    pub sync: SyncOutcome,
    /// `None` when every submitted value equalled the stored one.
    pub audit_id: Option<String>,
    pub row: Row,
}

struct EditProgress<'a> {
    dataset: &'a str,
    row_id: i64,
    stage: EditStage,
}

impl EditProgress<'_> {
    fn advance(&mut self, next: EditStage) {
        tracing::debug!(
            dataset = self.dataset,
            row_id = self.row_id,
            from = self.stage.as_str(),
            to = next.as_str(),
            "edit stage"
        );
        self.stage = next;
    }

    fn reject(&mut self, e: TrackerError) -> TrackerError {
        tracing::info!(
            dataset = self.dataset,
            row_id = self.row_id,
            at = self.stage.as_str(),
            code = e.code(),
            "edit rejected"
        );
        self.stage = EditStage::Rejected;
        e
    }

    fn fail(&mut self, e: TrackerError) -> TrackerError {
        tracing::warn!(
            dataset = self.dataset,
            row_id = self.row_id,
            at = self.stage.as_str(),
            error = %e,
            "edit failed; rolled back"
        );
        self.stage = EditStage::Failed;
        e
    }
}

fn changed_columns(original: &Row, changes: &Row, applied: &[String]) -> Row {
    applied
        .iter()
        .filter(|c| {
            let before = original.get(*c).map(db::value_text).unwrap_or_default();
            let after = changes.get(*c).map(db::value_text).unwrap_or_default();
            before != after
        })
        .map(|c| (c.clone(), changes[c].clone()))
        .collect()
}

/// Apply `changes` to row `row_id` of `dataset` on behalf of `user`.
///
/// Only columns the user may edit are written; the rest come back in
/// `ignored`. The unified dataset is brought in line in the same transaction.
pub fn apply_edit(
    conn: &rusqlite::Connection,
    user: &User,
    dataset: &str,
    row_id: i64,
    changes: &Row,
) -> Result<EditOutcome> {
    let mut tracker = EditProgress {
        dataset,
        row_id,
        stage: EditStage::Pending,
    };

    // Held from the authorization check through the unified upsert.
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(|e| tracker.fail(e.into()))?;

    let (config, all_columns) = catalog::resolve(&tx, dataset)?;
    let Some(original) = db::fetch_row_by_id(&tx, dataset, &all_columns, row_id)? else {
        return Err(TrackerError::not_found(
            "row",
            serde_json::json!({ "dataset": dataset, "rowId": row_id }),
        ));
    };

    tracker.advance(EditStage::Authorizing);
    if !access::can_edit(user, &original, &config) {
        return Err(tracker.reject(TrackerError::PermissionDenied(
            "You do not have permission to edit this school".into(),
        )));
    }

    tracker.advance(EditStage::ValidatingColumns);
    let editable = columns::editable_columns(&all_columns, config.fixed_columns, user.is_privileged);
    let (applied, ignored): (Vec<String>, Vec<String>) = changes
        .keys()
        .cloned()
        .partition(|k| editable.contains(k));
    if applied.is_empty() {
        return Err(tracker.reject(TrackerError::Validation(
            "no editable fields supplied".into(),
        )));
    }

    tracker.advance(EditStage::UpdatingSource);

    let set = applied
        .iter()
        .map(|c| format!("{} = ?", db::quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut bind: Vec<Value> = applied.iter().map(|c| db::json_to_sql(&changes[c])).collect();
    bind.push(Value::Integer(row_id));
    tx.execute(
        &format!(
            "UPDATE {} SET {set} WHERE \"id\" = ?",
            db::quote_ident(dataset)
        ),
        params_from_iter(bind),
    )
    .map_err(|e| tracker.fail(e.into()))?;

    tracker.advance(EditStage::SynchronizingUnified);
    let applied_values: Row = applied
        .iter()
        .map(|c| (c.clone(), changes[c].clone()))
        .collect();
    let sync = sync::sync_after_update(&tx, &config, &all_columns, &original, &applied_values)
        .map_err(|e| tracker.fail(TrackerError::Sync(e.to_string())))?;

    let changed = changed_columns(&original, changes, &applied);
    let audit_id = if changed.is_empty() {
        None
    } else {
        let id = audit::record(
            &tx,
            &user.email,
            dataset,
            row_id,
            &serde_json::Value::Object(changed),
            sync.label(),
        )
        .map_err(|e| tracker.fail(e.into()))?;
        Some(id)
    };

    tx.commit().map_err(|e| tracker.fail(e.into()))?;
    tracker.advance(EditStage::Committed);
    tracing::info!(
        dataset,
        row_id,
        user = user.email.as_str(),
        columns = applied.len(),
        sync = sync.label(),
        "edit committed"
    );

    let row = db::fetch_row_by_id(conn, dataset, &all_columns, row_id)?.unwrap_or(original);
    let message = match &sync {
        SyncOutcome::Updated { .. } => "Saved; unified record updated",
        SyncOutcome::Inserted { .. } => "Saved; unified record created",
        SyncOutcome::Skipped { .. } => "Saved",
    };
    Ok(EditOutcome {
        message: message.to_string(),
        applied,
        ignored,
        sync,
        audit_id,
        row,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use serde_json::json;

    fn store() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn.execute_batch(
            "CREATE TABLE asset_schools(id INTEGER PRIMARY KEY, school_no TEXT, zone TEXT,
                 a TEXT, b TEXT, c TEXT, d TEXT, e TEXT, status TEXT, remark TEXT);
             INSERT INTO asset_schools VALUES(1, 'SCH-001', 'North', '', '', '', '', '', 'open', '');
             INSERT INTO asset_schools VALUES(2, 'SCH-002', 'South', '', '', '', '', '', 'open', '');
             CREATE TABLE all_unique_schools(id INTEGER PRIMARY KEY, school_no TEXT, zone TEXT, status TEXT);
             INSERT INTO all_unique_schools VALUES(1, 'SCH-001', 'North', 'unknown');",
        )
        .expect("seed");
        conn
    }

    fn north() -> User {
        User {
            email: "north@x.org".into(),
            name: "North Lead".into(),
            division: "North".into(),
            is_privileged: false,
            email_only: false,
        }
    }

    fn changes(v: serde_json::Value) -> Row {
        v.as_object().cloned().expect("object")
    }

    fn unified_status(conn: &Connection, ident: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT status FROM all_unique_schools WHERE school_no = ?")
            .expect("prepare");
        stmt.query_map([ident], |r| r.get::<_, String>(0))
            .expect("query")
            .collect::<std::result::Result<Vec<_>, _>>()
            .expect("rows")
    }

    #[test]
    fn editable_changes_apply_and_sync() {
        let conn = store();
        let out = apply_edit(
            &conn,
            &north(),
            "asset_schools",
            1,
            &changes(json!({ "status": "closed", "zone": "South" })),
        )
        .expect("edit");
        assert_eq!(out.applied, vec!["status"]);
        assert_eq!(out.ignored, vec!["zone"]);
        assert_eq!(out.sync.label(), "updated");
        assert!(out.audit_id.is_some());
        assert_eq!(out.row["status"], json!("closed"));
        assert_eq!(out.row["zone"], json!("North"));
        assert_eq!(unified_status(&conn, "SCH-001"), vec!["closed"]);
    }

    #[test]
    fn other_division_is_rejected_without_writes() {
        let conn = store();
        let err = apply_edit(
            &conn,
            &north(),
            "asset_schools",
            2,
            &changes(json!({ "status": "closed" })),
        )
        .expect_err("denied");
        assert_eq!(err.code(), "permission_denied");
        let status: String = conn
            .query_row("SELECT status FROM asset_schools WHERE id = 2", [], |r| r.get(0))
            .expect("status");
        assert_eq!(status, "open");
    }

    #[test]
    fn only_fixed_columns_is_a_validation_error() {
        let conn = store();
        let err = apply_edit(
            &conn,
            &north(),
            "asset_schools",
            1,
            &changes(json!({ "id": 9, "school_no": "X" })),
        )
        .expect_err("nothing editable");
        assert_eq!(err.code(), "validation_failed");
    }

    #[test]
    fn missing_row_and_dataset_are_not_found() {
        let conn = store();
        let body = changes(json!({ "status": "x" }));
        assert_eq!(
            apply_edit(&conn, &north(), "asset_schools", 99, &body).expect_err("row").code(),
            "not_found"
        );
        assert_eq!(
            apply_edit(&conn, &north(), "nope", 1, &body).expect_err("dataset").code(),
            "not_found"
        );
    }

    #[test]
    fn repeating_an_edit_converges_and_audits_once() {
        let conn = store();
        let body = changes(json!({ "status": "visited" }));
        let first = apply_edit(&conn, &north(), "asset_schools", 1, &body).expect("first");
        let second = apply_edit(&conn, &north(), "asset_schools", 1, &body).expect("second");
        assert!(first.audit_id.is_some());
        assert!(second.audit_id.is_none());
        assert_eq!(unified_status(&conn, "SCH-001"), vec!["visited"]);
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM app_edit_log", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 1);
    }

    #[test]
    fn unified_identifier_with_stray_whitespace_is_updated_not_duplicated() {
        let conn = store();
        conn.execute(
            "UPDATE all_unique_schools SET school_no = 'SCH-001' || char(9) WHERE id = 1",
            [],
        )
        .expect("retab");
        let out = apply_edit(
            &conn,
            &north(),
            "asset_schools",
            1,
            &changes(json!({ "status": "closed" })),
        )
        .expect("edit");
        assert_eq!(out.sync.label(), "updated");
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM all_unique_schools", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 1);
        assert_eq!(unified_status(&conn, "SCH-001\t"), vec!["closed"]);
    }

    #[test]
    fn rejected_edits_release_the_write_lock() {
        let conn = store();
        let body = changes(json!({ "status": "closed" }));
        apply_edit(&conn, &north(), "asset_schools", 2, &body).expect_err("denied");
        apply_edit(&conn, &north(), "asset_schools", 99, &body).expect_err("missing");
        assert!(conn.is_autocommit());
        apply_edit(&conn, &north(), "asset_schools", 1, &body).expect("edit");
    }

    #[test]
    fn sync_failure_rolls_back_the_source_update() {
        let conn = store();
        // A unified column of the same name that rejects the new value.
        conn.execute_batch(
            "DROP TABLE all_unique_schools;
             CREATE TABLE all_unique_schools(id INTEGER PRIMARY KEY, school_no TEXT,
                 status TEXT CHECK(status <> 'closed'));
             INSERT INTO all_unique_schools VALUES(1, 'SCH-001', 'open');",
        )
        .expect("reshape");
        let err = apply_edit(
            &conn,
            &north(),
            "asset_schools",
            1,
            &changes(json!({ "status": "closed" })),
        )
        .expect_err("sync fails");
        assert_eq!(err.code(), "sync_failed");
        let status: String = conn
            .query_row("SELECT status FROM asset_schools WHERE id = 1", [], |r| r.get(0))
            .expect("status");
        assert_eq!(status, "open");
        assert!(conn.is_autocommit());
    }
}
