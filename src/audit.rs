use rusqlite::{params_from_iter, types::Value, Connection};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRecord {
    pub id: String,
    pub edited_at: String,
    pub user_email: String,
    pub dataset: String,
    pub row_id: i64,
    pub changes: serde_json::Value,
    pub sync_outcome: String,
}

pub fn record(
    conn: &Connection,
    user_email: &str,
    dataset: &str,
    row_id: i64,
    changes: &serde_json::Value,
    sync_outcome: &str,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO app_edit_log(id, edited_at, user_email, table_name, row_id, changes_json, sync_outcome)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            chrono::Utc::now().to_rfc3339(),
            user_email,
            dataset,
            row_id,
            changes.to_string(),
            sync_outcome,
        ),
    )?;
    Ok(id)
}

/// Most recent edits first.
pub fn list(conn: &Connection, dataset: Option<&str>, limit: i64) -> rusqlite::Result<Vec<EditRecord>> {
    let mut sql = String::from(
        "SELECT id, edited_at, user_email, table_name, row_id, changes_json, sync_outcome
         FROM app_edit_log",
    );
    let mut bind: Vec<Value> = Vec::new();
    if let Some(d) = dataset {
        sql.push_str(" WHERE table_name = ?");
        bind.push(Value::Text(d.to_string()));
    }
    sql.push_str(" ORDER BY edited_at DESC, rowid DESC LIMIT ?");
    bind.push(Value::Integer(limit));

    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params_from_iter(bind), |r| {
            let changes: String = r.get(5)?;
            Ok(EditRecord {
                id: r.get(0)?,
                edited_at: r.get(1)?,
                user_email: r.get(2)?,
                dataset: r.get(3)?,
                row_id: r.get(4)?,
                changes: serde_json::from_str(&changes).unwrap_or(serde_json::Value::Null),
                sync_outcome: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    #[test]
    fn list_filters_by_dataset_newest_first() {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        record(&conn, "a@x.org", "asset_schools", 1, &json!({ "status": "open" }), "updated")
            .expect("record");
        record(&conn, "b@x.org", "cares_schools", 4, &json!({ "visits": 2 }), "skipped")
            .expect("record");
        let last = record(&conn, "a@x.org", "asset_schools", 1, &json!({ "status": "closed" }), "updated")
            .expect("record");

        let asset = list(&conn, Some("asset_schools"), 10).expect("list");
        assert_eq!(asset.len(), 2);
        assert_eq!(asset[0].id, last);
        assert_eq!(asset[0].changes, json!({ "status": "closed" }));

        assert_eq!(list(&conn, None, 10).expect("list").len(), 3);
        assert_eq!(list(&conn, None, 1).expect("list").len(), 1);
    }
}
