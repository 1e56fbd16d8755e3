//! Search, filter, sort and paging over a dataset.
//!
//! Identifiers only ever reach SQL text through [`db::quote_ident`]; every
//! user-supplied value is a bound parameter.

use crate::catalog::ColumnRoles;
use crate::columns::ID_COLUMN;
use crate::db::{self, Row};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;

pub const DEFAULT_PER_PAGE: i64 = 50;
pub const MAX_PER_PAGE: i64 = 200;
pub const DEFAULT_FACET_CAP: usize = 2000;

/// Facet columns offered when a dataset has none configured.
pub const DEFAULT_FACET_COLUMNS: &[&str] = &["zone", "division", "district", "block"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "desc" || v == "descending" => Self::Desc,
            _ => Self::Asc,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Equals,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnFilter {
    pub column: String,
    pub value: String,
    #[serde(rename = "match")]
    pub mode: MatchMode,
}

#[derive(Debug, Clone, Default)]
pub struct ViewParams {
    pub q: String,
    pub filters: Vec<(String, String)>,
    pub sort: Option<String>,
    pub dir: Option<String>,
    pub page: Option<serde_json::Value>,
    pub per_page: Option<serde_json::Value>,
}

impl ViewParams {
    pub fn from_json(params: &serde_json::Value) -> Self {
        let text = |key: &str| {
            params
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let filters = params
            .get("filters")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .map(|(k, v)| (k.clone(), db::trim_cell(&db::value_text(v)).to_string()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            q: text("q").unwrap_or_default(),
            filters,
            sort: text("sort"),
            dir: text("dir"),
            page: params.get("page").cloned(),
            per_page: params.get("perPage").cloned(),
        }
    }
}

fn lenient_int(v: Option<&serde_json::Value>) -> Option<i64> {
    match v? {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn parse_page(v: Option<&serde_json::Value>) -> i64 {
    lenient_int(v).unwrap_or(1).max(1)
}

pub fn parse_per_page(v: Option<&serde_json::Value>) -> i64 {
    lenient_int(v)
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE)
}

pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for ch in s.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Configured facets that exist, else the default names present.
pub fn facet_columns(columns: &[String], roles: &ColumnRoles) -> Vec<String> {
    let configured: Vec<String> = roles
        .facets
        .iter()
        .filter(|f| columns.contains(f))
        .cloned()
        .collect();
    if !configured.is_empty() {
        return configured;
    }
    DEFAULT_FACET_COLUMNS
        .iter()
        .filter_map(|name| columns.iter().find(|c| c.eq_ignore_ascii_case(name)).cloned())
        .collect()
}

/// Restricts a view to rows whose division equals the user's. Mirrors
/// [`crate::access::row_division`]: the first non-empty candidate column wins.
#[derive(Debug, Clone, PartialEq)]
pub struct DivisionScope {
    pub columns: Vec<String>,
    pub division: String,
}

impl DivisionScope {
    fn clause(&self) -> (String, Vec<Value>) {
        if self.columns.is_empty() {
            return ("0".to_string(), Vec::new());
        }
        let candidates = self
            .columns
            .iter()
            .map(|c| format!("NULLIF({}, '')", db::trimmed_text_sql(&db::quote_ident(c))))
            .collect::<Vec<_>>();
        let expr = if candidates.len() == 1 {
            candidates[0].clone()
        } else {
            format!("COALESCE({})", candidates.join(", "))
        };
        (
            format!("{expr} = ? COLLATE NOCASE"),
            vec![Value::Text(db::trim_cell(&self.division).to_string())],
        )
    }
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub select_sql: String,
    pub count_sql: String,
    pub where_params: Vec<Value>,
    pub q: String,
    pub filters: Vec<ColumnFilter>,
    pub sort_column: Option<String>,
    pub dir: SortDir,
    pub page: i64,
    pub per_page: i64,
}

impl QueryPlan {
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

pub fn build_query(
    table: &str,
    columns: &[String],
    facets: &[String],
    scope: Option<&DivisionScope>,
    params: &ViewParams,
) -> QueryPlan {
    let mut clauses: Vec<String> = Vec::new();
    let mut where_params: Vec<Value> = Vec::new();

    if let Some(scope) = scope {
        let (clause, bind) = scope.clause();
        clauses.push(clause);
        where_params.extend(bind);
    }

    let q = params.q.trim().to_string();
    if !q.is_empty() {
        let searchable: Vec<&String> = columns.iter().filter(|c| c.as_str() != ID_COLUMN).collect();
        if !searchable.is_empty() {
            let pattern = format!("%{}%", escape_like(&q));
            let ors = searchable
                .iter()
                .map(|c| {
                    where_params.push(Value::Text(pattern.clone()));
                    format!("CAST({} AS TEXT) LIKE ? ESCAPE '\\'", db::quote_ident(c))
                })
                .collect::<Vec<_>>()
                .join(" OR ");
            clauses.push(format!("({ors})"));
        }
    }

    let mut filters: Vec<ColumnFilter> = Vec::new();
    for (column, value) in &params.filters {
        if value.is_empty() {
            continue;
        }
        if !columns.contains(column) {
            tracing::debug!(table, column = column.as_str(), "ignoring filter on unknown column");
            continue;
        }
        let quoted = db::quote_ident(column);
        let mode = if facets.contains(column) {
            clauses.push(format!("{} = ? COLLATE NOCASE", db::trimmed_text_sql(&quoted)));
            where_params.push(Value::Text(value.clone()));
            MatchMode::Equals
        } else {
            clauses.push(format!("CAST({quoted} AS TEXT) LIKE ? ESCAPE '\\'"));
            where_params.push(Value::Text(format!("%{}%", escape_like(value))));
            MatchMode::Contains
        };
        filters.push(ColumnFilter {
            column: column.clone(),
            value: value.clone(),
            mode,
        });
    }

    let has_id = columns.iter().any(|c| c == ID_COLUMN);
    let sort_column = params
        .sort
        .as_ref()
        .filter(|s| columns.contains(s))
        .cloned()
        .or_else(|| has_id.then(|| ID_COLUMN.to_string()))
        .or_else(|| columns.first().cloned());
    let dir = SortDir::parse(params.dir.as_deref());

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let mut order_sql = String::new();
    if let Some(col) = &sort_column {
        order_sql = format!(" ORDER BY {} {}", db::quote_ident(col), dir.sql());
        if has_id && col != ID_COLUMN {
            order_sql.push_str(", \"id\" ASC");
        }
    }

    let from = db::quote_ident(table);
    QueryPlan {
        select_sql: format!(
            "SELECT {} FROM {from}{where_sql}{order_sql} LIMIT ? OFFSET ?",
            db::select_list(columns)
        ),
        count_sql: format!("SELECT COUNT(*) FROM {from}{where_sql}"),
        where_params,
        q,
        filters,
        sort_column,
        dir,
        page: parse_page(params.page.as_ref()),
        per_page: parse_per_page(params.per_page.as_ref()),
    }
}

#[derive(Debug, Clone)]
pub struct PageResult {
    pub rows: Vec<Row>,
    pub total: i64,
}

pub fn run(conn: &Connection, plan: &QueryPlan, columns: &[String]) -> rusqlite::Result<PageResult> {
    let total: i64 = conn.query_row(
        &plan.count_sql,
        params_from_iter(plan.where_params.iter()),
        |r| r.get(0),
    )?;

    let mut bind = plan.where_params.clone();
    bind.push(Value::Integer(plan.per_page));
    bind.push(Value::Integer(plan.offset()));

    let mut stmt = conn.prepare(&plan.select_sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| db::read_row(r, columns))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PageResult { rows, total })
}

pub fn facet_options(
    conn: &Connection,
    table: &str,
    facets: &[String],
    scope: Option<&DivisionScope>,
    cap: usize,
) -> rusqlite::Result<Vec<(String, Vec<String>)>> {
    let from = db::quote_ident(table);
    let (scope_sql, scope_bind) = match scope {
        Some(s) => {
            let (clause, bind) = s.clause();
            (format!(" AND {clause}"), bind)
        }
        None => (String::new(), Vec::new()),
    };
    let mut out = Vec::with_capacity(facets.len());
    for column in facets {
        let expr = db::trimmed_text_sql(&db::quote_ident(column));
        let sql = format!(
            "SELECT DISTINCT {expr} AS v FROM {from}
             WHERE {expr} IS NOT NULL AND {expr} <> ''{scope_sql}
             ORDER BY v LIMIT ?"
        );
        let mut bind = scope_bind.clone();
        bind.push(Value::Integer(cap as i64));
        let mut stmt = conn.prepare(&sql)?;
        let values = stmt
            .query_map(params_from_iter(bind), |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        out.push((column.clone(), values));
    }
    Ok(out)
}
