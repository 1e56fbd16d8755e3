use crate::catalog::ColumnRoles;
use crate::db::{self, Row};

/// Known spellings of the school-number column, highest priority first.
pub const IDENTIFIER_ALIASES: &[&str] = &[
    "school_number",
    "school_no",
    "school_num",
    "school_code",
    "school_id",
    "udise_code",
    "udise",
];

const NULL_LIKE: &[&str] = &["nan", "none", "null"];

/// Canonical form of a school identifier, or `None` for blanks and null-like
/// sentinels left behind by spreadsheet exports.
pub fn normalize(value: &serde_json::Value) -> Option<String> {
    let text = db::value_text(value);
    let trimmed = db::trim_cell(&text);
    if trimmed.is_empty() || NULL_LIKE.iter().any(|s| trimmed.eq_ignore_ascii_case(s)) {
        return None;
    }
    Some(trimmed.to_string())
}

/// Column holding the school identifier. An explicit role mapping wins when
/// the mapped column exists; otherwise the first alias present
/// (case-insensitive) is used, returned in the table's own spelling.
pub fn find_identifier_column(columns: &[String], roles: &ColumnRoles) -> Option<String> {
    if let Some(mapped) = roles.identifier.as_deref() {
        if let Some(c) = columns.iter().find(|c| c.as_str() == mapped) {
            return Some(c.clone());
        }
        tracing::warn!(column = mapped, "mapped identifier column is missing; using aliases");
    }
    IDENTIFIER_ALIASES.iter().find_map(|alias| {
        columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(alias))
            .cloned()
    })
}

/// Normalized identifier of `row`, read from `column`.
pub fn row_identifier(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(normalize)
}
