use crate::catalog::ALL_FIXED;

/// Primary key present on every dataset; never editable.
pub const ID_COLUMN: &str = "id";

/// Columns a user may edit: everything after the first `fixed_count`
/// columns, minus `id`. The privileged identity starts from column 0, but a
/// `-1` configuration locks the dataset for everyone.
pub fn editable_columns(all_columns: &[String], fixed_count: i64, is_privileged: bool) -> Vec<String> {
    if fixed_count == ALL_FIXED {
        return Vec::new();
    }
    let effective = if is_privileged {
        0
    } else {
        fixed_count.clamp(0, all_columns.len() as i64) as usize
    };
    all_columns
        .iter()
        .enumerate()
        .filter(|(i, c)| i + 1 > effective && c.as_str() != ID_COLUMN)
        .map(|(_, c)| c.clone())
        .collect()
}

/// The leading columns that stay fixed for a non-privileged user.
pub fn fixed_columns(all_columns: &[String], fixed_count: i64) -> Vec<String> {
    if fixed_count == ALL_FIXED {
        return all_columns.to_vec();
    }
    let n = fixed_count.clamp(0, all_columns.len() as i64) as usize;
    all_columns[..n].to_vec()
}
