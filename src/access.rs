use crate::catalog::{ColumnRoles, DatasetConfig};
use crate::db::{self, Row};
use crate::query::DivisionScope;
use serde::Serialize;

pub const ALL_DIVISIONS: &str = "All Divisions";

// Highest priority first.
pub const DIVISION_ALIASES: &[&str] = &["Zone", "zone", "ZONE", "Division", "division", "DIVISION"];

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub email: String,
    pub name: String,
    pub division: String,
    pub is_privileged: bool,
    /// Logged in with an email only; may look at everything, edit nothing.
    pub email_only: bool,
}

impl User {
    pub fn unrestricted_division(&self) -> bool {
        db::trim_cell(&self.division).eq_ignore_ascii_case(ALL_DIVISIONS)
    }
}

pub fn row_division(row: &Row, roles: &ColumnRoles) -> Option<String> {
    roles
        .division
        .as_deref()
        .into_iter()
        .chain(DIVISION_ALIASES.iter().copied())
        .filter_map(|col| row.get(col))
        .map(|v| db::trim_cell(&db::value_text(v)).to_string())
        .find(|v| !v.is_empty())
}

pub fn division_matches(user: &User, row: &Row, roles: &ColumnRoles) -> bool {
    let wanted = db::trim_cell(&user.division);
    if wanted.is_empty() {
        return false;
    }
    match row_division(row, roles) {
        Some(d) => d.eq_ignore_ascii_case(wanted),
        None => false,
    }
}

/// SQL-side counterpart of [`can_view`]: `None` when the user sees every row,
/// otherwise the division columns (in lookup order) the rows must match on.
pub fn division_scope(user: &User, columns: &[String], roles: &ColumnRoles) -> Option<DivisionScope> {
    if user.is_privileged || user.email_only || user.unrestricted_division() {
        return None;
    }
    let mut candidates: Vec<String> = Vec::new();
    for name in roles
        .division
        .as_deref()
        .into_iter()
        .chain(DIVISION_ALIASES.iter().copied())
    {
        if columns.iter().any(|c| c == name) && !candidates.iter().any(|c| c == name) {
            candidates.push(name.to_string());
        }
    }
    Some(DivisionScope {
        columns: candidates,
        division: user.division.clone(),
    })
}

pub fn can_view(user: &User, row: &Row, roles: &ColumnRoles) -> bool {
    user.is_privileged
        || user.email_only
        || user.unrestricted_division()
        || division_matches(user, row, roles)
}

pub fn can_edit(user: &User, row: &Row, dataset: &DatasetConfig) -> bool {
    if dataset.is_read_only() {
        return false;
    }
    if user.is_privileged {
        return true;
    }
    if user.email_only || dataset.is_unified {
        return false;
    }
    user.unrestricted_division() || division_matches(user, row, &dataset.roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DatasetConfig;
    use serde_json::json;

    fn user(division: &str) -> User {
        User {
            email: "n@example.org".into(),
            name: "N".into(),
            division: division.into(),
            is_privileged: false,
            email_only: false,
        }
    }

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().expect("object")
    }

    fn subject() -> DatasetConfig {
        let mut cfg = DatasetConfig::unconfigured("asset_schools");
        cfg.fixed_columns = 2;
        cfg
    }

    #[test]
    fn division_match_is_trimmed_and_case_insensitive() {
        let north = user("North");
        let d = subject();
        assert!(can_edit(&north, &row(json!({ "id": 1, "zone": "North" })), &d));
        assert!(can_edit(&north, &row(json!({ "id": 1, "Zone": "  north " })), &d));
        assert!(!can_edit(&north, &row(json!({ "id": 2, "zone": "South" })), &d));
        assert!(!can_view(&north, &row(json!({ "id": 2, "zone": "South" })), &d.roles));
    }

    #[test]
    fn division_cells_with_control_whitespace_still_match() {
        let north = user("North");
        let d = subject();
        let r = row(json!({ "id": 1, "zone": "North\n" }));
        assert_eq!(row_division(&r, &d.roles).as_deref(), Some("North"));
        assert!(can_view(&north, &r, &d.roles));
        assert!(can_edit(&north, &row(json!({ "zone": "\tnorth\u{a0}" })), &d));
        // Whitespace-only counts as empty, so the next alias is used.
        let r = row(json!({ "Zone": "\t\r\n", "division": "South" }));
        assert_eq!(row_division(&r, &d.roles).as_deref(), Some("South"));
    }

    #[test]
    fn first_non_empty_alias_wins() {
        let r = row(json!({ "Zone": "", "zone": null, "Division": "East", "division": "West" }));
        assert_eq!(row_division(&r, &ColumnRoles::default()).as_deref(), Some("East"));

        let roles = ColumnRoles {
            division: Some("Region".into()),
            ..Default::default()
        };
        let mapped = row(json!({ "Region": "West", "zone": "East" }));
        assert_eq!(row_division(&mapped, &roles).as_deref(), Some("West"));
    }

    #[test]
    fn rows_without_division_only_for_unrestricted() {
        let r = row(json!({ "id": 3, "name": "Hill School" }));
        let d = subject();
        assert!(!can_view(&user("North"), &r, &d.roles));
        assert!(can_view(&user("All Divisions"), &r, &d.roles));
        assert!(can_edit(&user("all divisions"), &r, &d));
    }

    #[test]
    fn email_only_sessions_view_everything_and_edit_nothing() {
        let mut u = user("North");
        u.email_only = true;
        let r = row(json!({ "id": 1, "zone": "North" }));
        assert!(can_view(&u, &r, &ColumnRoles::default()));
        assert!(!can_edit(&u, &r, &subject()));
    }

    #[test]
    fn unified_and_read_only_datasets() {
        let mut unified = DatasetConfig::unconfigured("all_unique_schools");
        unified.is_unified = true;
        let r = row(json!({ "id": 1, "zone": "North" }));
        assert!(!can_edit(&user("All Divisions"), &r, &unified));

        let mut admin = user("North");
        admin.is_privileged = true;
        assert!(can_edit(&admin, &r, &unified));

        let mut summary = DatasetConfig::unconfigured("summary_data");
        summary.fixed_columns = -1;
        assert!(!can_edit(&admin, &r, &summary));
    }

    #[test]
    fn scope_lists_present_division_columns_in_lookup_order() {
        let columns: Vec<String> = ["id", "division", "Zone", "Region"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let roles = ColumnRoles {
            division: Some("Region".into()),
            ..Default::default()
        };
        let scope = division_scope(&user("North"), &columns, &roles).expect("scoped");
        assert_eq!(scope.columns, vec!["Region", "Zone", "division"]);
        assert!(division_scope(&user("All Divisions"), &columns, &roles).is_none());
        assert!(division_scope(&User { email_only: true, ..user("North") }, &columns, &roles).is_none());
    }

    #[test]
    fn edit_implies_view() {
        let users = [
            user("North"),
            user("South"),
            user("All Divisions"),
            User { email_only: true, ..user("North") },
            User { is_privileged: true, ..user("") },
        ];
        let rows = [
            row(json!({ "zone": "North" })),
            row(json!({ "Division": "south" })),
            row(json!({ "name": "x" })),
        ];
        let mut unified = subject();
        unified.is_unified = true;
        for d in [subject(), unified] {
            for u in &users {
                for r in &rows {
                    if can_edit(u, r, &d) {
                        assert!(can_view(u, r, &d.roles), "{u:?} {r:?}");
                    }
                }
            }
        }
    }
}
