use crate::access::{User, ALL_DIVISIONS};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// One entry of a `users.json` directory file.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryEntry {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub division: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub email: String,
    pub name: String,
    pub division: String,
    pub has_password: bool,
}

pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn directory_is_empty(conn: &Connection) -> rusqlite::Result<bool> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM app_users", [], |r| r.get(0))?;
    Ok(n == 0)
}

pub fn upsert(conn: &Connection, entry: &DirectoryEntry) -> rusqlite::Result<()> {
    let email = entry.email.trim();
    let name = entry
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(email);
    let division = entry
        .division
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(ALL_DIVISIONS);
    let password = entry.password.as_deref().map(hash_password);
    conn.execute(
        "INSERT INTO app_users(email, name, division, password_sha256)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(email) DO UPDATE SET
           name = excluded.name,
           division = excluded.division,
           password_sha256 = COALESCE(excluded.password_sha256, app_users.password_sha256)",
        (email, name, division, password),
    )?;
    Ok(())
}

pub fn import_file(conn: &Connection, path: &Path) -> anyhow::Result<usize> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let entries: Vec<DirectoryEntry> =
        serde_json::from_str(&text).context("users file must be a JSON array of users")?;

    let tx = conn.unchecked_transaction()?;
    let mut imported = 0;
    for entry in &entries {
        if !entry.email.contains('@') {
            tracing::warn!(email = entry.email.as_str(), "skipping directory entry without a valid email");
            continue;
        }
        upsert(&tx, entry)?;
        imported += 1;
    }
    tx.commit()?;
    Ok(imported)
}

pub fn list(conn: &Connection) -> rusqlite::Result<Vec<DirectoryUser>> {
    let mut stmt = conn.prepare(
        "SELECT email, name, division, password_sha256 IS NOT NULL FROM app_users ORDER BY email",
    )?;
    let users = stmt
        .query_map([], |r| {
            Ok(DirectoryUser {
                email: r.get(0)?,
                name: r.get(1)?,
                division: r.get(2)?,
                has_password: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

fn lookup(conn: &Connection, email: &str) -> rusqlite::Result<Option<(String, String, String, Option<String>)>> {
    conn.query_row(
        "SELECT email, name, division, password_sha256 FROM app_users WHERE email = ?",
        [email.trim()],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
    )
    .optional()
}

fn is_privileged(email: &str, privileged_email: &str) -> bool {
    email.trim().eq_ignore_ascii_case(privileged_email.trim())
}

/// Password login against the directory.
pub fn authenticate(
    conn: &Connection,
    email: &str,
    password: &str,
    privileged_email: &str,
) -> rusqlite::Result<Option<User>> {
    let Some((email, name, division, stored)) = lookup(conn, email)? else {
        return Ok(None);
    };
    match stored {
        Some(hash) if hash == hash_password(password) => Ok(Some(User {
            is_privileged: is_privileged(&email, privileged_email),
            email,
            name,
            division,
            email_only: false,
        })),
        _ => Ok(None),
    }
}

/// Email-only login: may view every row, may edit none. Directory entries
/// contribute their name and division; unknown addresses see all divisions.
/// The privileged identity must use a password.
pub fn email_only_session(
    conn: &Connection,
    email: &str,
    privileged_email: &str,
) -> rusqlite::Result<Option<User>> {
    let email = email.trim();
    if !email.contains('@') || is_privileged(email, privileged_email) {
        return Ok(None);
    }
    let user = match lookup(conn, email)? {
        Some((email, name, division, _)) => User {
            email,
            name,
            division,
            is_privileged: false,
            email_only: true,
        },
        None => User {
            email: email.to_string(),
            name: email.to_string(),
            division: ALL_DIVISIONS.to_string(),
            is_privileged: false,
            email_only: true,
        },
    };
    Ok(Some(user))
}
