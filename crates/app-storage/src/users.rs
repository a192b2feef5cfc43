use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::{open_connection, NOW_SQL};

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Mirrors the identity provider's user into the local table. The email is
/// refreshed on every call; the display name is only taken on first insert.
pub fn upsert_user(db_path: &Path, user: &NewUser) -> Result<()> {
    let conn = open_connection(db_path)?;

    conn.execute(
        &format!(
            "INSERT INTO users (id, email, name) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET email = excluded.email, updated_at = {NOW_SQL}"
        ),
        params![user.id, user.email, user.name],
    )
    .with_context(|| format!("Failed to upsert user {}", user.id))?;

    Ok(())
}

pub fn find_user(db_path: &Path, user_id: &str) -> Result<Option<UserRecord>> {
    let conn = open_connection(db_path)?;

    conn.query_row(
        "SELECT id, email, name, created_at, updated_at FROM users WHERE id = ?1",
        params![user_id],
        |row| {
            Ok(UserRecord {
                id: row.get(0)?,
                email: row.get(1)?,
                name: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        },
    )
    .optional()
    .context("Failed to load user")
}
