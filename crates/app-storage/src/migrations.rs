use std::{collections::HashSet, fs, path::Path, str};

use anyhow::{anyhow, Context, Result};
use include_dir::{include_dir, Dir};
use rusqlite::Connection;

use crate::{open_connection, NOW_SQL};

static MIGRATIONS_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/migrations");

const MIGRATIONS_TABLE: &str = "__migrations";
const STATEMENT_BREAKPOINT: &str = "--> statement-breakpoint";

/// One embedded `.sql` file, identified by its file stem.
struct Migration {
    tag: String,
    statements: Vec<String>,
}

/// Creates the database file if needed and applies every embedded migration
/// that has not been recorded in the tracking table yet.
pub fn run_migrations_at(db_path: &Path) -> Result<()> {
    let db_dir = db_path
        .parent()
        .ok_or_else(|| anyhow!("Database path {} has no parent directory", db_path.display()))?;
    fs::create_dir_all(db_dir)
        .with_context(|| format!("Failed to create database directory {}", db_dir.display()))?;

    let mut conn = open_connection(db_path)?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
            id TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT ({NOW_SQL})
        );"
    ))
    .context("Failed to create migrations table")?;

    let applied = applied_tags(&conn)?;
    for migration in embedded_migrations()? {
        if !applied.contains(&migration.tag) {
            apply_migration(&mut conn, &migration)?;
        }
    }

    Ok(())
}

fn applied_tags(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn
        .prepare(&format!("SELECT id FROM {MIGRATIONS_TABLE}"))
        .context("Failed to prepare applied migrations query")?;

    let tags = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("Failed to query applied migrations")?
        .collect::<rusqlite::Result<HashSet<_>>>()
        .context("Failed to read applied migrations")?;

    Ok(tags)
}

/// Embedded migrations in tag order. Non-`.sql` files are ignored.
fn embedded_migrations() -> Result<Vec<Migration>> {
    let mut migrations = MIGRATIONS_DIR
        .files()
        .filter(|file| {
            file.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
        })
        .map(|file| -> Result<Migration> {
            let path = file.path();
            let tag = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| anyhow!("Migration {} has no usable name", path.display()))?;
            let sql = str::from_utf8(file.contents())
                .with_context(|| format!("Migration {} is not valid UTF-8", path.display()))?;

            Ok(Migration {
                tag: tag.to_string(),
                statements: split_statements(sql),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    migrations.sort_by(|lhs, rhs| lhs.tag.cmp(&rhs.tag));
    Ok(migrations)
}

fn apply_migration(conn: &mut Connection, migration: &Migration) -> Result<()> {
    let tx = conn
        .transaction()
        .with_context(|| format!("Failed to begin migration {}", migration.tag))?;

    for statement in &migration.statements {
        tx.execute_batch(statement)
            .with_context(|| format!("Migration {} failed at: {statement}", migration.tag))?;
    }

    tx.execute(
        &format!("INSERT INTO {MIGRATIONS_TABLE} (id) VALUES (?1)"),
        [&migration.tag],
    )
    .with_context(|| format!("Failed to record migration {}", migration.tag))?;

    tx.commit()
        .with_context(|| format!("Failed to commit migration {}", migration.tag))
}

fn split_statements(sql: &str) -> Vec<String> {
    sql.split(STATEMENT_BREAKPOINT)
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(str::to_string)
        .collect()
}
