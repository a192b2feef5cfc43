use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::{new_record_id, open_connection, parse_status_column, ProcessingStatus, NOW_SQL};

const IMAGE_COLUMNS: &str = "id, user_id, original_url, original_filename, mime_type, file_size, \
     width, height, status, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct NewImage {
    pub user_id: String,
    pub original_url: String,
    pub original_filename: String,
    pub mime_type: String,
    pub file_size: i64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: String,
    pub user_id: String,
    pub original_url: String,
    pub original_filename: String,
    pub mime_type: String,
    pub file_size: i64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub status: ProcessingStatus,
    pub created_at: String,
    pub updated_at: String,
}

fn map_image_row(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        original_url: row.get(2)?,
        original_filename: row.get(3)?,
        mime_type: row.get(4)?,
        file_size: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
        status: parse_status_column(8, row.get(8)?)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn load_image(conn: &Connection, image_id: &str) -> Result<Option<ImageRecord>> {
    conn.query_row(
        &format!("SELECT {IMAGE_COLUMNS} FROM images WHERE id = ?1"),
        params![image_id],
        map_image_row,
    )
    .optional()
    .context("Failed to load image")
}

/// Inserts a freshly uploaded image. New rows always start as `PENDING`.
pub fn insert_image(db_path: &Path, image: &NewImage) -> Result<ImageRecord> {
    let conn = open_connection(db_path)?;
    let id = new_record_id();

    conn.execute(
        "INSERT INTO images (id, user_id, original_url, original_filename, mime_type, file_size, width, height, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            image.user_id,
            image.original_url,
            image.original_filename,
            image.mime_type,
            image.file_size,
            image.width,
            image.height,
            ProcessingStatus::Pending.as_str(),
        ],
    )
    .context("Failed to insert image row")?;

    load_image(&conn, &id)?.ok_or_else(|| anyhow!("Inserted image {id} could not be read back"))
}

pub fn find_image_for_user(
    db_path: &Path,
    user_id: &str,
    image_id: &str,
) -> Result<Option<ImageRecord>> {
    let conn = open_connection(db_path)?;

    conn.query_row(
        &format!("SELECT {IMAGE_COLUMNS} FROM images WHERE id = ?1 AND user_id = ?2"),
        params![image_id, user_id],
        map_image_row,
    )
    .optional()
    .context("Failed to load image for user")
}

pub fn set_image_status(db_path: &Path, image_id: &str, status: ProcessingStatus) -> Result<()> {
    let conn = open_connection(db_path)?;

    let updated = conn
        .execute(
            &format!("UPDATE images SET status = ?1, updated_at = {NOW_SQL} WHERE id = ?2"),
            params![status.as_str(), image_id],
        )
        .with_context(|| format!("Failed to set image {image_id} status to {status}"))?;

    if updated == 0 {
        return Err(anyhow!("Image {image_id} does not exist"));
    }

    Ok(())
}

/// Newest first. Rows created within the same millisecond keep insertion order.
pub fn list_images_for_user(
    db_path: &Path,
    user_id: &str,
    status: Option<ProcessingStatus>,
    offset: u64,
    limit: u64,
) -> Result<Vec<ImageRecord>> {
    let conn = open_connection(db_path)?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images
             WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3 OFFSET ?4"
        ))
        .context("Failed to prepare image list query")?;

    let images = stmt
        .query_map(
            params![
                user_id,
                status.map(ProcessingStatus::as_str),
                clamp_to_i64(limit),
                clamp_to_i64(offset)
            ],
            map_image_row,
        )
        .context("Failed to load images")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read image rows")?;

    Ok(images)
}

pub fn count_images_for_user(
    db_path: &Path,
    user_id: &str,
    status: Option<ProcessingStatus>,
) -> Result<u64> {
    let conn = open_connection(db_path)?;

    let total: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM images WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)",
            params![user_id, status.map(ProcessingStatus::as_str)],
            |row| row.get(0),
        )
        .context("Failed to count images")?;

    Ok(total.max(0) as u64)
}

/// Removes the image row; its transformations go with it through the
/// `ON DELETE CASCADE` foreign key.
pub fn delete_image(db_path: &Path, image_id: &str) -> Result<bool> {
    let conn = open_connection(db_path)?;

    let deleted = conn
        .execute("DELETE FROM images WHERE id = ?1", params![image_id])
        .with_context(|| format!("Failed to delete image {image_id}"))?;

    Ok(deleted > 0)
}

fn clamp_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
