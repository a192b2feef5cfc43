use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::{new_record_id, open_connection, parse_status_column, ProcessingStatus, NOW_SQL};

const TRANSFORMATION_COLUMNS: &str = "t.id, t.image_id, t.type, t.status, t.output_url, \
     t.error_message, t.processing_time_ms, t.api_cost, t.created_at, t.updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformationType {
    RemoveBackground,
}

impl TransformationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RemoveBackground => "REMOVE_BACKGROUND",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "REMOVE_BACKGROUND" => Some(Self::RemoveBackground),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRecord {
    pub id: String,
    pub image_id: String,
    #[serde(rename = "type")]
    pub transformation_type: TransformationType,
    pub status: ProcessingStatus,
    pub output_url: Option<String>,
    pub error_message: Option<String>,
    #[serde(rename = "processingTime")]
    pub processing_time_ms: Option<u64>,
    pub api_cost: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

fn map_transformation_row(row: &Row<'_>) -> rusqlite::Result<TransformationRecord> {
    let raw_type: String = row.get(2)?;
    let transformation_type = TransformationType::parse(&raw_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("Unknown transformation type: {raw_type}").into(),
        )
    })?;
    let processing_time_ms: Option<i64> = row.get(6)?;

    Ok(TransformationRecord {
        id: row.get(0)?,
        image_id: row.get(1)?,
        transformation_type,
        status: parse_status_column(3, row.get(3)?)?,
        output_url: row.get(4)?,
        error_message: row.get(5)?,
        processing_time_ms: processing_time_ms.map(|value| value.max(0) as u64),
        api_cost: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn load_transformation(conn: &Connection, id: &str) -> Result<Option<TransformationRecord>> {
    conn.query_row(
        &format!("SELECT {TRANSFORMATION_COLUMNS} FROM transformations t WHERE t.id = ?1"),
        params![id],
        map_transformation_row,
    )
    .optional()
    .context("Failed to load transformation")
}

/// Records a transformation that is about to run. It starts in `PROCESSING`
/// because the pipeline executes inline with the request.
pub fn insert_transformation(
    db_path: &Path,
    image_id: &str,
    transformation_type: TransformationType,
) -> Result<TransformationRecord> {
    let conn = open_connection(db_path)?;
    let id = new_record_id();

    conn.execute(
        "INSERT INTO transformations (id, image_id, type, status) VALUES (?1, ?2, ?3, ?4)",
        params![
            id,
            image_id,
            transformation_type.as_str(),
            ProcessingStatus::Processing.as_str()
        ],
    )
    .with_context(|| format!("Failed to insert transformation for image {image_id}"))?;

    load_transformation(&conn, &id)?
        .ok_or_else(|| anyhow!("Inserted transformation {id} could not be read back"))
}

pub fn complete_transformation(
    db_path: &Path,
    transformation_id: &str,
    output_url: &str,
    processing_time_ms: u64,
    api_cost: f64,
) -> Result<TransformationRecord> {
    let conn = open_connection(db_path)?;

    conn.execute(
        &format!(
            "UPDATE transformations
             SET status = ?1, output_url = ?2, processing_time_ms = ?3, api_cost = ?4,
                 error_message = NULL, updated_at = {NOW_SQL}
             WHERE id = ?5"
        ),
        params![
            ProcessingStatus::Completed.as_str(),
            output_url,
            i64::try_from(processing_time_ms).unwrap_or(i64::MAX),
            api_cost,
            transformation_id
        ],
    )
    .with_context(|| format!("Failed to complete transformation {transformation_id}"))?;

    load_transformation(&conn, transformation_id)?
        .ok_or_else(|| anyhow!("Transformation {transformation_id} does not exist"))
}

pub fn fail_transformation(
    db_path: &Path,
    transformation_id: &str,
    error_message: &str,
    processing_time_ms: u64,
) -> Result<TransformationRecord> {
    let conn = open_connection(db_path)?;

    conn.execute(
        &format!(
            "UPDATE transformations
             SET status = ?1, error_message = ?2, processing_time_ms = ?3, updated_at = {NOW_SQL}
             WHERE id = ?4"
        ),
        params![
            ProcessingStatus::Failed.as_str(),
            error_message,
            i64::try_from(processing_time_ms).unwrap_or(i64::MAX),
            transformation_id
        ],
    )
    .with_context(|| format!("Failed to mark transformation {transformation_id} as failed"))?;

    load_transformation(&conn, transformation_id)?
        .ok_or_else(|| anyhow!("Transformation {transformation_id} does not exist"))
}

pub fn list_transformations_for_image(
    db_path: &Path,
    image_id: &str,
) -> Result<Vec<TransformationRecord>> {
    let conn = open_connection(db_path)?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {TRANSFORMATION_COLUMNS} FROM transformations t
             WHERE t.image_id = ?1
             ORDER BY t.created_at DESC, t.rowid DESC"
        ))
        .context("Failed to prepare transformation list query")?;

    let rows = stmt
        .query_map(params![image_id], map_transformation_row)
        .context("Failed to load transformations")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read transformation rows")?;

    Ok(rows)
}

pub fn latest_transformation_for_image(
    db_path: &Path,
    image_id: &str,
) -> Result<Option<TransformationRecord>> {
    let conn = open_connection(db_path)?;

    conn.query_row(
        &format!(
            "SELECT {TRANSFORMATION_COLUMNS} FROM transformations t
             WHERE t.image_id = ?1
             ORDER BY t.created_at DESC, t.rowid DESC
             LIMIT 1"
        ),
        params![image_id],
        map_transformation_row,
    )
    .optional()
    .context("Failed to load latest transformation")
}

/// Looks a transformation up through its owning image so other users'
/// records stay invisible.
pub fn find_transformation_for_user(
    db_path: &Path,
    user_id: &str,
    transformation_id: &str,
) -> Result<Option<TransformationRecord>> {
    let conn = open_connection(db_path)?;

    conn.query_row(
        &format!(
            "SELECT {TRANSFORMATION_COLUMNS} FROM transformations t
             JOIN images i ON i.id = t.image_id
             WHERE t.id = ?1 AND i.user_id = ?2"
        ),
        params![transformation_id, user_id],
        map_transformation_row,
    )
    .optional()
    .context("Failed to load transformation for user")
}
