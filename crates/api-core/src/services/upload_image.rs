use app_storage::{
    images::{self, NewImage},
    users::{self, NewUser},
    ProcessingStatus,
};
use blob_storage::{extract_path_from_url, Bucket};
use serde::Serialize;

use crate::{ApiError, AuthenticatedUser, ServiceContext, ALLOWED_CONTENT_TYPES};

const FALLBACK_FILENAME: &str = "upload";

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub id: String,
    pub original_url: String,
    pub original_filename: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub status: ProcessingStatus,
    pub created_at: String,
}

pub async fn upload_image(
    ctx: &ServiceContext,
    user: &AuthenticatedUser,
    file: Option<UploadedFile>,
) -> Result<UploadedImage, ApiError> {
    let file = file.ok_or(ApiError::NoFileProvided)?;
    let content_type = normalize_content_type(&file.content_type);
    validate_upload(ctx, &content_type, file.bytes.len() as u64)?;

    let UploadedFile {
        filename, bytes, ..
    } = file;
    let filename = normalize_filename(&filename);
    let file_size = bytes.len() as u64;

    let (bytes, metadata) = tokio::task::spawn_blocking(move || {
        let metadata = image_processing::probe_image(&bytes);
        (bytes, metadata)
    })
    .await?;
    let metadata = metadata.map_err(|error| ApiError::InvalidImage {
        message: error.to_string(),
    })?;

    users::upsert_user(
        &ctx.db_path,
        &NewUser {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
        },
    )?;

    let stored = ctx
        .blobs
        .upload(Bucket::Images, bytes, &filename, &content_type)
        .await?;

    let inserted = images::insert_image(
        &ctx.db_path,
        &NewImage {
            user_id: user.id.clone(),
            original_url: stored.public_url.clone(),
            original_filename: filename,
            mime_type: content_type,
            file_size: i64::try_from(file_size).unwrap_or(i64::MAX),
            width: Some(metadata.width),
            height: Some(metadata.height),
        },
    );

    let image = match inserted {
        Ok(image) => image,
        Err(error) => {
            remove_orphaned_blob(ctx, &stored.public_url).await;
            return Err(error.into());
        }
    };

    tracing::info!(
        image_id = %image.id,
        user_id = %user.id,
        size = file_size,
        width = metadata.width,
        height = metadata.height,
        "image uploaded"
    );

    Ok(UploadedImage {
        id: image.id,
        original_url: image.original_url,
        original_filename: image.original_filename,
        width: image.width,
        height: image.height,
        status: image.status,
        created_at: image.created_at,
    })
}

fn validate_upload(ctx: &ServiceContext, content_type: &str, size: u64) -> Result<(), ApiError> {
    if !ALLOWED_CONTENT_TYPES.contains(&content_type) {
        return Err(ApiError::InvalidFileType {
            content_type: content_type.to_string(),
        });
    }

    if size > ctx.limits.max_file_size {
        return Err(ApiError::FileTooLarge {
            size,
            max_bytes: ctx.limits.max_file_size,
        });
    }

    Ok(())
}

/// Drops parameters such as `; charset=...` and lowercases the essence.
fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Keeps only the final path segment a browser might send.
fn normalize_filename(filename: &str) -> String {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        name.to_string()
    }
}

async fn remove_orphaned_blob(ctx: &ServiceContext, public_url: &str) {
    let Some(path) = extract_path_from_url(public_url, Bucket::Images) else {
        return;
    };

    if let Err(error) = ctx.blobs.delete(Bucket::Images, &path).await {
        tracing::warn!(path = %path, %error, "failed to remove orphaned upload");
    }
}
