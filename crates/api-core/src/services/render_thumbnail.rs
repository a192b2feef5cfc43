use app_storage::{images, transformations, ProcessingStatus};
use blob_storage::{extract_path_from_url, Bucket};
use image_processing::{DEFAULT_THUMBNAIL_QUALITY, DEFAULT_THUMBNAIL_SIZE};

use crate::{ApiError, ServiceContext};

const MIN_THUMBNAIL_SIZE: u32 = 16;
const MAX_THUMBNAIL_SIZE: u32 = 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct ThumbnailInput {
    pub size: Option<u32>,
}

/// JPEG preview of the newest completed output, falling back to the
/// original upload while nothing has completed yet.
pub async fn render_thumbnail(
    ctx: &ServiceContext,
    user_id: &str,
    image_id: &str,
    input: ThumbnailInput,
) -> Result<Vec<u8>, ApiError> {
    let image = images::find_image_for_user(&ctx.db_path, user_id, image_id)?.ok_or_else(|| {
        ApiError::ImageNotFound {
            image_id: image_id.to_string(),
        }
    })?;

    let latest_output = transformations::list_transformations_for_image(&ctx.db_path, &image.id)?
        .into_iter()
        .filter(|row| row.status == ProcessingStatus::Completed)
        .find_map(|row| row.output_url);

    let (bucket, url) = match latest_output {
        Some(url) => (Bucket::Transformations, url),
        None => (Bucket::Images, image.original_url),
    };
    let path = extract_path_from_url(&url, bucket).ok_or_else(|| ApiError::Internal {
        message: format!("stored url does not point into {bucket}: {url}"),
    })?;
    let source = ctx.blobs.download(bucket, &path).await?;

    let size = input
        .size
        .unwrap_or(DEFAULT_THUMBNAIL_SIZE)
        .clamp(MIN_THUMBNAIL_SIZE, MAX_THUMBNAIL_SIZE);

    let thumbnail = tokio::task::spawn_blocking(move || {
        image_processing::generate_thumbnail(&source, size, DEFAULT_THUMBNAIL_QUALITY)
    })
    .await?
    .map_err(|error| ApiError::Internal {
        message: format!("thumbnail generation failed: {error}"),
    })?;

    tracing::debug!(image_id = %image.id, size, bytes = thumbnail.len(), "thumbnail rendered");

    Ok(thumbnail)
}
