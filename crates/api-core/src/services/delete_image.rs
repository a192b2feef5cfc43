use app_storage::{images, transformations};
use blob_storage::{extract_path_from_url, Bucket};
use serde::Serialize;

use crate::{ApiError, ServiceContext};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedImage {
    pub success: bool,
}

/// Storage cleanup is best-effort: a blob that cannot be removed is logged
/// and the database row is deleted regardless.
pub async fn delete_image(
    ctx: &ServiceContext,
    user_id: &str,
    image_id: &str,
) -> Result<DeletedImage, ApiError> {
    let image = images::find_image_for_user(&ctx.db_path, user_id, image_id)?.ok_or_else(|| {
        ApiError::ImageNotFound {
            image_id: image_id.to_string(),
        }
    })?;
    let outputs = transformations::list_transformations_for_image(&ctx.db_path, &image.id)?;

    delete_blob_best_effort(ctx, Bucket::Images, &image.original_url).await;
    for output_url in outputs.iter().filter_map(|row| row.output_url.as_deref()) {
        delete_blob_best_effort(ctx, Bucket::Transformations, output_url).await;
    }

    images::delete_image(&ctx.db_path, &image.id)?;

    tracing::info!(
        image_id = %image.id,
        user_id,
        transformations = outputs.len(),
        "image deleted"
    );

    Ok(DeletedImage { success: true })
}

async fn delete_blob_best_effort(ctx: &ServiceContext, bucket: Bucket, url: &str) {
    let Some(path) = extract_path_from_url(url, bucket) else {
        tracing::warn!(bucket = %bucket, url, "stored url does not point into bucket");
        return;
    };

    if let Err(error) = ctx.blobs.delete(bucket, &path).await {
        tracing::warn!(bucket = %bucket, path = %path, %error, "failed to delete stored object");
    }
}
