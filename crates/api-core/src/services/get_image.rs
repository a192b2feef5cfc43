use app_storage::{
    images::{self, ImageRecord},
    transformations::{self, TransformationRecord},
};
use serde::Serialize;

use crate::{ApiError, ServiceContext};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDetail {
    #[serde(flatten)]
    pub image: ImageRecord,
    /// Newest first.
    pub transformations: Vec<TransformationRecord>,
}

pub fn get_image(
    ctx: &ServiceContext,
    user_id: &str,
    image_id: &str,
) -> Result<ImageDetail, ApiError> {
    let image = images::find_image_for_user(&ctx.db_path, user_id, image_id)?.ok_or_else(|| {
        ApiError::ImageNotFound {
            image_id: image_id.to_string(),
        }
    })?;
    let transformations = transformations::list_transformations_for_image(&ctx.db_path, &image.id)?;

    Ok(ImageDetail {
        image,
        transformations,
    })
}
