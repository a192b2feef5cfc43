use app_storage::{
    images::{self, ImageRecord},
    transformations::{self, TransformationRecord},
    ProcessingStatus,
};
use serde::Serialize;

use crate::{ApiError, ServiceContext};

const DEFAULT_PAGE: u64 = 1;
const DEFAULT_LIMIT: u64 = 20;
const MAX_LIMIT: u64 = 100;

#[derive(Debug, Clone, Default)]
pub struct ListImagesInput {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSummary {
    #[serde(flatten)]
    pub image: ImageRecord,
    /// At most one entry: the latest transformation.
    pub transformations: Vec<TransformationRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePage {
    pub images: Vec<ImageSummary>,
    pub pagination: Pagination,
}

pub fn list_images(
    ctx: &ServiceContext,
    user_id: &str,
    input: ListImagesInput,
) -> Result<ImagePage, ApiError> {
    let page = input
        .page
        .map_or(DEFAULT_PAGE, |page| page.max(1) as u64);
    let limit = input
        .limit
        .map_or(DEFAULT_LIMIT, |limit| limit.clamp(1, MAX_LIMIT as i64) as u64);
    let status = input.status.as_deref().and_then(parse_status_filter);
    let offset = (page - 1).saturating_mul(limit);

    let rows = images::list_images_for_user(&ctx.db_path, user_id, status, offset, limit)?;
    let total = images::count_images_for_user(&ctx.db_path, user_id, status)?;

    let mut summaries = Vec::with_capacity(rows.len());
    for image in rows {
        let latest = transformations::latest_transformation_for_image(&ctx.db_path, &image.id)?;
        summaries.push(ImageSummary {
            image,
            transformations: latest.into_iter().collect(),
        });
    }

    Ok(ImagePage {
        images: summaries,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages: total.div_ceil(limit),
        },
    })
}

/// Unknown filters are ignored rather than rejected.
fn parse_status_filter(raw: &str) -> Option<ProcessingStatus> {
    raw.trim().parse().ok()
}
