use std::time::Instant;

use app_storage::{
    images::{self, ImageRecord},
    transformations::{self, TransformationType},
    ProcessingStatus,
};
use blob_storage::{extract_path_from_url, BlobStoreError, Bucket};
use image_processing::{ImageProcessingError, PNG_CONTENT_TYPE};
use remove_bg_client::RemoveBgError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ApiError, ServiceContext};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransformationInput {
    pub image_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationResult {
    pub id: String,
    pub image_id: String,
    pub status: ProcessingStatus,
    pub output_url: String,
    /// Milliseconds spent in the pipeline.
    pub processing_time: u64,
    pub credits_charged: f64,
}

#[derive(Debug, Error)]
enum PipelineError {
    #[error("Original image url is not a stored object: {0}")]
    OriginalUnresolvable(String),

    #[error("Failed to fetch original image: {0}")]
    Download(#[source] BlobStoreError),

    #[error(transparent)]
    RemoveBackground(#[from] RemoveBgError),

    #[error("Failed to flip image: {0}")]
    Flip(#[from] ImageProcessingError),

    #[error("Failed to store processed image: {0}")]
    Upload(#[source] BlobStoreError),

    #[error("Image worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Failed to record transformation result: {0:#}")]
    Record(anyhow::Error),
}

struct PipelineOutput {
    output_url: String,
    credits_charged: f64,
}

/// Runs background removal followed by a horizontal flip, inline with the
/// request. Every outcome is recorded on both the image and the
/// transformation row before returning.
pub async fn create_transformation(
    ctx: &ServiceContext,
    user_id: &str,
    input: CreateTransformationInput,
) -> Result<TransformationResult, ApiError> {
    let image_id = input
        .image_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or(ApiError::ImageIdRequired)?;

    let image = images::find_image_for_user(&ctx.db_path, user_id, &image_id)?
        .ok_or(ApiError::ImageNotFound { image_id })?;

    images::set_image_status(&ctx.db_path, &image.id, ProcessingStatus::Processing)?;
    let transformation = transformations::insert_transformation(
        &ctx.db_path,
        &image.id,
        TransformationType::RemoveBackground,
    )?;

    tracing::info!(
        image_id = %image.id,
        transformation_id = %transformation.id,
        "transformation started"
    );

    let started = Instant::now();
    let outcome = match run_pipeline(ctx, &image).await {
        Ok(output) => {
            let elapsed_ms = elapsed_millis(started);
            match record_completion(ctx, &image.id, &transformation.id, &output, elapsed_ms) {
                Ok(()) => Ok((output, elapsed_ms)),
                Err(error) => {
                    remove_output_blob(ctx, &output.output_url).await;
                    Err(PipelineError::Record(error))
                }
            }
        }
        Err(error) => Err(error),
    };

    match outcome {
        Ok((output, elapsed_ms)) => {
            tracing::info!(
                image_id = %image.id,
                transformation_id = %transformation.id,
                elapsed_ms,
                credits = output.credits_charged,
                "transformation completed"
            );

            Ok(TransformationResult {
                id: transformation.id,
                image_id: image.id,
                status: ProcessingStatus::Completed,
                output_url: output.output_url,
                processing_time: elapsed_ms,
                credits_charged: output.credits_charged,
            })
        }
        Err(error) => {
            let elapsed_ms = elapsed_millis(started);
            let message = error.to_string();
            tracing::error!(
                image_id = %image.id,
                transformation_id = %transformation.id,
                elapsed_ms,
                error = %message,
                "transformation failed"
            );

            record_failure(ctx, &image.id, &transformation.id, &message, elapsed_ms);

            Err(ApiError::TransformationFailed {
                transformation_id: transformation.id,
                message,
            })
        }
    }
}

fn elapsed_millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn record_completion(
    ctx: &ServiceContext,
    image_id: &str,
    transformation_id: &str,
    output: &PipelineOutput,
    elapsed_ms: u64,
) -> anyhow::Result<()> {
    transformations::complete_transformation(
        &ctx.db_path,
        transformation_id,
        &output.output_url,
        elapsed_ms,
        output.credits_charged,
    )?;
    images::set_image_status(&ctx.db_path, image_id, ProcessingStatus::Completed)
}

/// Each write is attempted even when the other one fails.
fn record_failure(
    ctx: &ServiceContext,
    image_id: &str,
    transformation_id: &str,
    message: &str,
    elapsed_ms: u64,
) {
    if let Err(error) =
        transformations::fail_transformation(&ctx.db_path, transformation_id, message, elapsed_ms)
    {
        tracing::error!(
            transformation_id,
            error = %format!("{error:#}"),
            "failed to mark transformation as failed"
        );
    }

    if let Err(error) = images::set_image_status(&ctx.db_path, image_id, ProcessingStatus::Failed) {
        tracing::error!(
            image_id,
            error = %format!("{error:#}"),
            "failed to mark image as failed"
        );
    }
}

async fn remove_output_blob(ctx: &ServiceContext, output_url: &str) {
    let Some(path) = extract_path_from_url(output_url, Bucket::Transformations) else {
        return;
    };

    if let Err(error) = ctx.blobs.delete(Bucket::Transformations, &path).await {
        tracing::warn!(path = %path, %error, "failed to remove unrecorded output");
    }
}

async fn run_pipeline(
    ctx: &ServiceContext,
    image: &ImageRecord,
) -> Result<PipelineOutput, PipelineError> {
    let original_path = extract_path_from_url(&image.original_url, Bucket::Images)
        .ok_or_else(|| PipelineError::OriginalUnresolvable(image.original_url.clone()))?;
    let original = ctx
        .blobs
        .download(Bucket::Images, &original_path)
        .await
        .map_err(PipelineError::Download)?;

    let removed = ctx
        .background_remover
        .remove_background(original, &image.original_filename)
        .await?;

    let image_bytes = removed.image;
    let flipped =
        tokio::task::spawn_blocking(move || image_processing::flip_horizontal(&image_bytes))
            .await??;

    let stored = ctx
        .blobs
        .upload(
            Bucket::Transformations,
            flipped,
            &processed_filename(&image.original_filename),
            PNG_CONTENT_TYPE,
        )
        .await
        .map_err(PipelineError::Upload)?;

    Ok(PipelineOutput {
        output_url: stored.public_url,
        credits_charged: removed.credits_charged,
    })
}

/// The output is always PNG, whatever the original's extension was.
fn processed_filename(original_filename: &str) -> String {
    let stem = match original_filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => original_filename,
    };
    format!("processed_{stem}.png")
}
