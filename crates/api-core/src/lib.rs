pub mod services;

pub use services::account_credits::account_credits;
pub use services::create_transformation::{
    create_transformation, CreateTransformationInput, TransformationResult,
};
pub use services::delete_image::{delete_image, DeletedImage};
pub use services::get_image::{get_image, ImageDetail};
pub use services::list_images::{list_images, ImagePage, ImageSummary, ListImagesInput, Pagination};
pub use services::render_thumbnail::{render_thumbnail, ThumbnailInput};
pub use services::upload_image::{upload_image, UploadedFile, UploadedImage};

pub use remove_bg_client::AccountCredits;

use std::{path::PathBuf, sync::Arc};

use blob_storage::{BlobStore, BlobStoreError};
use remove_bg_client::BackgroundRemover;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const ALLOWED_CONTENT_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/jpg", "image/webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_file_size: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Everything a service call needs besides its own input.
#[derive(Clone)]
pub struct ServiceContext {
    pub db_path: PathBuf,
    pub blobs: Arc<dyn BlobStore>,
    pub background_remover: Arc<dyn BackgroundRemover>,
    pub limits: UploadLimits,
}

/// The caller as resolved by the HTTP layer's authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    NotFound,
    InvalidInput,
    Upstream,
    Internal,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file provided")]
    NoFileProvided,

    #[error("Invalid file type. Allowed: PNG, JPG, JPEG, WEBP")]
    InvalidFileType { content_type: String },

    #[error("File too large. Maximum size is {}MB", .max_bytes / (1024 * 1024))]
    FileTooLarge { size: u64, max_bytes: u64 },

    #[error("Invalid image: {message}")]
    InvalidImage { message: String },

    #[error("imageId is required")]
    ImageIdRequired,

    #[error("Image not found")]
    ImageNotFound { image_id: String },

    #[error("{message}")]
    TransformationFailed {
        transformation_id: String,
        message: String,
    },

    #[error("Background removal service unavailable: {message}")]
    UpstreamUnavailable { message: String },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn kind(&self) -> ApiErrorKind {
        match self {
            Self::ImageNotFound { .. } => ApiErrorKind::NotFound,
            Self::NoFileProvided
            | Self::InvalidFileType { .. }
            | Self::FileTooLarge { .. }
            | Self::InvalidImage { .. }
            | Self::ImageIdRequired => ApiErrorKind::InvalidInput,
            Self::TransformationFailed { .. } | Self::UpstreamUnavailable { .. } => {
                ApiErrorKind::Upstream
            }
            Self::Storage { .. } | Self::Internal { .. } => ApiErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NoFileProvided => "NO_FILE_PROVIDED",
            Self::InvalidFileType { .. } => "INVALID_FILE_TYPE",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::InvalidImage { .. } => "INVALID_IMAGE",
            Self::ImageIdRequired => "IMAGE_ID_REQUIRED",
            Self::ImageNotFound { .. } => "IMAGE_NOT_FOUND",
            Self::TransformationFailed { .. } => "TRANSFORMATION_FAILED",
            Self::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        Self::Internal {
            message: format!("{error:#}"),
        }
    }
}

impl From<BlobStoreError> for ApiError {
    fn from(error: BlobStoreError) -> Self {
        Self::Storage {
            message: error.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Internal {
            message: error.to_string(),
        }
    }
}
