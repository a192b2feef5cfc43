mod fs;
mod supabase;

pub use fs::FsBlobStore;
pub use supabase::SupabaseBlobStore;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub const PUBLIC_OBJECT_PREFIX: &str = "/storage/v1/object/public";

const DEFAULT_EXTENSION: &str = "png";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Images,
    Transformations,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Images => "images",
            Self::Transformations => "transformations",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "images" => Some(Self::Images),
            "transformations" => Some(Self::Transformations),
            _ => None,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub path: String,
    pub public_url: String,
}

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("object not found: {bucket}/{path}")]
    NotFound { bucket: Bucket, path: String },

    #[error("invalid object path: {path}")]
    InvalidPath { path: String },

    #[error("storage backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Object storage split into the two buckets the pipeline writes to.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under a fresh collision-free name derived from the
    /// original filename's extension. Existing objects are never overwritten.
    async fn upload(
        &self,
        bucket: Bucket,
        bytes: Vec<u8>,
        original_filename: &str,
        content_type: &str,
    ) -> Result<StoredObject, BlobStoreError>;

    async fn download(&self, bucket: Bucket, path: &str) -> Result<Vec<u8>, BlobStoreError>;

    async fn delete(&self, bucket: Bucket, path: &str) -> Result<(), BlobStoreError>;

    fn public_url(&self, bucket: Bucket, path: &str) -> String;
}

/// `<uuid>.<ext>`, where the extension is whatever follows the last dot of
/// the original name (`png` when there is none).
pub fn unique_object_name(original_filename: &str) -> String {
    let extension = original_filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.trim())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(DEFAULT_EXTENSION);

    format!("{}.{}", uuid::Uuid::new_v4().simple(), extension.to_ascii_lowercase())
}

pub fn public_object_url(base_url: &str, bucket: Bucket, path: &str) -> String {
    format!(
        "{}{PUBLIC_OBJECT_PREFIX}/{}/{}",
        base_url.trim_end_matches('/'),
        bucket.as_str(),
        path
    )
}

/// Recovers the object path from a URL produced by [`public_object_url`].
pub fn extract_path_from_url(url: &str, bucket: Bucket) -> Option<String> {
    let marker = format!("{PUBLIC_OBJECT_PREFIX}/{}/", bucket.as_str());
    let (_, path) = url.split_once(&marker)?;

    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// Object names are flat; anything that could escape a bucket is rejected.
pub fn validate_object_path(path: &str) -> Result<(), BlobStoreError> {
    let invalid = path.is_empty()
        || path == "."
        || path == ".."
        || path.contains('/')
        || path.contains('\\')
        || path.contains('\0');

    if invalid {
        return Err(BlobStoreError::InvalidPath {
            path: path.to_string(),
        });
    }

    Ok(())
}

pub fn content_type_for_path(path: &str) -> &'static str {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
