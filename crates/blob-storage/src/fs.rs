use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::{
    public_object_url, unique_object_name, validate_object_path, BlobStore, BlobStoreError, Bucket,
    StoredObject,
};

/// Buckets as directories under `root`. Public URLs point back at the HTTP
/// server, which serves them from the same directories.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: Bucket, path: &str) -> Result<PathBuf, BlobStoreError> {
        validate_object_path(path)?;
        Ok(self.root.join(bucket.as_str()).join(path))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(
        &self,
        bucket: Bucket,
        bytes: Vec<u8>,
        original_filename: &str,
        _content_type: &str,
    ) -> Result<StoredObject, BlobStoreError> {
        let path = unique_object_name(original_filename);
        let object_path = self.object_path(bucket, &path)?;

        if let Some(parent) = object_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&object_path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        tracing::debug!(bucket = %bucket, path = %path, size = bytes.len(), "stored object");

        Ok(StoredObject {
            public_url: self.public_url(bucket, &path),
            path,
        })
    }

    async fn download(&self, bucket: Bucket, path: &str) -> Result<Vec<u8>, BlobStoreError> {
        let object_path = self.object_path(bucket, path)?;

        match tokio::fs::read(&object_path).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == ErrorKind::NotFound => Err(BlobStoreError::NotFound {
                bucket,
                path: path.to_string(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    async fn delete(&self, bucket: Bucket, path: &str) -> Result<(), BlobStoreError> {
        let object_path = self.object_path(bucket, path)?;

        match tokio::fs::remove_file(&object_path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Err(BlobStoreError::NotFound {
                bucket,
                path: path.to_string(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        public_object_url(&self.public_base_url, bucket, path)
    }
}
