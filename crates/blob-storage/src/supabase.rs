use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::Serialize;

use crate::{
    public_object_url, unique_object_name, validate_object_path, BlobStore, BlobStoreError, Bucket,
    StoredObject,
};

const CACHE_CONTROL: &str = "max-age=3600";

/// Supabase Storage over its REST API, authenticated with the service role
/// key so bucket policies don't apply to server-side writes.
#[derive(Debug, Clone)]
pub struct SupabaseBlobStore {
    client: Client,
    base_url: String,
    service_role_key: String,
}

#[derive(Debug, Serialize)]
struct RemoveObjectsRequest<'a> {
    prefixes: [&'a str; 1],
}

impl SupabaseBlobStore {
    pub fn new(base_url: impl Into<String>, service_role_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, service_role_key)
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        service_role_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_role_key: service_role_key.into(),
        }
    }

    fn object_url(&self, bucket: Bucket, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket.as_str(), path)
    }

    fn bucket_url(&self, bucket: Bucket) -> String {
        format!("{}/storage/v1/object/{}", self.base_url, bucket.as_str())
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.service_role_key)
            .header("apikey", &self.service_role_key)
    }
}

#[async_trait]
impl BlobStore for SupabaseBlobStore {
    async fn upload(
        &self,
        bucket: Bucket,
        bytes: Vec<u8>,
        original_filename: &str,
        content_type: &str,
    ) -> Result<StoredObject, BlobStoreError> {
        let path = unique_object_name(original_filename);
        let size = bytes.len();

        let response = self
            .authorized(self.client.post(self.object_url(bucket, &path)))
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CACHE_CONTROL, CACHE_CONTROL)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;
        ensure_success(response, bucket, &path).await?;

        tracing::debug!(bucket = %bucket, path = %path, size, "uploaded object to supabase");

        Ok(StoredObject {
            public_url: self.public_url(bucket, &path),
            path,
        })
    }

    async fn download(&self, bucket: Bucket, path: &str) -> Result<Vec<u8>, BlobStoreError> {
        validate_object_path(path)?;

        let response = self
            .authorized(self.client.get(self.object_url(bucket, path)))
            .send()
            .await?;
        let response = ensure_success(response, bucket, path).await?;

        Ok(response.bytes().await?.to_vec())
    }

    async fn delete(&self, bucket: Bucket, path: &str) -> Result<(), BlobStoreError> {
        validate_object_path(path)?;

        let response = self
            .authorized(self.client.delete(self.bucket_url(bucket)))
            .json(&RemoveObjectsRequest { prefixes: [path] })
            .send()
            .await?;
        ensure_success(response, bucket, path).await?;

        Ok(())
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        public_object_url(&self.base_url, bucket, path)
    }
}

async fn ensure_success(
    response: Response,
    bucket: Bucket,
    path: &str,
) -> Result<Response, BlobStoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();

    // Storage reports missing objects either as a real 404 or as a 400 whose
    // body carries `"statusCode":"404"`.
    if status == StatusCode::NOT_FOUND || message.contains("\"statusCode\":\"404\"") {
        return Err(BlobStoreError::NotFound {
            bucket,
            path: path.to_string(),
        });
    }

    Err(BlobStoreError::Backend {
        status: status.as_u16(),
        message,
    })
}
