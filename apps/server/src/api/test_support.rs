use std::{
    fs,
    io::Cursor,
    path::PathBuf,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use api_core::{ServiceContext, UploadLimits};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, Response},
};
use blob_storage::FsBlobStore;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use remove_bg_client::{AccountCredits, BackgroundRemover, RemoveBgError, RemovedBackground};
use serde_json::Value;

use super::router::ApiState;
use crate::{auth::StaticTokenAuthenticator, config::StaticToken};

pub(super) const PUBLIC_BASE_URL: &str = "http://127.0.0.1:8080";
pub(super) const BOUNDARY: &str = "cutout-test-boundary";

/// Hands the upload back untouched and charges half a credit.
struct EchoRemover;

#[async_trait]
impl BackgroundRemover for EchoRemover {
    async fn remove_background(
        &self,
        image: Vec<u8>,
        _filename: &str,
    ) -> Result<RemovedBackground, RemoveBgError> {
        Ok(RemovedBackground {
            image,
            credits_charged: 0.5,
        })
    }

    async fn account_credits(&self) -> Result<AccountCredits, RemoveBgError> {
        Ok(AccountCredits {
            total: 12.0,
            free_api_calls: 3,
            ..AccountCredits::default()
        })
    }
}

pub(super) struct Harness {
    pub(super) root: PathBuf,
    pub(super) state: ApiState,
}

impl Harness {
    pub(super) fn new(prefix: &str) -> Self {
        Self::with_limits(prefix, UploadLimits::default())
    }

    pub(super) fn with_limits(prefix: &str, limits: UploadLimits) -> Self {
        let mut root = std::env::temp_dir();
        root.push(format!("{prefix}-{}", unique_id()));
        fs::create_dir_all(&root).expect("failed to create temp root");

        let db_path = root.join("cutout.sqlite");
        app_storage::migrations::run_migrations_at(&db_path).expect("failed to run migrations");

        let authenticator = StaticTokenAuthenticator::new(
            ["user-1", "user-2"].into_iter().map(|user_id| StaticToken {
                token: token_for(user_id),
                user_id: user_id.to_string(),
                email: format!("{user_id}@example.com"),
                name: None,
            }),
        );

        let state = ApiState {
            services: ServiceContext {
                db_path,
                blobs: Arc::new(FsBlobStore::new(root.join("storage"), PUBLIC_BASE_URL)),
                background_remover: Arc::new(EchoRemover),
                limits,
            },
            authenticator: Arc::new(authenticator),
        };

        Self { root, state }
    }

    pub(super) fn app(&self) -> axum::Router {
        super::router::build_router(self.state.clone())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

pub(super) fn token_for(user_id: &str) -> String {
    format!("token-{user_id}")
}

pub(super) fn authed(method: &str, uri: &str, user_id: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for(user_id)))
}

pub(super) fn multipart_body(field: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Body {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    Body::from(body)
}

pub(super) fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

/// 2x1 PNG: opaque red on the left, opaque blue on the right.
pub(super) fn two_pixel_png() -> Vec<u8> {
    let mut img = RgbaImage::new(2, 1);
    img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
    img.put_pixel(1, 0, Rgba([0, 0, 255, 255]));

    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("failed to encode fixture");
    buffer.into_inner()
}

pub(super) async fn read_json(response: Response<Body>) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&body).expect("response should be json")
}

pub(super) fn error_code(payload: &Value) -> Option<&str> {
    payload
        .get("error")
        .and_then(|value| value.get("code"))
        .and_then(Value::as_str)
}

fn unique_id() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock error")
        .as_nanos()
}
