use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use api_core::{
    AccountCredits, ApiError, ApiErrorKind, AuthenticatedUser, CreateTransformationInput,
    DeletedImage, ImageDetail, ImagePage, ListImagesInput, ServiceContext, ThumbnailInput,
    TransformationResult, UploadedFile, UploadedImage,
};
use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path,
        Query, Request, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use blob_storage::{content_type_for_path, BlobStoreError, Bucket};
use image_processing::JPEG_CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tower::{Layer, Service};

use crate::auth::{AuthError, Authenticator};

const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;
const UPLOAD_FIELD_NAME: &str = "file";

#[derive(Clone)]
pub struct ApiState {
    pub services: ServiceContext,
    pub authenticator: Arc<dyn Authenticator>,
}

pub fn build_router(state: ApiState) -> Router {
    let protected_routes = build_protected_routes(&state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route(
            "/storage/v1/object/public/{bucket}/{*path}",
            get(public_object_handler),
        )
        .merge(protected_routes)
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct ListImagesQuery {
    page: Option<String>,
    limit: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ThumbnailQuery {
    size: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: String,
    message: String,
}

type HttpError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, HttpError>;

fn build_protected_routes(state: &ApiState) -> Router<ApiState> {
    let body_limit = state
        .services
        .limits
        .max_file_size
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route(
            "/api/v1/images",
            post(upload_image_handler)
                .layer(DefaultBodyLimit::max(body_limit))
                .get(list_images_handler),
        )
        .route(
            "/api/v1/images/{image_id}",
            get(get_image_handler).delete(delete_image_handler),
        )
        .route(
            "/api/v1/images/{image_id}/thumbnail",
            get(thumbnail_handler),
        )
        .route("/api/v1/transformations", post(create_transformation_handler))
        .route("/api/v1/account/credits", get(account_credits_handler))
        .route_layer(AuthLayer::new(Arc::clone(&state.authenticator)))
}

async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn upload_image_handler(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadedImage>), HttpError> {
    let max_file_size = state.services.limits.max_file_size;
    let reject = |error: MultipartError| multipart_error_to_http(error, max_file_size);
    let mut file = None;

    while let Some(field) = multipart.next_field().await.map_err(reject)? {
        let name = field.name().map(str::to_string);
        if name.as_deref() != Some(UPLOAD_FIELD_NAME) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(reject)?;

        file = Some(UploadedFile {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    match api_core::upload_image(&state.services, &user, file).await {
        Ok(image) => Ok((StatusCode::CREATED, Json(image))),
        Err(error) => Err(api_error_to_http(error)),
    }
}

async fn list_images_handler(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListImagesQuery>,
) -> ApiResult<ImagePage> {
    let input = ListImagesInput {
        page: parse_number(query.page.as_deref()),
        limit: parse_number(query.limit.as_deref()),
        status: query.status,
    };

    api_core::list_images(&state.services, &user.id, input)
        .map(Json)
        .map_err(api_error_to_http)
}

async fn get_image_handler(
    Path(image_id): Path<String>,
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<ImageDetail> {
    api_core::get_image(&state.services, &user.id, &image_id)
        .map(Json)
        .map_err(api_error_to_http)
}

async fn delete_image_handler(
    Path(image_id): Path<String>,
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<DeletedImage> {
    api_core::delete_image(&state.services, &user.id, &image_id)
        .await
        .map(Json)
        .map_err(api_error_to_http)
}

async fn thumbnail_handler(
    Path(image_id): Path<String>,
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ThumbnailQuery>,
) -> Result<Response, HttpError> {
    let input = ThumbnailInput {
        size: parse_number(query.size.as_deref()),
    };

    let bytes = api_core::render_thumbnail(&state.services, &user.id, &image_id, input)
        .await
        .map_err(api_error_to_http)?;

    Ok((
        [
            (header::CONTENT_TYPE, JPEG_CONTENT_TYPE),
            (header::CACHE_CONTROL, "private, max-age=60"),
        ],
        bytes,
    )
        .into_response())
}

async fn create_transformation_handler(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<CreateTransformationInput>, JsonRejection>,
) -> Result<(StatusCode, Json<TransformationResult>), HttpError> {
    let Json(input) = payload.map_err(|rejection| {
        error_to_http(StatusCode::BAD_REQUEST, "INVALID_JSON", rejection.body_text())
    })?;

    match api_core::create_transformation(&state.services, &user.id, input).await {
        Ok(result) => Ok((StatusCode::CREATED, Json(result))),
        Err(error) => Err(api_error_to_http(error)),
    }
}

async fn account_credits_handler(State(state): State<ApiState>) -> ApiResult<AccountCredits> {
    api_core::account_credits(&state.services)
        .await
        .map(Json)
        .map_err(api_error_to_http)
}

async fn public_object_handler(
    Path((bucket, path)): Path<(String, String)>,
    State(state): State<ApiState>,
) -> Result<Response, HttpError> {
    let Some(bucket) = Bucket::parse(&bucket) else {
        return Err(error_to_http(
            StatusCode::NOT_FOUND,
            "OBJECT_NOT_FOUND",
            format!("Unknown bucket: {bucket}"),
        ));
    };

    let bytes = state
        .services
        .blobs
        .download(bucket, &path)
        .await
        .map_err(blob_error_to_http)?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type_for_path(&path)),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        bytes,
    )
        .into_response())
}

/// Non-numeric query values fall back to the service defaults.
fn parse_number<T: std::str::FromStr>(raw: Option<&str>) -> Option<T> {
    raw.and_then(|value| value.trim().parse().ok())
}

#[derive(Clone)]
struct AuthLayer {
    authenticator: Arc<dyn Authenticator>,
}

impl AuthLayer {
    fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            authenticator: Arc::clone(&self.authenticator),
        }
    }
}

#[derive(Clone)]
struct AuthService<S> {
    inner: S,
    authenticator: Arc<dyn Authenticator>,
}

impl<S> Service<Request> for AuthService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        // The clone is not ready; keep the service that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let authenticator = Arc::clone(&self.authenticator);

        Box::pin(async move {
            let Some(token) = extract_bearer_token(request.headers()) else {
                return Ok(unauthorized_error_to_http().into_response());
            };

            match authenticator.authenticate(&token).await {
                Ok(user) => {
                    request.extensions_mut().insert(user);
                    inner.call(request).await
                }
                Err(AuthError::InvalidToken) => Ok(unauthorized_error_to_http().into_response()),
                Err(error @ AuthError::Backend(_)) => {
                    tracing::error!(%error, "authentication backend failed");
                    Ok(internal_auth_error_to_http(error.to_string()).into_response())
                }
            }
        })
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth_header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = auth_header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let normalized = token.trim();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized.to_string())
    }
}

fn error_to_http(status: StatusCode, code: &str, message: impl Into<String>) -> HttpError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: message.into(),
            },
        }),
    )
}

fn unauthorized_error_to_http() -> HttpError {
    error_to_http(
        StatusCode::UNAUTHORIZED,
        "UNAUTHORIZED",
        AuthError::InvalidToken.to_string(),
    )
}

fn internal_auth_error_to_http(message: String) -> HttpError {
    error_to_http(
        StatusCode::INTERNAL_SERVER_ERROR,
        "AUTH_BACKEND_ERROR",
        message,
    )
}

/// A body cut off by the upload limit is reported like any other oversized
/// file; `size` is then only a lower bound.
fn multipart_error_to_http(error: MultipartError, max_file_size: u64) -> HttpError {
    let status = error.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return api_error_to_http(ApiError::FileTooLarge {
            size: max_file_size.saturating_add(MULTIPART_OVERHEAD_BYTES),
            max_bytes: max_file_size,
        });
    }

    error_to_http(status, "INVALID_MULTIPART", error.body_text())
}

fn blob_error_to_http(error: BlobStoreError) -> HttpError {
    let (status, code) = match &error {
        BlobStoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "OBJECT_NOT_FOUND"),
        BlobStoreError::InvalidPath { .. } => (StatusCode::BAD_REQUEST, "INVALID_OBJECT_PATH"),
        _ => {
            tracing::error!(%error, "failed to serve stored object");
            (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
        }
    };
    error_to_http(status, code, error.to_string())
}

fn api_error_to_http(error: ApiError) -> HttpError {
    let status = match error.kind() {
        ApiErrorKind::NotFound => StatusCode::NOT_FOUND,
        ApiErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ApiErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        ApiErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(code = error.code(), %error, "request failed");
    }

    error_to_http(status, error.code(), error.to_string())
}
