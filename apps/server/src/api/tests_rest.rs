use api_core::UploadLimits;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::test_support::{
    authed, error_code, multipart_body, multipart_content_type, read_json, two_pixel_png, Harness,
    PUBLIC_BASE_URL,
};

async fn upload_png(harness: &Harness, user_id: &str) -> Value {
    let response = harness
        .app()
        .oneshot(
            authed("POST", "/api/v1/images", user_id)
                .header(header::CONTENT_TYPE, multipart_content_type())
                .body(multipart_body(
                    "file",
                    "cat.png",
                    "image/png",
                    &two_pixel_png(),
                ))
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::CREATED);
    read_json(response).await
}

async fn transform(harness: &Harness, user_id: &str, body: String) -> axum::response::Response {
    harness
        .app()
        .oneshot(
            authed("POST", "/api/v1/transformations", user_id)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed")
}

async fn get(harness: &Harness, uri: &str, user_id: &str) -> axum::response::Response {
    harness
        .app()
        .oneshot(
            authed("GET", uri, user_id)
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed")
}

#[tokio::test]
async fn healthz_needs_no_token() {
    let harness = Harness::new("cutout-rest-health");

    let response = harness
        .app()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({ "status": "ok" }));
}

#[tokio::test]
async fn api_routes_reject_missing_or_unknown_tokens() {
    let harness = Harness::new("cutout-rest-auth");

    let missing = harness
        .app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/images")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed");
    let unknown = harness
        .app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/images")
                .header(header::AUTHORIZATION, "Bearer nope")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed");

    for response in [missing, unknown] {
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(&read_json(response).await), Some("UNAUTHORIZED"));
    }
}

#[tokio::test]
async fn uploaded_image_is_listed_and_publicly_served() {
    let harness = Harness::new("cutout-rest-upload");

    let uploaded = upload_png(&harness, "user-1").await;
    assert_eq!(uploaded["status"], json!("PENDING"));
    assert_eq!(uploaded["width"], json!(2));

    let listing = read_json(get(&harness, "/api/v1/images?page=1&limit=5", "user-1").await).await;
    assert_eq!(listing["pagination"]["total"], json!(1));
    assert_eq!(listing["pagination"]["limit"], json!(5));
    assert_eq!(listing["images"][0]["id"], uploaded["id"]);

    let original_url = uploaded["originalUrl"]
        .as_str()
        .expect("originalUrl should be a string");
    let public_path = original_url
        .strip_prefix(PUBLIC_BASE_URL)
        .expect("url should use the public base");
    let response = harness
        .app()
        .oneshot(
            Request::builder()
                .uri(public_path)
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE),
        Some(&header::HeaderValue::from_static("image/png"))
    );
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    assert_eq!(body.as_ref(), two_pixel_png().as_slice());
}

#[tokio::test]
async fn upload_rejects_unsupported_type_and_missing_file() {
    let harness = Harness::new("cutout-rest-upload-invalid");

    let wrong_type = harness
        .app()
        .oneshot(
            authed("POST", "/api/v1/images", "user-1")
                .header(header::CONTENT_TYPE, multipart_content_type())
                .body(multipart_body("file", "cat.gif", "image/gif", b"GIF89a"))
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed");
    let wrong_field = harness
        .app()
        .oneshot(
            authed("POST", "/api/v1/images", "user-1")
                .header(header::CONTENT_TYPE, multipart_content_type())
                .body(multipart_body(
                    "attachment",
                    "cat.png",
                    "image/png",
                    &two_pixel_png(),
                ))
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed");

    assert_eq!(wrong_type.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        error_code(&read_json(wrong_type).await),
        Some("INVALID_FILE_TYPE")
    );
    assert_eq!(wrong_field.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        error_code(&read_json(wrong_field).await),
        Some("NO_FILE_PROVIDED")
    );
}

#[tokio::test]
async fn upload_over_configured_limit_is_rejected() {
    let harness = Harness::with_limits("cutout-rest-upload-limit", UploadLimits { max_file_size: 8 });

    let response = harness
        .app()
        .oneshot(
            authed("POST", "/api/v1/images", "user-1")
                .header(header::CONTENT_TYPE, multipart_content_type())
                .body(multipart_body(
                    "file",
                    "cat.png",
                    "image/png",
                    &two_pixel_png(),
                ))
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        error_code(&read_json(response).await),
        Some("FILE_TOO_LARGE")
    );
}

#[tokio::test]
async fn upload_past_the_body_limit_reports_file_too_large() {
    let harness = Harness::with_limits("cutout-rest-upload-body-limit", UploadLimits { max_file_size: 8 });
    let oversized = vec![0_u8; 2 * 1024 * 1024];

    let response = harness
        .app()
        .oneshot(
            authed("POST", "/api/v1/images", "user-1")
                .header(header::CONTENT_TYPE, multipart_content_type())
                .body(multipart_body("file", "big.png", "image/png", &oversized))
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json(response).await;
    assert_eq!(error_code(&payload), Some("FILE_TOO_LARGE"));
    assert!(payload["error"]["message"]
        .as_str()
        .is_some_and(|message| message.starts_with("File too large. Maximum size is")));
}

#[tokio::test]
async fn transformation_completes_and_shows_up_on_the_image() {
    let harness = Harness::new("cutout-rest-transform");
    let uploaded = upload_png(&harness, "user-1").await;
    let image_id = uploaded["id"].as_str().expect("id should be a string");

    let response = transform(
        &harness,
        "user-1",
        json!({ "imageId": image_id }).to_string(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let result = read_json(response).await;
    assert_eq!(result["status"], json!("COMPLETED"));
    assert_eq!(result["creditsCharged"], json!(0.5));
    assert_eq!(result["imageId"], json!(image_id));

    let detail = read_json(get(&harness, &format!("/api/v1/images/{image_id}"), "user-1").await).await;
    assert_eq!(detail["status"], json!("COMPLETED"));
    assert_eq!(detail["transformations"][0]["id"], result["id"]);
    assert_eq!(detail["transformations"][0]["outputUrl"], result["outputUrl"]);

    let thumbnail = get(
        &harness,
        &format!("/api/v1/images/{image_id}/thumbnail?size=64"),
        "user-1",
    )
    .await;
    assert_eq!(thumbnail.status(), StatusCode::OK);
    assert_eq!(
        thumbnail.headers().get(header::CONTENT_TYPE),
        Some(&header::HeaderValue::from_static("image/jpeg"))
    );
}

#[tokio::test]
async fn transformation_validates_its_body() {
    let harness = Harness::new("cutout-rest-transform-invalid");

    let malformed = transform(&harness, "user-1", "{not json".to_string()).await;
    let missing_id = transform(&harness, "user-1", json!({}).to_string()).await;
    let unknown_id = transform(
        &harness,
        "user-1",
        json!({ "imageId": "missing" }).to_string(),
    )
    .await;

    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&read_json(malformed).await), Some("INVALID_JSON"));
    assert_eq!(missing_id.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        error_code(&read_json(missing_id).await),
        Some("IMAGE_ID_REQUIRED")
    );
    assert_eq!(unknown_id.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        error_code(&read_json(unknown_id).await),
        Some("IMAGE_NOT_FOUND")
    );
}

#[tokio::test]
async fn images_are_scoped_to_their_owner() {
    let harness = Harness::new("cutout-rest-owner");
    let uploaded = upload_png(&harness, "user-1").await;
    let image_id = uploaded["id"].as_str().expect("id should be a string");

    let foreign = get(&harness, &format!("/api/v1/images/{image_id}"), "user-2").await;
    let listing = read_json(get(&harness, "/api/v1/images", "user-2").await).await;

    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        error_code(&read_json(foreign).await),
        Some("IMAGE_NOT_FOUND")
    );
    assert_eq!(listing["pagination"]["total"], json!(0));
}

#[tokio::test]
async fn deleted_image_is_gone() {
    let harness = Harness::new("cutout-rest-delete");
    let uploaded = upload_png(&harness, "user-1").await;
    let image_id = uploaded["id"].as_str().expect("id should be a string");

    let response = harness
        .app()
        .oneshot(
            authed("DELETE", &format!("/api/v1/images/{image_id}"), "user-1")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({ "success": true }));
    let after = get(&harness, &format!("/api/v1/images/{image_id}"), "user-1").await;
    assert_eq!(after.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn account_credits_are_reported() {
    let harness = Harness::new("cutout-rest-credits");

    let response = get(&harness, "/api/v1/account/credits", "user-1").await;

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["total"], json!(12.0));
    assert_eq!(payload["freeApiCalls"], json!(3));
}

#[tokio::test]
async fn unknown_bucket_or_object_is_not_found() {
    let harness = Harness::new("cutout-rest-public-missing");

    for uri in [
        "/storage/v1/object/public/secrets/a.png",
        "/storage/v1/object/public/images/missing.png",
    ] {
        let response = harness
            .app()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("failed to build request"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            error_code(&read_json(response).await),
            Some("OBJECT_NOT_FOUND")
        );
    }
}
