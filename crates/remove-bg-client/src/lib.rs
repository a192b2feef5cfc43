use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, StatusCode,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.remove.bg/v1.0";

const API_KEY_HEADER: &str = "X-Api-Key";
const CREDITS_CHARGED_HEADER: &str = "X-Credits-Charged";
const DEFAULT_CREDITS_CHARGED: f64 = 1.0;

#[derive(Debug, Error)]
pub enum RemoveBgError {
    #[error("REMOVE_BG_API_KEY is not configured")]
    NotConfigured,

    #[error("remove.bg API credits exhausted. Please try again later.")]
    CreditsExhausted,

    #[error("Invalid remove.bg API key")]
    InvalidApiKey,

    #[error("Invalid image format or unable to process image")]
    UnprocessableImage,

    #[error("remove.bg API error: {status}")]
    Api { status: u16, body: String },

    #[error("remove.bg request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct RemovedBackground {
    /// PNG with a transparent background.
    pub image: Vec<u8>,
    pub credits_charged: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCredits {
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub subscription: f64,
    #[serde(default)]
    pub payg: f64,
    #[serde(default)]
    pub enterprise: f64,
    #[serde(default)]
    pub free_api_calls: u64,
}

#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    async fn remove_background(
        &self,
        image: Vec<u8>,
        filename: &str,
    ) -> Result<RemovedBackground, RemoveBgError>;

    async fn account_credits(&self) -> Result<AccountCredits, RemoveBgError>;
}

#[derive(Debug, Clone)]
pub struct RemoveBgClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RemoveBgClient {
    /// A missing or blank key is accepted here and reported as
    /// [`RemoveBgError::NotConfigured`] on first use.
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
        }
    }

    fn api_key(&self) -> Result<&str, RemoveBgError> {
        self.api_key.as_deref().ok_or(RemoveBgError::NotConfigured)
    }
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    data: AccountData,
}

#[derive(Debug, Deserialize)]
struct AccountData {
    attributes: AccountAttributes,
}

#[derive(Debug, Deserialize)]
struct AccountAttributes {
    #[serde(default)]
    credits: AccountCredits,
    #[serde(default)]
    api: Option<AccountApi>,
}

#[derive(Debug, Deserialize)]
struct AccountApi {
    #[serde(default)]
    free_calls: u64,
}

#[async_trait]
impl BackgroundRemover for RemoveBgClient {
    async fn remove_background(
        &self,
        image: Vec<u8>,
        filename: &str,
    ) -> Result<RemovedBackground, RemoveBgError> {
        let api_key = self.api_key()?;
        let form = Form::new()
            .part("image_file", Part::bytes(image).file_name(filename.to_string()))
            .text("size", "auto")
            .text("format", "png");

        let response = self
            .client
            .post(format!("{}/removebg", self.base_url))
            .header(API_KEY_HEADER, api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body, "remove.bg API error");
            return Err(map_error_status(status, body));
        }

        let credits_charged = parse_credits_charged(
            response
                .headers()
                .get(CREDITS_CHARGED_HEADER)
                .and_then(|value| value.to_str().ok()),
        );
        let image = response.bytes().await?.to_vec();

        tracing::debug!(size = image.len(), credits_charged, "background removed");

        Ok(RemovedBackground {
            image,
            credits_charged,
        })
    }

    async fn account_credits(&self) -> Result<AccountCredits, RemoveBgError> {
        let api_key = self.api_key()?;

        let response = self
            .client
            .get(format!("{}/account", self.base_url))
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_error_status(status, body));
        }

        let account: AccountResponse = response.json().await?;
        let mut credits = account.data.attributes.credits;
        if let Some(api) = account.data.attributes.api {
            credits.free_api_calls = api.free_calls;
        }

        Ok(credits)
    }
}

fn map_error_status(status: StatusCode, body: String) -> RemoveBgError {
    match status {
        StatusCode::PAYMENT_REQUIRED => RemoveBgError::CreditsExhausted,
        StatusCode::FORBIDDEN => RemoveBgError::InvalidApiKey,
        StatusCode::BAD_REQUEST => RemoveBgError::UnprocessableImage,
        _ => RemoveBgError::Api {
            status: status.as_u16(),
            body,
        },
    }
}

fn parse_credits_charged(raw: Option<&str>) -> f64 {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
        .unwrap_or(DEFAULT_CREDITS_CHARGED)
}
