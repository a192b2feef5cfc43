use std::collections::HashMap;

use api_core::AuthenticatedUser;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::config::StaticToken;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing or invalid access token.")]
    InvalidToken,

    #[error("Authentication backend error: {0}")]
    Backend(String),
}

/// Resolves a bearer token to the user it belongs to.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}

/// Fixed token table from the config file, for local setups and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    users: HashMap<String, AuthenticatedUser>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: impl IntoIterator<Item = StaticToken>) -> Self {
        let users = tokens
            .into_iter()
            .filter(|entry| !entry.token.is_empty())
            .map(|entry| {
                (
                    entry.token,
                    AuthenticatedUser {
                        id: entry.user_id,
                        email: entry.email,
                        name: entry.name,
                    },
                )
            })
            .collect();

        Self { users }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        self.users.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}

/// Validates access tokens against Supabase Auth (`GET /auth/v1/user`).
#[derive(Debug, Clone)]
pub struct SupabaseAuthenticator {
    client: Client,
    base_url: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: SupabaseUserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct SupabaseUserMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    full_name: Option<String>,
}

impl SupabaseAuthenticator {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }
}

#[async_trait]
impl Authenticator for SupabaseAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .bearer_auth(token)
            .header("apikey", &self.anon_key)
            .send()
            .await
            .map_err(|error| AuthError::Backend(error.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AuthError::InvalidToken)
            }
            status => {
                tracing::warn!(%status, "supabase auth returned an unexpected status");
                return Err(AuthError::Backend(format!(
                    "Supabase auth responded with {status}"
                )));
            }
        }

        let user: SupabaseUser = response
            .json()
            .await
            .map_err(|error| AuthError::Backend(error.to_string()))?;

        Ok(AuthenticatedUser {
            id: user.id,
            email: user.email.unwrap_or_default(),
            name: user.user_metadata.full_name.or(user.user_metadata.name),
        })
    }
}
