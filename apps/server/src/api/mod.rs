mod router;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod tests_rest;

use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use api_core::{ServiceContext, UploadLimits};
use blob_storage::{BlobStore, FsBlobStore, SupabaseBlobStore};
use remove_bg_client::RemoveBgClient;

use crate::{
    auth::{Authenticator, StaticTokenAuthenticator, SupabaseAuthenticator},
    config::{AuthConfig, Config, StorageConfig},
};

pub use router::{build_router, ApiState};

pub fn build_state(config: &Config) -> Result<ApiState> {
    let blobs: Arc<dyn BlobStore> = match &config.storage {
        StorageConfig::Local { root } => {
            std::fs::create_dir_all(root).with_context(|| {
                format!("Failed to create storage directory {}", root.display())
            })?;
            tracing::info!(root = %root.display(), "using local object storage");
            Arc::new(FsBlobStore::new(root.clone(), config.public_base_url.clone()))
        }
        StorageConfig::Supabase {
            url,
            service_role_key,
        } => {
            tracing::info!(url = %url, "using supabase object storage");
            Arc::new(SupabaseBlobStore::new(url.clone(), service_role_key.clone()))
        }
    };

    let authenticator: Arc<dyn Authenticator> = match &config.auth {
        AuthConfig::Static { tokens } => {
            let authenticator = StaticTokenAuthenticator::new(tokens.iter().cloned());
            if authenticator.is_empty() {
                tracing::warn!("no access tokens configured; every /api/v1 request will be rejected");
            }
            Arc::new(authenticator)
        }
        AuthConfig::Supabase { url, anon_key } => {
            Arc::new(SupabaseAuthenticator::new(url.clone(), anon_key.clone()))
        }
    };

    if config.remove_bg.api_key.is_none() {
        tracing::warn!("REMOVE_BG_API_KEY is not set; transformations will fail");
    }
    let background_remover = Arc::new(RemoveBgClient::with_base_url(
        config.remove_bg.base_url.clone(),
        config.remove_bg.api_key.clone(),
    ));

    Ok(ApiState {
        services: ServiceContext {
            db_path: config.database_path.clone(),
            blobs,
            background_remover,
            limits: UploadLimits {
                max_file_size: config.max_file_size,
            },
        },
        authenticator,
    })
}

pub async fn serve(config: &Config, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let state = build_state(config)?;
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind API server on {}", config.bind))?;
    let local_addr = listener
        .local_addr()
        .context("Failed to read bound API server address")?;

    tracing::info!(addr = %local_addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server stopped with an error")?;

    tracing::info!("API server stopped");
    Ok(())
}
