use remove_bg_client::{AccountCredits, RemoveBgError};

use crate::{ApiError, ServiceContext};

pub async fn account_credits(ctx: &ServiceContext) -> Result<AccountCredits, ApiError> {
    ctx.background_remover
        .account_credits()
        .await
        .map_err(|error: RemoveBgError| {
            tracing::warn!(%error, "failed to fetch remove.bg credits");
            ApiError::UpstreamUnavailable {
                message: error.to_string(),
            }
        })
}
