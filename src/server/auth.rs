use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::debug;

use super::AppState;
use super::errors::ApiError;
use crate::database::sqlite::models::Tenant;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Tenant resolved from the widget API key
#[derive(Debug, Clone)]
pub struct AuthenticatedTenant(pub Tenant);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedTenant {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        let tenant = state
            .database
            .get_tenant_by_api_key(key)
            .await
            .map_err(ApiError::internal)?;

        match tenant {
            Some(tenant) => Ok(Self(tenant)),
            None => {
                debug!("Rejected request with unknown API key");
                Err(ApiError::Unauthorized)
            }
        }
    }
}
