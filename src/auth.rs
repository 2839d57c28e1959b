//! # Authentication
//!
//! Upload routes require an `X-API-Key` header matching the shared secret. The secret is
//! fetched through a [`SecretStore`] on first use and cached for the life of the process.

use std::sync::Arc;

use axum::{
    extract::{FromRef, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tokio::sync::OnceCell;
use zeroize::Zeroizing;

use crate::error::{ApiError, IngestError};
use crate::secrets::SecretStore;
use crate::server::AppState;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

const NOT_CONFIGURED: &str = "API key not configured on server";
const MISSING_KEY: &str = "Missing API key. Include X-API-Key header in your request";
const INVALID_KEY: &str = "Invalid API key";

/// Single-slot cache for the shared secret.
///
/// A failed or empty fetch leaves the slot empty so the next request tries again.
pub struct ApiKeyCache {
    store: Arc<dyn SecretStore>,
    slot: OnceCell<Zeroizing<String>>,
}

impl ApiKeyCache {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            slot: OnceCell::new(),
        }
    }

    async fn secret(&self) -> Result<&Zeroizing<String>, IngestError> {
        self.slot
            .get_or_try_init(|| async {
                match self.store.api_key().await {
                    Ok(Some(key)) if !key.is_empty() => Ok(Zeroizing::new(key)),
                    Ok(_) => Err(IngestError::Misconfigured(NOT_CONFIGURED.to_string())),
                    Err(error) => {
                        tracing::error!(error = %error, "Failed to fetch API key secret");
                        Err(IngestError::Misconfigured(NOT_CONFIGURED.to_string()))
                    }
                }
            })
            .await
    }

    /// Check `provided` against the shared secret. The secret is resolved first, so a
    /// server without one answers `Misconfigured` whether or not a key was sent.
    pub async fn verify(&self, provided: Option<&str>) -> Result<(), IngestError> {
        let secret = self.secret().await?;

        let provided =
            provided.ok_or_else(|| IngestError::Unauthenticated(MISSING_KEY.to_string()))?;

        if bool::from(provided.as_bytes().ct_eq(secret.as_bytes())) {
            Ok(())
        } else {
            tracing::warn!("Invalid API key attempt");
            Err(IngestError::Unauthenticated(INVALID_KEY.to_string()))
        }
    }
}

impl FromRef<AppState> for Arc<ApiKeyCache> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.api_keys)
    }
}

fn api_key_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
}

/// Rejects requests whose `X-API-Key` does not match the shared secret.
pub async fn api_key_middleware(
    State(api_keys): State<Arc<ApiKeyCache>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    api_keys.verify(api_key_header(request.headers())).await?;
    Ok(next.run(request).await)
}
