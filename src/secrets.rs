//! Shared-secret lookup.
//!
//! The API key the service checks callers against lives in Secret Manager in deployed
//! environments. Local and test profiles may configure it directly instead.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use thiserror::Error;

use crate::config::AppConfig;
use crate::error::IngestError;
use crate::gcp::{GoogleTokenSource, TokenError};

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("secret store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("secret store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("secret payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("secret payload is not valid UTF-8")]
    NotUtf8,
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl From<SecretStoreError> for IngestError {
    fn from(error: SecretStoreError) -> Self {
        IngestError::Misconfigured(error.to_string())
    }
}

/// Source of the API key. `Ok(None)` means no key is configured.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn api_key(&self) -> Result<Option<String>, SecretStoreError>;
}

/// Returns a key fixed at startup.
pub struct StaticSecretStore {
    value: String,
}

impl StaticSecretStore {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn api_key(&self) -> Result<Option<String>, SecretStoreError> {
        Ok(Some(self.value.clone()))
    }
}

/// Used when neither a static key nor a secret id is configured.
pub struct UnconfiguredSecretStore;

#[async_trait]
impl SecretStore for UnconfiguredSecretStore {
    async fn api_key(&self) -> Result<Option<String>, SecretStoreError> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(Debug, Deserialize)]
struct SecretPayload {
    data: String,
}

/// Reads the latest version of a Secret Manager secret.
pub struct SecretManagerStore {
    http: reqwest::Client,
    tokens: Arc<GoogleTokenSource>,
    api_base: String,
    project_id: String,
    secret_id: String,
}

impl SecretManagerStore {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<GoogleTokenSource>,
        api_base: impl Into<String>,
        project_id: impl Into<String>,
        secret_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            tokens,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            secret_id: secret_id.into(),
        }
    }

    fn access_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/secrets/{}/versions/latest:access",
            self.api_base, self.project_id, self.secret_id
        )
    }
}

#[async_trait]
impl SecretStore for SecretManagerStore {
    async fn api_key(&self) -> Result<Option<String>, SecretStoreError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .get(self.access_url())
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SecretStoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let secret: AccessSecretVersionResponse = response.json().await?;
        let bytes = STANDARD.decode(secret.payload.data.as_bytes())?;
        let value = String::from_utf8(bytes).map_err(|_| SecretStoreError::NotUtf8)?;

        tracing::debug!(secret_id = %self.secret_id, "Fetched API key secret");
        Ok(Some(value))
    }
}

/// Static key if set, else Secret Manager if a secret id is set, else unconfigured.
pub fn secret_store_from_config(
    config: &AppConfig,
    http: reqwest::Client,
    tokens: Arc<GoogleTokenSource>,
) -> Arc<dyn SecretStore> {
    if let Some(key) = &config.api_key {
        return Arc::new(StaticSecretStore::new(key.clone()));
    }
    match &config.api_key_secret {
        Some(secret_id) => Arc::new(SecretManagerStore::new(
            http,
            tokens,
            config.secret_manager_api_base.clone(),
            config.project_id.clone(),
            secret_id.clone(),
        )),
        None => {
            tracing::warn!("No API key source configured; upload routes will reject every request");
            Arc::new(UnconfiguredSecretStore)
        }
    }
}
