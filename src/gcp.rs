//! Google Cloud access tokens.
//!
//! Warehouse and Secret Manager calls authenticate with an OAuth bearer token. The token
//! either comes from configuration or from the GCE/Cloud Run metadata server, in which
//! case it is cached until shortly before it expires.

use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::AppConfig;

/// Refresh metadata tokens this long before their reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Errors raised while obtaining an access token.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("metadata token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("metadata server returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

enum Source {
    Static(String),
    Metadata {
        url: String,
        cache: Mutex<Option<CachedToken>>,
    },
}

/// Supplies bearer tokens for Google APIs.
pub struct GoogleTokenSource {
    source: Source,
    http: reqwest::Client,
}

impl GoogleTokenSource {
    /// A source that always returns `token`.
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: Source::Static(token.into()),
            http: reqwest::Client::new(),
        }
    }

    /// A source backed by the metadata server token endpoint at `url`.
    pub fn metadata_server(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            source: Source::Metadata {
                url: url.into(),
                cache: Mutex::new(None),
            },
            http,
        }
    }

    /// Static token when configured, metadata server otherwise.
    pub fn from_config(config: &AppConfig, http: reqwest::Client) -> Self {
        match &config.gcp_access_token {
            Some(token) => Self {
                source: Source::Static(token.clone()),
                http,
            },
            None => Self::metadata_server(config.gcp_metadata_token_url.clone(), http),
        }
    }

    /// Returns a bearer token valid for at least the next minute.
    pub async fn access_token(&self) -> Result<String, TokenError> {
        match &self.source {
            Source::Static(token) => Ok(token.clone()),
            Source::Metadata { url, cache } => {
                let mut cached = cache.lock().await;
                if let Some(token) = cached.as_ref()
                    && Instant::now() < token.refresh_at
                {
                    return Ok(token.value.clone());
                }

                let token = self.fetch_metadata_token(url).await?;
                let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
                tracing::debug!(expires_in = token.expires_in, "Fetched metadata access token");

                *cached = Some(CachedToken {
                    value: token.access_token.clone(),
                    refresh_at: Instant::now() + lifetime,
                });
                Ok(token.access_token)
            }
        }
    }

    async fn fetch_metadata_token(&self, url: &str) -> Result<MetadataToken, TokenError> {
        let response = self
            .http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<MetadataToken>().await?)
    }
}
