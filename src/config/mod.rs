//! Configuration loading for the Upload API.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `UPLOAD_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const ENV_PREFIX: &str = "UPLOAD_";

/// Application configuration derived from `UPLOAD_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Warehouse project that owns the dataset (also used for Secret Manager lookups)
    #[serde(default)]
    pub project_id: String,
    /// Warehouse dataset holding the `departments`, `jobs` and `hired_employees` tables
    #[serde(default)]
    pub dataset_id: String,
    /// Secret Manager secret id holding the upload API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_secret: Option<String>,
    /// Static API key; takes precedence over the secret store when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_bigquery_api_base")]
    pub bigquery_api_base: String,
    #[serde(default = "default_secret_manager_api_base")]
    pub secret_manager_api_base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp_access_token: Option<String>,
    #[serde(default = "default_gcp_metadata_token_url")]
    pub gcp_metadata_token_url: String,
    #[serde(default = "default_load_job_poll_interval_ms")]
    pub load_job_poll_interval_ms: u64,
    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            project_id: String::new(),
            dataset_id: String::new(),
            api_key_secret: None,
            api_key: None,
            bigquery_api_base: default_bigquery_api_base(),
            secret_manager_api_base: default_secret_manager_api_base(),
            gcp_access_token: None,
            gcp_metadata_token_url: default_gcp_metadata_token_url(),
            load_job_poll_interval_ms: default_load_job_poll_interval_ms(),
            cors_allowed_origins: default_cors_allowed_origins(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.api_key.is_some() {
            config.api_key = Some("[REDACTED]".to_string());
        }
        if config.gcp_access_token.is_some() {
            config.gcp_access_token = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Whether CORS should allow every origin.
    pub fn cors_allows_any_origin(&self) -> bool {
        self.cors_allowed_origins.is_empty() || self.cors_allowed_origins.iter().any(|o| o == "*")
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::MissingProjectId);
        }
        if self.dataset_id.trim().is_empty() {
            return Err(ConfigError::MissingDatasetId);
        }

        if self.load_job_poll_interval_ms < 10 {
            return Err(ConfigError::InvalidPollInterval {
                value: self.load_job_poll_interval_ms,
            });
        }

        for (key, value) in [
            ("BIGQUERY_API_BASE", &self.bigquery_api_base),
            ("SECRET_MANAGER_API_BASE", &self.secret_manager_api_base),
            ("GCP_METADATA_TOKEN_URL", &self.gcp_metadata_token_url),
        ] {
            if let Err(source) = Url::parse(value) {
                return Err(ConfigError::InvalidUrl {
                    key: format!("{ENV_PREFIX}{key}"),
                    value: value.clone(),
                    source,
                });
            }
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        // Only local and test profiles may start without a key source.
        if !matches!(self.profile.as_str(), "local" | "test")
            && self.api_key.is_none()
            && self.api_key_secret.is_none()
        {
            return Err(ConfigError::MissingApiKeySource);
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_bigquery_api_base() -> String {
    "https://bigquery.googleapis.com".to_string()
}

fn default_secret_manager_api_base() -> String {
    "https://secretmanager.googleapis.com".to_string()
}

fn default_gcp_metadata_token_url() -> String {
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token"
        .to_string()
}

fn default_load_job_poll_interval_ms() -> u64 {
    1000
}

fn default_cors_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid value '{value}' for {key}: expected an unsigned integer")]
    InvalidNumber { key: String, value: String },
    #[error("invalid URL '{value}' for {key}: {source}")]
    InvalidUrl {
        key: String,
        value: String,
        source: url::ParseError,
    },
    #[error("project id is missing; set UPLOAD_PROJECT_ID")]
    MissingProjectId,
    #[error("dataset id is missing; set UPLOAD_DATASET_ID")]
    MissingDatasetId,
    #[error("no API key source configured; set UPLOAD_API_KEY_SECRET or UPLOAD_API_KEY")]
    MissingApiKeySource,
    #[error("load job poll interval must be at least 10 ms, got {value}")]
    InvalidPollInterval { value: u64 },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
}

/// Loads configuration using layered `.env` files and `UPLOAD_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads, merges and validates configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let mut take = |key: &str| layered.remove(key).filter(|v| !v.trim().is_empty());

        let profile = take("PROFILE").unwrap_or(profile_hint);
        let load_job_poll_interval_ms = match take("LOAD_JOB_POLL_INTERVAL_MS") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
                key: format!("{ENV_PREFIX}LOAD_JOB_POLL_INTERVAL_MS"),
                value: raw.clone(),
            })?,
            None => default_load_job_poll_interval_ms(),
        };
        let cors_allowed_origins = take("CORS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(default_cors_allowed_origins);

        let config = AppConfig {
            profile,
            api_bind_addr: take("API_BIND_ADDR").unwrap_or_else(default_api_bind_addr),
            log_level: take("LOG_LEVEL").unwrap_or_else(default_log_level),
            log_format: take("LOG_FORMAT").unwrap_or_else(default_log_format),
            project_id: take("PROJECT_ID").unwrap_or_default(),
            dataset_id: take("DATASET_ID").unwrap_or_default(),
            api_key_secret: take("API_KEY_SECRET"),
            api_key: take("API_KEY"),
            bigquery_api_base: take("BIGQUERY_API_BASE")
                .unwrap_or_else(default_bigquery_api_base),
            secret_manager_api_base: take("SECRET_MANAGER_API_BASE")
                .unwrap_or_else(default_secret_manager_api_base),
            gcp_access_token: take("GCP_ACCESS_TOKEN"),
            gcp_metadata_token_url: take("GCP_METADATA_TOKEN_URL")
                .unwrap_or_else(default_gcp_metadata_token_url),
            load_job_poll_interval_ms,
            cors_allowed_origins,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            project_id: "acme-analytics".to_string(),
            dataset_id: "hr".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_requires_project_and_dataset() {
        let config = AppConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingProjectId)));

        let config = AppConfig {
            project_id: "acme-analytics".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingDatasetId)));

        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_production_profile_requires_key_source() {
        let mut config = valid_config();
        config.profile = "production".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingApiKeySource)
        ));

        config.api_key_secret = Some("upload-api-key".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_poll_interval_lower_bound() {
        let mut config = valid_config();
        config.load_job_poll_interval_ms = 5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPollInterval { value: 5 })
        ));
    }

    #[test]
    fn test_redacted_json_hides_secrets() {
        let mut config = valid_config();
        config.api_key = Some("super-secret".to_string());
        config.gcp_access_token = Some("ya29.token".to_string());

        let json = config.redacted_json().unwrap();
        assert!(!json.contains("super-secret"));
        assert!(!json.contains("ya29.token"));
        assert!(json.contains("[REDACTED]"));
        assert!(json.contains("acme-analytics"));
    }

    #[test]
    fn test_api_bases_must_be_urls() {
        let mut config = valid_config();
        config.bigquery_api_base = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { ref key, .. }) if key == "UPLOAD_BIGQUERY_API_BASE"
        ));
    }

    #[test]
    fn test_cors_any_origin() {
        let mut config = valid_config();
        assert!(config.cors_allows_any_origin());

        config.cors_allowed_origins = vec!["https://hr.example.com".to_string()];
        assert!(!config.cors_allows_any_origin());
    }
}
