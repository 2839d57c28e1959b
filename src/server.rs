//! # Server Configuration
//!
//! This module contains the server setup and configuration for the Upload API.

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{API_KEY_HEADER, ApiKeyCache, api_key_middleware};
use crate::config::AppConfig;
use crate::gcp::GoogleTokenSource;
use crate::handlers;
use crate::ingestion::Ingestor;
use crate::secrets::secret_store_from_config;
use crate::telemetry;
use crate::warehouse::{BigQueryClient, Warehouse};

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub ingestor: Arc<Ingestor>,
    pub api_keys: Arc<ApiKeyCache>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, warehouse: Arc<dyn Warehouse>, api_keys: ApiKeyCache) -> Self {
        Self {
            config,
            ingestor: Arc::new(Ingestor::new(warehouse)),
            api_keys: Arc::new(api_keys),
        }
    }

    /// Wire the Google Cloud adapters described by `config`.
    pub fn from_config(config: AppConfig) -> Self {
        let http = reqwest::Client::new();
        let tokens = Arc::new(GoogleTokenSource::from_config(&config, http.clone()));
        let warehouse = Arc::new(BigQueryClient::from_config(&config, http.clone(), tokens.clone()));
        let secrets = secret_store_from_config(&config, http, tokens);

        Self::new(Arc::new(config), warehouse, ApiKeyCache::new(secrets))
    }
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if config.cors_allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let upload_routes = Router::new()
        .route("/upload/departments", post(handlers::upload::upload_departments))
        .route("/upload/jobs", post(handlers::upload::upload_jobs))
        .route("/upload/employees", post(handlers::upload::upload_employees))
        .route("/upload/batch/{table_name}", post(handlers::upload::upload_batch))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ));

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .nest("/api/v1", upload_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(telemetry::trace_id_middleware))
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;
    let profile = config.profile.clone();

    let app = create_app(AppState::from_config(config));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "Upload API starting up");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Upload API shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Upload API shutting down");
}

struct ApiKeySecurity;

impl Modify for ApiKeySecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_key",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(API_KEY_HEADER))),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::upload::upload_departments,
        crate::handlers::upload::upload_jobs,
        crate::handlers::upload::upload_employees,
        crate::handlers::upload::upload_batch,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::ServiceEndpoints,
            crate::models::HealthStatus,
            crate::models::UploadResponse,
            crate::models::TableName,
            crate::error::ApiError,
            crate::handlers::upload::CsvUploadForm,
            crate::ingestion::batch::DepartmentInput,
            crate::ingestion::batch::JobInput,
            crate::ingestion::batch::EmployeeInput,
            crate::ingestion::batch::BatchItem,
        )
    ),
    modifiers(&ApiKeySecurity),
    info(
        title = "Upload API",
        description = "CSV and JSON batch ingestion into the HR warehouse",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_upload_routes() {
        let doc = ApiDoc::openapi();
        for path in [
            "/",
            "/health",
            "/api/v1/upload/departments",
            "/api/v1/upload/jobs",
            "/api/v1/upload/employees",
            "/api/v1/upload/batch/{table_name}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let schemes = doc.components.unwrap().security_schemes;
        assert!(schemes.contains_key("api_key"));
    }
}
