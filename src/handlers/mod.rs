//! # API Handlers
//!
//! This module contains all the HTTP endpoint handlers for the Upload API.

pub mod upload;

use crate::models::{HealthStatus, ServiceInfo};
use axum::response::Json;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthStatus)
    ),
    tag = "root"
)]
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus::default())
}
