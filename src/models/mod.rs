//! # Data Models
//!
//! Record shapes written to the warehouse, the table catalog, and the response bodies
//! returned by the Upload API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod records;
pub mod table;

pub use records::{Department, Employee, Job, LoadedAt, Record};
pub use table::TableName;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
    /// Run state of the service
    pub status: String,
    /// Well-known entry points
    pub endpoints: ServiceEndpoints,
}

/// Paths advertised by the root endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceEndpoints {
    pub docs: String,
    pub health: String,
    pub upload: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "Upload API".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: "running".to_string(),
            endpoints: ServiceEndpoints {
                docs: "/docs".to_string(),
                health: "/health".to_string(),
                upload: "/api/v1/upload".to_string(),
            },
        }
    }
}

/// Liveness response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
            service: "upload-api".to_string(),
        }
    }
}

/// Acknowledgement returned after a successful warehouse write
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct UploadResponse {
    /// Human-readable summary
    pub message: String,
    /// Number of rows the warehouse reports as written
    pub rows: u64,
    /// Target table name
    pub table: String,
}
