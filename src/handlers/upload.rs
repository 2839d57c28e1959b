//! # Upload Handlers
//!
//! CSV uploads arrive as `multipart/form-data` with a single `file` field. Batch uploads
//! are a JSON array addressed to a table by path parameter.

use axum::{
    extract::{
        Multipart, Path, State,
        multipart::MultipartRejection,
        rejection::JsonRejection,
    },
    response::Json,
};
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::{ApiError, IngestError};
use crate::ingestion::batch::BatchItem;
use crate::ingestion::{CsvUpload, CsvUploadRecord, ensure_csv_file_name};
use crate::models::{Department, Employee, Job, TableName, UploadResponse};
use crate::server::AppState;

/// Multipart form accepted by the CSV endpoints
#[derive(Debug, Deserialize, ToSchema)]
pub struct CsvUploadForm {
    /// CSV file; the name must end in `.csv`
    #[schema(value_type = String, format = Binary)]
    pub file: String,
}

/// Pull the `file` field out of the form. The file name is checked before the body
/// is read.
async fn read_csv_field(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<CsvUpload, IngestError> {
    let mut multipart = multipart?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        ensure_csv_file_name(&file_name)?;
        let contents = field.bytes().await?;
        return CsvUpload::new(file_name, contents.to_vec());
    }

    Err(IngestError::invalid_input("No file uploaded"))
}

async fn upload_csv<R: CsvUploadRecord>(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let upload = read_csv_field(multipart).await?;
    let response = state.ingestor.upload_csv::<R>(upload).await?;
    Ok(Json(response))
}

/// Upload departments from a CSV file
#[utoipa::path(
    post,
    path = "/api/v1/upload/departments",
    security(("api_key" = [])),
    request_body(content = CsvUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Departments loaded", body = UploadResponse),
        (status = 400, description = "Invalid file or content", body = ApiError),
        (status = 403, description = "Missing or invalid API key", body = ApiError),
        (status = 500, description = "Server misconfigured or warehouse failure", body = ApiError)
    ),
    tag = "upload"
)]
pub async fn upload_departments(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    upload_csv::<Department>(&state, multipart).await
}

/// Upload jobs from a CSV file
#[utoipa::path(
    post,
    path = "/api/v1/upload/jobs",
    security(("api_key" = [])),
    request_body(content = CsvUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Jobs loaded", body = UploadResponse),
        (status = 400, description = "Invalid file or content", body = ApiError),
        (status = 403, description = "Missing or invalid API key", body = ApiError),
        (status = 500, description = "Server misconfigured or warehouse failure", body = ApiError)
    ),
    tag = "upload"
)]
pub async fn upload_jobs(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    upload_csv::<Job>(&state, multipart).await
}

/// Upload hired employees from a CSV file
#[utoipa::path(
    post,
    path = "/api/v1/upload/employees",
    security(("api_key" = [])),
    request_body(content = CsvUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Employees loaded", body = UploadResponse),
        (status = 400, description = "Invalid file or content", body = ApiError),
        (status = 403, description = "Missing or invalid API key", body = ApiError),
        (status = 500, description = "Server misconfigured or warehouse failure", body = ApiError)
    ),
    tag = "upload"
)]
pub async fn upload_employees(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    upload_csv::<Employee>(&state, multipart).await
}

/// Insert a JSON batch of 1 to 1000 records into one table
///
/// Element shape depends on the table: `departments` takes `{id, department}`, `jobs`
/// takes `{id, job}`, and `hired_employees` takes
/// `{id, name, datetime, department_id?, job_id?}`.
#[utoipa::path(
    post,
    path = "/api/v1/upload/batch/{table_name}",
    security(("api_key" = [])),
    params(
        ("table_name" = TableName, Path, description = "Target table")
    ),
    request_body(content = Vec<BatchItem>, description = "Records for the target table"),
    responses(
        (status = 200, description = "Batch loaded", body = UploadResponse),
        (status = 400, description = "Invalid table, batch size or record", body = ApiError),
        (status = 403, description = "Missing or invalid API key", body = ApiError),
        (status = 500, description = "Server misconfigured or warehouse failure", body = ApiError)
    ),
    tag = "upload"
)]
pub async fn upload_batch(
    State(state): State<AppState>,
    Path(table_name): Path<String>,
    body: Result<Json<Vec<Value>>, JsonRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let table: TableName = table_name.parse()?;
    let Json(rows) = body.map_err(IngestError::from)?;
    let response = state.ingestor.upload_batch(table, rows).await?;
    Ok(Json(response))
}
