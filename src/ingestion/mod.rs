//! Ingestion pipeline: parse, validate, coerce, stamp and write.

pub mod batch;
pub mod coerce;
pub mod csv_source;

use std::sync::Arc;

use chrono::{DurationRound, TimeDelta, Utc};
use chrono_tz::America::Argentina::Buenos_Aires;
use serde::Serialize;
use serde_json::Value;

use crate::error::IngestError;
use crate::models::{Employee, LoadedAt, TableName, UploadResponse};
use crate::warehouse::{CsvBuffer, Warehouse, WriteMode};

pub use batch::BatchRecords;
pub use csv_source::{CsvRecord, parse_records};

/// Current instant in the ingestion timezone, truncated to the warehouse's microsecond
/// resolution.
pub fn loaded_at_now() -> LoadedAt {
    let now = Utc::now();
    let now = now
        .duration_trunc(TimeDelta::microseconds(1))
        .unwrap_or(now);
    now.with_timezone(&Buenos_Aires).fixed_offset()
}

/// Rejects file names that do not end in `.csv` (any case).
pub fn ensure_csv_file_name(name: &str) -> Result<(), IngestError> {
    let is_csv = name.len() >= 4
        && name
            .get(name.len() - 4..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(".csv"));
    if is_csv {
        Ok(())
    } else {
        Err(IngestError::invalid_input("File must be a CSV"))
    }
}

/// An uploaded file, accepted by name but not yet parsed.
#[derive(Debug, Clone)]
pub struct CsvUpload {
    pub file_name: String,
    pub contents: Vec<u8>,
}

impl CsvUpload {
    pub fn new(file_name: impl Into<String>, contents: Vec<u8>) -> Result<Self, IngestError> {
        let file_name = file_name.into();
        ensure_csv_file_name(&file_name)?;
        Ok(Self {
            file_name,
            contents,
        })
    }
}

pub(crate) fn to_json_rows<R: Serialize>(rows: &[R]) -> Result<Vec<Value>, IngestError> {
    rows.iter()
        .map(|row| {
            serde_json::to_value(row)
                .map_err(|e| IngestError::internal(format!("failed to encode row: {}", e)))
        })
        .collect()
}

/// How a CSV record kind reaches the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePath {
    /// JSON rows through a load job.
    JsonRows,
    /// Rows re-serialized into a CSV buffer and loaded as CSV.
    CsvBuffer,
}

/// Record kinds accepted as CSV uploads, with the write path each one takes.
pub trait CsvUploadRecord: CsvRecord {
    const WRITE_PATH: WritePath = WritePath::JsonRows;
}

impl CsvUploadRecord for crate::models::Department {}

impl CsvUploadRecord for crate::models::Job {}

impl CsvUploadRecord for Employee {
    const WRITE_PATH: WritePath = WritePath::CsvBuffer;
}

/// Runs uploads through the pipeline and into the warehouse.
pub struct Ingestor {
    warehouse: Arc<dyn Warehouse>,
}

impl Ingestor {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Arc<dyn Warehouse> {
        &self.warehouse
    }

    /// Parse a CSV upload into records of kind `R` and append them to `R`'s table.
    pub async fn upload_csv<R: CsvUploadRecord>(
        &self,
        upload: CsvUpload,
    ) -> Result<UploadResponse, IngestError> {
        let loaded_at = loaded_at_now();
        let records = parse_records::<R>(&upload.contents, loaded_at)?;
        let table = R::TABLE;

        tracing::info!(
            file_name = %upload.file_name,
            table = %table,
            rows = records.len(),
            "Parsed CSV upload"
        );

        let rows = match R::WRITE_PATH {
            WritePath::JsonRows => {
                let rows = to_json_rows(&records)?;
                self.warehouse
                    .bulk_load(table.as_str(), &rows, WriteMode::Append)
                    .await?
            }
            WritePath::CsvBuffer => {
                let buffer = CsvBuffer::from_records(&records)?;
                self.warehouse
                    .bulk_load_buffered(table.as_str(), buffer, WriteMode::Append)
                    .await?
            }
        };

        Ok(UploadResponse {
            message: format!("Successfully uploaded {} {}", rows, R::LABEL),
            rows,
            table: table.to_string(),
        })
    }

    /// Validate a JSON batch for `table` and append it to that table.
    pub async fn upload_batch(
        &self,
        table: TableName,
        rows: Vec<Value>,
    ) -> Result<UploadResponse, IngestError> {
        let batch = BatchRecords::from_json(table, rows, loaded_at_now())?;

        tracing::info!(table = %table, rows = batch.len(), "Validated batch upload");

        let rows = batch.to_json_rows()?;
        let written = self
            .warehouse
            .bulk_load(table.as_str(), &rows, WriteMode::Append)
            .await?;

        Ok(UploadResponse {
            message: format!("Successfully inserted {} rows into {}", written, table),
            rows: written,
            table: table.to_string(),
        })
    }
}
