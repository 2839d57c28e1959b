//! Warehouse writes.
//!
//! The ingestion pipeline talks to the warehouse through the [`Warehouse`] trait so that
//! handlers can be exercised against an in-memory fake. [`BigQueryClient`] is the
//! production implementation.

pub mod bigquery;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::IngestError;
use crate::gcp::TokenError;

pub use bigquery::BigQueryClient;

/// How a bulk load treats rows already present in the destination table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    #[default]
    Append,
    Truncate,
    Empty,
}

impl WriteMode {
    pub fn as_disposition(&self) -> &'static str {
        match self {
            WriteMode::Append => "WRITE_APPEND",
            WriteMode::Truncate => "WRITE_TRUNCATE",
            WriteMode::Empty => "WRITE_EMPTY",
        }
    }
}

/// A rejected row from a streaming insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowInsertError {
    pub index: u64,
    pub reasons: Vec<String>,
}

/// Result of a streaming insert. When `errors` is present nothing is counted as written.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOutcome {
    pub errors: Option<Vec<RowInsertError>>,
    pub count: u64,
}

/// Rows serialized as CSV text with a header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvBuffer {
    bytes: Vec<u8>,
    rows: usize,
}

impl CsvBuffer {
    /// Serialize `records` with a header row taken from their field names.
    pub fn from_records<R: Serialize>(records: &[R]) -> Result<Self, WarehouseError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for record in records {
            writer.serialize(record).map_err(WarehouseError::Encode)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| WarehouseError::Buffer(e.to_string()))?;

        Ok(Self {
            bytes,
            rows: records.len(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of data rows, excluding the header.
    pub fn rows(&self) -> usize {
        self.rows
    }
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{context}: warehouse returned {status}: {body}")]
    Status {
        context: String,
        status: u16,
        body: String,
    },
    #[error("{context}: load job failed: {reason}")]
    Job { context: String, reason: String },
    #[error("{context}: {source}")]
    Token {
        context: String,
        #[source]
        source: TokenError,
    },
    #[error("failed to encode rows as CSV: {0}")]
    Encode(#[source] csv::Error),
    #[error("failed to buffer CSV rows: {0}")]
    Buffer(String),
    #[error("failed to encode rows as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<WarehouseError> for IngestError {
    fn from(error: WarehouseError) -> Self {
        IngestError::internal(error.to_string())
    }
}

/// Destination of validated records.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Fully qualified `project.dataset.table` reference.
    fn table_reference(&self, table: &str) -> String;

    /// Streaming insert of JSON rows.
    async fn insert_rows(&self, table: &str, rows: &[Value]) -> Result<InsertOutcome, WarehouseError>;

    /// Load JSON rows through a load job; returns the row count the job reports.
    async fn bulk_load(
        &self,
        table: &str,
        rows: &[Value],
        mode: WriteMode,
    ) -> Result<u64, WarehouseError>;

    /// Load a CSV buffer through a load job; returns the row count the job reports.
    async fn bulk_load_buffered(
        &self,
        table: &str,
        buffer: CsvBuffer,
        mode: WriteMode,
    ) -> Result<u64, WarehouseError>;

    async fn table_exists(&self, table: &str) -> Result<bool, WarehouseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        id: i64,
        name: String,
        job_id: Option<i64>,
    }

    #[test]
    fn write_modes_map_to_dispositions() {
        assert_eq!(WriteMode::default(), WriteMode::Append);
        assert_eq!(WriteMode::Append.as_disposition(), "WRITE_APPEND");
        assert_eq!(WriteMode::Truncate.as_disposition(), "WRITE_TRUNCATE");
        assert_eq!(WriteMode::Empty.as_disposition(), "WRITE_EMPTY");
    }

    #[test]
    fn csv_buffer_has_header_and_blank_nulls() {
        let buffer = CsvBuffer::from_records(&[
            Row {
                id: 1,
                name: "Ana, Jr".to_string(),
                job_id: None,
            },
            Row {
                id: 2,
                name: "Luis".to_string(),
                job_id: Some(4),
            },
        ])
        .unwrap();

        assert_eq!(buffer.rows(), 2);
        assert_eq!(
            std::str::from_utf8(buffer.as_bytes()).unwrap(),
            "id,name,job_id\n1,\"Ana, Jr\",\n2,Luis,4\n"
        );
    }

    #[test]
    fn warehouse_errors_become_internal() {
        let err: IngestError = WarehouseError::Job {
            context: "loading dataframe into p.d.jobs".to_string(),
            reason: "quota exceeded".to_string(),
        }
        .into();
        assert!(matches!(err, IngestError::Internal(ref m) if m.contains("quota exceeded")));
    }
}
