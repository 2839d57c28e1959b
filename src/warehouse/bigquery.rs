//! BigQuery REST client.
//!
//! Streaming inserts go through `tabledata.insertAll`. Bulk loads submit a load job with
//! a multipart/related media upload, then poll the job until it reports `DONE`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::gcp::GoogleTokenSource;

use super::{CsvBuffer, InsertOutcome, RowInsertError, Warehouse, WarehouseError, WriteMode};

/// Payload format of a load job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    NewlineDelimitedJson,
    Csv,
}

impl SourceFormat {
    fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::NewlineDelimitedJson => "NEWLINE_DELIMITED_JSON",
            SourceFormat::Csv => "CSV",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct InsertErrorEntry {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorProto {
    fn describe(&self) -> String {
        match (&self.reason, &self.message) {
            (Some(reason), Some(message)) => format!("{}: {}", reason, message),
            (Some(text), None) | (None, Some(text)) => text.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    #[serde(default)]
    status: JobStatus,
    #[serde(default)]
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    #[serde(default)]
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    #[serde(default)]
    output_rows: Option<String>,
}

impl JobResource {
    fn is_done(&self) -> bool {
        self.status.state.as_deref() == Some("DONE")
    }

    fn output_rows(&self) -> u64 {
        self.statistics
            .as_ref()
            .and_then(|stats| stats.load.as_ref())
            .and_then(|load| load.output_rows.as_deref())
            .and_then(|rows| rows.parse().ok())
            .unwrap_or(0)
    }
}

/// BigQuery-backed [`Warehouse`].
pub struct BigQueryClient {
    http: reqwest::Client,
    tokens: Arc<GoogleTokenSource>,
    api_base: String,
    project_id: String,
    dataset_id: String,
    poll_interval: Duration,
}

impl BigQueryClient {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<GoogleTokenSource>,
        api_base: impl Into<String>,
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            http,
            tokens,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            poll_interval,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        http: reqwest::Client,
        tokens: Arc<GoogleTokenSource>,
    ) -> Self {
        Self::new(
            http,
            tokens,
            config.bigquery_api_base.clone(),
            config.project_id.clone(),
            config.dataset_id.clone(),
            Duration::from_millis(config.load_job_poll_interval_ms),
        )
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/datasets/{}/tables/{}",
            self.api_base, self.project_id, self.dataset_id, table
        )
    }

    async fn bearer(&self, context: &str) -> Result<String, WarehouseError> {
        self.tokens
            .access_token()
            .await
            .map_err(|source| WarehouseError::Token {
                context: context.to_string(),
                source,
            })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<reqwest::Response, WarehouseError> {
        let token = self.bearer(context).await?;
        request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| WarehouseError::Transport {
                context: context.to_string(),
                source,
            })
    }

    async fn json_body<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
    ) -> Result<T, WarehouseError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Status {
                context: context.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| WarehouseError::Transport {
                context: context.to_string(),
                source,
            })
    }

    /// Submit a load job for `payload` and wait for it to finish.
    async fn run_load_job(
        &self,
        table: &str,
        payload: &[u8],
        format: SourceFormat,
        mode: WriteMode,
    ) -> Result<u64, WarehouseError> {
        let context = format!("loading dataframe into {}", self.table_reference(table));

        let mut load = json!({
            "destinationTable": {
                "projectId": self.project_id,
                "datasetId": self.dataset_id,
                "tableId": table,
            },
            "sourceFormat": format.as_str(),
            "writeDisposition": mode.as_disposition(),
        });
        if format == SourceFormat::Csv {
            load["skipLeadingRows"] = json!(1);
        }
        let job_config = json!({
            "jobReference": {
                "projectId": self.project_id,
                "jobId": format!("upload_{}", Uuid::new_v4().simple()),
            },
            "configuration": { "load": load },
        });

        let boundary = format!("upload_{}", Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &job_config, payload)?;

        let request = self
            .http
            .post(format!(
                "{}/upload/bigquery/v2/projects/{}/jobs",
                self.api_base, self.project_id
            ))
            .query(&[("uploadType", "multipart")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body);
        let response = self.send(request, &context).await?;
        let mut job: JobResource = Self::json_body(response, &context).await?;

        tracing::debug!(
            job_id = %job.job_reference.job_id,
            table = %table,
            format = format.as_str(),
            "Submitted load job"
        );

        while !job.is_done() {
            tokio::time::sleep(self.poll_interval).await;
            job = self.get_job(&job.job_reference, &context).await?;
        }

        if let Some(error) = &job.status.error_result {
            return Err(WarehouseError::Job {
                context,
                reason: error.describe(),
            });
        }

        let rows = job.output_rows();
        tracing::info!(
            job_id = %job.job_reference.job_id,
            table = %table,
            rows,
            "Load job finished"
        );
        Ok(rows)
    }

    async fn get_job(
        &self,
        reference: &JobReference,
        context: &str,
    ) -> Result<JobResource, WarehouseError> {
        let mut request = self.http.get(format!(
            "{}/bigquery/v2/projects/{}/jobs/{}",
            self.api_base, self.project_id, reference.job_id
        ));
        if let Some(location) = &reference.location {
            request = request.query(&[("location", location)]);
        }
        let response = self.send(request, context).await?;
        Self::json_body(response, context).await
    }
}

/// Body of a `multipart/related` media upload: job metadata followed by the payload.
fn multipart_related(
    boundary: &str,
    metadata: &Value,
    payload: &[u8],
) -> Result<Vec<u8>, WarehouseError> {
    let metadata = serde_json::to_vec(metadata)?;
    let mut body = Vec::with_capacity(metadata.len() + payload.len() + 256);

    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(&metadata);
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    Ok(body)
}

fn newline_delimited_json(rows: &[Value]) -> Result<Vec<u8>, WarehouseError> {
    let mut out = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.push(b'\n');
    }
    Ok(out)
}

#[async_trait]
impl Warehouse for BigQueryClient {
    fn table_reference(&self, table: &str) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, table)
    }

    async fn insert_rows(&self, table: &str, rows: &[Value]) -> Result<InsertOutcome, WarehouseError> {
        let context = format!("inserting rows into {}", self.table_reference(table));
        let body = json!({
            "rows": rows.iter().map(|row| json!({ "json": row })).collect::<Vec<_>>(),
        });

        let request = self
            .http
            .post(format!("{}/insertAll", self.table_url(table)))
            .json(&body);
        let response = self.send(request, &context).await?;
        let result: InsertAllResponse = Self::json_body(response, &context).await?;

        if result.insert_errors.is_empty() {
            return Ok(InsertOutcome {
                errors: None,
                count: rows.len() as u64,
            });
        }

        tracing::warn!(
            table = %table,
            rejected = result.insert_errors.len(),
            "Streaming insert rejected rows"
        );
        let errors = result
            .insert_errors
            .into_iter()
            .map(|entry| RowInsertError {
                index: entry.index,
                reasons: entry.errors.iter().map(ErrorProto::describe).collect(),
            })
            .collect();
        Ok(InsertOutcome {
            errors: Some(errors),
            count: 0,
        })
    }

    async fn bulk_load(
        &self,
        table: &str,
        rows: &[Value],
        mode: WriteMode,
    ) -> Result<u64, WarehouseError> {
        let payload = newline_delimited_json(rows)?;
        self.run_load_job(table, &payload, SourceFormat::NewlineDelimitedJson, mode)
            .await
    }

    async fn bulk_load_buffered(
        &self,
        table: &str,
        buffer: CsvBuffer,
        mode: WriteMode,
    ) -> Result<u64, WarehouseError> {
        self.run_load_job(table, buffer.as_bytes(), SourceFormat::Csv, mode)
            .await
    }

    async fn table_exists(&self, table: &str) -> Result<bool, WarehouseError> {
        let context = format!("looking up {}", self.table_reference(table));
        let response = self.send(self.http.get(self.table_url(table)), &context).await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::json_body::<Value>(response, &context).await?;
        Ok(true)
    }
}
