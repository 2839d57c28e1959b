//! Test utilities for driving the Upload API over HTTP.
//!
//! Provides a recording in-memory warehouse and a helper that serves the real router on
//! an ephemeral port.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result as AnyhowResult};
use async_trait::async_trait;
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use upload_api::auth::ApiKeyCache;
use upload_api::config::AppConfig;
use upload_api::secrets::{SecretStore, StaticSecretStore, UnconfiguredSecretStore};
use upload_api::server::{AppState, create_app};
use upload_api::warehouse::{CsvBuffer, InsertOutcome, Warehouse, WarehouseError, WriteMode};

pub const TEST_API_KEY: &str = "test-api-key";

/// A write observed by [`RecordingWarehouse`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedWrite {
    Rows {
        table: String,
        rows: Vec<Value>,
        mode: WriteMode,
    },
    Csv {
        table: String,
        text: String,
        mode: WriteMode,
    },
}

impl RecordedWrite {
    pub fn table(&self) -> &str {
        match self {
            RecordedWrite::Rows { table, .. } | RecordedWrite::Csv { table, .. } => table,
        }
    }
}

/// In-memory warehouse that records every load and reports every row as written.
#[derive(Default)]
pub struct RecordingWarehouse {
    writes: Mutex<Vec<RecordedWrite>>,
}

impl RecordingWarehouse {
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Warehouse for RecordingWarehouse {
    fn table_reference(&self, table: &str) -> String {
        format!("test-project.hr.{}", table)
    }

    async fn insert_rows(&self, _table: &str, rows: &[Value]) -> Result<InsertOutcome, WarehouseError> {
        Ok(InsertOutcome {
            errors: None,
            count: rows.len() as u64,
        })
    }

    async fn bulk_load(
        &self,
        table: &str,
        rows: &[Value],
        mode: WriteMode,
    ) -> Result<u64, WarehouseError> {
        self.writes.lock().unwrap().push(RecordedWrite::Rows {
            table: table.to_string(),
            rows: rows.to_vec(),
            mode,
        });
        Ok(rows.len() as u64)
    }

    async fn bulk_load_buffered(
        &self,
        table: &str,
        buffer: CsvBuffer,
        mode: WriteMode,
    ) -> Result<u64, WarehouseError> {
        self.writes.lock().unwrap().push(RecordedWrite::Csv {
            table: table.to_string(),
            text: String::from_utf8_lossy(buffer.as_bytes()).into_owned(),
            mode,
        });
        Ok(buffer.rows() as u64)
    }

    async fn table_exists(&self, _table: &str) -> Result<bool, WarehouseError> {
        Ok(true)
    }
}

pub struct TestServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<AnyhowResult<()>>>,
}

impl TestServerHandle {
    pub async fn shutdown(mut self) -> AnyhowResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.join_handle.take() {
            let result = handle.await.context("server task join failed")?;
            result?;
        }

        Ok(())
    }
}

impl Drop for TestServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub struct TestApp {
    pub url: String,
    pub warehouse: Arc<RecordingWarehouse>,
    pub handle: TestServerHandle,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        project_id: "test-project".to_string(),
        dataset_id: "hr".to_string(),
        api_key: Some(TEST_API_KEY.to_string()),
        ..AppConfig::default()
    }
}

/// Serve the app with a static API key.
pub async fn spawn_test_app() -> TestApp {
    spawn_with_store(Arc::new(StaticSecretStore::new(TEST_API_KEY))).await
}

/// Serve the app with no API key source.
pub async fn spawn_unconfigured_app() -> TestApp {
    spawn_with_store(Arc::new(UnconfiguredSecretStore)).await
}

pub async fn spawn_with_store(store: Arc<dyn SecretStore>) -> TestApp {
    let warehouse = Arc::new(RecordingWarehouse::default());
    let state = AppState::new(
        Arc::new(test_config()),
        warehouse.clone(),
        ApiKeyCache::new(store),
    );
    let app = create_app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (ready_tx, ready_rx) = oneshot::channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server_task = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let _ = ready_tx.send(());

        server.await.context("axum server error")
    });

    ready_rx.await.expect("server task to signal readiness");

    TestApp {
        url: format!("http://{}", addr),
        warehouse,
        handle: TestServerHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle: Some(server_task),
        },
    }
}

/// Multipart form with a single `file` part.
pub fn csv_form(file_name: &str, contents: &str) -> reqwest::multipart::Form {
    let part = reqwest::multipart::Part::bytes(contents.as_bytes().to_vec())
        .file_name(file_name.to_string())
        .mime_str("text/csv")
        .unwrap();
    reqwest::multipart::Form::new().part("file", part)
}
