//! # Upload API Library
//!
//! CSV and JSON batch ingestion of departments, jobs and hired employees into a
//! BigQuery dataset, behind a shared API key.

pub mod auth;
pub mod config;
pub mod error;
pub mod gcp;
pub mod handlers;
pub mod ingestion;
pub mod models;
pub mod secrets;
pub mod server;
pub mod telemetry;
pub mod warehouse;
