//! Normalized record shapes.
//!
//! Each record carries the `loaded_at` instant of the request that produced it. The
//! serialized field names match the warehouse column names.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use super::TableName;

/// Ingestion instant, expressed in the ingestion timezone.
pub type LoadedAt = DateTime<FixedOffset>;

/// A record kind that maps onto one warehouse table.
pub trait Record: Serialize + Send + Sync + 'static {
    /// Destination table.
    const TABLE: TableName;
    /// Caller-supplied columns in declaration order.
    const COLUMNS: &'static [&'static str];
    /// Plural noun used in acknowledgement messages.
    const LABEL: &'static str;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Department {
    pub id: i64,
    pub department: String,
    pub loaded_at: LoadedAt,
}

impl Record for Department {
    const TABLE: TableName = TableName::Departments;
    const COLUMNS: &'static [&'static str] = &["id", "department"];
    const LABEL: &'static str = "departments";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: i64,
    pub job: String,
    pub loaded_at: LoadedAt,
}

impl Record for Job {
    const TABLE: TableName = TableName::Jobs;
    const COLUMNS: &'static [&'static str] = &["id", "job"];
    const LABEL: &'static str = "jobs";
}

/// A hired employee.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Employee {
    pub id: i64,
    pub name: String,
    /// Hire instant. A blank source cell loads as null instead of failing the row.
    pub datetime: Option<DateTime<Utc>>,
    pub department_id: Option<i64>,
    pub job_id: Option<i64>,
    pub loaded_at: LoadedAt,
}

impl Record for Employee {
    const TABLE: TableName = TableName::HiredEmployees;
    const COLUMNS: &'static [&'static str] = &["id", "name", "datetime", "department_id", "job_id"];
    const LABEL: &'static str = "employees";
}
