//! JSON batch uploads.
//!
//! The batch body is an array of objects whose shape depends on the target table. Each
//! element is checked against the input shape for that table, then coerced the same way
//! as CSV cells (without millisecond rounding of `datetime`).

use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::IngestError;
use crate::models::{Department, Employee, Job, LoadedAt, TableName};

use super::coerce;

/// Inclusive bounds on the number of elements in one batch.
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 1000;

/// Department element of a batch body
#[derive(Debug, Deserialize, ToSchema)]
pub struct DepartmentInput {
    #[schema(value_type = i64)]
    pub id: Value,
    pub department: String,
}

/// Job element of a batch body
#[derive(Debug, Deserialize, ToSchema)]
pub struct JobInput {
    #[schema(value_type = i64)]
    pub id: Value,
    pub job: String,
}

/// Hired employee element of a batch body
#[derive(Debug, Deserialize, ToSchema)]
pub struct EmployeeInput {
    #[schema(value_type = i64)]
    pub id: Value,
    pub name: String,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub datetime: Value,
    #[serde(default)]
    #[schema(value_type = Option<i64>)]
    pub department_id: Option<Value>,
    #[serde(default)]
    #[schema(value_type = Option<i64>)]
    pub job_id: Option<Value>,
}

/// Any batch element; the table path parameter decides which shape applies.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum BatchItem {
    Department(DepartmentInput),
    Job(JobInput),
    Employee(EmployeeInput),
}

/// Validated batch, one variant per target table.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchRecords {
    Departments(Vec<Department>),
    Jobs(Vec<Job>),
    HiredEmployees(Vec<Employee>),
}

impl BatchRecords {
    /// Validate `rows` against the input shape of `table` and coerce them.
    pub fn from_json(
        table: TableName,
        rows: Vec<Value>,
        loaded_at: LoadedAt,
    ) -> Result<Self, IngestError> {
        check_batch_size(rows.len())?;

        let records = match table {
            TableName::Departments => BatchRecords::Departments(
                decode_rows::<DepartmentInput>(rows)?
                    .into_iter()
                    .enumerate()
                    .map(|(idx, input)| {
                        Ok(Department {
                            id: cell_integer(idx, "id", &input.id)?,
                            department: coerce::text(&input.department),
                            loaded_at,
                        })
                    })
                    .collect::<Result<_, IngestError>>()?,
            ),
            TableName::Jobs => BatchRecords::Jobs(
                decode_rows::<JobInput>(rows)?
                    .into_iter()
                    .enumerate()
                    .map(|(idx, input)| {
                        Ok(Job {
                            id: cell_integer(idx, "id", &input.id)?,
                            job: coerce::text(&input.job),
                            loaded_at,
                        })
                    })
                    .collect::<Result<_, IngestError>>()?,
            ),
            TableName::HiredEmployees => BatchRecords::HiredEmployees(
                decode_rows::<EmployeeInput>(rows)?
                    .into_iter()
                    .enumerate()
                    .map(|(idx, input)| employee_from_input(idx, input, loaded_at))
                    .collect::<Result<_, IngestError>>()?,
            ),
        };

        Ok(records)
    }

    pub fn table(&self) -> TableName {
        match self {
            BatchRecords::Departments(_) => TableName::Departments,
            BatchRecords::Jobs(_) => TableName::Jobs,
            BatchRecords::HiredEmployees(_) => TableName::HiredEmployees,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BatchRecords::Departments(rows) => rows.len(),
            BatchRecords::Jobs(rows) => rows.len(),
            BatchRecords::HiredEmployees(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows as JSON objects keyed by warehouse column name.
    pub fn to_json_rows(&self) -> Result<Vec<Value>, IngestError> {
        match self {
            BatchRecords::Departments(rows) => super::to_json_rows(rows),
            BatchRecords::Jobs(rows) => super::to_json_rows(rows),
            BatchRecords::HiredEmployees(rows) => super::to_json_rows(rows),
        }
    }
}

pub fn check_batch_size(len: usize) -> Result<(), IngestError> {
    if (MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&len) {
        Ok(())
    } else {
        Err(IngestError::invalid_input(format!(
            "Batch size must be between {} and {}",
            MIN_BATCH_SIZE, MAX_BATCH_SIZE
        )))
    }
}

fn decode_rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, IngestError> {
    rows.into_iter()
        .enumerate()
        .map(|(idx, row)| {
            if !row.is_object() {
                return Err(IngestError::validation(format!(
                    "row {}: expected an object",
                    idx
                )));
            }
            serde_json::from_value(row)
                .map_err(|e| IngestError::validation(format!("row {}: {}", idx, e)))
        })
        .collect()
}

fn cell_context<T>(idx: usize, column: &str, result: Result<T, String>) -> Result<T, IngestError> {
    result.map_err(|message| {
        IngestError::validation(format!("column '{}' row {}: {}", column, idx, message))
    })
}

fn cell_integer(idx: usize, column: &str, value: &Value) -> Result<i64, IngestError> {
    let raw = cell_context(idx, column, coerce::json_cell(value))?;
    cell_context(idx, column, coerce::required_integer(raw.as_deref().unwrap_or("")))
}

fn cell_nullable_integer(
    idx: usize,
    column: &str,
    value: Option<&Value>,
) -> Result<Option<i64>, IngestError> {
    let raw = match value {
        Some(value) => cell_context(idx, column, coerce::json_cell(value))?,
        None => None,
    };
    cell_context(idx, column, coerce::nullable_integer(raw.as_deref().unwrap_or("")))
}

fn employee_from_input(
    idx: usize,
    input: EmployeeInput,
    loaded_at: LoadedAt,
) -> Result<Employee, IngestError> {
    let datetime = match cell_context(idx, "datetime", coerce::json_cell(&input.datetime))? {
        Some(raw) => cell_context(idx, "datetime", coerce::timestamp(&raw))?,
        None => None,
    };

    Ok(Employee {
        id: cell_integer(idx, "id", &input.id)?,
        name: coerce::text(&input.name),
        datetime,
        department_id: cell_nullable_integer(idx, "department_id", input.department_id.as_ref())?,
        job_id: cell_nullable_integer(idx, "job_id", input.job_id.as_ref())?,
        loaded_at,
    })
}
