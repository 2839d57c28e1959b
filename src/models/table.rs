//! Warehouse tables accepted by the upload endpoints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::IngestError;

/// Target table for an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TableName {
    Departments,
    Jobs,
    HiredEmployees,
}

impl TableName {
    pub const ALL: [TableName; 3] = [
        TableName::Departments,
        TableName::Jobs,
        TableName::HiredEmployees,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::Departments => "departments",
            TableName::Jobs => "jobs",
            TableName::HiredEmployees => "hired_employees",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableName {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TableName::ALL
            .into_iter()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| IngestError::invalid_input("Invalid table name"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_tables() {
        for table in TableName::ALL {
            assert_eq!(table.as_str().parse::<TableName>().unwrap(), table);
        }
    }

    #[test]
    fn rejects_unknown_and_differently_cased_names() {
        for name in ["invalid_table", "Departments", "employees", ""] {
            let err = name.parse::<TableName>().unwrap_err();
            assert!(matches!(err, IngestError::InvalidInput(ref m) if m == "Invalid table name"));
        }
    }
}
