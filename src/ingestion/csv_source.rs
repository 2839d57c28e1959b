//! CSV decoding with header detection.
//!
//! Uploads are first read as if they carry a header row. When none of the record's
//! declared column names appear in that first row, the text is read again without a
//! header and the declared names are assigned by position.

use chrono::{DateTime, Utc};

use crate::error::IngestError;
use crate::models::{Department, Employee, Job, LoadedAt, Record};

use super::coerce;

/// Parsed CSV content: column names plus string cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Read `text`, treating the first record as the header row.
    pub fn with_header(text: &str) -> Result<Self, IngestError> {
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let rows = collect_rows(reader.records(), columns.len())?;

        Ok(Self { columns, rows })
    }

    /// Read `text` without a header, naming columns positionally from `names`.
    ///
    /// Fails when the content has more columns than `names`; fewer columns are accepted
    /// and the trailing names are simply absent.
    pub fn positional(text: &str, names: &[&str]) -> Result<Self, IngestError> {
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut raw_rows = Vec::new();
        for record in reader.records() {
            raw_rows.push(record?.iter().map(str::to_string).collect::<Vec<_>>());
        }

        let width = raw_rows.first().map(Vec::len).unwrap_or(0);
        if width > names.len() {
            return Err(IngestError::validation(format!(
                "Length mismatch: expected {} columns, got {}",
                names.len(),
                width
            )));
        }

        for (idx, row) in raw_rows.iter().enumerate() {
            if row.len() > width {
                return Err(IngestError::validation(format!(
                    "Expected {} fields in line {}, saw {}",
                    width,
                    idx + 1,
                    row.len()
                )));
            }
        }

        Ok(Self {
            columns: names[..width].iter().map(|n| n.to_string()).collect(),
            rows: raw_rows,
        })
    }

    /// Decode `contents` and apply header detection for the declared `required` columns.
    pub fn detect(contents: &[u8], required: &[&str]) -> Result<Self, IngestError> {
        let text = std::str::from_utf8(contents)
            .map_err(|e| IngestError::validation(format!("file is not valid UTF-8: {}", e)))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        if text.trim().is_empty() {
            return Err(IngestError::invalid_input("CSV file is empty"));
        }

        let table = Self::with_header(text)?;
        let table = if table.has_any_column(required) {
            table
        } else {
            tracing::debug!("No known header found, reading CSV positionally");
            Self::positional(text, required)?
        };

        if table.rows.is_empty() {
            return Err(IngestError::invalid_input("CSV file is empty"));
        }

        Ok(table)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn has_any_column(&self, names: &[&str]) -> bool {
        names.iter().any(|name| self.columns.iter().any(|c| c == name))
    }

    fn column_index(&self, name: &str) -> Result<usize, IngestError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| IngestError::validation(format!("missing required column '{}'", name)))
    }

    /// Iterate rows together with a column accessor.
    pub fn rows(&self) -> impl Iterator<Item = CsvRow<'_>> {
        self.rows.iter().enumerate().map(move |(idx, cells)| CsvRow {
            table: self,
            // 1-based, counting from the first data line
            line: idx + 1,
            cells,
        })
    }
}

fn collect_rows<R: std::io::Read>(
    records: ::csv::StringRecordsIter<'_, R>,
    width: usize,
) -> Result<Vec<Vec<String>>, IngestError> {
    let mut rows = Vec::new();
    for (idx, record) in records.enumerate() {
        let record = record?;
        if record.len() > width {
            return Err(IngestError::validation(format!(
                "Expected {} fields in line {}, saw {}",
                width,
                idx + 2,
                record.len()
            )));
        }
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// One data row of a [`CsvTable`].
pub struct CsvRow<'a> {
    table: &'a CsvTable,
    line: usize,
    cells: &'a [String],
}

impl CsvRow<'_> {
    fn raw(&self, column: &str) -> Result<&str, IngestError> {
        let idx = self.table.column_index(column)?;
        // Short rows read missing trailing cells as blank.
        Ok(self.cells.get(idx).map(String::as_str).unwrap_or(""))
    }

    fn context<T>(&self, column: &str, result: Result<T, String>) -> Result<T, IngestError> {
        result.map_err(|message| {
            IngestError::validation(format!(
                "column '{}' row {}: {}",
                column, self.line, message
            ))
        })
    }

    pub fn integer(&self, column: &str) -> Result<i64, IngestError> {
        let raw = self.raw(column)?;
        self.context(column, coerce::required_integer(raw))
    }

    pub fn nullable_integer(&self, column: &str) -> Result<Option<i64>, IngestError> {
        let raw = self.raw(column)?;
        self.context(column, coerce::nullable_integer(raw))
    }

    pub fn text(&self, column: &str) -> Result<String, IngestError> {
        self.raw(column).map(coerce::text)
    }

    /// Timestamp rounded to millisecond precision.
    pub fn timestamp_millis(&self, column: &str) -> Result<Option<DateTime<Utc>>, IngestError> {
        let raw = self.raw(column)?;
        let parsed = self.context(column, coerce::timestamp(raw))?;
        parsed
            .map(|value| self.context(column, coerce::round_to_millis(value)))
            .transpose()
    }
}

/// A record kind that can be built from an uploaded CSV row.
pub trait CsvRecord: Record + Sized {
    fn from_csv_row(row: &CsvRow<'_>, loaded_at: LoadedAt) -> Result<Self, IngestError>;
}

impl CsvRecord for Department {
    fn from_csv_row(row: &CsvRow<'_>, loaded_at: LoadedAt) -> Result<Self, IngestError> {
        Ok(Department {
            id: row.integer("id")?,
            department: row.text("department")?,
            loaded_at,
        })
    }
}

impl CsvRecord for Job {
    fn from_csv_row(row: &CsvRow<'_>, loaded_at: LoadedAt) -> Result<Self, IngestError> {
        Ok(Job {
            id: row.integer("id")?,
            job: row.text("job")?,
            loaded_at,
        })
    }
}

impl CsvRecord for Employee {
    fn from_csv_row(row: &CsvRow<'_>, loaded_at: LoadedAt) -> Result<Self, IngestError> {
        Ok(Employee {
            id: row.integer("id")?,
            name: row.text("name")?,
            datetime: row.timestamp_millis("datetime")?,
            department_id: row.nullable_integer("department_id")?,
            job_id: row.nullable_integer("job_id")?,
            loaded_at,
        })
    }
}

/// Decode an uploaded CSV into records of kind `R`, all stamped with `loaded_at`.
pub fn parse_records<R: CsvRecord>(
    contents: &[u8],
    loaded_at: LoadedAt,
) -> Result<Vec<R>, IngestError> {
    let table = CsvTable::detect(contents, R::COLUMNS)?;
    table
        .rows()
        .map(|row| R::from_csv_row(&row, loaded_at))
        .collect()
}
