//! Report transformation
//!
//! Reshapes the flattened upstream records into the report table:
//! project the configured source columns, rename them, coerce each column
//! to its declared kind, collapse duplicate rows keeping the last one, and
//! drop rows without an identifier. Pure, no I/O.

use chrono::{DateTime, NaiveDate};
use crime_common::{EtlError, Result, Table, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Target type of a report column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    #[default]
    Text,
    Integer,
    Float,
    Date,
}

/// One projected column: where it comes from, what it is called in the
/// report, and what type it holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
        }
    }
}

/// What to do with a value that does not parse as its column kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InvalidValuePolicy {
    /// Abort the run with a data error
    #[default]
    Fail,
    /// Drop the offending row
    DropRow,
    /// Replace the value with null
    Null,
}

fn default_identifier_column() -> String {
    "street_id".to_string()
}

fn default_date_column() -> String {
    "month".to_string()
}

/// Column layout of the report table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSchema {
    pub columns: Vec<ColumnSpec>,
    /// Target column whose null values disqualify a row
    #[serde(default = "default_identifier_column")]
    pub identifier_column: String,
    /// Target column holding the report date
    #[serde(default = "default_date_column")]
    pub date_column: String,
    #[serde(default)]
    pub invalid_values: InvalidValuePolicy,
}

impl ReportSchema {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self {
            columns,
            identifier_column: default_identifier_column(),
            date_column: default_date_column(),
            invalid_values: InvalidValuePolicy::default(),
        }
    }

    pub fn with_invalid_values(mut self, policy: InvalidValuePolicy) -> Self {
        self.invalid_values = policy;
        self
    }

    /// Check the schema is usable. Run once at configuration load.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(EtlError::config("report schema has no columns"));
        }

        let mut sources = HashSet::new();
        let mut targets = HashSet::new();
        for spec in &self.columns {
            if spec.source.trim().is_empty() || spec.target.trim().is_empty() {
                return Err(EtlError::config("report column names must not be empty"));
            }
            if !sources.insert(spec.source.as_str()) {
                return Err(EtlError::config(format!(
                    "source column '{}' is projected twice",
                    spec.source
                )));
            }
            if !targets.insert(spec.target.as_str()) {
                return Err(EtlError::config(format!(
                    "target column '{}' is defined twice",
                    spec.target
                )));
            }
        }

        if !targets.contains(self.identifier_column.as_str()) {
            return Err(EtlError::config(format!(
                "identifier column '{}' is not a report column",
                self.identifier_column
            )));
        }

        match self.column(&self.date_column) {
            None => Err(EtlError::config(format!(
                "date column '{}' is not a report column",
                self.date_column
            ))),
            Some(spec) if spec.kind != ColumnKind::Date => Err(EtlError::config(format!(
                "date column '{}' must be of kind date",
                self.date_column
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Spec of the target column `name`
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|spec| spec.target == name)
    }

    pub fn target_columns(&self) -> Vec<String> {
        self.columns.iter().map(|spec| spec.target.clone()).collect()
    }

    /// Zero-row table carrying the report columns, for schema-only creation
    pub fn empty_table(&self) -> Table {
        Table::with_columns(self.target_columns())
    }

    /// Restore column types on a table decoded from an untyped format.
    ///
    /// Columns are matched by target name; columns the schema does not
    /// describe stay as decoded.
    pub fn retype(&self, table: Table) -> Result<Table> {
        let kinds: Vec<Option<ColumnKind>> = table
            .columns()
            .iter()
            .map(|name| self.column(name).map(|spec| spec.kind))
            .collect();

        let mut typed = Table::with_columns(table.columns().to_vec());
        for (row_index, row) in table.rows().iter().enumerate() {
            let converted = row
                .iter()
                .zip(&kinds)
                .zip(table.columns())
                .map(|((value, kind), name)| match kind {
                    Some(kind) => convert(value, *kind).map_err(|reason| {
                        EtlError::data(format!("row {}, column '{}': {}", row_index, name, reason))
                    }),
                    None => Ok(value.clone()),
                })
                .collect::<Result<Vec<_>>>()?;
            typed.push_row(converted)?;
        }
        Ok(typed)
    }
}

/// Applies a [`ReportSchema`] to raw records
#[derive(Debug, Clone)]
pub struct Transformer {
    schema: ReportSchema,
}

impl Transformer {
    pub fn new(schema: ReportSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &ReportSchema {
        &self.schema
    }

    /// Produce the report table from raw upstream records.
    ///
    /// An empty input is returned as is and no column checks run.
    pub fn apply(&self, input: &Table) -> Result<Table> {
        if input.is_empty() {
            info!("Source table is empty, no transformations applied");
            return Ok(input.clone());
        }

        info!(rows = input.len(), "Transforming crime records");

        let positions = self
            .schema
            .columns
            .iter()
            .map(|spec| {
                input.column_index(&spec.source).ok_or_else(|| {
                    EtlError::schema(format!(
                        "source column '{}' not present in upstream records",
                        spec.source
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut output = self.schema.empty_table();
        let mut invalid = 0usize;

        'rows: for (row_index, row) in input.rows().iter().enumerate() {
            let mut converted = Vec::with_capacity(positions.len());
            for (spec, &position) in self.schema.columns.iter().zip(&positions) {
                match convert(&row[position], spec.kind) {
                    Ok(value) => converted.push(value),
                    Err(reason) => {
                        invalid += 1;
                        match self.schema.invalid_values {
                            InvalidValuePolicy::Fail => {
                                return Err(EtlError::data(format!(
                                    "row {}, column '{}': {}",
                                    row_index, spec.source, reason
                                )));
                            },
                            InvalidValuePolicy::DropRow => continue 'rows,
                            InvalidValuePolicy::Null => converted.push(Value::Null),
                        }
                    },
                }
            }
            output.push_row(converted)?;
        }

        if invalid > 0 {
            warn!(
                invalid,
                policy = ?self.schema.invalid_values,
                "Unparseable values encountered during transformation"
            );
        }

        let before_dedup = output.len();
        output.dedup_keep_last();
        debug!(removed = before_dedup - output.len(), "Collapsed duplicate rows");

        if let Some(id) = output.column_index(&self.schema.identifier_column) {
            let before = output.len();
            output.retain_rows(|row| !row[id].is_null());
            debug!(removed = before - output.len(), "Dropped rows without identifier");
        }

        info!(rows = output.len(), "Transformation finished");
        Ok(output)
    }
}

fn convert(value: &Value, kind: ColumnKind) -> std::result::Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match kind {
        ColumnKind::Text => Ok(match value {
            Value::Text(_) => value.clone(),
            other => Value::Text(other.to_string()),
        }),
        ColumnKind::Integer => match value {
            Value::Int(_) => Ok(value.clone()),
            Value::Float(f) if fits_i64(*f) => Ok(Value::Int(*f as i64)),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| format!("'{}' is not an integer", s)),
            other => Err(format!("'{}' is not an integer", other)),
        },
        ColumnKind::Float => match value {
            Value::Float(_) => Ok(value.clone()),
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("'{}' is not a number", s)),
            other => Err(format!("'{}' is not a number", other)),
        },
        ColumnKind::Date => match value {
            Value::Date(_) => Ok(value.clone()),
            Value::Text(s) => parse_date(s)
                .map(Value::Date)
                .ok_or_else(|| format!("'{}' is not a date", s)),
            other => Err(format!("'{}' is not a date", other)),
        },
    }
}

/// Whole and within range, so the cast neither truncates nor saturates
fn fits_i64(f: f64) -> bool {
    f.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(&f)
}

/// Accepts `YYYY-MM` (first of the month), `YYYY-MM-DD` and RFC 3339
/// timestamps; the time part is discarded.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() == 7 {
        return NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d").ok();
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}
