//! Rectangular in-memory tables
//!
//! [`Table`] is the shape both the raw upstream records and the transformed
//! report take while they move through a run. Tables are created fresh per
//! run and never cached.

use chrono::NaiveDate;
use std::collections::HashMap;

use crate::error::{EtlError, Result};

/// Date rendering used for CSV output and dedup keys
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single cell
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type-tagged rendering, so `Int(1)` and `Text("1")` stay distinct
    /// when rows are compared for full equality.
    fn dedup_key(&self) -> String {
        match self {
            Value::Null => "n:".to_string(),
            Value::Bool(b) => format!("b:{}", b),
            Value::Int(i) => format!("i:{}", i),
            Value::Float(f) => format!("f:{}", f.to_bits()),
            Value::Date(d) => format!("d:{}", d.format(DATE_FORMAT)),
            Value::Text(s) => format!("t:{}", s),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Named columns plus rows of equal width
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// A table with no columns and no rows
    pub fn empty() -> Self {
        Self::default()
    }

    /// A zero-row table with the given columns
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table, rejecting ragged rows
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut table = Self {
            columns,
            rows: Vec::with_capacity(rows.len()),
        };
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(EtlError::schema(format!(
                "row has {} cells but table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table holds no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Collapse rows that are equal in every cell, keeping the last
    /// occurrence. Survivors stay in the order of their last occurrence.
    pub fn dedup_keep_last(&mut self) {
        let mut seen = std::collections::HashSet::new();
        let mut kept: Vec<Vec<Value>> = Vec::with_capacity(self.rows.len());
        for row in self.rows.drain(..).rev() {
            let key = row
                .iter()
                .map(Value::dedup_key)
                .collect::<Vec<_>>()
                .join("\u{1f}");
            if seen.insert(key) {
                kept.push(row);
            }
        }
        kept.reverse();
        self.rows = kept;
    }

    /// Keep only rows for which `keep` returns true
    pub fn retain_rows<F>(&mut self, keep: F)
    where
        F: FnMut(&Vec<Value>) -> bool,
    {
        self.rows.retain(keep);
    }

    /// Encode as CSV with a header row. `Null` becomes an empty field.
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        if self.columns.is_empty() {
            return Ok(Vec::new());
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|e| EtlError::Io(e.into_error()))
    }

    /// Decode CSV produced by [`Table::to_csv`].
    ///
    /// CSV carries no types, so every non-empty field comes back as
    /// [`Value::Text`] and every empty field as [`Value::Null`].
    pub fn from_csv(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Self::empty());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(bytes);

        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut table = Self::with_columns(columns);

        for record in reader.records() {
            let record = record?;
            let row = record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        Value::Null
                    } else {
                        Value::Text(field.to_string())
                    }
                })
                .collect();
            table.push_row(row)?;
        }

        Ok(table)
    }

    /// Same column set and the same rows once columns are aligned by name
    pub fn equals_ignoring_column_order(&self, other: &Table) -> bool {
        if self.columns.len() != other.columns.len() || self.rows.len() != other.rows.len() {
            return false;
        }

        let other_index: HashMap<&str, usize> = other
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let mapping: Option<Vec<usize>> = self
            .columns
            .iter()
            .map(|c| other_index.get(c.as_str()).copied())
            .collect();

        let Some(mapping) = mapping else {
            return false;
        };

        self.rows.iter().zip(&other.rows).all(|(mine, theirs)| {
            mine.iter()
                .zip(&mapping)
                .all(|(value, &j)| *value == theirs[j])
        })
    }
}
