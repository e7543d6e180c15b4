//! Warehouse loading
//!
//! [`WarehouseLoader`] runs the create / truncate / bulk-load steps for one
//! report table, always in that order, on a single connection acquired for
//! the call. Backends implement [`Warehouse`] and [`WarehouseConnection`];
//! [`postgres::PostgresWarehouse`] is the shipped one.

use async_trait::async_trait;
use crime_common::{EtlError, Result, Table, Value};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub mod postgres;

pub use postgres::PostgresWarehouse;

/// Column type in the warehouse table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    BigInt,
    Double,
    Date,
    Boolean,
    Text,
}

impl SqlType {
    pub fn as_sql(self) -> &'static str {
        match self {
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Date => "DATE",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Text => "TEXT",
        }
    }

    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(SqlType::Boolean),
            Value::Int(_) => Some(SqlType::BigInt),
            Value::Float(_) => Some(SqlType::Double),
            Value::Date(_) => Some(SqlType::Date),
            Value::Text(_) => Some(SqlType::Text),
        }
    }

    fn widen(self, other: SqlType) -> SqlType {
        match (self, other) {
            (a, b) if a == b => a,
            (SqlType::BigInt, SqlType::Double) | (SqlType::Double, SqlType::BigInt) => SqlType::Double,
            _ => SqlType::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
}

/// Column layout of a warehouse table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Infer column types from the values of `table`.
    ///
    /// Integer and float columns widen to float; any other mix, and columns
    /// with no non-null value, become text.
    pub fn infer(table: &Table) -> Self {
        let columns = table
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let sql_type = table
                    .rows()
                    .iter()
                    .filter_map(|row| SqlType::of(&row[idx]))
                    .reduce(SqlType::widen)
                    .unwrap_or(SqlType::Text);
                ColumnDef {
                    name: name.clone(),
                    sql_type,
                }
            })
            .collect();
        Self { columns }
    }
}

/// One table load, as configured for a report
#[derive(Debug, Clone, Default)]
pub struct LoadRequest {
    pub table_name: String,
    pub create: bool,
    pub truncate: bool,
    pub load_from_store: bool,
    /// Object key prefix holding the files to bulk load
    pub stage: Option<String>,
    /// Regular expression the whole object key must match
    pub pattern: Option<String>,
    /// Source of the column layout when `create` is set
    pub report_table: Option<Table>,
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    30
}

/// The `warehouse` config section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub url: String,
    pub table_name: String,
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub truncate: bool,
    #[serde(default)]
    pub load_from_store: bool,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl WarehouseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(EtlError::config("warehouse.url is empty"));
        }
        validate_table_name(&self.table_name)?;
        if self.max_connections == 0 {
            return Err(EtlError::config("warehouse.max_connections must be at least 1"));
        }
        if self.load_from_store {
            if self.stage.as_deref().map_or(true, |s| s.trim().is_empty()) {
                return Err(EtlError::config("warehouse.load_from_store needs warehouse.stage"));
            }
            match self.pattern.as_deref() {
                Some(p) if !p.trim().is_empty() => {
                    compile_pattern(p)?;
                },
                _ => {
                    return Err(EtlError::config(
                        "warehouse.load_from_store needs warehouse.pattern",
                    ))
                },
            }
        }
        Ok(())
    }

    /// The configured request, with the bulk load additionally gated by
    /// `allow_store_load`
    pub fn request(&self, allow_store_load: bool, report_table: Option<Table>) -> LoadRequest {
        LoadRequest {
            table_name: self.table_name.clone(),
            create: self.create,
            truncate: self.truncate,
            load_from_store: self.load_from_store && allow_store_load,
            stage: self.stage.clone(),
            pattern: self.pattern.clone(),
            report_table,
        }
    }
}

/// A warehouse that hands out connections
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn WarehouseConnection>>;
}

/// One live warehouse session. Dropping it releases the connection.
#[async_trait]
pub trait WarehouseConnection: Send {
    /// Drop any existing table and create an empty one with `schema`
    async fn create_or_replace(&mut self, table: &str, schema: &TableSchema) -> Result<()>;

    async fn table_exists(&mut self, table: &str) -> Result<bool>;

    /// Remove all rows, keeping the table
    async fn truncate(&mut self, table: &str) -> Result<()>;

    /// Bulk load every staged object under `stage` whose key matches
    /// `pattern`. Returns the number of rows loaded.
    async fn copy_from_stage(&mut self, table: &str, stage: &str, pattern: &Regex) -> Result<u64>;
}

/// Runs [`LoadRequest`]s against a [`Warehouse`]
#[derive(Clone)]
pub struct WarehouseLoader {
    warehouse: Arc<dyn Warehouse>,
}

impl WarehouseLoader {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Apply the requested steps in order create, truncate, bulk load.
    ///
    /// Returns `true` only when the bulk load ran. With no step requested
    /// nothing is touched and `false` is returned.
    #[instrument(skip(self, request), fields(table = %request.table_name))]
    pub async fn load(&self, request: &LoadRequest) -> Result<bool> {
        if !request.create && !request.truncate && !request.load_from_store {
            warn!("No warehouse step requested; nothing loaded");
            return Ok(false);
        }

        validate_table_name(&request.table_name)?;

        let schema = if request.create {
            let table = request.report_table.as_ref().ok_or_else(|| {
                EtlError::schema(format!(
                    "cannot create {} without a report table",
                    request.table_name
                ))
            })?;
            Some(TableSchema::infer(table))
        } else {
            None
        };

        let stage = if request.load_from_store {
            let stage = request
                .stage
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| EtlError::config("bulk load requested without a stage"))?;
            let pattern = request
                .pattern
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| EtlError::config("bulk load requested without a file pattern"))?;
            Some((stage, compile_pattern(pattern)?))
        } else {
            None
        };

        let mut conn = self.warehouse.connect().await?;
        debug!("Warehouse connection acquired");

        if let Some(schema) = &schema {
            conn.create_or_replace(&request.table_name, schema).await?;
            info!(columns = schema.columns.len(), "Table created");
        }

        if request.truncate {
            if !conn.table_exists(&request.table_name).await? {
                return Err(EtlError::not_found(format!(
                    "table {} does not exist",
                    request.table_name
                )));
            }
            conn.truncate(&request.table_name).await?;
            info!("Table truncated");
        }

        let loaded = match stage {
            Some((stage, pattern)) => {
                let rows = conn
                    .copy_from_stage(&request.table_name, stage, &pattern)
                    .await?;
                info!(rows, stage, "Bulk load finished");
                true
            },
            None => false,
        };

        Ok(loaded)
    }
}

/// Compile a file pattern so it must match the whole object key.
///
/// Surrounding single quotes, as written in stage-copy statements, are
/// stripped.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    let trimmed = pattern.trim().trim_matches('\'');
    Regex::new(&format!("^(?:{})$", trimmed))
        .map_err(|e| EtlError::config(format!("invalid file pattern '{}': {}", pattern, e)))
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    part.len() <= 63
        && matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Accepts `table` or `schema.table` made of plain identifiers
pub fn validate_table_name(name: &str) -> Result<()> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|p| is_identifier(p)) {
        return Err(EtlError::config(format!("invalid table name '{}'", name)));
    }
    Ok(())
}

/// Double-quote each part of an already validated name
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part))
        .collect::<Vec<_>>()
        .join(".")
}
