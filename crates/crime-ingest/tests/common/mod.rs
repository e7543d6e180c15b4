//! Shared fakes and fixtures for integration tests
//!
//! Every fake appends to one [`CallLog`] so tests can assert the order in
//! which the orchestrator touched its collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use crime_common::{Coordinate, CoordinateSet, EtlError, ReportMonth, Result};
use crime_ingest::meta::MetaStore;
use crime_ingest::pipeline::{PipelineOrchestrator, ReportSettings};
use crime_ingest::source::{SourceClient, SourceSettings};
use crime_ingest::storage::{FileFormat, MemoryStore, ObjectStore, TargetKey, UploadResult};
use crime_ingest::transform::{ColumnKind, ColumnSpec, ReportSchema, Transformer};
use crime_ingest::warehouse::{
    TableSchema, Warehouse, WarehouseConfig, WarehouseConnection, WarehouseLoader,
};
use regex::Regex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Call Log
// ============================================================================

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|e| e == entry)
    }
}

// ============================================================================
// Object Store
// ============================================================================

/// [`MemoryStore`] that logs puts and can be told to fail them
pub struct RecordingStore {
    pub inner: MemoryStore,
    log: CallLog,
    fail_put: bool,
}

impl RecordingStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            inner: MemoryStore::new(),
            log,
            fail_put: false,
        }
    }

    pub fn failing(log: CallLog) -> Self {
        Self {
            fail_put: true,
            ..Self::new(log)
        }
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<&str>) -> Result<UploadResult> {
        self.log.push(format!("put:{}", key));
        if self.fail_put {
            return Err(EtlError::storage("bucket unavailable"));
        }
        self.inner.put(key, data, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.get(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix).await
    }
}

// ============================================================================
// Meta Store
// ============================================================================

pub struct RecordingMeta {
    processed: Mutex<Vec<ReportMonth>>,
    log: CallLog,
}

impl RecordingMeta {
    pub fn new(log: CallLog) -> Self {
        Self {
            processed: Mutex::new(Vec::new()),
            log,
        }
    }

    pub fn already_processed(log: CallLog, month: &str) -> Self {
        let meta = Self::new(log);
        meta.processed.lock().unwrap().push(month.parse().unwrap());
        meta
    }

    pub fn processed(&self) -> Vec<ReportMonth> {
        self.processed.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetaStore for RecordingMeta {
    async fn check(&self, date_filter: &ReportMonth, _marker_key: &str) -> Result<bool> {
        self.log.push("meta.check");
        Ok(!self.processed.lock().unwrap().iter().any(|m| m >= date_filter))
    }

    async fn update(&self, date_filter: &ReportMonth, _marker_key: &str) -> Result<()> {
        self.log.push("meta.update");
        self.processed.lock().unwrap().push(*date_filter);
        Ok(())
    }
}

// ============================================================================
// Warehouse
// ============================================================================

/// In-memory warehouse that records every step and tracks open connections
pub struct FakeWarehouse {
    log: CallLog,
    staged: Arc<dyn ObjectStore>,
    tables: Arc<Mutex<Vec<(String, TableSchema)>>>,
    open: Arc<AtomicUsize>,
    fail_on: Option<&'static str>,
}

impl FakeWarehouse {
    pub fn new(log: CallLog, staged: Arc<dyn ObjectStore>) -> Self {
        Self {
            log,
            staged,
            tables: Arc::new(Mutex::new(Vec::new())),
            open: Arc::new(AtomicUsize::new(0)),
            fail_on: None,
        }
    }

    /// Fail the step named `op` (`create`, `exists`, `truncate` or `copy`)
    pub fn failing_on(mut self, op: &'static str) -> Self {
        self.fail_on = Some(op);
        self
    }

    pub fn with_table(self, name: &str) -> Self {
        self.tables
            .lock()
            .unwrap()
            .push((name.to_string(), TableSchema { columns: Vec::new() }));
        self
    }

    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn schema_of(&self, table: &str) -> Option<TableSchema> {
        self.tables
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, schema)| schema.clone())
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn connect(&self) -> Result<Box<dyn WarehouseConnection>> {
        self.log.push("connect");
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            log: self.log.clone(),
            staged: self.staged.clone(),
            tables: self.tables.clone(),
            open: self.open.clone(),
            fail_on: self.fail_on,
        }))
    }
}

struct FakeConnection {
    log: CallLog,
    staged: Arc<dyn ObjectStore>,
    tables: Arc<Mutex<Vec<(String, TableSchema)>>>,
    open: Arc<AtomicUsize>,
    fail_on: Option<&'static str>,
}

impl FakeConnection {
    fn step(&self, op: &'static str, detail: String) -> Result<()> {
        self.log.push(format!("{}:{}", op, detail));
        if self.fail_on == Some(op) {
            return Err(EtlError::warehouse(format!("{} failed", op)));
        }
        Ok(())
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WarehouseConnection for FakeConnection {
    async fn create_or_replace(&mut self, table: &str, schema: &TableSchema) -> Result<()> {
        self.step("create", table.to_string())?;
        let mut tables = self.tables.lock().unwrap();
        tables.retain(|(name, _)| name != table);
        tables.push((table.to_string(), schema.clone()));
        Ok(())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        self.step("exists", table.to_string())?;
        Ok(self.tables.lock().unwrap().iter().any(|(name, _)| name == table))
    }

    async fn truncate(&mut self, table: &str) -> Result<()> {
        self.step("truncate", table.to_string())
    }

    async fn copy_from_stage(&mut self, table: &str, stage: &str, pattern: &Regex) -> Result<u64> {
        self.step("copy", format!("{}:{}", table, stage))?;
        let matched = self
            .staged
            .list(stage)
            .await?
            .into_iter()
            .filter(|key| pattern.is_match(key))
            .count();
        Ok(matched as u64)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub const TABLE: &str = "crime_report1";
pub const MARKER_KEY: &str = "meta/meta_file.csv";
pub const SOURCE_PATH: &str = "/api/crimes-street/all-crime";

pub fn report_schema() -> ReportSchema {
    ReportSchema::new(vec![
        ColumnSpec::new("category", "category", ColumnKind::Text),
        ColumnSpec::new("location.latitude", "latitude", ColumnKind::Float),
        ColumnSpec::new("location.street.id", "street_id", ColumnKind::Integer),
        ColumnSpec::new("location.street.name", "street_name", ColumnKind::Text),
        ColumnSpec::new("month", "month", ColumnKind::Date),
    ])
}

pub fn coordinates() -> CoordinateSet {
    CoordinateSet::new(vec![
        Coordinate::new(51.5, -0.1),
        Coordinate::new(51.6, -0.2),
        Coordinate::new(51.55, -0.3),
    ])
    .unwrap()
}

pub fn warehouse_config(create: bool, truncate: bool, load_from_store: bool) -> WarehouseConfig {
    WarehouseConfig {
        url: "postgres://unused".to_string(),
        table_name: TABLE.to_string(),
        create,
        truncate,
        load_from_store,
        stage: Some("crime/".to_string()),
        pattern: Some("'.*report1_.*[.]csv'".to_string()),
        max_connections: 1,
        connect_timeout_secs: 1,
    }
}

pub fn source_client(server_uri: &str) -> SourceClient {
    SourceClient::new(SourceSettings {
        base_url: format!("{}{}", server_uri, SOURCE_PATH),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

pub fn orchestrator(
    server_uri: &str,
    store: Arc<dyn ObjectStore>,
    meta: Arc<dyn MetaStore>,
    warehouse: Arc<dyn Warehouse>,
    warehouse_config: WarehouseConfig,
) -> PipelineOrchestrator {
    PipelineOrchestrator::new(
        source_client(server_uri),
        Transformer::new(report_schema()),
        store,
        meta,
        WarehouseLoader::new(warehouse),
        ReportSettings {
            date_filter: "2023-01".parse().unwrap(),
            coordinates: coordinates(),
            marker_key: MARKER_KEY.to_string(),
            target_key: TargetKey::new("crime/report1_", "%Y%m%d", ".csv").unwrap(),
            format: FileFormat::Csv,
            warehouse: warehouse_config,
        },
    )
}

/// Initialize tracing for tests
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,crime_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}
