//! Report orchestration
//!
//! One run walks these states:
//!
//! ```text
//! CheckFreshness -> Extract -> Transform -> PutObject -> UpdateMarker -> LoadWarehouse -> Done
//! CheckFreshness -> LoadWarehouseOnly -> Done          (month already processed)
//! ```
//!
//! A failure stops the run in the state it happened in and is returned
//! unchanged. Nothing is rolled back: an object already stored stays
//! stored when a later step fails.

use chrono::{NaiveDate, Utc};
use crime_common::{CoordinateSet, EtlError, ReportMonth, Result, Table};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::meta::MetaStore;
use crate::source::{RequestTarget, SourceClient, TargetStrategy};
use crate::storage::{write_table, FileFormat, ObjectStore, TargetKey};
use crate::transform::Transformer;
use crate::warehouse::{WarehouseConfig, WarehouseLoader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    CheckFreshness,
    Extract,
    Transform,
    PutObject,
    UpdateMarker,
    LoadWarehouse,
    LoadWarehouseOnly,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::CheckFreshness => "check_freshness",
            RunState::Extract => "extract",
            RunState::Transform => "transform",
            RunState::PutObject => "put_object",
            RunState::UpdateMarker => "update_marker",
            RunState::LoadWarehouse => "load_warehouse",
            RunState::LoadWarehouseOnly => "load_warehouse_only",
            RunState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub final_state: RunState,
    /// States visited, in order
    pub path: Vec<RunState>,
    pub rows_extracted: usize,
    pub rows_transformed: usize,
    pub object_key: Option<String>,
    pub bulk_loaded: bool,
}

impl RunOutcome {
    /// `true` when new data was extracted, stored and loaded
    pub fn extracted(&self) -> bool {
        self.path.contains(&RunState::Extract)
    }
}

/// Per-report settings resolved from configuration
#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub date_filter: ReportMonth,
    pub coordinates: CoordinateSet,
    pub marker_key: String,
    pub target_key: TargetKey,
    pub format: FileFormat,
    pub warehouse: WarehouseConfig,
}

/// Runs one report end to end with injected collaborators
pub struct PipelineOrchestrator {
    source: SourceClient,
    transformer: Transformer,
    store: Arc<dyn ObjectStore>,
    meta: Arc<dyn MetaStore>,
    loader: WarehouseLoader,
    settings: ReportSettings,
}

fn failed(state: RunState, err: EtlError) -> EtlError {
    error!(state = %state, kind = err.kind(), error = %err, "Report run failed");
    err
}

impl PipelineOrchestrator {
    pub fn new(
        source: SourceClient,
        transformer: Transformer,
        store: Arc<dyn ObjectStore>,
        meta: Arc<dyn MetaStore>,
        loader: WarehouseLoader,
        settings: ReportSettings,
    ) -> Self {
        Self {
            source,
            transformer,
            store,
            meta,
            loader,
            settings,
        }
    }

    /// Whether the configured month still needs extraction. No side effects.
    pub async fn check_freshness(&self) -> Result<bool> {
        self.meta
            .check(&self.settings.date_filter, &self.settings.marker_key)
            .await
    }

    /// Request targets for the configured coordinates and month
    pub fn targets(&self, strategy: TargetStrategy) -> Result<Vec<RequestTarget>> {
        self.source.build_targets(
            strategy,
            &self.settings.coordinates,
            Some(&self.settings.date_filter),
        )
    }

    /// Run the report, stamping the object key with today's UTC date
    pub async fn run_report(&self) -> Result<RunOutcome> {
        self.run_report_on(Utc::now().date_naive()).await
    }

    #[instrument(skip(self), fields(date = %self.settings.date_filter, table = %self.settings.warehouse.table_name))]
    pub async fn run_report_on(&self, today: NaiveDate) -> Result<RunOutcome> {
        info!("Crime ETL job started");

        let mut outcome = RunOutcome {
            final_state: RunState::CheckFreshness,
            path: vec![RunState::CheckFreshness],
            rows_extracted: 0,
            rows_transformed: 0,
            object_key: None,
            bulk_loaded: false,
        };

        let fresh = self
            .check_freshness()
            .await
            .map_err(|e| failed(RunState::CheckFreshness, e))?;

        if !fresh {
            info!("Month already processed, refreshing warehouse only");
            outcome.path.push(RunState::LoadWarehouseOnly);

            let request = self
                .settings
                .warehouse
                .request(false, Some(self.transformer.schema().empty_table()));
            outcome.bulk_loaded = self
                .loader
                .load(&request)
                .await
                .map_err(|e| failed(RunState::LoadWarehouseOnly, e))?;

            return Ok(self.finish(outcome));
        }

        outcome.path.push(RunState::Extract);
        let raw = self.extract().await.map_err(|e| failed(RunState::Extract, e))?;
        outcome.rows_extracted = raw.len();

        outcome.path.push(RunState::Transform);
        let report = self
            .transformer
            .apply(&raw)
            .map_err(|e| failed(RunState::Transform, e))?;
        outcome.rows_transformed = report.len();
        if report.is_empty() {
            warn!("Transformed report is empty; writing it anyway");
        }

        outcome.path.push(RunState::PutObject);
        let key = self.settings.target_key.build(today);
        write_table(self.store.as_ref(), &report, &key, self.settings.format)
            .await
            .map_err(|e| failed(RunState::PutObject, e))?;
        info!(key = %key, "Crime target data successfully written");
        outcome.object_key = Some(key);

        outcome.path.push(RunState::UpdateMarker);
        self.meta
            .update(&self.settings.date_filter, &self.settings.marker_key)
            .await
            .map_err(|e| failed(RunState::UpdateMarker, e))?;
        info!("Crime meta file successfully updated");

        outcome.path.push(RunState::LoadWarehouse);
        let schema_source = if report.is_empty() {
            self.transformer.schema().empty_table()
        } else {
            report
        };
        let request = self.settings.warehouse.request(true, Some(schema_source));
        outcome.bulk_loaded = match self.loader.load(&request).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(
                    key = ?outcome.object_key,
                    "Report object is stored but the warehouse load failed"
                );
                return Err(failed(RunState::LoadWarehouse, e));
            },
        };

        Ok(self.finish(outcome))
    }

    async fn extract(&self) -> Result<Table> {
        let target = self
            .targets(TargetStrategy::Polygon)?
            .into_iter()
            .next()
            .ok_or_else(|| EtlError::config("no request target built"))?;
        info!(target = %target, "Extracting crime records");
        self.source.fetch(&target).await
    }

    fn finish(&self, mut outcome: RunOutcome) -> RunOutcome {
        outcome.path.push(RunState::Done);
        outcome.final_state = RunState::Done;
        info!(
            extracted = outcome.extracted(),
            rows = outcome.rows_transformed,
            bulk_loaded = outcome.bulk_loaded,
            "Crime ETL job finished"
        );
        outcome
    }
}
