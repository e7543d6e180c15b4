//! Wires the production collaborators from an [`AppConfig`]

use crime_common::{CoordinateSet, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::meta::{MetaStore, ObjectMetaStore};
use crate::pipeline::{PipelineOrchestrator, ReportSettings};
use crate::source::SourceClient;
use crate::storage::{ObjectStore, S3Storage};
use crate::transform::Transformer;
use crate::warehouse::{PostgresWarehouse, WarehouseLoader};

/// Resolve the per-report settings, reading the coordinates file once
pub fn report_settings(config: &AppConfig) -> Result<ReportSettings> {
    let coordinates = CoordinateSet::from_csv_path(&config.source.coordinates_path)?;
    info!(
        points = coordinates.len(),
        path = %config.source.coordinates_path.display(),
        "Coordinates loaded"
    );

    Ok(ReportSettings {
        date_filter: config.source.date,
        coordinates,
        marker_key: config.meta.marker_key.clone(),
        target_key: config.target_key()?,
        format: config.target.format,
        warehouse: config.warehouse.clone(),
    })
}

/// S3 storage, the object-backed meta store and the Postgres warehouse
pub fn build_orchestrator(config: &AppConfig) -> Result<PipelineOrchestrator> {
    let store: Arc<dyn ObjectStore> = Arc::new(S3Storage::new(config.storage.clone())?);
    let meta: Arc<dyn MetaStore> = Arc::new(ObjectMetaStore::new(store.clone()));
    let warehouse = PostgresWarehouse::new(&config.warehouse, store.clone())?;

    Ok(PipelineOrchestrator::new(
        SourceClient::new(config.source_settings())?,
        Transformer::new(config.schema.clone()),
        store,
        meta,
        WarehouseLoader::new(Arc::new(warehouse)),
        report_settings(config)?,
    ))
}
