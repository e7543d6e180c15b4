//! Freshness marker
//!
//! Records which report months have already been extracted so a re-run for
//! the same month skips the upstream call and only refreshes the warehouse.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use crime_common::{EtlError, ReportMonth, Result, Table, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::storage::{FileFormat, ObjectStore};
use crate::transform::parse_date;

pub const SOURCE_DATE_COLUMN: &str = "source_date";
pub const PROCESSED_AT_COLUMN: &str = "datetime_of_processing";
const PROCESSED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Persistent record of processed report months
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// `true` when `date_filter` still needs extraction
    async fn check(&self, date_filter: &ReportMonth, marker_key: &str) -> Result<bool>;

    /// Record `date_filter` as processed
    async fn update(&self, date_filter: &ReportMonth, marker_key: &str) -> Result<()>;
}

/// [`MetaStore`] keeping a CSV meta file in object storage.
///
/// The file has a `source_date,datetime_of_processing` header and one row
/// per processed run. A missing file means nothing was processed yet.
pub struct ObjectMetaStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectMetaStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    async fn read(&self, marker_key: &str) -> Result<Table> {
        let table = match self.store.get(marker_key).await {
            Ok(data) => FileFormat::Csv.decode(&data)?,
            Err(EtlError::NotFound(_)) => {
                debug!(marker_key, "No meta file yet");
                return Ok(empty_meta());
            },
            Err(e) => return Err(e),
        };

        if table.columns().is_empty() {
            return Ok(empty_meta());
        }
        if table.column_index(SOURCE_DATE_COLUMN).is_none()
            || table.column_index(PROCESSED_AT_COLUMN).is_none()
        {
            return Err(EtlError::data(format!(
                "meta file {} must have columns {},{}",
                marker_key, SOURCE_DATE_COLUMN, PROCESSED_AT_COLUMN
            )));
        }
        Ok(table)
    }

    /// Append a row stamped with `processed_at` and rewrite the meta file
    pub async fn update_at(
        &self,
        date_filter: &ReportMonth,
        marker_key: &str,
        processed_at: NaiveDateTime,
    ) -> Result<()> {
        let existing = self.read(marker_key).await?;
        let source_idx = existing.column_index(SOURCE_DATE_COLUMN);
        let processed_idx = existing.column_index(PROCESSED_AT_COLUMN);

        let mut table = empty_meta();
        if let (Some(s), Some(p)) = (source_idx, processed_idx) {
            for row in existing.rows() {
                table.push_row(vec![row[s].clone(), row[p].clone()])?;
            }
        }
        table.push_row(vec![
            Value::Text(date_filter.to_string()),
            Value::Text(processed_at.format(PROCESSED_AT_FORMAT).to_string()),
        ])?;

        let data = FileFormat::Csv.encode(&table)?;
        self.store
            .put(marker_key, data, Some(FileFormat::Csv.content_type()))
            .await?;

        info!(marker_key, date = %date_filter, "Meta file updated");
        Ok(())
    }
}

fn empty_meta() -> Table {
    Table::with_columns([SOURCE_DATE_COLUMN, PROCESSED_AT_COLUMN])
}

fn recorded_month(value: &Value, marker_key: &str) -> Result<Option<ReportMonth>> {
    let raw = match value {
        Value::Null => return Ok(None),
        other => other.to_string(),
    };
    let date = parse_date(&raw).ok_or_else(|| {
        EtlError::data(format!(
            "meta file {} has unreadable {} '{}'",
            marker_key, SOURCE_DATE_COLUMN, raw
        ))
    })?;
    Ok(Some(ReportMonth::from_date(date)))
}

#[async_trait]
impl MetaStore for ObjectMetaStore {
    #[instrument(skip(self))]
    async fn check(&self, date_filter: &ReportMonth, marker_key: &str) -> Result<bool> {
        let table = self.read(marker_key).await?;
        let Some(idx) = table.column_index(SOURCE_DATE_COLUMN) else {
            return Ok(true);
        };

        for row in table.rows() {
            if let Some(month) = recorded_month(&row[idx], marker_key)? {
                if month >= *date_filter {
                    debug!(recorded = %month, "Date already processed");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn update(&self, date_filter: &ReportMonth, marker_key: &str) -> Result<()> {
        self.update_at(date_filter, marker_key, Utc::now().naive_utc())
            .await
    }
}
