//! Object storage
//!
//! [`ObjectStore`] is the narrow seam the pipeline writes through.
//! [`S3Storage`] is the S3 implementation (works against MinIO with a
//! custom endpoint and path-style addressing); [`MemoryStore`] keeps
//! objects in a map for tests and dry runs.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use chrono::{
    format::{Item, StrftimeItems},
    NaiveDate,
};
use crime_common::{EtlError, Result, Table};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::transform::ReportSchema;

pub mod config;
pub mod memory;

pub use config::StorageConfig;
pub use memory::MemoryStore;

/// Key-addressed blob storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`, replacing any existing object
    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<&str>) -> Result<UploadResult>;

    /// Fetch the object under `key`. A missing key is `NotFound`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Keys starting with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub key: String,
    pub checksum: String,
    pub size: i64,
}

/// Serialization format of stored report objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Csv,
}

impl FileFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            FileFormat::Csv => "text/csv",
        }
    }

    pub fn encode(self, table: &Table) -> Result<Vec<u8>> {
        match self {
            FileFormat::Csv => table.to_csv(),
        }
    }

    pub fn decode(self, data: &[u8]) -> Result<Table> {
        match self {
            FileFormat::Csv => Table::from_csv(data),
        }
    }
}

/// Encode `table` and store it under `key`
pub async fn write_table(
    store: &dyn ObjectStore,
    table: &Table,
    key: &str,
    format: FileFormat,
) -> Result<UploadResult> {
    let data = format.encode(table)?;
    let result = store.put(key, data, Some(format.content_type())).await?;
    info!(
        key = %result.key,
        rows = table.len(),
        size = result.size,
        "Report table written"
    );
    Ok(result)
}

/// Read back a table stored with [`write_table`], restoring the column
/// types `schema` declares
pub async fn read_table(
    store: &dyn ObjectStore,
    key: &str,
    format: FileFormat,
    schema: &ReportSchema,
) -> Result<Table> {
    let data = store.get(key).await?;
    schema.retype(format.decode(&data)?)
}

/// Builds `<prefix><today formatted by date_format><suffix>` object keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetKey {
    prefix: String,
    date_format: String,
    suffix: String,
}

impl TargetKey {
    /// Rejects date formats chrono cannot render
    pub fn new(
        prefix: impl Into<String>,
        date_format: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Result<Self> {
        let date_format = date_format.into();
        if StrftimeItems::new(&date_format).any(|item| matches!(item, Item::Error)) {
            return Err(EtlError::config(format!(
                "invalid key date format '{}'",
                date_format
            )));
        }
        Ok(Self {
            prefix: prefix.into(),
            date_format,
            suffix: suffix.into(),
        })
    }

    pub fn build(&self, today: NaiveDate) -> String {
        format!(
            "{}{}{}",
            self.prefix,
            today.format(&self.date_format),
            self.suffix
        )
    }
}

/// S3-backed [`ObjectStore`]
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(config: StorageConfig) -> Result<Self> {
        debug!(
            bucket = %config.bucket,
            endpoint = ?config.endpoint,
            "Initializing storage"
        );

        let (access_key, secret_key) = config.credentials()?;
        let credentials = Credentials::new(access_key, secret_key, None, None, "crime-etl-storage");

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Storage client initialized for bucket: {}", config.bucket);

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    #[instrument(skip(self, data))]
    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<&str>) -> Result<UploadResult> {
        let checksum = calculate_sha256(&data);
        let size = data.len() as i64;

        debug!("Uploading {} bytes to s3://{}/{}", size, self.bucket, key);

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        request.send().await.map_err(|e| {
            EtlError::storage(format!(
                "failed to upload s3://{}/{}: {}",
                self.bucket,
                key,
                DisplayErrorContext(&e)
            ))
        })?;

        info!("Successfully uploaded to s3://{}/{}", self.bucket, key);

        Ok(UploadResult {
            key: key.to_string(),
            checksum,
            size,
        })
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        debug!("Downloading from s3://{}/{}", self.bucket, key);

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    return Err(EtlError::not_found(format!(
                        "s3://{}/{}",
                        self.bucket, key
                    )));
                }
                return Err(EtlError::storage(format!(
                    "failed to download s3://{}/{}: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                )));
            },
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| EtlError::storage(format!("failed to read S3 response body: {}", e)))?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, key);

        Ok(data)
    }

    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        debug!("Listing objects in s3://{}/{}", self.bucket, prefix);

        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    EtlError::storage(format!(
                        "failed to list s3://{}/{}: {}",
                        self.bucket,
                        prefix,
                        DisplayErrorContext(&e)
                    ))
                })?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(|k| k.to_string())),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                },
                _ => break,
            }
        }

        Ok(keys)
    }
}

pub(crate) fn calculate_sha256(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{ColumnKind, ColumnSpec, Transformer};
    use crime_common::Value;

    fn report_schema() -> ReportSchema {
        ReportSchema::new(vec![
            ColumnSpec::new("category", "category", ColumnKind::Text),
            ColumnSpec::new("location.street.id", "street_id", ColumnKind::Integer),
            ColumnSpec::new("location.latitude", "latitude", ColumnKind::Float),
            ColumnSpec::new("month", "month", ColumnKind::Date),
        ])
    }

    #[test]
    fn test_target_key() {
        let key = TargetKey::new("crime/report1_", "%Y%m%d", ".csv").unwrap();
        let today = NaiveDate::from_ymd_opt(2023, 3, 9).unwrap();
        assert_eq!(key.build(today), "crime/report1_20230309.csv");
    }

    #[test]
    fn test_target_key_rejects_bad_format() {
        let err = TargetKey::new("crime/", "%Y%Q%", ".csv").unwrap_err();
        assert!(matches!(err, EtlError::Configuration(_)));
    }

    #[test]
    fn test_calculate_sha256() {
        let data = b"Hello, World!";
        let checksum = calculate_sha256(data);
        assert_eq!(
            checksum,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[tokio::test]
    async fn test_write_then_read_table() {
        let store = MemoryStore::new();
        let table = Table::new(
            vec!["street_id".into(), "category".into()],
            vec![
                vec![Value::Int(1), "burglary".into()],
                vec![Value::Int(2), "theft, from person".into()],
            ],
        )
        .unwrap();

        let upload = write_table(&store, &table, "crime/20230309.csv", FileFormat::Csv)
            .await
            .unwrap();
        assert_eq!(upload.key, "crime/20230309.csv");
        assert_eq!(store.content_type("crime/20230309.csv").as_deref(), Some("text/csv"));

        let back = read_table(&store, "crime/20230309.csv", FileFormat::Csv, &report_schema())
            .await
            .unwrap();
        assert_eq!(back, table);
        assert_eq!(back.column("category").unwrap()[1], &Value::from("theft, from person"));
    }

    #[tokio::test]
    async fn test_transformed_report_survives_storage() {
        let store = MemoryStore::new();
        let raw = Table::new(
            vec![
                "category".into(),
                "location.latitude".into(),
                "location.street.id".into(),
                "month".into(),
            ],
            vec![
                vec!["burglary".into(), "51.5".into(), Value::Int(883345), "2023-01".into()],
                vec!["drugs".into(), "51.25".into(), Value::Int(883346), "2023-01".into()],
            ],
        )
        .unwrap();
        let report = Transformer::new(report_schema()).apply(&raw).unwrap();
        assert_eq!(report.column("street_id").unwrap()[0], &Value::Int(883345));

        write_table(&store, &report, "crime/report.csv", FileFormat::Csv)
            .await
            .unwrap();
        let back = read_table(&store, "crime/report.csv", FileFormat::Csv, &report_schema())
            .await
            .unwrap();

        assert!(back.equals_ignoring_column_order(&report));
        assert_eq!(back.column("latitude").unwrap()[0], &Value::Float(51.5));
        assert_eq!(
            back.column("month").unwrap()[1],
            &Value::Date(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap())
        );
    }

    #[tokio::test]
    async fn test_read_rejects_values_that_do_not_fit_schema() {
        let store = MemoryStore::new();
        store
            .put("crime/bad.csv", b"street_id
not-a-number
".to_vec(), None)
            .await
            .unwrap();
        let err = read_table(&store, "crime/bad.csv", FileFormat::Csv, &report_schema())
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Data(_)));
    }

    #[tokio::test]
    async fn test_read_missing_key_is_not_found() {
        let store = MemoryStore::new();
        let err = read_table(&store, "nope.csv", FileFormat::Csv, &report_schema())
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::NotFound(_)));
    }
}
