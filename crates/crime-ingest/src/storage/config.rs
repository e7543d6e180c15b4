use crime_common::{EtlError, Result};
use serde::{Deserialize, Serialize};
use std::env;

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Custom endpoint, e.g. a MinIO server. `None` means AWS.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    pub bucket: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub path_style: bool,
}

impl StorageConfig {
    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: default_region(),
            bucket: bucket.into(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }

    pub fn for_aws(region: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: None,
            region: region.into(),
            bucket: bucket.into(),
            access_key: None,
            secret_key: None,
            path_style: false,
        }
    }

    /// Access and secret key, falling back to `AWS_ACCESS_KEY_ID` and
    /// `AWS_SECRET_ACCESS_KEY`.
    pub fn credentials(&self) -> Result<(String, String)> {
        let access_key = self
            .access_key
            .clone()
            .or_else(|| env::var("AWS_ACCESS_KEY_ID").ok())
            .ok_or_else(|| {
                EtlError::config("storage access key not configured (storage.access_key or AWS_ACCESS_KEY_ID)")
            })?;
        let secret_key = self
            .secret_key
            .clone()
            .or_else(|| env::var("AWS_SECRET_ACCESS_KEY").ok())
            .ok_or_else(|| {
                EtlError::config("storage secret key not configured (storage.secret_key or AWS_SECRET_ACCESS_KEY)")
            })?;
        Ok((access_key, secret_key))
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(EtlError::config("storage.bucket is empty"));
        }
        if self.region.trim().is_empty() {
            return Err(EtlError::config("storage.region is empty"));
        }
        Ok(())
    }
}
