//! Configuration management
//!
//! A report is described by one YAML file. Any value can be overridden from
//! the environment with the `CRIME_ETL__` prefix, using `__` between nested
//! keys, e.g. `CRIME_ETL__WAREHOUSE__URL` or `CRIME_ETL__SOURCE__DATE`.
//! A `.env` file is loaded first when present.

use crime_common::logging::{LogConfig, LogLevel};
use crime_common::{EtlError, ReportMonth, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::source::SourceSettings;
use crate::storage::{FileFormat, StorageConfig, TargetKey};
use crate::transform::ReportSchema;
use crate::warehouse::WarehouseConfig;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "configs/report1.yml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "CRIME_ETL";

/// Default upstream request timeout in seconds.
pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 30;

/// Default date pattern embedded in target object keys.
pub const DEFAULT_KEY_DATE_FORMAT: &str = "%Y%m%d";

/// Default target object key suffix.
pub const DEFAULT_KEY_SUFFIX: &str = ".csv";

fn default_timeout_secs() -> u64 {
    DEFAULT_SOURCE_TIMEOUT_SECS
}

fn default_key_date_format() -> String {
    DEFAULT_KEY_DATE_FORMAT.to_string()
}

fn default_key_suffix() -> String {
    DEFAULT_KEY_SUFFIX.to_string()
}

/// Full report configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub schema: ReportSchema,
    pub target: TargetConfig,
    pub warehouse: WarehouseConfig,
    pub storage: StorageConfig,
    pub meta: MetaConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

/// Upstream source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    /// CSV file with `lat,long` columns
    pub coordinates_path: PathBuf,
    /// Report month requested from the upstream
    pub date: ReportMonth,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Where and how the report object is written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub key_prefix: String,
    #[serde(default = "default_key_date_format")]
    pub key_date_format: String,
    #[serde(default = "default_key_suffix")]
    pub key_suffix: String,
    #[serde(default)]
    pub format: FileFormat,
}

/// Freshness marker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub marker_key: String,
}

impl AppConfig {
    /// Load `path`, apply `.env` and environment overrides, then validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        if !path.exists() {
            return Err(EtlError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let file = ::config::File::from(path).format(::config::FileFormat::Yaml);
        Self::assemble(file, ENV_PREFIX)
    }

    /// Parse YAML text, with overrides taken from `env_prefix`
    pub fn from_yaml_str(yaml: &str, env_prefix: &str) -> Result<Self> {
        let file = ::config::File::from_str(yaml, ::config::FileFormat::Yaml);
        Self::assemble(file, env_prefix)
    }

    fn assemble<S>(file: S, env_prefix: &str) -> Result<Self>
    where
        S: ::config::Source + Send + Sync + 'static,
    {
        let config: AppConfig = ::config::Config::builder()
            .add_source(file)
            .add_source(
                ::config::Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| EtlError::config(format!("failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.source.base_url.trim().is_empty() {
            return Err(EtlError::config("source.base_url is empty"));
        }
        if self.source.timeout_secs == 0 {
            return Err(EtlError::config("source.timeout_secs must be greater than 0"));
        }

        self.schema.validate()?;
        self.target_key()?;
        self.warehouse.validate()?;
        self.storage.validate()?;

        if self.meta.marker_key.trim().is_empty() {
            return Err(EtlError::config("meta.marker_key is empty"));
        }

        Ok(())
    }

    pub fn target_key(&self) -> Result<TargetKey> {
        TargetKey::new(
            self.target.key_prefix.clone(),
            self.target.key_date_format.clone(),
            self.target.key_suffix.clone(),
        )
    }

    /// Logging settings with `LOG_*` overrides applied; `verbose` wins over both
    pub fn log_config(&self, verbose: bool) -> Result<LogConfig> {
        let mut log_config = self
            .logging
            .clone()
            .with_env_overrides()
            .map_err(|e| EtlError::config(format!("invalid logging override: {:#}", e)))?;
        if verbose {
            log_config.level = LogLevel::Debug;
        }
        Ok(log_config)
    }

    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            base_url: self.source.base_url.clone(),
            timeout: Duration::from_secs(self.source.timeout_secs),
        }
    }
}
