//! Crime Ingest Library
//!
//! Batch pipeline that pulls street-level crime records for an area,
//! reshapes them into a report table, stores the report as an object and
//! loads it into a warehouse table.
//!
//! # Components
//!
//! - **source**: request targets and the upstream HTTP client
//! - **transform**: projection, renaming, typing and cleanup of records
//! - **storage**: object storage (S3 or in-memory)
//! - **meta**: the freshness marker deciding whether to extract
//! - **warehouse**: create / truncate / bulk load of the report table
//! - **pipeline**: the orchestrator tying one run together
//!
//! # Example
//!
//! ```no_run
//! use crime_ingest::{bootstrap, config::AppConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load("configs/report1.yml")?;
//!     let outcome = bootstrap::build_orchestrator(&config)?.run_report().await?;
//!     println!("extracted: {}", outcome.extracted());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod bootstrap;
pub mod config;
pub mod meta;
pub mod pipeline;
pub mod source;
pub mod storage;
pub mod transform;
pub mod warehouse;

pub use pipeline::{PipelineOrchestrator, RunOutcome, RunState};
