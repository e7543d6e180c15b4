//! Crime ETL Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the crime ETL workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the pipeline error taxonomy and result alias
//! - **Tables**: the rectangular record set that flows between stages
//! - **Types**: coordinates and the month-granular date filter
//! - **Logging**: tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use crime_common::{Result, Table, Value};
//!
//! fn one_row() -> Result<Table> {
//!     Table::new(vec!["street_id".into()], vec![vec![Value::Int(883345)]])
//! }
//! ```

pub mod error;
pub mod logging;
pub mod table;
pub mod types;

// Re-export commonly used types
pub use error::{EtlError, Result};
pub use table::{Table, Value};
pub use types::{Coordinate, CoordinateSet, ReportMonth};
