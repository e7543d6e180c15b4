//! Upstream crime data source
//!
//! Builds request targets from the configured coordinates and fetches
//! street-level crime records in a single POST per target.
//!
//! Two target strategies exist:
//!
//! - [`TargetStrategy::Polygon`] joins every coordinate into one
//!   `poly=<lat>,<lng>:<lat>,<lng>...` parameter. This is what the
//!   orchestrator uses.
//! - [`TargetStrategy::PerPoint`] emits one `lat=..&lng=..` target per
//!   coordinate, for point lookups.

pub mod flatten;

use crime_common::{CoordinateSet, EtlError, ReportMonth, Result, Table};
use std::time::Duration;
use tracing::{debug, info, instrument};

pub use flatten::flatten_records;

/// How coordinates are turned into request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetStrategy {
    /// One target covering the polygon spanned by all coordinates
    #[default]
    Polygon,
    /// One target per coordinate
    PerPoint,
}

/// A fully assembled request URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestTarget(String);

impl RequestTarget {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Settings for [`SourceClient`]
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub base_url: String,
    pub timeout: Duration,
}

/// HTTP client for the upstream crime API
#[derive(Clone)]
pub struct SourceClient {
    base_url: String,
    http: reqwest::Client,
}

impl SourceClient {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        if settings.base_url.trim().is_empty() {
            return Err(EtlError::config("source base_url is empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| EtlError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: settings.base_url,
            http,
        })
    }

    /// Build the request targets for `coordinates`.
    ///
    /// Polygon mode always yields exactly one target and needs a date.
    /// Fewer than three points is accepted; the caller decides whether
    /// such a polygon makes sense.
    pub fn build_targets(
        &self,
        strategy: TargetStrategy,
        coordinates: &CoordinateSet,
        date: Option<&ReportMonth>,
    ) -> Result<Vec<RequestTarget>> {
        if coordinates.is_empty() {
            return Err(EtlError::config("coordinate set is empty"));
        }

        match strategy {
            TargetStrategy::PerPoint => Ok(coordinates
                .points()
                .iter()
                .map(|point| {
                    let mut query = format!("lat={}&lng={}", point.lat, point.long);
                    if let Some(date) = date {
                        query.push_str(&format!("&date={}", date));
                    }
                    self.target(&query)
                })
                .collect()),
            TargetStrategy::Polygon => {
                let date = date.ok_or_else(|| {
                    EtlError::config("polygon targets require a date filter")
                })?;
                let poly = coordinates
                    .points()
                    .iter()
                    .map(|point| format!("{},{}", point.lat, point.long))
                    .collect::<Vec<_>>()
                    .join(":");
                Ok(vec![self.target(&format!("poly={}&date={}", poly, date))])
            },
        }
    }

    fn target(&self, query: &str) -> RequestTarget {
        let base = self.base_url.trim_end_matches(['?', '&']);
        let joiner = if base.contains('?') { '&' } else { '?' };
        RequestTarget(format!("{}{}{}", base, joiner, query))
    }

    /// Issue one request and flatten the JSON array it returns.
    ///
    /// No retries. Any non-2xx status, transport failure, timeout, or
    /// payload that is not an array of objects is a network error.
    #[instrument(skip(self), fields(target = %target))]
    pub async fn fetch(&self, target: &RequestTarget) -> Result<Table> {
        debug!("Requesting crime records");

        let response = self
            .http
            .post(target.as_str())
            .send()
            .await
            .map_err(|e| EtlError::network(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EtlError::network(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(EtlError::network(format!(
                "upstream returned HTTP {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            )));
        }

        let payload: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| EtlError::network(format!("malformed JSON payload: {}", e)))?;

        let table = flatten_records(&payload)?;
        info!(
            rows = table.len(),
            columns = table.columns().len(),
            "Fetched crime records"
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crime_common::Coordinate;

    fn client(base: &str) -> SourceClient {
        SourceClient::new(SourceSettings {
            base_url: base.to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn london() -> CoordinateSet {
        CoordinateSet::new(vec![
            Coordinate::new(51.5, -0.1),
            Coordinate::new(51.6, -0.2),
        ])
        .unwrap()
    }

    #[test]
    fn test_polygon_target() {
        let month: ReportMonth = "2023-01".parse().unwrap();
        let targets = client("https://data.police.uk/api/crimes-street/all-crime")
            .build_targets(TargetStrategy::Polygon, &london(), Some(&month))
            .unwrap();

        assert_eq!(
            targets,
            vec![RequestTarget(
                "https://data.police.uk/api/crimes-street/all-crime?poly=51.5,-0.1:51.6,-0.2&date=2023-01"
                    .to_string()
            )]
        );
    }

    #[test]
    fn test_polygon_target_is_stable_across_calls() {
        let month: ReportMonth = "2023-01".parse().unwrap();
        let source = client("https://example.test/crimes");
        let first = source
            .build_targets(TargetStrategy::Polygon, &london(), Some(&month))
            .unwrap();
        for _ in 0..5 {
            let again = source
                .build_targets(TargetStrategy::Polygon, &london(), Some(&month))
                .unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_per_point_targets() {
        let source = client("https://example.test/crimes?");
        let targets = source
            .build_targets(TargetStrategy::PerPoint, &london(), None)
            .unwrap();
        assert_eq!(
            targets
                .iter()
                .map(RequestTarget::as_str)
                .collect::<Vec<_>>(),
            vec![
                "https://example.test/crimes?lat=51.5&lng=-0.1",
                "https://example.test/crimes?lat=51.6&lng=-0.2",
            ]
        );

        let month: ReportMonth = "2023-02".parse().unwrap();
        let dated = source
            .build_targets(TargetStrategy::PerPoint, &london(), Some(&month))
            .unwrap();
        assert!(dated[0].as_str().ends_with("&date=2023-02"));
    }

    #[test]
    fn test_existing_query_string_is_extended() {
        let month: ReportMonth = "2023-01".parse().unwrap();
        let targets = client("https://example.test/crimes?force=met")
            .build_targets(TargetStrategy::Polygon, &london(), Some(&month))
            .unwrap();
        assert!(targets[0].as_str().starts_with("https://example.test/crimes?force=met&poly="));
    }

    #[test]
    fn test_empty_coordinates_rejected() {
        let err = client("https://example.test/crimes")
            .build_targets(TargetStrategy::PerPoint, &CoordinateSet::default(), None)
            .unwrap_err();
        assert!(matches!(err, EtlError::Configuration(_)));
    }

    #[test]
    fn test_polygon_requires_date() {
        let err = client("https://example.test/crimes")
            .build_targets(TargetStrategy::Polygon, &london(), None)
            .unwrap_err();
        assert!(matches!(err, EtlError::Configuration(_)));
    }

    #[test]
    fn test_single_point_polygon_not_rejected() {
        let month: ReportMonth = "2023-01".parse().unwrap();
        let one = CoordinateSet::new(vec![Coordinate::new(51.5, -0.1)]).unwrap();
        let targets = client("https://example.test/crimes")
            .build_targets(TargetStrategy::Polygon, &one, Some(&month))
            .unwrap();
        assert_eq!(targets.len(), 1);
    }
}
