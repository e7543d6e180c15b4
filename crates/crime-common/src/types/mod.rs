//! Common types used across the pipeline

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EtlError, Result};

/// A single (latitude, longitude) point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    #[serde(alias = "lng", alias = "lon")]
    pub long: f64,
}

impl Coordinate {
    pub fn new(lat: f64, long: f64) -> Self {
        Self { lat, long }
    }

    fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(EtlError::config(format!("latitude out of range: {}", self.lat)));
        }
        if !self.long.is_finite() || !(-180.0..=180.0).contains(&self.long) {
            return Err(EtlError::config(format!("longitude out of range: {}", self.long)));
        }
        Ok(())
    }
}

/// Ordered set of points describing the area of interest.
///
/// Read once when the pipeline is constructed and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoordinateSet {
    points: Vec<Coordinate>,
}

impl CoordinateSet {
    pub fn new(points: Vec<Coordinate>) -> Result<Self> {
        for point in &points {
            point.validate()?;
        }
        Ok(Self { points })
    }

    /// Load points from a CSV file with `lat` and `long` headers
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path).map_err(|e| {
            EtlError::config(format!(
                "cannot read coordinates file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut points = Vec::new();
        for (line, record) in reader.deserialize::<Coordinate>().enumerate() {
            let point = record.map_err(|e| {
                EtlError::config(format!(
                    "invalid coordinate on row {} of {}: {}",
                    line + 1,
                    path.display(),
                    e
                ))
            })?;
            points.push(point);
        }

        Self::new(points)
    }

    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// A month-granular date filter (`YYYY-MM`), as used by the upstream API
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportMonth {
    first_day: NaiveDate,
}

impl ReportMonth {
    /// The month containing `date`
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            first_day: date.with_day(1).unwrap_or(date),
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }
}

impl std::str::FromStr for ReportMonth {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        NaiveDate::parse_from_str(&format!("{}-01", trimmed), "%Y-%m-%d")
            .ok()
            .filter(|_| trimmed.len() == 7)
            .map(|first_day| Self { first_day })
            .ok_or_else(|| {
                EtlError::config(format!("date filter must be YYYY-MM, got '{}'", s))
            })
    }
}

impl std::fmt::Display for ReportMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.first_day.format("%Y-%m"))
    }
}

impl Serialize for ReportMonth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReportMonth {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
