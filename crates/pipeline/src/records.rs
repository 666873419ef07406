//! Catalog records: periods, scenes, composites and change features

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use geo_types::{MultiPolygon, Polygon};
use landpulse_algorithms::change::ChangeClass;
use landpulse_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Half-open date range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    /// # Errors
    /// [`Error::InvalidParameter`] unless `start < end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidParameter {
                name: "period",
                value: format!("{}..{}", start, end),
                reason: "start must be before end".into(),
            });
        }
        Ok(Self { start, end })
    }

    /// The calendar month `year-month`
    pub fn month(year: i32, month: u32) -> Result<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| Error::InvalidParameter {
            name: "month",
            value: format!("{}-{}", year, month),
            reason: "not a calendar month".into(),
        })?;
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let end = NaiveDate::from_ymd_opt(next_year, next_month, 1).ok_or_else(|| Error::InvalidParameter {
            name: "month",
            value: format!("{}-{}", year, month),
            reason: "month end out of range".into(),
        })?;
        Ok(Self { start, end })
    }

    /// Calendar month before the month in which this period starts
    pub fn previous_month(&self) -> Result<Self> {
        let (year, month) = (self.start.year(), self.start.month());
        if month == 1 {
            Self::month(year - 1, 12)
        } else {
            Self::month(year, month - 1)
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    pub fn is_calendar_month(&self) -> bool {
        self.start.day() == 1
            && Self::month(self.start.year(), self.start.month()).is_ok_and(|m| m.end == self.end)
    }

    /// Stable label used in output paths: `2023-01` for calendar months,
    /// `2023-01-05_2023-02-10` otherwise
    pub fn label(&self) -> String {
        if self.is_calendar_month() {
            self.start.format("%Y-%m").to_string()
        } else {
            format!("{}_{}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for Period {
    type Err = Error;

    /// Parse a label produced by [`Period::label`]
    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidParameter {
            name: "period",
            value: s.to_string(),
            reason: reason.to_string(),
        };

        if let Some((a, b)) = s.split_once('_') {
            let start = NaiveDate::parse_from_str(a, "%Y-%m-%d").map_err(|e| invalid(&e.to_string()))?;
            let end = NaiveDate::parse_from_str(b, "%Y-%m-%d").map_err(|e| invalid(&e.to_string()))?;
            return Period::new(start, end);
        }

        let (y, m) = s
            .split_once('-')
            .ok_or_else(|| invalid("expected YYYY-MM or YYYY-MM-DD_YYYY-MM-DD"))?;
        let year: i32 = y.parse().map_err(|_| invalid("bad year"))?;
        let month: u32 = m.parse().map_err(|_| invalid("bad month"))?;
        Period::month(year, month)
    }
}

/// One acquired scene, as delivered by the ingest collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    /// Catalog id (e.g. the STAC item id)
    pub id: String,
    pub sensor: String,
    pub acquired: NaiveDate,
    /// Cloud cover in [0, 1]
    pub cloud_cover: f64,
    /// Footprint in WGS84
    #[serde(default)]
    pub footprint: Option<Polygon<f64>>,
    /// Band name to GeoTIFF path
    pub bands: BTreeMap<String, PathBuf>,
}

impl SceneRecord {
    pub fn band_path(&self, band: &str) -> Option<&PathBuf> {
        self.bands.get(band)
    }
}

/// A band composite built for one (sensor, period)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRecord {
    pub sensor: String,
    pub period: Period,
    pub band: String,
    pub path: PathBuf,
    /// Union of the contributing scene footprints (WGS84)
    #[serde(default)]
    pub footprint: Option<MultiPolygon<f64>>,
    pub scene_count: usize,
    pub created_at: DateTime<Utc>,
}

impl CompositeRecord {
    /// Natural key: (sensor, period start, period end, band)
    pub fn key(&self) -> (&str, NaiveDate, NaiveDate, &str) {
        (&self.sensor, self.period.start, self.period.end, &self.band)
    }
}

/// One change detection run: a sensor compared across two periods
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeRun {
    pub sensor: String,
    pub baseline: Period,
    pub target: Period,
}

impl ChangeRun {
    /// Directory label `{baseline}_{target}`
    pub fn label(&self) -> String {
        format!("{}_{}", self.baseline.label(), self.target.label())
    }
}

/// A change polygon with its attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeFeature {
    pub polygon: Polygon<f64>,
    pub class: ChangeClass,
    /// Index composite identifiers, `{sensor}/{period}/{index}`
    pub baseline: String,
    pub target: String,
    pub area_ha: f64,
    /// Mean model confidence over the polygon's pixels
    pub confidence: Option<f64>,
    pub pixel_count: usize,
}
