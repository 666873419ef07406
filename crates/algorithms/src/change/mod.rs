//! Change classification between two index composites
//!
//! Classifiers turn a (before, after) pair of aligned index grids into a
//! single-band `u8` class grid using the fixed [`ChangeClass`] taxonomy.
//! Two strategies share the [`ChangeClassifier`] trait:
//!
//! - [`ThresholdClassifier`]: sign and magnitude of the index difference
//! - [`ModelClassifier`]: delegates to an external [`ChangeModel`]

mod model;
mod threshold;

pub use model::{ChangeModel, ModelClassifier, ModelOutput};
pub use threshold::{index_difference, ThresholdClassifier, DEFAULT_CHANGE_THRESHOLD};

use landpulse_core::raster::Raster;
use landpulse_core::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Class code for pixels without a valid observation in either input
pub const CLASS_NODATA: u8 = 255;

/// Land-cover change taxonomy shared by classifier, vectorizer and aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChangeClass {
    Stable = 0,
    Loss = 1,
    Gain = 2,
    Degradation = 3,
}

impl ChangeClass {
    pub const ALL: [ChangeClass; 4] = [
        ChangeClass::Stable,
        ChangeClass::Loss,
        ChangeClass::Gain,
        ChangeClass::Degradation,
    ];

    /// Numeric code stored in class grids
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a class grid value; `None` for no-data and unknown codes
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ChangeClass::Stable),
            1 => Some(ChangeClass::Loss),
            2 => Some(ChangeClass::Gain),
            3 => Some(ChangeClass::Degradation),
            _ => None,
        }
    }

    /// Default label
    pub fn name(self) -> &'static str {
        match self {
            ChangeClass::Stable => "Stable",
            ChangeClass::Loss => "Loss",
            ChangeClass::Gain => "Gain",
            ChangeClass::Degradation => "Degradation",
        }
    }
}

impl fmt::Display for ChangeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Class grid plus an optional per-pixel confidence in [0, 1]
#[derive(Debug, Clone)]
pub struct ChangeMap {
    pub classes: Raster<u8>,
    pub confidence: Option<Raster<f64>>,
}

/// A strategy that classifies change between two aligned index grids.
///
/// Implementations return a grid with exactly `before`'s geometry, `u8`
/// class codes from [`ChangeClass`] and [`CLASS_NODATA`] as no-data.
pub trait ChangeClassifier: Send + Sync {
    /// Short identifier for logs and reports
    fn name(&self) -> &str;

    /// Classify every pixel
    fn classify(&self, before: &Raster<f64>, after: &Raster<f64>) -> Result<Raster<u8>>;

    /// Classify and report per-pixel confidence when the strategy has one
    fn classify_scored(&self, before: &Raster<f64>, after: &Raster<f64>) -> Result<ChangeMap> {
        Ok(ChangeMap {
            classes: self.classify(before, after)?,
            confidence: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip() {
        for class in ChangeClass::ALL {
            assert_eq!(ChangeClass::from_code(class.code()), Some(class));
        }
        assert_eq!(ChangeClass::from_code(CLASS_NODATA), None);
        assert_eq!(ChangeClass::Gain.code(), 2);
        assert_eq!(ChangeClass::Degradation.to_string(), "Degradation");
    }
}
