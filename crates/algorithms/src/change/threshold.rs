//! Threshold change classification on an index difference
//!
//! `d = after - before`; Loss when `d < -tau`, Gain when `d > tau`,
//! Stable otherwise.

use ndarray::Array2;
use crate::maybe_rayon::*;
use landpulse_core::raster::{Raster, RasterElement};
use landpulse_core::{Error, Result};

use super::{ChangeClass, ChangeClassifier, CLASS_NODATA};

/// Default magnitude of index change considered significant
pub const DEFAULT_CHANGE_THRESHOLD: f64 = 0.2;

/// Classifies change by thresholding `after - before`
#[derive(Debug, Clone, Copy)]
pub struct ThresholdClassifier {
    tau: f64,
}

impl ThresholdClassifier {
    /// # Errors
    /// [`Error::InvalidParameter`] unless `tau` is finite and non-negative.
    pub fn new(tau: f64) -> Result<Self> {
        if !tau.is_finite() || tau < 0.0 {
            return Err(Error::InvalidParameter {
                name: "tau",
                value: tau.to_string(),
                reason: "must be finite and >= 0".into(),
            });
        }
        Ok(Self { tau })
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    #[inline]
    fn class_of(&self, d: f64) -> ChangeClass {
        if d < -self.tau {
            ChangeClass::Loss
        } else if d > self.tau {
            ChangeClass::Gain
        } else {
            ChangeClass::Stable
        }
    }
}

impl Default for ThresholdClassifier {
    fn default() -> Self {
        Self {
            tau: DEFAULT_CHANGE_THRESHOLD,
        }
    }
}

impl ChangeClassifier for ThresholdClassifier {
    fn name(&self) -> &str {
        "threshold"
    }

    fn classify(&self, before: &Raster<f64>, after: &Raster<f64>) -> Result<Raster<u8>> {
        before.ensure_aligned(after)?;

        let (rows, cols) = before.shape();
        let nd_before = before.nodata();
        let nd_after = after.nodata();

        let data: Vec<u8> = (0..rows)
            .into_par_iter()
            .flat_map(|row| {
                let mut row_data = vec![CLASS_NODATA; cols];
                for (col, out) in row_data.iter_mut().enumerate() {
                    let b = unsafe { before.get_unchecked(row, col) };
                    let a = unsafe { after.get_unchecked(row, col) };
                    if b.is_nodata(nd_before) || a.is_nodata(nd_after) {
                        continue;
                    }
                    *out = self.class_of(a - b).code();
                }
                row_data
            })
            .collect();

        let mut output = before.with_same_meta::<u8>(rows, cols);
        output.set_nodata(Some(CLASS_NODATA));
        *output.data_mut() = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;
        Ok(output)
    }
}

/// Continuous `after - before` grid, NaN where either input is no-data
pub fn index_difference(before: &Raster<f64>, after: &Raster<f64>) -> Result<Raster<f64>> {
    before.ensure_aligned(after)?;

    let (rows, cols) = before.shape();
    let nd_before = before.nodata();
    let nd_after = after.nodata();

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for (col, out) in row_data.iter_mut().enumerate() {
                let b = unsafe { before.get_unchecked(row, col) };
                let a = unsafe { after.get_unchecked(row, col) };
                if !b.is_nodata(nd_before) && !a.is_nodata(nd_after) {
                    *out = a - b;
                }
            }
            row_data
        })
        .collect();

    let mut output = before.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() = Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}
