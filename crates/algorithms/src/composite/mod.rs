//! Temporal compositing
//!
//! Reduces a time series of co-registered grids to one representative grid
//! per pixel. The default median is robust to residual clouds and shadows
//! that survive in individual scenes.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use crate::maybe_rayon::*;
use landpulse_core::raster::{Raster, RasterElement};
use landpulse_core::{Algorithm, Error, Result};

/// Per-pixel reducer for a stack of observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeStatistic {
    #[default]
    Median,
    Mean,
    Min,
    Max,
}

impl CompositeStatistic {
    /// Reduce the valid samples of one pixel, NaN when there are none
    fn reduce(&self, values: &mut [f64]) -> f64 {
        if values.is_empty() {
            return f64::NAN;
        }
        match self {
            CompositeStatistic::Median => {
                values.sort_unstable_by(f64::total_cmp);
                let mid = values.len() / 2;
                if values.len() % 2 == 0 {
                    (values[mid - 1] + values[mid]) / 2.0
                } else {
                    values[mid]
                }
            }
            CompositeStatistic::Mean => values.iter().sum::<f64>() / values.len() as f64,
            CompositeStatistic::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            CompositeStatistic::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

impl std::str::FromStr for CompositeStatistic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "median" => Ok(CompositeStatistic::Median),
            "mean" => Ok(CompositeStatistic::Mean),
            "min" => Ok(CompositeStatistic::Min),
            "max" => Ok(CompositeStatistic::Max),
            other => Err(Error::InvalidParameter {
                name: "statistic",
                value: other.to_string(),
                reason: "expected median, mean, min or max".into(),
            }),
        }
    }
}

/// Parameters for temporal compositing
#[derive(Debug, Clone, Default)]
pub struct CompositeParams {
    pub statistic: CompositeStatistic,
}

/// Temporal compositor
#[derive(Debug, Clone, Default)]
pub struct Compositor;

impl Algorithm for Compositor {
    type Input = Vec<Raster<f64>>;
    type Output = Raster<f64>;
    type Params = CompositeParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Composite"
    }

    fn description(&self) -> &'static str {
        "Per-pixel temporal composite ignoring no-data observations"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        composite(&input, params.statistic)
    }
}

/// Composite aligned grids into one.
///
/// No-data samples are ignored per pixel; a pixel with no valid sample is
/// NaN. The output keeps the first grid's CRS and transform.
///
/// # Errors
/// - [`Error::EmptyInput`] for an empty slice
/// - [`Error::GridMismatch`] with the index of the first grid that is not
///   aligned with the first one
pub fn composite(grids: &[Raster<f64>], statistic: CompositeStatistic) -> Result<Raster<f64>> {
    composite_with_count(grids, statistic).map(|(grid, _)| grid)
}

/// [`composite`] that also returns the number of valid observations per pixel
pub fn composite_with_count(
    grids: &[Raster<f64>],
    statistic: CompositeStatistic,
) -> Result<(Raster<f64>, Raster<u16>)> {
    let first = grids
        .first()
        .ok_or_else(|| Error::EmptyInput("no grids to composite".into()))?;

    for (i, grid) in grids.iter().enumerate().skip(1) {
        if let Err(Error::GridMismatch { reason, .. }) = first.ensure_aligned(grid) {
            return Err(Error::GridMismatch {
                index: Some(i),
                reason,
            });
        }
    }

    let (rows, cols) = first.shape();
    let n = grids.len();

    let (values, counts): (Vec<f64>, Vec<u16>) = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut samples = Vec::with_capacity(n);
            let mut out = Vec::with_capacity(cols);
            for col in 0..cols {
                samples.clear();
                for grid in grids {
                    let v = unsafe { grid.get_unchecked(row, col) };
                    if !v.is_nodata(grid.nodata()) {
                        samples.push(v);
                    }
                }
                let count = samples.len().min(u16::MAX as usize) as u16;
                out.push((statistic.reduce(&mut samples), count));
            }
            out
        })
        .unzip();

    let mut output = first.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() = Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| Error::Other(e.to_string()))?;

    let mut count_grid = first.with_same_meta::<u16>(rows, cols);
    *count_grid.data_mut() = Array2::from_shape_vec((rows, cols), counts)
        .map_err(|e| Error::Other(e.to_string()))?;

    Ok((output, count_grid))
}
