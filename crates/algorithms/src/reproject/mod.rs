//! Grid transform engine: reprojection and resampling
//!
//! Warps rasters between the CRSs supported by [`landpulse_core::crs`]:
//!
//! 1. [`transform_bounds`] maps the source extent into the target CRS,
//!    sampling 21 points along every edge so curved edges are covered
//! 2. [`plan_grid`] lays a north-up grid over that extent at the requested
//!    resolution, optionally snapped to resolution multiples
//! 3. [`reproject_to_grid`] inverse-maps every target pixel centre into the
//!    source and samples it bilinearly
//!
//! All steps are deterministic; rows are warped in parallel and collected
//! in order.

mod warp;

pub use warp::{reproject_stack, reproject_to_grid};

use landpulse_core::crs::{Transformer, CRS};
use landpulse_core::raster::{GeoTransform, GridSpec, Raster};
use landpulse_core::{Algorithm, Error, Result};

/// Bounding box `(min_x, min_y, max_x, max_y)`
pub type Bounds = (f64, f64, f64, f64);

/// Samples per bounding-box edge, corners included
pub const EDGE_SAMPLES: usize = 21;

/// Relative slack when turning an extent into a pixel count
const EXTENT_EPSILON: f64 = 1e-9;

/// Parameters for [`Reproject`]
#[derive(Debug, Clone)]
pub struct ReprojectParams {
    pub target_crs: CRS,
    pub resolution: f64,
}

impl Default for ReprojectParams {
    fn default() -> Self {
        Self {
            target_crs: CRS::web_mercator(),
            resolution: 10.0,
        }
    }
}

/// Reprojection algorithm
#[derive(Debug, Clone, Default)]
pub struct Reproject;

impl Algorithm for Reproject {
    type Input = Raster<f64>;
    type Output = Raster<f64>;
    type Params = ReprojectParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Reproject"
    }

    fn description(&self) -> &'static str {
        "Warp a raster into another CRS with bilinear resampling"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        reproject(&input, &params.target_crs, params.resolution)
    }
}

/// Transform a bounding box between CRSs.
///
/// Every edge is sampled at [`EDGE_SAMPLES`] points and the envelope of
/// the transformed samples is returned.
pub fn transform_bounds(bounds: Bounds, from: &CRS, to: &CRS) -> Result<Bounds> {
    let transformer = Transformer::new(from, to)?;
    if transformer.is_identity() {
        return Ok(bounds);
    }

    let (min_x, min_y, max_x, max_y) = bounds;
    let mut out = (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    let steps = (EDGE_SAMPLES - 1) as f64;

    for i in 0..EDGE_SAMPLES {
        let t = i as f64 / steps;
        let x = min_x + (max_x - min_x) * t;
        let y = min_y + (max_y - min_y) * t;
        for (px, py) in [(x, min_y), (x, max_y), (min_x, y), (max_x, y)] {
            let (tx, ty) = transformer.transform(px, py);
            if !tx.is_finite() || !ty.is_finite() {
                continue;
            }
            out.0 = out.0.min(tx);
            out.1 = out.1.min(ty);
            out.2 = out.2.max(tx);
            out.3 = out.3.max(ty);
        }
    }

    if !out.0.is_finite() || !out.1.is_finite() {
        return Err(Error::Geometry(format!(
            "bounds {:?} have no valid image in {}",
            bounds, to
        )));
    }
    Ok(out)
}

/// Lay a north-up grid with square pixels over `bounds`.
///
/// The origin is `(min_x, max_y)`. With `align` the extent first grows
/// outward to multiples of `resolution` (target-aligned pixels), so grids
/// planned independently in the same CRS share one lattice.
///
/// # Errors
/// [`Error::Geometry`] when `resolution` is not a positive finite number or
/// the bounds are not finite.
pub fn plan_grid(bounds: Bounds, crs: &CRS, resolution: f64, align: bool) -> Result<GridSpec> {
    check_resolution(resolution)?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = bounds;
    if ![min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite()) || max_x < min_x || max_y < min_y {
        return Err(Error::Geometry(format!("invalid bounds {:?}", bounds)));
    }

    if align {
        min_x = (min_x / resolution + EXTENT_EPSILON).floor() * resolution;
        min_y = (min_y / resolution + EXTENT_EPSILON).floor() * resolution;
        max_x = (max_x / resolution - EXTENT_EPSILON).ceil() * resolution;
        max_y = (max_y / resolution - EXTENT_EPSILON).ceil() * resolution;
    }

    let cols = pixel_count(max_x - min_x, resolution);
    let rows = pixel_count(max_y - min_y, resolution);

    Ok(GridSpec::new(
        Some(crs.clone()),
        GeoTransform::north_up(min_x, max_y, resolution),
        rows,
        cols,
    ))
}

/// Minimal number of pixels covering `extent`, at least one
fn pixel_count(extent: f64, resolution: f64) -> usize {
    ((extent / resolution - EXTENT_EPSILON).ceil() as usize).max(1)
}

fn check_resolution(resolution: f64) -> Result<()> {
    if !resolution.is_finite() || resolution <= 0.0 {
        return Err(Error::Geometry(format!(
            "target resolution must be positive and finite, got {}",
            resolution
        )));
    }
    Ok(())
}

/// Reproject a grid into `target_crs` at `resolution` (target CRS units).
///
/// The output covers the reprojected source extent and is resampled
/// bilinearly. Pixels outside the source, or whose neighbours are all
/// no-data, carry the source no-data value (NaN when the source has none).
///
/// # Errors
/// [`Error::Geometry`] when the source has no CRS, either CRS is
/// unsupported, or the resolution is not positive and finite.
pub fn reproject(grid: &Raster<f64>, target_crs: &CRS, resolution: f64) -> Result<Raster<f64>> {
    check_resolution(resolution)?;
    let source_crs = grid
        .crs()
        .ok_or_else(|| Error::Geometry("source grid has no CRS".into()))?;

    let bounds = transform_bounds(grid.bounds(), source_crs, target_crs)?;
    let spec = plan_grid(bounds, target_crs, resolution, false)?;
    reproject_to_grid(grid, &spec)
}
