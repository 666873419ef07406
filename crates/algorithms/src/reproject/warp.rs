//! Inverse-mapping warp with bilinear resampling

use ndarray::Array2;
use crate::maybe_rayon::*;
use landpulse_core::crs::Transformer;
use landpulse_core::raster::{GridSpec, Raster, RasterElement, RasterStack};
use landpulse_core::{Error, Result};

/// Warp `grid` onto the target grid `spec`.
///
/// Each target pixel centre is transformed into the source CRS and sampled
/// bilinearly between the four surrounding source pixel centres. No-data
/// neighbours are dropped and the remaining weights renormalised. A target
/// centre outside the source extent is no-data.
///
/// # Errors
/// [`Error::Geometry`] when either grid lacks a CRS or a CRS is unsupported.
pub fn reproject_to_grid(grid: &Raster<f64>, spec: &GridSpec) -> Result<Raster<f64>> {
    let source_crs = grid
        .crs()
        .ok_or_else(|| Error::Geometry("source grid has no CRS".into()))?;
    let target_crs = spec
        .crs
        .as_ref()
        .ok_or_else(|| Error::Geometry("target grid has no CRS".into()))?;

    // Target -> source, applied to every output pixel centre
    let to_source = Transformer::new(target_crs, source_crs)?;
    let fill = grid.nodata().unwrap_or(f64::NAN);
    let (rows, cols) = spec.shape();

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![fill; cols];
            for (col, out) in row_data.iter_mut().enumerate() {
                let (x, y) = spec.transform.pixel_to_geo(col, row);
                let (sx, sy) = to_source.transform(x, y);
                let (fc, fr) = grid.geo_to_pixel(sx, sy);
                if let Some(v) = sample_bilinear(grid, fc, fr) {
                    *out = v;
                }
            }
            row_data
        })
        .collect();

    let mut output = Raster::from_spec(spec, fill);
    output.set_nodata(Some(fill));
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}

/// Bilinear sample at fractional pixel coordinates (`col`, `row`), where
/// pixel `(c, r)` spans `[c, c+1) x [r, r+1)` and is centred at
/// `(c + 0.5, r + 0.5)`.
///
/// Returns `None` outside the raster extent or when every neighbour with
/// non-zero weight is no-data.
fn sample_bilinear(grid: &Raster<f64>, col: f64, row: f64) -> Option<f64> {
    let (rows, cols) = grid.shape();
    if !col.is_finite() || !row.is_finite() {
        return None;
    }
    if col < 0.0 || row < 0.0 || col > cols as f64 || row > rows as f64 {
        return None;
    }

    let u = col - 0.5;
    let v = row - 0.5;
    let c0 = u.floor();
    let r0 = v.floor();
    let wx = u - c0;
    let wy = v - r0;

    let clamp_c = |c: f64| (c.max(0.0) as usize).min(cols - 1);
    let clamp_r = |r: f64| (r.max(0.0) as usize).min(rows - 1);
    let (ca, cb) = (clamp_c(c0), clamp_c(c0 + 1.0));
    let (ra, rb) = (clamp_r(r0), clamp_r(r0 + 1.0));

    let nodata = grid.nodata();
    let mut sum = 0.0;
    let mut weight = 0.0;
    for (r, c, w) in [
        (ra, ca, (1.0 - wx) * (1.0 - wy)),
        (ra, cb, wx * (1.0 - wy)),
        (rb, ca, (1.0 - wx) * wy),
        (rb, cb, wx * wy),
    ] {
        if w <= 0.0 {
            continue;
        }
        let value = unsafe { grid.get_unchecked(r, c) };
        if value.is_nodata(nodata) {
            continue;
        }
        sum += value * w;
        weight += w;
    }

    if weight > 0.0 { Some(sum / weight) } else { None }
}

/// Warp every band of a stack onto `spec` (bands in parallel)
pub fn reproject_stack(stack: &RasterStack<f64>, spec: &GridSpec) -> Result<RasterStack<f64>> {
    let bands: Vec<Raster<f64>> = (0..stack.band_count())
        .into_par_iter()
        .map(|i| stack.band_raster(i).and_then(|band| reproject_to_grid(&band, spec)))
        .collect::<Result<Vec<_>>>()?;

    let refs: Vec<&Raster<f64>> = bands.iter().collect();
    RasterStack::from_bands(&refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use landpulse_core::raster::GeoTransform;
    use landpulse_core::CRS;

    fn make_grid() -> Raster<f64> {
        // 0 1
        // 2 3
        let mut r = Raster::from_vec(vec![0.0, 1.0, 2.0, 3.0], 2, 2).unwrap();
        r.set_transform(GeoTransform::north_up(0.0, 2.0, 1.0));
        r.set_crs(Some(CRS::web_mercator()));
        r
    }

    #[test]
    fn test_bilinear_between_centres() {
        let grid = make_grid();
        let v = sample_bilinear(&grid, 1.0, 1.0).unwrap();
        assert!((v - 1.5).abs() < 1e-12, "centre of 4 pixels should be 1.5, got {}", v);

        let v = sample_bilinear(&grid, 0.5, 0.5).unwrap();
        assert!((v - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_edges_clamp_and_outside_is_none() {
        let grid = make_grid();
        // Within the first half pixel the nearest centres are clamped
        let v = sample_bilinear(&grid, 0.1, 0.1).unwrap();
        assert!((v - 0.0).abs() < 1e-12);
        assert!(sample_bilinear(&grid, -0.01, 1.0).is_none());
        assert!(sample_bilinear(&grid, 1.0, 2.01).is_none());
    }

    #[test]
    fn test_nodata_neighbours_renormalised() {
        let mut grid = make_grid();
        grid.set(0, 0, f64::NAN).unwrap();
        let v = sample_bilinear(&grid, 1.0, 1.0).unwrap();
        assert!((v - 2.0).abs() < 1e-12, "mean of 1, 2, 3 expected, got {}", v);

        grid.set_nodata(Some(f64::NAN));
        grid.set(0, 1, f64::NAN).unwrap();
        grid.set(1, 0, f64::NAN).unwrap();
        grid.set(1, 1, f64::NAN).unwrap();
        assert!(sample_bilinear(&grid, 1.0, 1.0).is_none());
    }

    #[test]
    fn test_warp_onto_finer_grid() {
        let grid = make_grid();
        let spec = GridSpec::new(
            Some(CRS::web_mercator()),
            GeoTransform::north_up(-1.0, 3.0, 0.5),
            8,
            8,
        );
        let out = reproject_to_grid(&grid, &spec).unwrap();
        assert_eq!(out.shape(), (8, 8));
        // Top-left target pixels lie outside the 2x2 source extent
        assert!(out.get(0, 0).unwrap().is_nan());
        // Target pixel centred at (0.75, 1.25) -> source col 0.75, row 0.75
        let v = out.get(3, 3).unwrap();
        assert!((v - 0.75).abs() < 1e-12, "expected 0.75, got {}", v);
    }

    #[test]
    fn test_stack_bands_share_target_grid() {
        let a = make_grid();
        let b = make_grid();
        let stack = RasterStack::from_bands(&[&a, &b]).unwrap();
        let spec = a.grid_spec();
        let out = reproject_stack(&stack, &spec).unwrap();
        assert_eq!(out.dim(), (2, 2, 2));
        assert_eq!(out.band(1).unwrap()[(1, 1)], 3.0);
    }
}
