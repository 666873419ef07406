//! Normalized-difference spectral indices
//!
//! Every index here is a two-band normalized difference computed pixel by
//! pixel on aligned grids. A pixel is no-data (NaN) when either input is.

use ndarray::Array2;
use crate::maybe_rayon::*;
use landpulse_core::raster::Raster;
use landpulse_core::{Error, Result};

/// Added to the denominator so that `a + b == 0` yields 0 instead of NaN
pub const NDI_EPSILON: f64 = 1e-10;

/// Supported spectral indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectralIndex {
    /// Normalized Difference Vegetation Index (red, nir)
    NDVI,
    /// Normalized Difference Water Index, McFeeters (nir, green)
    NDWI,
}

impl SpectralIndex {
    /// Band names in argument order `(a, b)` of [`normalized_difference`]
    pub fn bands(&self) -> (&'static str, &'static str) {
        match self {
            SpectralIndex::NDVI => ("red", "nir"),
            SpectralIndex::NDWI => ("nir", "green"),
        }
    }

    /// Lower-case name used for output files
    pub fn name(&self) -> &'static str {
        match self {
            SpectralIndex::NDVI => "ndvi",
            SpectralIndex::NDWI => "ndwi",
        }
    }
}

/// Compute the normalized difference between two aligned bands:
///
/// `(band_b - band_a) / (band_b + band_a + 1e-10)`
///
/// For non-negative reflectances the result lies in [-1, 1].
///
/// # Errors
/// [`Error::GridMismatch`] when the bands differ in CRS, transform or shape.
pub fn normalized_difference(band_a: &Raster<f64>, band_b: &Raster<f64>) -> Result<Raster<f64>> {
    band_a.ensure_aligned(band_b)?;

    let (rows, cols) = band_a.shape();
    let nodata_a = band_a.nodata();
    let nodata_b = band_b.nodata();

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            for (col, out) in row_data.iter_mut().enumerate() {
                let a = unsafe { band_a.get_unchecked(row, col) };
                let b = unsafe { band_b.get_unchecked(row, col) };

                if is_nodata_f64(a, nodata_a) || is_nodata_f64(b, nodata_b) {
                    continue;
                }

                *out = (b - a) / (b + a + NDI_EPSILON);
            }
            row_data
        })
        .collect();

    build_output(band_a, rows, cols, data)
}

/// Normalized Difference Vegetation Index
///
/// `NDVI = (NIR - Red) / (NIR + Red)`
///
/// Dense vegetation sits around 0.6 to 0.9, bare soil 0.1 to 0.2, water
/// below zero.
pub fn ndvi(red: &Raster<f64>, nir: &Raster<f64>) -> Result<Raster<f64>> {
    normalized_difference(red, nir)
}

/// Normalized Difference Water Index (McFeeters, 1996)
///
/// `NDWI = (Green - NIR) / (Green + NIR)`
///
/// Positive values indicate open water.
pub fn ndwi(nir: &Raster<f64>, green: &Raster<f64>) -> Result<Raster<f64>> {
    normalized_difference(nir, green)
}

/// Compute a named index from its two bands
pub fn spectral_index(index: SpectralIndex, a: &Raster<f64>, b: &Raster<f64>) -> Result<Raster<f64>> {
    match index {
        SpectralIndex::NDVI => ndvi(a, b),
        SpectralIndex::NDWI => ndwi(a, b),
    }
}

fn is_nodata_f64(value: f64, nodata: Option<f64>) -> bool {
    if value.is_nan() {
        return true;
    }
    match nodata {
        Some(nd) => (value - nd).abs() < f64::EPSILON,
        None => false,
    }
}

fn build_output(
    template: &Raster<f64>,
    rows: usize,
    cols: usize,
    data: Vec<f64>,
) -> Result<Raster<f64>> {
    let mut output = template.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use landpulse_core::{GeoTransform, CRS};

    fn make_band(rows: usize, cols: usize, value: f64) -> Raster<f64> {
        let mut r = Raster::filled(rows, cols, value);
        r.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        r
    }

    fn make_gradient(rows: usize, cols: usize, start: f64, step: f64) -> Raster<f64> {
        let mut r = Raster::new(rows, cols);
        r.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        for row in 0..rows {
            for col in 0..cols {
                r.set(row, col, start + (row * cols + col) as f64 * step)
                    .unwrap();
            }
        }
        r
    }

    #[test]
    fn test_ndvi_basic() {
        let red = make_band(5, 5, 0.1);
        let nir = make_band(5, 5, 0.5);

        let result = ndvi(&red, &nir).unwrap();
        let val = result.get(2, 2).unwrap();

        // (0.5 - 0.1) / (0.5 + 0.1) = 0.6667
        assert!((val - 0.4 / 0.6).abs() < 1e-8, "Expected 0.6667, got {}", val);
        assert!(result.nodata().is_some_and(|nd| nd.is_nan()));
    }

    #[test]
    fn test_range_for_non_negative_inputs() {
        let a = make_gradient(10, 10, 0.0, 0.01);
        let b = make_gradient(10, 10, 1.0, -0.01);

        let result = normalized_difference(&a, &b).unwrap();
        for &v in result.data().iter() {
            assert!((-1.0..=1.0).contains(&v), "Value {} outside [-1, 1]", v);
        }
    }

    #[test]
    fn test_zero_sum_is_zero_not_nan() {
        let a = make_band(3, 3, 0.0);
        let b = make_band(3, 3, 0.0);
        let result = normalized_difference(&a, &b).unwrap();
        assert_eq!(result.get(1, 1).unwrap(), 0.0);
    }

    #[test]
    fn test_nodata_propagates() {
        let mut red = make_band(3, 3, 0.1);
        let mut nir = make_band(3, 3, 0.4);
        red.set(0, 0, f64::NAN).unwrap();
        nir.set_nodata(Some(-9999.0));
        nir.set(2, 2, -9999.0).unwrap();

        let result = ndvi(&red, &nir).unwrap();
        assert!(result.get(0, 0).unwrap().is_nan());
        assert!(result.get(2, 2).unwrap().is_nan());
        assert!(result.get(1, 1).unwrap().is_finite());
    }

    #[test]
    fn test_misaligned_bands() {
        let red = make_band(4, 4, 0.1);
        let nir = make_band(4, 5, 0.4);
        assert!(matches!(ndvi(&red, &nir), Err(Error::GridMismatch { .. })));

        let mut shifted = make_band(4, 4, 0.4);
        shifted.set_crs(Some(CRS::web_mercator()));
        assert!(matches!(ndvi(&red, &shifted), Err(Error::GridMismatch { .. })));
    }

    #[test]
    fn test_ndwi_sign() {
        let nir = make_band(3, 3, 0.05);
        let green = make_band(3, 3, 0.2);
        let water = ndwi(&nir, &green).unwrap();
        assert!(water.get(1, 1).unwrap() > 0.0);
        assert_eq!(SpectralIndex::NDWI.bands(), ("nir", "green"));
    }
}
