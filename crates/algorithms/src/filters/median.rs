//! Square-window median filter
//!
//! Removes salt-and-pepper noise from index and composite grids while
//! keeping edges sharp. Windows that run past the grid border are filled by
//! mirror reflection without repeating the edge sample (`-1 -> 1`,
//! `n -> n - 2`), the same convention as `scipy.ndimage` "mirror" mode.

use ndarray::Array2;
use crate::maybe_rayon::*;
use landpulse_core::raster::{Raster, RasterElement};
use landpulse_core::{Algorithm, Error, Result};

/// Parameters for the median filter
#[derive(Debug, Clone)]
pub struct MedianParams {
    /// Side of the square window, odd and at least 1
    pub window_size: usize,
}

impl Default for MedianParams {
    fn default() -> Self {
        Self { window_size: 3 }
    }
}

/// Median filter algorithm
#[derive(Debug, Clone, Default)]
pub struct MedianFilter;

impl Algorithm for MedianFilter {
    type Input = Raster<f64>;
    type Output = Raster<f64>;
    type Params = MedianParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "MedianFilter"
    }

    fn description(&self) -> &'static str {
        "Square-window median filter with mirrored edges"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        median_filter(&input, params.window_size)
    }
}

/// Mirror an index into `0..n` without repeating the edge sample
#[inline]
fn reflect(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let m = i.rem_euclid(period);
    if m >= n as isize {
        (period - m) as usize
    } else {
        m as usize
    }
}

/// Apply a `window_size` x `window_size` median filter.
///
/// No-data samples inside a window are ignored; a no-data centre pixel
/// stays no-data. With an even number of valid samples the two middle
/// values are averaged. `window_size == 1` returns a copy.
///
/// # Errors
/// [`Error::InvalidParameter`] when `window_size` is zero or even.
pub fn median_filter(raster: &Raster<f64>, window_size: usize) -> Result<Raster<f64>> {
    if window_size == 0 || window_size % 2 == 0 {
        return Err(Error::InvalidParameter {
            name: "window_size",
            value: window_size.to_string(),
            reason: "must be odd and at least 1".into(),
        });
    }

    let (rows, cols) = raster.shape();
    let nodata = raster.nodata();
    let radius = (window_size / 2) as isize;

    let output_data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            let mut window = Vec::with_capacity(window_size * window_size);

            for (col, out) in row_data.iter_mut().enumerate() {
                let center = unsafe { raster.get_unchecked(row, col) };
                if center.is_nodata(nodata) {
                    *out = center;
                    continue;
                }

                window.clear();
                for dr in -radius..=radius {
                    let r = reflect(row as isize + dr, rows);
                    for dc in -radius..=radius {
                        let c = reflect(col as isize + dc, cols);
                        let v = unsafe { raster.get_unchecked(r, c) };
                        if !v.is_nodata(nodata) {
                            window.push(v);
                        }
                    }
                }

                *out = median_of(&mut window);
            }
            row_data
        })
        .collect();

    let mut output = raster.with_same_meta::<f64>(rows, cols);
    output.set_nodata(nodata);
    *output.data_mut() = Array2::from_shape_vec((rows, cols), output_data)
        .map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}

/// Median of a non-empty sample, averaging the middle pair for even counts
fn median_of(values: &mut [f64]) -> f64 {
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landpulse_core::GeoTransform;

    fn make_grid(data: Vec<f64>, rows: usize, cols: usize) -> Raster<f64> {
        let mut r = Raster::from_vec(data, rows, cols).unwrap();
        r.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        r.set_nodata(Some(f64::NAN));
        r
    }

    #[test]
    fn test_reflect_without_edge_repeat() {
        assert_eq!(reflect(-1, 5), 1);
        assert_eq!(reflect(-2, 5), 2);
        assert_eq!(reflect(5, 5), 3);
        assert_eq!(reflect(6, 5), 2);
        assert_eq!(reflect(-1, 1), 0);
        assert_eq!(reflect(3, 2), 1);
    }

    #[test]
    fn test_removes_salt_noise() {
        let mut data = vec![1.0; 25];
        data[12] = 100.0;
        let grid = make_grid(data, 5, 5);

        let result = median_filter(&grid, 3).unwrap();
        let v = result.get(2, 2).unwrap();
        assert!((v - 1.0).abs() < 1e-10, "Spike should be removed, got {}", v);
    }

    #[test]
    fn test_corner_uses_mirrored_neighbours() {
        // 0 1 2
        // 3 4 5
        // 6 7 8
        let grid = make_grid((0..9).map(|v| v as f64).collect(), 3, 3);
        let result = median_filter(&grid, 3).unwrap();

        // Window at (0,0) mirrors rows/cols -1 -> 1:
        // [4 3 4; 1 0 1; 4 3 4] -> sorted 0 1 1 3 3 4 4 4 4 -> median 3
        let v = result.get(0, 0).unwrap();
        assert!((v - 3.0).abs() < 1e-10, "Expected 3, got {}", v);
    }

    #[test]
    fn test_nodata_is_ignored_and_centre_kept() {
        let mut data = vec![2.0; 9];
        data[0] = f64::NAN;
        data[1] = 10.0;
        let grid = make_grid(data, 3, 3);

        let result = median_filter(&grid, 3).unwrap();
        assert!(result.get(0, 0).unwrap().is_nan(), "no-data centre must stay no-data");

        // Centre window has 8 valid samples: seven 2.0 and one 10.0
        let v = result.get(1, 1).unwrap();
        assert!((v - 2.0).abs() < 1e-10, "Expected 2, got {}", v);
    }

    #[test]
    fn test_even_count_averages_middle_pair() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert!((median_of(&mut values) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_window_one_is_identity() {
        let grid = make_grid((0..12).map(|v| v as f64 * 0.5).collect(), 3, 4);
        let result = median_filter(&grid, 1).unwrap();
        assert_eq!(result.data(), grid.data());
    }

    #[test]
    fn test_invalid_window() {
        let grid = make_grid(vec![1.0; 4], 2, 2);
        for size in [0, 2, 4] {
            assert!(matches!(
                median_filter(&grid, size),
                Err(Error::InvalidParameter { name: "window_size", .. })
            ));
        }
    }

    #[test]
    fn test_single_row_grid() {
        let grid = make_grid(vec![5.0, 1.0, 5.0, 5.0], 1, 4);
        let result = MedianFilter.execute_default(grid).unwrap();
        // Row reflection clamps to 0; column window at 1 is [5, 1, 5] x3
        assert!((result.get(0, 1).unwrap() - 5.0).abs() < 1e-10);
    }
}
