//! Band-stacked rasters sharing one grid

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, GridSpec, Raster, RasterElement};
use ndarray::{Array3, ArrayView2, Axis};

/// A multi-band raster stored as `(band, row, col)`.
///
/// Every band shares the CRS, geotransform and no-data sentinel of the stack.
#[derive(Debug, Clone)]
pub struct RasterStack<T: RasterElement> {
    data: Array3<T>,
    transform: GeoTransform,
    crs: Option<CRS>,
    nodata: Option<T>,
}

impl<T: RasterElement> RasterStack<T> {
    /// Stack aligned single-band rasters in order.
    ///
    /// Band `i` must be aligned with band 0, otherwise
    /// `GridMismatch { index: Some(i) }` is returned.
    pub fn from_bands(bands: &[&Raster<T>]) -> Result<Self> {
        let first = bands
            .first()
            .ok_or_else(|| Error::EmptyInput("no bands to stack".into()))?;
        let (rows, cols) = first.shape();

        for (i, band) in bands.iter().enumerate().skip(1) {
            if let Err(Error::GridMismatch { reason, .. }) = first.ensure_aligned(*band) {
                return Err(Error::GridMismatch {
                    index: Some(i),
                    reason,
                });
            }
        }

        let mut data = Array3::from_elem((bands.len(), rows, cols), T::zero());
        for (i, band) in bands.iter().enumerate() {
            data.index_axis_mut(Axis(0), i).assign(band.data());
        }

        Ok(Self {
            data,
            transform: *first.transform(),
            crs: first.crs().cloned(),
            nodata: first.nodata(),
        })
    }

    /// Wrap an existing `(band, row, col)` array on the given grid
    pub fn from_array(data: Array3<T>, spec: &GridSpec, nodata: Option<T>) -> Result<Self> {
        let (_, rows, cols) = data.dim();
        if (rows, cols) != spec.shape() {
            return Err(Error::mismatch(format!(
                "stack shape {:?} != grid {:?}",
                (rows, cols),
                spec.shape()
            )));
        }
        Ok(Self {
            data,
            transform: spec.transform,
            crs: spec.crs.clone(),
            nodata,
        })
    }

    /// Number of bands
    pub fn band_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// Dimensions as (bands, rows, cols)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// View of one band
    pub fn band(&self, index: usize) -> Result<ArrayView2<'_, T>> {
        if index >= self.band_count() {
            return Err(Error::InvalidParameter {
                name: "band",
                value: index.to_string(),
                reason: format!("stack has {} bands", self.band_count()),
            });
        }
        Ok(self.data.index_axis(Axis(0), index))
    }

    /// Copy one band out as a standalone raster
    pub fn band_raster(&self, index: usize) -> Result<Raster<T>> {
        let mut raster = Raster::from_array(self.band(index)?.to_owned());
        raster.set_transform(self.transform);
        raster.set_crs(self.crs.clone());
        raster.set_nodata(self.nodata);
        Ok(raster)
    }

    /// All bands as standalone rasters
    pub fn into_bands(self) -> Vec<Raster<T>> {
        self.data
            .outer_iter()
            .map(|band| {
                let mut raster = Raster::from_array(band.to_owned());
                raster.set_transform(self.transform);
                raster.set_crs(self.crs.clone());
                raster.set_nodata(self.nodata);
                raster
            })
            .collect()
    }

    /// The underlying `(band, row, col)` array
    pub fn data(&self) -> &Array3<T> {
        &self.data
    }

    /// Get the geotransform
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Get the CRS
    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    /// Get the no-data value
    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    /// Grid geometry shared by every band
    pub fn grid_spec(&self) -> GridSpec {
        GridSpec::new(self.crs.clone(), self.transform, self.rows(), self.cols())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_band(value: f64) -> Raster<f64> {
        let mut r = Raster::filled(3, 4, value);
        r.set_transform(GeoTransform::north_up(0.0, 3.0, 1.0));
        r.set_crs(Some(CRS::web_mercator()));
        r
    }

    #[test]
    fn test_stack_bands_in_order() {
        let a = make_band(1.0);
        let b = make_band(2.0);
        let stack = RasterStack::from_bands(&[&a, &b]).unwrap();

        assert_eq!(stack.dim(), (2, 3, 4));
        assert_eq!(stack.band(1).unwrap()[(2, 3)], 2.0);
        assert!(stack.band(2).is_err());

        let bands = stack.into_bands();
        assert_eq!(bands[0].get(0, 0).unwrap(), 1.0);
        assert_eq!(bands[1].crs(), Some(&CRS::web_mercator()));
    }

    #[test]
    fn test_misaligned_band_is_rejected() {
        let a = make_band(1.0);
        let mut b = make_band(2.0);
        b.set_transform(GeoTransform::north_up(1.0, 3.0, 1.0));

        match RasterStack::from_bands(&[&a, &a, &b]) {
            Err(Error::GridMismatch { index, .. }) => assert_eq!(index, Some(2)),
            other => panic!("expected GridMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_stack() {
        let bands: [&Raster<f64>; 0] = [];
        assert!(matches!(RasterStack::from_bands(&bands), Err(Error::EmptyInput(_))));
    }
}
