//! I/O operations for reading and writing geospatial data

#[cfg(feature = "gdal")]
mod gdal_io;
mod geojson;
mod native;

use crate::raster::{DataType, GridSpec};

#[cfg(feature = "gdal")]
pub use gdal_io::{read_geotiff, read_geotiff_meta, write_geotiff, GeoTiffOptions};

#[cfg(not(feature = "gdal"))]
pub use native::{read_geotiff, read_geotiff_meta, write_geotiff, GeoTiffOptions};

// Buffer-based I/O (always available, no filesystem dependency)
pub use native::{read_geotiff_from_buffer, write_geotiff_to_buffer};

pub use self::geojson::{
    features_from_geojson, features_to_geojson, read_geojson, write_geojson,
};

/// Header of a raster file: grid geometry, no-data and sample type
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMeta {
    pub spec: GridSpec,
    pub nodata: Option<f64>,
    pub data_type: DataType,
}

impl RasterMeta {
    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.spec.shape()
    }

    /// Bounds (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.spec.bounds()
    }
}
