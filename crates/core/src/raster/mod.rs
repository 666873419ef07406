//! Raster data structures and operations

mod element;
mod geotransform;
mod grid;
mod stack;

pub use element::{DataType, RasterElement};
pub use geotransform::GeoTransform;
pub use grid::{GridSpec, Raster, RasterStatistics, ALIGNMENT_TOLERANCE};
pub use stack::RasterStack;
