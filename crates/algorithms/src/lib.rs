//! # LandPulse Algorithms
//!
//! Raster change-analysis algorithms for LandPulse.
//!
//! ## Available Algorithm Categories
//!
//! - **reproject**: Grid planning, bounds transformation, bilinear warping
//! - **imagery**: Normalized-difference spectral indices (NDVI, NDWI)
//! - **filters**: Median speckle filter
//! - **composite**: Temporal median/mean/min/max compositing
//! - **change**: Threshold and model-delegated change classification
//! - **vector**: Polygonization, hectare areas, zonal aggregation

pub mod change;
pub mod composite;
pub mod filters;
pub mod imagery;
pub(crate) mod maybe_rayon;
pub mod reproject;
pub mod vector;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::change::{
        index_difference, ChangeClass, ChangeClassifier, ChangeMap, ChangeModel,
        ModelClassifier, ModelOutput, ThresholdClassifier, CLASS_NODATA,
    };
    pub use crate::composite::{composite, composite_with_count, CompositeStatistic};
    pub use crate::filters::{median_filter, MedianFilter, MedianParams};
    pub use crate::imagery::{ndvi, ndwi, normalized_difference, SpectralIndex};
    pub use crate::reproject::{
        plan_grid, reproject, reproject_stack, reproject_to_grid, transform_bounds,
        Reproject, ReprojectParams,
    };
    pub use crate::vector::{
        area_hectares, vectorize, zonal_stats, AreaFeature, ClassRegion, ZonalArea, Zone, ZoneSet,
    };
    pub use landpulse_core::prelude::*;
}
