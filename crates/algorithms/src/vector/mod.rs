//! Vector outputs of change analysis
//!
//! - Polygonize: class grid to 4-connected region polygons
//! - Area: ground area in hectares for any supported CRS
//! - Zonal: apportion change areas to administrative zones

mod area;
mod polygonize;
mod zonal;

pub use area::{area_hectares, SQ_METRES_PER_HECTARE};
pub use polygonize::{vectorize, ClassRegion, Vectorize, VectorizeParams};
pub use zonal::{zonal_stats, AreaFeature, ZonalArea, Zone, ZoneSet};
