//! Imagery analysis algorithms
//!
//! - Spectral indices: NDVI, NDWI
//! - Normalized difference: generic two-band index

mod indices;

pub use indices::{ndvi, ndwi, normalized_difference, spectral_index, SpectralIndex, NDI_EPSILON};
