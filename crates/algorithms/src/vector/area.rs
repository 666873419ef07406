//! Ground area of polygons in hectares

use geo::Area;
use geo_types::{Coord, LineString, Polygon};
use landpulse_core::crs::{Transformer, CRS};
use landpulse_core::{Error, Result};

/// Square metres per hectare
pub const SQ_METRES_PER_HECTARE: f64 = 10_000.0;

/// Segments each edge is split into before leaving a non-equal-area CRS
const DENSIFY_SEGMENTS: usize = 16;

/// Ground area of `polygon` (coordinates in `crs`) in hectares.
///
/// Planar area is used as-is for equal-area and UTM grids. Geographic and
/// Web Mercator polygons are densified and reprojected to EASE-Grid 2.0
/// first.
///
/// # Errors
/// [`Error::Geometry`] when the CRS has no supported projection.
pub fn area_hectares(polygon: &Polygon<f64>, crs: &CRS) -> Result<f64> {
    if crs.preserves_area() {
        return Ok(polygon.unsigned_area() / SQ_METRES_PER_HECTARE);
    }
    if crs.projection().is_none() {
        return Err(Error::Geometry(format!(
            "cannot measure area in unsupported CRS {}",
            crs
        )));
    }

    let to_equal_area = Transformer::new(crs, &CRS::equal_area())?;
    let project = |ring: &LineString<f64>| -> LineString<f64> {
        densify(ring)
            .into_iter()
            .map(|c| {
                let (x, y) = to_equal_area.transform(c.x, c.y);
                Coord { x, y }
            })
            .collect::<Vec<_>>()
            .into()
    };

    let projected = Polygon::new(
        project(polygon.exterior()),
        polygon.interiors().iter().map(project).collect(),
    );
    Ok(projected.unsigned_area() / SQ_METRES_PER_HECTARE)
}

/// Split every edge of `ring` into [`DENSIFY_SEGMENTS`] equal parts
pub(crate) fn densify(ring: &LineString<f64>) -> Vec<Coord<f64>> {
    let coords = &ring.0;
    let mut out = Vec::with_capacity(coords.len() * DENSIFY_SEGMENTS);
    for pair in coords.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        for i in 0..DENSIFY_SEGMENTS {
            let t = i as f64 / DENSIFY_SEGMENTS as f64;
            out.push(Coord {
                x: a.x + (b.x - a.x) * t,
                y: a.y + (b.y - a.y) * t,
            });
        }
    }
    if let Some(&last) = coords.last() {
        out.push(last);
    }
    out
}
