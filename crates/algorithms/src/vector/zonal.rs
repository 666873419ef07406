//! Zonal aggregation of classified change areas
//!
//! Every change polygon's hectares are apportioned to the zones it overlaps
//! by the fraction of its planar area inside each zone, then summed per
//! (zone, class).

use std::collections::BTreeMap;

use geo::{Area, BooleanOps, BoundingRect};
use geo_types::{Coord, Geometry, LineString, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};
use crate::maybe_rayon::*;
use landpulse_core::crs::{Transformer, CRS};
use landpulse_core::vector::FeatureCollection;
use landpulse_core::{Error, Result};

use super::area::densify;
use crate::change::ChangeClass;

/// A classified change polygon with its ground area
#[derive(Debug, Clone)]
pub struct AreaFeature {
    pub polygon: Polygon<f64>,
    pub class: ChangeClass,
    pub area_ha: f64,
}

/// One administrative (or other) zone
#[derive(Debug, Clone)]
pub struct Zone {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
}

/// Zones sharing one CRS
#[derive(Debug, Clone)]
pub struct ZoneSet {
    pub crs: CRS,
    pub zones: Vec<Zone>,
}

/// Change area of one class inside one zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalArea {
    pub zone_id: String,
    pub class: ChangeClass,
    pub area_ha: f64,
}

impl ZoneSet {
    pub fn new(crs: CRS, zones: Vec<Zone>) -> Self {
        Self { crs, zones }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Build zones from polygon features, taking ids from `id_field`.
    ///
    /// A collection without a CRS is taken as WGS84, the GeoJSON default.
    ///
    /// # Errors
    /// [`Error::Geometry`] for a feature that is not a (multi)polygon,
    /// [`Error::InvalidParameter`] for a feature without the id attribute.
    pub fn from_features(collection: &FeatureCollection, id_field: &str) -> Result<Self> {
        let crs = collection.crs.clone().unwrap_or_else(CRS::wgs84);
        let mut zones = Vec::with_capacity(collection.len());

        for (i, feature) in collection.iter().enumerate() {
            let geometry = match &feature.geometry {
                Some(Geometry::Polygon(p)) => MultiPolygon::new(vec![p.clone()]),
                Some(Geometry::MultiPolygon(mp)) => mp.clone(),
                other => {
                    return Err(Error::Geometry(format!(
                        "zone feature {} is not a polygon: {:?}",
                        i,
                        other.as_ref().map(geometry_kind)
                    )));
                }
            };
            let id = feature
                .get_property(id_field)
                .and_then(|v| v.as_key())
                .or_else(|| feature.id.clone())
                .ok_or_else(|| Error::InvalidParameter {
                    name: "zone_id_field",
                    value: id_field.to_string(),
                    reason: format!("zone feature {} has no such attribute", i),
                })?;
            zones.push(Zone { id, geometry });
        }

        Ok(Self { crs, zones })
    }

    /// Transform every zone into `crs`.
    ///
    /// Ring edges are densified first so straight edges in the source CRS
    /// follow their true path in the target.
    pub fn to_crs(&self, crs: &CRS) -> Result<Self> {
        let transformer = Transformer::new(&self.crs, crs)?;
        if transformer.is_identity() {
            return Ok(Self::new(crs.clone(), self.zones.clone()));
        }

        let ring = |ls: &LineString<f64>| -> LineString<f64> {
            densify(ls)
                .into_iter()
                .map(|c| {
                    let (x, y) = transformer.transform(c.x, c.y);
                    Coord { x, y }
                })
                .collect::<Vec<_>>()
                .into()
        };
        let zones = self
            .zones
            .iter()
            .map(|z| Zone {
                id: z.id.clone(),
                geometry: z
                    .geometry
                    .iter()
                    .map(|p| Polygon::new(ring(p.exterior()), p.interiors().iter().map(ring).collect()))
                    .collect(),
            })
            .collect();
        Ok(Self::new(crs.clone(), zones))
    }
}

fn geometry_kind(g: &Geometry<f64>) -> &'static str {
    match g {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

fn rects_overlap(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && b.min().x <= a.max().x && a.min().y <= b.max().y && b.min().y <= a.max().y
}

/// Apportion feature areas to zones.
///
/// `features` are in `features_crs`; the zones must already be in the same
/// CRS. Rows are summed per (zone id, class) and sorted by zone id, then
/// class. Zones that receive no area produce no rows.
///
/// # Errors
/// [`Error::CrsMismatch`] when the CRSs differ.
pub fn zonal_stats(features: &[AreaFeature], features_crs: &CRS, zones: &ZoneSet) -> Result<Vec<ZonalArea>> {
    if !features_crs.is_equivalent(&zones.crs) {
        return Err(Error::CrsMismatch(
            features_crs.identifier(),
            zones.crs.identifier(),
        ));
    }

    let zone_boxes: Vec<Option<Rect<f64>>> = zones.zones.iter().map(|z| z.geometry.bounding_rect()).collect();

    let contributions: Vec<(usize, ChangeClass, f64)> = features
        .par_iter()
        .flat_map(|feature| {
            let mut parts = Vec::new();
            let planar = feature.polygon.unsigned_area();
            let Some(bbox) = feature.polygon.bounding_rect() else {
                return parts;
            };
            if planar <= 0.0 {
                return parts;
            }
            let shape = MultiPolygon::new(vec![feature.polygon.clone()]);
            for (zi, zone) in zones.zones.iter().enumerate() {
                let Some(zbox) = &zone_boxes[zi] else { continue };
                if !rects_overlap(&bbox, zbox) {
                    continue;
                }
                let inside = shape.intersection(&zone.geometry).unsigned_area();
                if inside > 0.0 {
                    let fraction = (inside / planar).min(1.0);
                    parts.push((zi, feature.class, fraction * feature.area_ha));
                }
            }
            parts
        })
        .collect();

    let mut totals: BTreeMap<(&str, ChangeClass), f64> = BTreeMap::new();
    for (zi, class, area) in contributions {
        *totals.entry((zones.zones[zi].id.as_str(), class)).or_insert(0.0) += area;
    }

    Ok(totals
        .into_iter()
        .map(|((zone_id, class), area_ha)| ZonalArea {
            zone_id: zone_id.to_string(),
            class,
            area_ha,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::polygon;
    use landpulse_core::vector::Feature;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
    }

    fn zone(id: &str, p: Polygon<f64>) -> Zone {
        Zone {
            id: id.to_string(),
            geometry: MultiPolygon::new(vec![p]),
        }
    }

    fn utm() -> CRS {
        CRS::utm(30, true)
    }

    #[test]
    fn test_split_feature_conserves_area() {
        // 200 m x 100 m = 2 ha, half in each zone
        let features = vec![AreaFeature {
            polygon: rect(0.0, 0.0, 200.0, 100.0),
            class: ChangeClass::Loss,
            area_ha: 2.0,
        }];
        let zones = ZoneSet::new(
            utm(),
            vec![
                zone("west", rect(-1000.0, -1000.0, 100.0, 1000.0)),
                zone("east", rect(100.0, -1000.0, 1000.0, 1000.0)),
            ],
        );

        let rows = zonal_stats(&features, &utm(), &zones).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].zone_id, "east");
        assert_eq!(rows[1].zone_id, "west");
        for r in &rows {
            assert!((r.area_ha - 1.0).abs() < 1e-6, "{:?}", r);
        }
        let total: f64 = rows.iter().map(|r| r.area_ha).sum();
        assert!((total - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_sums_per_zone_and_class() {
        let features = vec![
            AreaFeature { polygon: rect(0.0, 0.0, 10.0, 10.0), class: ChangeClass::Gain, area_ha: 0.01 },
            AreaFeature { polygon: rect(20.0, 0.0, 30.0, 10.0), class: ChangeClass::Gain, area_ha: 0.01 },
            AreaFeature { polygon: rect(40.0, 0.0, 50.0, 10.0), class: ChangeClass::Loss, area_ha: 0.01 },
        ];
        let zones = ZoneSet::new(utm(), vec![zone("a", rect(-5.0, -5.0, 100.0, 100.0))]);

        let rows = zonal_stats(&features, &utm(), &zones).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].class, ChangeClass::Loss);
        assert!((rows[0].area_ha - 0.01).abs() < 1e-9);
        assert_eq!(rows[1].class, ChangeClass::Gain);
        assert!((rows[1].area_ha - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_and_empty() {
        let features = vec![AreaFeature {
            polygon: rect(0.0, 0.0, 10.0, 10.0),
            class: ChangeClass::Gain,
            area_ha: 0.01,
        }];
        let far = ZoneSet::new(utm(), vec![zone("far", rect(500.0, 500.0, 600.0, 600.0))]);
        assert!(zonal_stats(&features, &utm(), &far).unwrap().is_empty());

        let none = ZoneSet::new(utm(), vec![]);
        assert!(zonal_stats(&features, &utm(), &none).unwrap().is_empty());
        assert!(zonal_stats(&[], &utm(), &far).unwrap().is_empty());
    }

    #[test]
    fn test_crs_mismatch() {
        let zones = ZoneSet::new(CRS::wgs84(), vec![]);
        assert!(matches!(
            zonal_stats(&[], &utm(), &zones),
            Err(Error::CrsMismatch(_, _))
        ));
    }

    #[test]
    fn test_zones_from_features_and_reproject() {
        let mut fc = FeatureCollection::new(None);
        fc.push(Feature::new(Geometry::Polygon(rect(-3.0, 40.0, -2.0, 41.0))).with_property("admin_id", 28i64));
        let zones = ZoneSet::from_features(&fc, "admin_id").unwrap();
        assert_eq!(zones.crs, CRS::wgs84());
        assert_eq!(zones.zones[0].id, "28");

        let projected = zones.to_crs(&utm()).unwrap();
        let bbox = projected.zones[0].geometry.bounding_rect().unwrap();
        assert!(bbox.min().x > 400_000.0 && bbox.max().x < 600_000.0);
        assert!(bbox.min().y > 4_400_000.0 && bbox.max().y < 4_600_000.0);

        // each edge is split before projecting; vertex 8 is the midpoint of the south edge
        let exterior = projected.zones[0].geometry.0[0].exterior();
        assert_eq!(exterior.0.len(), 4 * 16 + 1);
        let (x, y) = Transformer::new(&CRS::wgs84(), &utm()).unwrap().transform(-2.5, 40.0);
        assert!((exterior.0[8].x - x).abs() < 1e-6 && (exterior.0[8].y - y).abs() < 1e-6);

        assert!(ZoneSet::from_features(&fc, "missing").is_err());
    }
}
