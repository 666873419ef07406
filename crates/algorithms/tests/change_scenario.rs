//! End-to-end change analysis on small synthetic grids: index composites in,
//! change polygons and zonal hectares out.

use landpulse_algorithms::change::{ChangeClass, ChangeClassifier, ThresholdClassifier};
use landpulse_algorithms::composite::{composite, CompositeStatistic};
use landpulse_algorithms::imagery::ndvi;
use landpulse_algorithms::reproject::reproject;
use landpulse_algorithms::vector::{area_hectares, vectorize, zonal_stats, AreaFeature, Zone, ZoneSet};
use landpulse_core::io::{read_geotiff, write_geotiff};
use landpulse_core::{GeoTransform, Raster, CRS};
use geo_types::{polygon, MultiPolygon};

const RES: f64 = 30.0;

fn utm_grid(values: Vec<f64>, rows: usize, cols: usize) -> Raster<f64> {
    let mut r = Raster::from_vec(values, rows, cols).unwrap();
    r.set_transform(GeoTransform::north_up(440_000.0, 4_475_000.0, RES));
    r.set_crs(Some(CRS::utm(30, true)));
    r.set_nodata(Some(f64::NAN));
    r
}

#[test]
fn gain_block_becomes_one_polygon() {
    let before = utm_grid(vec![0.3; 16], 4, 4);
    let mut after = before.clone();
    for (row, col) in [(1, 1), (1, 2), (2, 1), (2, 2)] {
        after.set(row, col, 0.8).unwrap();
    }

    let classes = ThresholdClassifier::new(0.2).unwrap().classify(&before, &after).unwrap();
    let gain = ChangeClass::Gain.code();
    for row in 0..4 {
        for col in 0..4 {
            let expected = if (1..3).contains(&row) && (1..3).contains(&col) {
                gain
            } else {
                ChangeClass::Stable.code()
            };
            assert_eq!(classes.get(row, col).unwrap(), expected, "pixel ({}, {})", row, col);
        }
    }

    let regions = vectorize(&classes, ChangeClass::Stable.code()).unwrap();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].class_id, gain);
    assert_eq!(regions[0].pixel_count, 4);

    let ha = area_hectares(&regions[0].polygon, classes.crs().unwrap()).unwrap();
    let expected = 4.0 * RES * RES / 10_000.0;
    assert!((ha - expected).abs() < 1e-9, "expected {} ha, got {}", expected, ha);
}

#[test]
fn single_pixel_area_matches_pixel_footprint() {
    let mut classes = Raster::<u8>::filled(3, 3, 0);
    classes.set_transform(GeoTransform::north_up(440_000.0, 4_475_000.0, RES));
    classes.set_crs(Some(CRS::utm(30, true)));
    classes.set(2, 0, ChangeClass::Loss.code()).unwrap();

    let regions = vectorize(&classes, 0).unwrap();
    assert_eq!(regions.len(), 1);
    let ha = area_hectares(&regions[0].polygon, &CRS::utm(30, true)).unwrap();
    assert!((ha - 0.09).abs() < 1e-9);
}

#[test]
fn composite_of_one_is_identity_and_ndvi_in_range() {
    let red = utm_grid((0..16).map(|v| v as f64 * 10.0).collect(), 4, 4);
    let nir = utm_grid((0..16).map(|v| 400.0 - v as f64 * 5.0).collect(), 4, 4);

    let single = composite(std::slice::from_ref(&red), CompositeStatistic::Median).unwrap();
    for (a, b) in red.data().iter().zip(single.data().iter()) {
        assert_eq!(a, b);
    }

    let index = ndvi(&red, &nir).unwrap();
    assert!(index.data().iter().all(|v| (-1.0..=1.0).contains(v)));
}

#[test]
fn zonal_hectares_are_conserved() {
    let before = utm_grid(vec![0.7; 16], 4, 4);
    let mut after = before.clone();
    for col in 0..4 {
        after.set(3, col, 0.1).unwrap();
    }
    let classes = ThresholdClassifier::default().classify(&before, &after).unwrap();
    let crs = classes.crs().unwrap().clone();

    let features: Vec<AreaFeature> = vectorize(&classes, 0)
        .unwrap()
        .into_iter()
        .map(|r| AreaFeature {
            area_ha: area_hectares(&r.polygon, &crs).unwrap(),
            class: ChangeClass::from_code(r.class_id).unwrap(),
            polygon: r.polygon,
        })
        .collect();
    assert_eq!(features.len(), 1);

    // Split the bottom row down the middle of the grid
    let mid = 440_000.0 + 2.0 * RES;
    let zones = ZoneSet::new(
        crs.clone(),
        vec![
            Zone {
                id: "01".into(),
                geometry: MultiPolygon::new(vec![polygon![
                    (x: 439_000.0, y: 4_474_000.0), (x: mid, y: 4_474_000.0),
                    (x: mid, y: 4_476_000.0), (x: 439_000.0, y: 4_476_000.0),
                ]]),
            },
            Zone {
                id: "02".into(),
                geometry: MultiPolygon::new(vec![polygon![
                    (x: mid, y: 4_474_000.0), (x: 441_000.0, y: 4_474_000.0),
                    (x: 441_000.0, y: 4_476_000.0), (x: mid, y: 4_476_000.0),
                ]]),
            },
        ],
    );

    let rows = zonal_stats(&features, &crs, &zones).unwrap();
    assert_eq!(rows.len(), 2);
    let total: f64 = rows.iter().map(|r| r.area_ha).sum();
    assert!((total - features[0].area_ha).abs() < 1e-6);
    assert!(rows.iter().all(|r| r.class == ChangeClass::Loss));
    assert!((rows[0].area_ha - rows[1].area_ha).abs() < 1e-6);
}

#[test]
fn geotiff_roundtrip_then_reproject_identity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ndvi.tif");
    let grid = utm_grid((0..64).map(|v| v as f64 / 64.0).collect(), 8, 8);
    write_geotiff(&grid, &path, None).unwrap();

    let loaded: Raster<f64> = read_geotiff(&path, None).unwrap();
    assert_eq!(loaded.crs(), Some(&CRS::utm(30, true)));

    let warped = reproject(&loaded, &CRS::utm(30, true), RES).unwrap();
    assert!(loaded.ensure_aligned(&warped).is_ok());
    for (a, b) in loaded.data().iter().zip(warped.data().iter()) {
        assert!((a - b).abs() < 1e-6);
    }
}
