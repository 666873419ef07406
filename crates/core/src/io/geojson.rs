//! GeoJSON FeatureCollection reading and writing
//!
//! The collection CRS travels in the legacy top-level `crs` member
//! (`{"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::3857"}}`),
//! which GDAL and QGIS still honour for non-WGS84 layers.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::vector::{AttributeValue, Feature, FeatureCollection};
use geojson::{GeoJson, JsonObject, JsonValue};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Read a GeoJSON FeatureCollection file
pub fn read_geojson<P: AsRef<Path>>(path: P) -> Result<FeatureCollection> {
    let text = fs::read_to_string(path.as_ref())?;
    let parsed: GeoJson = text
        .parse()
        .map_err(|e| Error::Geometry(format!("invalid GeoJSON: {}", e)))?;
    match parsed {
        GeoJson::FeatureCollection(fc) => features_from_geojson(fc),
        _ => Err(Error::Geometry("expected a GeoJSON FeatureCollection".into())),
    }
}

/// Write a FeatureCollection as GeoJSON
pub fn write_geojson<P: AsRef<Path>>(collection: &FeatureCollection, path: P) -> Result<()> {
    let fc = features_to_geojson(collection);
    fs::write(path.as_ref(), GeoJson::FeatureCollection(fc).to_string())?;
    Ok(())
}

/// Convert a geojson FeatureCollection into native features
pub fn features_from_geojson(fc: geojson::FeatureCollection) -> Result<FeatureCollection> {
    let crs = fc.foreign_members.as_ref().and_then(crs_from_member);
    let mut out = FeatureCollection::new(crs);

    for (i, feature) in fc.features.into_iter().enumerate() {
        let geometry = feature
            .geometry
            .map(|g| {
                geo_types::Geometry::<f64>::try_from(g.value)
                    .map_err(|e| Error::Geometry(format!("feature {}: {}", i, e)))
            })
            .transpose()?;

        let properties: HashMap<String, AttributeValue> = feature
            .properties
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, attribute_from_json(v)))
            .collect();

        let id = feature.id.map(|id| match id {
            geojson::feature::Id::String(s) => s,
            geojson::feature::Id::Number(n) => n.to_string(),
        });

        out.push(Feature {
            geometry,
            properties,
            id,
        });
    }

    Ok(out)
}

/// Convert native features into a geojson FeatureCollection
pub fn features_to_geojson(collection: &FeatureCollection) -> geojson::FeatureCollection {
    let features = collection
        .iter()
        .map(|feature| {
            let properties: JsonObject = feature
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), attribute_to_json(v)))
                .collect();
            geojson::Feature {
                bbox: None,
                geometry: feature
                    .geometry
                    .as_ref()
                    .map(|g| geojson::Geometry::new(geojson::Value::from(g))),
                id: feature.id.clone().map(geojson::feature::Id::String),
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let foreign_members = collection.crs.as_ref().and_then(crs_member);

    geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members,
    }
}

fn crs_member(crs: &CRS) -> Option<JsonObject> {
    let epsg = crs.epsg()?;
    let mut member = JsonObject::new();
    member.insert(
        "crs".to_string(),
        serde_json::json!({
            "type": "name",
            "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", epsg) }
        }),
    );
    Some(member)
}

fn crs_from_member(members: &JsonObject) -> Option<CRS> {
    let name = members
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?;
    if name.ends_with("CRS84") {
        return Some(CRS::wgs84());
    }
    if !name.to_ascii_uppercase().contains("EPSG") {
        return None;
    }
    name.rsplit(':')
        .find(|part| !part.is_empty())
        .and_then(|code| code.parse().ok())
        .map(CRS::from_epsg)
}

fn attribute_from_json(value: JsonValue) -> AttributeValue {
    match value {
        JsonValue::Null => AttributeValue::Null,
        JsonValue::Bool(b) => AttributeValue::Bool(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => AttributeValue::Int(i),
            None => n.as_f64().map(AttributeValue::Float).unwrap_or(AttributeValue::Null),
        },
        JsonValue::String(s) => AttributeValue::String(s),
        other => AttributeValue::String(other.to_string()),
    }
}

fn attribute_to_json(value: &AttributeValue) -> JsonValue {
    match value {
        AttributeValue::Null => JsonValue::Null,
        AttributeValue::Bool(b) => JsonValue::Bool(*b),
        AttributeValue::Int(i) => JsonValue::from(*i),
        AttributeValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        AttributeValue::String(s) => JsonValue::String(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{polygon, Geometry};
    use tempfile::TempDir;

    #[test]
    fn test_roundtrip_keeps_crs_and_properties() {
        let square = polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
        ];
        let mut fc = FeatureCollection::new(Some(CRS::web_mercator()));
        fc.push(
            Feature::new(Geometry::Polygon(square))
                .with_property("class_id", 2i64)
                .with_property("class_name", "Gain")
                .with_property("area_ha", 0.01),
        );

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("change.geojson");
        write_geojson(&fc, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("urn:ogc:def:crs:EPSG::3857"), "crs member missing: {}", text);

        let loaded = read_geojson(&path).unwrap();
        assert_eq!(loaded.crs, Some(CRS::web_mercator()));
        assert_eq!(loaded.len(), 1);
        let feature = &loaded.features[0];
        assert_eq!(feature.get_property("class_id"), Some(&AttributeValue::Int(2)));
        assert_eq!(feature.get_property("class_name"), Some(&AttributeValue::from("Gain")));
        assert!(matches!(feature.geometry, Some(Geometry::Polygon(_))));
    }

    #[test]
    fn test_missing_crs_member() {
        let fc = geojson::FeatureCollection {
            bbox: None,
            features: vec![],
            foreign_members: None,
        };
        let loaded = features_from_geojson(fc).unwrap();
        assert!(loaded.crs.is_none());
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_crs84_name() {
        let mut members = JsonObject::new();
        members.insert(
            "crs".into(),
            serde_json::json!({"type": "name", "properties": {"name": "urn:ogc:def:crs:OGC:1.3:CRS84"}}),
        );
        assert_eq!(crs_from_member(&members), Some(CRS::wgs84()));
    }
}
