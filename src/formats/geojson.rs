use std::fs;
use std::path::Path;

use ::geojson::feature::Id;
use ::geojson::{Feature, GeoJson, Geometry as GeoJsonGeometry, JsonObject, Value as GeoJsonValue};
use geo::Coord;
use tracing::debug;

use super::{GeometryFormat, RawFeature, RawGeometry, RawPolygon};
use crate::crs::Crs;
use crate::error::Result;

/// Reader for `.json` / `.geojson` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonReader;

impl GeometryFormat for GeoJsonReader {
    fn read_rings(&self, path: &Path) -> Result<RawGeometry> {
        let content = fs::read_to_string(path)?;
        parse_geojson(&content)
    }
}

fn to_coords(positions: &[Vec<f64>]) -> Vec<Coord<f64>> {
    positions
        .iter()
        .filter(|p| p.len() >= 2)
        .map(|p| Coord { x: p[0], y: p[1] })
        .collect()
}

/// Legacy `crs` member, e.g. `{"type": "name", "properties": {"name": "EPSG:3413"}}`.
fn crs_member(members: Option<&JsonObject>) -> Result<Crs> {
    let name = members
        .and_then(|m| m.get("crs"))
        .and_then(|crs| crs.get("properties"))
        .and_then(|props| props.get("name"))
        .and_then(|name| name.as_str());
    match name {
        Some(name) => name.parse(),
        None => Ok(Crs::WGS84),
    }
}

fn geometry_rings(geometry: &GeoJsonGeometry) -> Option<Vec<RawPolygon>> {
    match &geometry.value {
        GeoJsonValue::LineString(coords) => Some(vec![RawPolygon::from_ring(to_coords(coords))]),
        GeoJsonValue::Polygon(rings) => {
            let (exterior, holes) = rings.split_first()?;
            Some(vec![RawPolygon {
                exterior: to_coords(exterior),
                interiors: holes.iter().map(|ring| to_coords(ring)).collect(),
            }])
        }
        _ => None,
    }
}

fn feature_id(feature: &Feature, index: usize) -> String {
    match &feature.id {
        Some(Id::String(id)) => id.clone(),
        Some(Id::Number(id)) => id.to_string(),
        None => index.to_string(),
    }
}

fn raw_feature(feature: &Feature, index: usize) -> Option<RawFeature> {
    let id = feature_id(feature, index);
    let geometry = feature.geometry.as_ref()?;
    match geometry_rings(geometry) {
        Some(polygons) => Some(RawFeature { id, polygons }),
        None => {
            debug!("Ignoring non-polygon geometry in feature {}", id);
            None
        }
    }
}

/// Parse GeoJSON text into raw rings.
pub fn parse_geojson(content: &str) -> Result<RawGeometry> {
    let geojson: GeoJson = content.parse()?;

    let (crs, features) = match geojson {
        GeoJson::FeatureCollection(fc) => {
            let crs = crs_member(fc.foreign_members.as_ref())?;
            let features = fc
                .features
                .iter()
                .enumerate()
                .filter_map(|(index, feature)| raw_feature(feature, index))
                .collect();
            (crs, features)
        }
        GeoJson::Feature(feature) => {
            let crs = crs_member(feature.foreign_members.as_ref())?;
            (crs, raw_feature(&feature, 0).into_iter().collect())
        }
        GeoJson::Geometry(geometry) => {
            let crs = crs_member(geometry.foreign_members.as_ref())?;
            let features = geometry_rings(&geometry)
                .map(|polygons| RawFeature { id: "0".to_string(), polygons })
                .into_iter()
                .collect();
            (crs, features)
        }
    };

    Ok(RawGeometry { crs, features })
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECTION: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "id": "A", "properties": {},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]],
                                                             [[0.2,0.2],[0.4,0.2],[0.4,0.4],[0.2,0.2]]]}},
            {"type": "Feature", "properties": {},
             "geometry": {"type": "LineString", "coordinates": [[5,5],[6,5],[6,6]]}},
            {"type": "Feature", "id": 7, "properties": {},
             "geometry": {"type": "Point", "coordinates": [3,3]}}
        ]
    }"#;

    #[test]
    fn keeps_polygons_and_line_strings() {
        let raw = parse_geojson(COLLECTION).unwrap();
        assert_eq!(raw.crs, Crs::WGS84);
        assert_eq!(raw.features.len(), 2);
        assert_eq!(raw.features[0].id, "A");
        assert_eq!(raw.features[0].polygons[0].interiors.len(), 1);
        // unnamed features are identified by their position
        assert_eq!(raw.features[1].id, "1");
        assert_eq!(raw.features[1].polygons[0].exterior.len(), 3);
    }

    #[test]
    fn reads_legacy_crs_member() {
        let content = r#"{
            "type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::3413"}},
            "features": []
        }"#;
        assert_eq!(parse_geojson(content).unwrap().crs, Crs::Epsg(3413));
    }

    #[test]
    fn bare_geometry_is_one_feature() {
        let content = r#"{"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}"#;
        let raw = parse_geojson(content).unwrap();
        assert_eq!(raw.features.len(), 1);
        assert_eq!(raw.features[0].id, "0");
    }
}
