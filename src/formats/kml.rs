use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use ::kml::types::{Coord as KmlCoord, Geometry as KmlGeometry, Placemark};
use ::kml::Kml;
use geo::Coord;
use tracing::debug;
use zip::ZipArchive;

use super::{GeometryFormat, RawFeature, RawGeometry, RawPolygon};
use crate::crs::Crs;
use crate::error::{Error, Result};

/// Reader for `.kml` files and their zipped `.kmz` form.
#[derive(Debug, Clone, Copy, Default)]
pub struct KmlReader {
    pub compressed: bool,
}

impl GeometryFormat for KmlReader {
    fn read_rings(&self, path: &Path) -> Result<RawGeometry> {
        let content = if self.compressed {
            read_kmz_document(path)?
        } else {
            fs::read_to_string(path)?
        };
        parse_kml(&content)
    }
}

/// Decompress a KMZ in memory and return its first `.kml` member.
fn read_kmz_document(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let name = archive
        .file_names()
        .find(|name| name.to_ascii_lowercase().ends_with(".kml"))
        .map(str::to_string)
        .ok_or_else(|| Error::MissingMember { archive: path.to_path_buf(), suffix: ".kml" })?;
    debug!("Reading {} from {}", name, path.display());

    let mut document = String::new();
    archive.by_name(&name)?.read_to_string(&mut document)?;
    Ok(document)
}

fn to_coords(coords: &[KmlCoord<f64>]) -> Vec<Coord<f64>> {
    coords.iter().map(|c| Coord { x: c.x, y: c.y }).collect()
}

fn placemark_rings(geometry: &KmlGeometry<f64>) -> Option<RawPolygon> {
    match geometry {
        KmlGeometry::LineString(line) => Some(RawPolygon::from_ring(to_coords(&line.coords))),
        KmlGeometry::Polygon(polygon) => Some(RawPolygon {
            exterior: to_coords(&polygon.outer.coords),
            interiors: polygon.inner.iter().map(|ring| to_coords(&ring.coords)).collect(),
        }),
        _ => None,
    }
}

fn placemark_id(placemark: &Placemark<f64>, index: usize) -> String {
    placemark
        .attrs
        .get("id")
        .cloned()
        .or_else(|| placemark.name.clone())
        .unwrap_or_else(|| index.to_string())
}

/// Walk documents and folders in order, collecting placemarks.
fn collect_placemarks(kml: &Kml<f64>, index: &mut usize, features: &mut Vec<RawFeature>) {
    match kml {
        Kml::KmlDocument(doc) => {
            for element in &doc.elements {
                collect_placemarks(element, index, features);
            }
        }
        Kml::Document { elements, .. } => {
            for element in elements {
                collect_placemarks(element, index, features);
            }
        }
        Kml::Folder(folder) => {
            for element in &folder.elements {
                collect_placemarks(element, index, features);
            }
        }
        Kml::Placemark(placemark) => {
            let id = placemark_id(placemark, *index);
            *index += 1;
            match placemark.geometry.as_ref().and_then(placemark_rings) {
                Some(polygon) => features.push(RawFeature { id, polygons: vec![polygon] }),
                None => debug!("Ignoring placemark {} without line or polygon geometry", id),
            }
        }
        _ => {}
    }
}

/// Parse a KML document into raw rings. KML coordinates are always WGS84.
pub fn parse_kml(content: &str) -> Result<RawGeometry> {
    let kml: Kml<f64> = content.parse()?;
    let mut features = Vec::new();
    collect_placemarks(&kml, &mut 0, &mut features);
    Ok(RawGeometry { crs: Crs::WGS84, features })
}
