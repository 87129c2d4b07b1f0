//! Readers for the georeferenced files a spatial filter can come from.
//!
//! Each format turns a file into [`RawGeometry`]: the rings of every
//! `LineString`/`Polygon` feature in the file's own CRS. [`read_polygons`]
//! then filters by identifier, reprojects, validates and repairs.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use geo::{Coord, LineString, Polygon};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::crs::{Crs, Reprojector};
use crate::error::{Error, Result};
use crate::polygon::PolygonSet;
use crate::validate;

pub mod geojson;
pub mod kml;
pub mod shapefile;

pub use self::geojson::GeoJsonReader;
pub use self::kml::KmlReader;
pub use self::shapefile::ShapefileReader;

/// One polygon's rings in source coordinates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPolygon {
    pub exterior: Vec<Coord<f64>>,
    pub interiors: Vec<Vec<Coord<f64>>>,
}

impl RawPolygon {
    pub fn from_ring(exterior: Vec<Coord<f64>>) -> Self {
        Self { exterior, interiors: Vec::new() }
    }
}

/// A feature of the source file. Multi-part shapes carry several polygons.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    pub id: String,
    pub polygons: Vec<RawPolygon>,
}

/// Everything a reader extracts from a file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawGeometry {
    pub crs: Crs,
    pub features: Vec<RawFeature>,
}

/// Capability implemented once per supported file format.
pub trait GeometryFormat {
    /// Parse `path` into rings plus the CRS recorded in the file's metadata.
    fn read_rings(&self, path: &Path) -> Result<RawGeometry>;
}

/// Supported spatial file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    GeoJson,
    Kml { compressed: bool },
    Shapefile { zipped: bool },
}

impl Format {
    /// Select the format from the file extension, ignoring case.
    pub fn from_path(path: &Path) -> Result<Format> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "json" | "geojson" => Ok(Format::GeoJson),
            "kml" => Ok(Format::Kml { compressed: false }),
            "kmz" => Ok(Format::Kml { compressed: true }),
            "shp" => Ok(Format::Shapefile { zipped: false }),
            "zip" => Ok(Format::Shapefile { zipped: true }),
            _ => Err(Error::UnsupportedFormat(extension)),
        }
    }

    pub fn reader(self) -> Box<dyn GeometryFormat> {
        match self {
            Format::GeoJson => Box::new(GeoJsonReader),
            Format::Kml { compressed } => Box::new(KmlReader { compressed }),
            Format::Shapefile { zipped } => Box::new(ShapefileReader { zipped }),
        }
    }
}

/// Split a `file[id1,id2]` argument into the path and the identifier list.
pub fn parse_polygon_argument(argument: &str) -> (PathBuf, Option<Vec<String>>) {
    static SUFFIX: OnceLock<Regex> = OnceLock::new();
    let suffix = SUFFIX.get_or_init(|| Regex::new(r"^(.*?)(\[(.*?)\])?$").expect("valid regex"));

    let Some(caps) = suffix.captures(argument) else {
        return (PathBuf::from(argument), None);
    };
    let path = PathBuf::from(&caps[1]);
    let variables = caps
        .get(3)
        .map(|m| m.as_str().split(',').map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect::<Vec<_>>())
        .filter(|v| !v.is_empty());
    (path, variables)
}

/// Resolve `path`, falling back to a case-insensitive match in its directory.
pub fn resolve_case_insensitive(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }

    let not_found = || Error::FileNotFound(path.to_path_buf());
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(not_found)?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let entries = fs::read_dir(&directory).map_err(|_| not_found())?;
    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_str().map_or(false, |n| n.eq_ignore_ascii_case(name)))
        .map(|entry| entry.path())
        .collect();
    matches.sort();
    let resolved = matches.pop().ok_or_else(not_found)?;
    debug!("Resolved {} to {}", path.display(), resolved.display());
    Ok(resolved)
}

/// Close-free, duplicate-free ring, or `None` with fewer than 3 distinct vertices.
fn clean_ring(mut coords: Vec<Coord<f64>>) -> Option<LineString<f64>> {
    coords.dedup();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if coords.len() < 3 {
        return None;
    }
    Some(LineString::new(coords))
}

/// Read a spatial file into a [`PolygonSet`] in WGS84.
///
/// When `variables` is given, only features whose identifier is listed are
/// kept.
pub fn read_polygons(path: &Path, variables: Option<&[String]>) -> Result<PolygonSet> {
    read_polygons_to(path, variables, &Crs::WGS84)
}

/// Read a spatial file into a [`PolygonSet`] in the `target` CRS.
pub fn read_polygons_to(path: &Path, variables: Option<&[String]>, target: &Crs) -> Result<PolygonSet> {
    let format = Format::from_path(path)?;
    let path = resolve_case_insensitive(path)?;
    info!("Loading file: {}", path.display());

    let raw = format.reader().read_rings(&path)?;
    info!("Found {} features in file ({})", raw.features.len(), raw.crs);
    let reprojector = Reprojector::new(&raw.crs, target)?;

    let mut polygons = Vec::new();
    for feature in raw.features {
        if let Some(variables) = variables {
            if !variables.iter().any(|v| *v == feature.id) {
                debug!("Skipping feature {}", feature.id);
                continue;
            }
        }

        for raw_polygon in feature.polygons {
            let Some(exterior) = clean_ring(reprojector.transform(&raw_polygon.exterior)?) else {
                warn!("Discarding degenerate ring in feature {}", feature.id);
                continue;
            };
            let mut interiors = Vec::with_capacity(raw_polygon.interiors.len());
            for ring in &raw_polygon.interiors {
                match clean_ring(reprojector.transform(ring)?) {
                    Some(ring) => interiors.push(ring),
                    None => warn!("Discarding degenerate hole in feature {}", feature.id),
                }
            }

            let polygon = Polygon::new(exterior, interiors);
            if validate::is_valid(&polygon) {
                polygons.push(polygon);
                continue;
            }

            let repaired = validate::repair(&polygon);
            if repaired.is_empty() {
                warn!("Feature {} could not be repaired without changing its area, discarding it", feature.id);
            } else {
                warn!("Feature {} is not a valid polygon, repaired into {} part(s)", feature.id, repaired.len());
            }
            polygons.extend(repaired);
        }
    }

    info!("Loaded {} polygons from file", polygons.len());
    Ok(PolygonSet::new(polygons, target.clone()))
}
