use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use ::shapefile::{Point, PointM, PointZ, PolygonRing, Shape, ShapeReader};
use geo::Coord;
use tracing::{debug, warn};
use zip::ZipArchive;

use super::{resolve_case_insensitive, GeometryFormat, RawFeature, RawGeometry, RawPolygon};
use crate::crs::Crs;
use crate::error::{Error, Result};

/// Reader for ESRI shapefiles, bare or inside a `.zip`.
///
/// Records are identified by their zero-based position in the file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapefileReader {
    pub zipped: bool,
}

impl GeometryFormat for ShapefileReader {
    fn read_rings(&self, path: &Path) -> Result<RawGeometry> {
        let (shp, prj) = if self.zipped { read_zipped(path)? } else { read_unzipped(path)? };

        let crs = match prj {
            Some(wkt) => Crs::from_wkt(&wkt)?,
            None => {
                warn!("No .prj found for {}, assuming WGS84", path.display());
                Crs::WGS84
            }
        };
        let shapes = ShapeReader::new(Cursor::new(shp))?.read()?;
        Ok(RawGeometry { crs, features: shape_features(shapes) })
    }
}

fn read_unzipped(path: &Path) -> Result<(Vec<u8>, Option<String>)> {
    let shp = fs::read(path)?;
    let prj = match resolve_case_insensitive(&path.with_extension("prj")) {
        Ok(prj_path) => Some(fs::read_to_string(prj_path)?),
        Err(Error::FileNotFound(_)) => None,
        Err(e) => return Err(e),
    };
    Ok((shp, prj))
}

/// Locate the `.shp` and its `.prj` inside a zip without extracting to disk.
fn read_zipped(path: &Path) -> Result<(Vec<u8>, Option<String>)> {
    let mut archive = ZipArchive::new(fs::File::open(path)?)?;

    let shp_name = member_with_suffix(&archive, ".shp", None)
        .ok_or_else(|| Error::MissingMember { archive: path.to_path_buf(), suffix: ".shp" })?;
    let stem = &shp_name[..shp_name.len() - ".shp".len()];
    let prj_name = member_with_suffix(&archive, ".prj", Some(stem));
    debug!("Reading {} from {}", shp_name, path.display());

    let mut shp = Vec::new();
    archive.by_name(&shp_name)?.read_to_end(&mut shp)?;

    let prj = match prj_name {
        Some(name) => {
            let mut wkt = String::new();
            archive.by_name(&name)?.read_to_string(&mut wkt)?;
            Some(wkt)
        }
        None => None,
    };
    Ok((shp, prj))
}

fn member_with_suffix<R: Read + Seek>(archive: &ZipArchive<R>, suffix: &str, stem: Option<&str>) -> Option<String> {
    archive
        .file_names()
        .filter(|name| name.to_ascii_lowercase().ends_with(suffix))
        .filter(|name| stem.map_or(true, |stem| name[..name.len() - suffix.len()].eq_ignore_ascii_case(stem)))
        .min()
        .map(str::to_string)
}

/// Group rings into polygons: each outer ring collects the holes after it.
fn polygon_rings<P>(rings: &[PolygonRing<P>], xy: fn(&P) -> Coord<f64>) -> Vec<RawPolygon> {
    let mut polygons: Vec<RawPolygon> = Vec::new();
    for ring in rings {
        match ring {
            PolygonRing::Outer(points) => {
                polygons.push(RawPolygon::from_ring(points.iter().map(xy).collect()));
            }
            PolygonRing::Inner(points) => {
                let coords = points.iter().map(xy).collect();
                match polygons.last_mut() {
                    Some(polygon) => polygon.interiors.push(coords),
                    // counter-clockwise ring with no shell to belong to
                    None => polygons.push(RawPolygon::from_ring(coords)),
                }
            }
        }
    }
    polygons
}

fn polyline_parts<P>(parts: &[Vec<P>], xy: fn(&P) -> Coord<f64>) -> Vec<RawPolygon> {
    parts
        .iter()
        .map(|part| RawPolygon::from_ring(part.iter().map(xy).collect()))
        .collect()
}

fn point_xy(p: &Point) -> Coord<f64> {
    Coord { x: p.x, y: p.y }
}

fn point_m_xy(p: &PointM) -> Coord<f64> {
    Coord { x: p.x, y: p.y }
}

fn point_z_xy(p: &PointZ) -> Coord<f64> {
    Coord { x: p.x, y: p.y }
}

fn shape_features(shapes: Vec<Shape>) -> Vec<RawFeature> {
    shapes
        .into_iter()
        .enumerate()
        .filter_map(|(index, shape)| {
            let polygons = match &shape {
                Shape::Polygon(p) => polygon_rings(p.rings(), point_xy),
                Shape::PolygonM(p) => polygon_rings(p.rings(), point_m_xy),
                Shape::PolygonZ(p) => polygon_rings(p.rings(), point_z_xy),
                Shape::Polyline(l) => polyline_parts(l.parts(), point_xy),
                Shape::PolylineM(l) => polyline_parts(l.parts(), point_m_xy),
                Shape::PolylineZ(l) => polyline_parts(l.parts(), point_z_xy),
                _ => {
                    debug!("Ignoring non-polygon shape at record {}", index);
                    return None;
                }
            };
            Some(RawFeature { id: index.to_string(), polygons })
        })
        .collect()
}
