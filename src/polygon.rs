//! The multi-polygon every spatial file is reduced to.
//!
//! A [`PolygonSet`] is built once from a georeferenced file and never mutated
//! afterwards: simplification, hulls and clustering all hand back new values.

use geo::algorithm::orient::{Direction, Orient};
use geo::{BoundingRect, ConvexHull, Coord, LineString, MultiPolygon, Polygon, Simplify};
use tracing::{debug, info};

use crate::cluster;
use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::validate;

/// Axis-aligned extent as `(min_x, min_y, max_x, max_y)`.
pub type Bounds = (f64, f64, f64, f64);

#[derive(Debug, Clone, PartialEq)]
pub struct PolygonSet {
    polygons: Vec<Polygon<f64>>,
    crs: Crs,
}

impl Default for PolygonSet {
    fn default() -> Self {
        Self::new(Vec::new(), Crs::WGS84)
    }
}

impl FromIterator<Polygon<f64>> for PolygonSet {
    fn from_iter<I: IntoIterator<Item = Polygon<f64>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect(), Crs::WGS84)
    }
}

impl PolygonSet {
    pub fn new(polygons: Vec<Polygon<f64>>, crs: Crs) -> Self {
        Self { polygons, crs }
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn polygons(&self) -> &[Polygon<f64>] {
        &self.polygons
    }

    pub fn iter(&self) -> impl Iterator<Item = &Polygon<f64>> {
        self.polygons.iter()
    }

    pub fn to_multi_polygon(&self) -> MultiPolygon<f64> {
        MultiPolygon::new(self.polygons.clone())
    }

    /// True if every member passes [`validate::is_valid`].
    pub fn is_valid(&self) -> bool {
        self.polygons.iter().all(validate::is_valid)
    }

    /// Total number of coordinates across all rings of all members.
    pub fn vertex_count(&self) -> usize {
        self.polygons
            .iter()
            .map(|p| p.exterior().0.len() + p.interiors().iter().map(|r| r.0.len()).sum::<usize>())
            .sum()
    }

    /// Largest exterior ring, in coordinates, over all members.
    pub fn max_exterior_vertices(&self) -> usize {
        self.polygons.iter().map(|p| p.exterior().0.len()).max().unwrap_or(0)
    }

    /// Bounding box over all members.
    pub fn bounds(&self) -> Result<Bounds> {
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        let mut found = false;

        for polygon in &self.polygons {
            if let Some(bbox) = polygon.bounding_rect() {
                min_x = min_x.min(bbox.min().x);
                min_y = min_y.min(bbox.min().y);
                max_x = max_x.max(bbox.max().x);
                max_y = max_y.max(bbox.max().y);
                found = true;
            }
        }

        if !found {
            return Err(Error::EmptySet);
        }
        Ok((min_x, min_y, max_x, max_y))
    }

    /// Smallest convex polygon containing every member, wound counter-clockwise.
    pub fn convex_hull(&self) -> Result<Polygon<f64>> {
        if self.polygons.is_empty() {
            return Err(Error::EmptySet);
        }
        Ok(oriented_hull(&self.to_multi_polygon()))
    }

    /// Exterior ring coordinates, closing vertex included.
    pub fn exterior_xy(polygon: &Polygon<f64>) -> Vec<(f64, f64)> {
        polygon.exterior().coords().map(|c| (c.x, c.y)).collect()
    }

    /// Douglas-Peucker simplification of every member.
    ///
    /// With `preserve_topology` a member whose simplified form would collapse
    /// or self-intersect is retried at halved tolerances and kept as it was
    /// if none of them gives a valid polygon. Without it such members are
    /// dropped.
    pub fn simplify(&self, tolerance: f64, preserve_topology: bool) -> PolygonSet {
        let mut polygons = Vec::with_capacity(self.polygons.len());
        for polygon in &self.polygons {
            let simplified = polygon.simplify(&tolerance);
            if validate::is_valid(&simplified) {
                polygons.push(simplified);
            } else if preserve_topology {
                polygons.push(simplify_preserving(polygon, tolerance));
            } else {
                debug!("Dropping polygon collapsed by simplification at tolerance {}", tolerance);
            }
        }
        PolygonSet::new(polygons, self.crs.clone())
    }

    /// Simplify with increasing tolerance until no member's exterior has more
    /// than `max_vertices` coordinates.
    ///
    /// Tolerances `0, step, 2*step, 4*step, ...` are tried, doubling up to
    /// `max_tolerance`, which is always tried last. The first set that fits
    /// is returned along with the tolerance used.
    pub fn simplify_to_budget(&self, max_vertices: usize, step: f64, max_tolerance: f64) -> Result<(PolygonSet, f64)> {
        if self.polygons.is_empty() {
            return Err(Error::EmptySet);
        }
        if !(step > 0.0) {
            return Err(Error::VertexBudget { max_vertices, tolerance: 0.0 });
        }

        let mut tolerances = vec![0.0];
        let mut tolerance = step;
        while tolerance < max_tolerance {
            tolerances.push(tolerance);
            tolerance *= 2.0;
        }
        tolerances.push(max_tolerance);

        for tolerance in tolerances {
            let simplified = if tolerance == 0.0 { self.clone() } else { self.simplify(tolerance, true) };
            let largest = simplified.max_exterior_vertices();
            debug!("Tolerance {:.6}: largest ring has {} vertices", tolerance, largest);
            if largest <= max_vertices {
                info!("Reduced polygons to at most {} vertices (tolerance {:.6})", largest, tolerance);
                return Ok((simplified, tolerance));
            }
        }
        Err(Error::VertexBudget { max_vertices, tolerance: max_tolerance })
    }

    /// Split into consecutive sets of at most `max_features` members.
    pub fn chunks(&self, max_features: usize) -> Vec<PolygonSet> {
        let size = max_features.max(1);
        self.polygons
            .chunks(size)
            .map(|chunk| PolygonSet::new(chunk.to_vec(), self.crs.clone()))
            .collect()
    }

    /// Collapse the members into at most `max_clusters - 1` convex regions.
    pub fn cluster(&self, max_clusters: usize) -> PolygonSet {
        cluster::cluster_polygons(self, max_clusters)
    }
}

const PRESERVE_RETRIES: usize = 4;

fn simplify_preserving(polygon: &Polygon<f64>, tolerance: f64) -> Polygon<f64> {
    let mut tolerance = tolerance;
    for _ in 0..PRESERVE_RETRIES {
        tolerance /= 2.0;
        let simplified = polygon.simplify(&tolerance);
        if validate::is_valid(&simplified) {
            return simplified;
        }
    }
    polygon.clone()
}

/// Convex hull of a multipolygon with a counter-clockwise exterior that starts
/// at its lowest-x (then lowest-y) vertex.
pub(crate) fn oriented_hull(geometry: &MultiPolygon<f64>) -> Polygon<f64> {
    let hull = geometry.convex_hull().orient(Direction::Default);
    let mut coords: Vec<Coord<f64>> = hull.exterior().0.clone();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if let Some(start) = coords
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)))
        .map(|(idx, _)| idx)
    {
        coords.rotate_left(start);
    }
    Polygon::new(LineString::new(coords), vec![])
}
