//! Polygon validity checks and repair.
//!
//! A polygon is valid when every ring has at least three distinct vertices,
//! encloses a non-zero area, and no ring crosses itself or another ring.
//! Rings may touch each other at isolated points.

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, BooleanOps, Coord, Intersects, Line, LineString, MultiPolygon, Point, Polygon};
use rstar::primitives::{GeomWithData, Line as IndexedLine};
use rstar::{RTree, RTreeObject};

struct Segment {
    ring: usize,
    index: usize,
    line: Line<f64>,
}

type IndexedSegment = GeomWithData<IndexedLine<[f64; 2]>, usize>;

/// Number of distinct vertices in a ring, ignoring the closing coordinate.
fn distinct_vertices(ring: &LineString<f64>) -> usize {
    let mut coords: Vec<Coord<f64>> = ring.0.clone();
    coords.dedup();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    coords.len()
}

fn ring_segments(ring: &LineString<f64>, ring_idx: usize, segments: &mut Vec<Segment>) -> usize {
    let mut count = 0;
    for line in ring.lines() {
        // repeated vertices add zero-length segments, which neither cross nor overlap
        if line.start == line.end {
            continue;
        }
        segments.push(Segment { ring: ring_idx, index: count, line });
        count += 1;
    }
    count
}

/// True when two segments of the same or different rings conflict.
fn conflicts(a: &Segment, b: &Segment, ring_len: usize) -> bool {
    let Some(intersection) = line_intersection(a.line, b.line) else {
        return false;
    };

    if a.ring != b.ring {
        return match intersection {
            LineIntersection::SinglePoint { is_proper, .. } => is_proper,
            LineIntersection::Collinear { .. } => true,
        };
    }

    let (lo, hi) = if a.index < b.index { (a.index, b.index) } else { (b.index, a.index) };
    let adjacent = hi == lo + 1 || (lo == 0 && hi + 1 == ring_len);
    match intersection {
        // neighbours always share their common vertex
        LineIntersection::SinglePoint { .. } => !adjacent,
        LineIntersection::Collinear { .. } => true,
    }
}

/// Check a polygon for self-intersections and degenerate rings.
pub fn is_valid(polygon: &Polygon<f64>) -> bool {
    let rings: Vec<&LineString<f64>> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors().iter())
        .collect();

    for ring in &rings {
        if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return false;
        }
        if !ring.is_closed() || distinct_vertices(ring) < 3 {
            return false;
        }
    }
    if Polygon::new(polygon.exterior().clone(), vec![]).unsigned_area() == 0.0 {
        return false;
    }

    let mut segments = Vec::new();
    let ring_lengths: Vec<usize> = rings
        .iter()
        .enumerate()
        .map(|(idx, ring)| ring_segments(ring, idx, &mut segments))
        .collect();

    let tree: RTree<IndexedSegment> = RTree::bulk_load(
        segments
            .iter()
            .enumerate()
            .map(|(idx, s)| {
                let line = IndexedLine::new([s.line.start.x, s.line.start.y], [s.line.end.x, s.line.end.y]);
                GeomWithData::new(line, idx)
            })
            .collect(),
    );

    for candidate in tree.iter() {
        let a = &segments[candidate.data];
        for other in tree.locate_in_envelope_intersecting(&candidate.envelope()) {
            if other.data <= candidate.data {
                continue;
            }
            let b = &segments[other.data];
            if conflicts(a, b, ring_lengths[a.ring]) {
                return false;
            }
        }
    }

    // holes have to sit inside the shell
    let shell = Polygon::new(polygon.exterior().clone(), vec![]);
    polygon
        .interiors()
        .iter()
        .all(|hole| hole.0.first().map_or(false, |c| shell.intersects(&Point::from(*c))))
}

/// Resolve self-intersections the way a zero-distance buffer does.
///
/// The ring is pushed through a polygon union, which splits it at every
/// crossing and keeps the enclosed area. An empty result means the ring
/// enclosed no area or could not be untangled; callers drop it.
pub fn repair(polygon: &Polygon<f64>) -> Vec<Polygon<f64>> {
    let unioned = MultiPolygon::new(vec![polygon.clone()]).union(&MultiPolygon::new(Vec::new()));
    let parts: Vec<Polygon<f64>> = unioned
        .0
        .into_iter()
        .filter(|part| part.unsigned_area() > 0.0)
        .collect();
    if parts.iter().all(is_valid) {
        parts
    } else {
        Vec::new()
    }
}
