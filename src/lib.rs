pub mod cluster;
pub mod crs;
pub mod error;
pub mod formats;
pub mod polygon;
pub mod query;
pub mod validate;

use tracing::info;

pub use crate::crs::{Crs, Reprojector};
pub use crate::error::{Error, Result};
pub use crate::formats::{parse_polygon_argument, read_polygons, Format, GeometryFormat};
pub use crate::polygon::{Bounds, PolygonSet};
pub use crate::query::{Endpoints, OutputFormat, QueryBuilder, Spatial, TimeRange};

/// Post-processing applied to a polygon file before it becomes a spatial filter.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonOptions {
    /// Collapse the polygons into at most `cluster - 1` convex regions.
    pub cluster: Option<usize>,
    /// Douglas-Peucker tolerance, in degrees.
    pub simplify: Option<f64>,
    /// Largest exterior ring allowed in the set.
    pub max_vertices: Option<usize>,
    /// Tolerance increment when searching for `max_vertices`.
    pub tolerance_step: f64,
    pub max_tolerance: f64,
}

impl Default for PolygonOptions {
    fn default() -> Self {
        Self {
            cluster: None,
            simplify: None,
            max_vertices: None,
            tolerance_step: 1e-4,
            max_tolerance: 1.0,
        }
    }
}

/// Read `FILE[id1,id2]` and reduce it to the bounds and hull sent to the
/// search and subsetting services.
pub fn load_spatial_filter(argument: &str, options: &PolygonOptions) -> Result<Spatial> {
    let (path, variables) = parse_polygon_argument(argument);
    let mut set = read_polygons(&path, variables.as_deref())?;
    if set.is_empty() {
        return Err(Error::EmptySet);
    }

    if let Some(tolerance) = options.simplify {
        set = set.simplify(tolerance, true);
        info!("Simplified polygons to {} vertices", set.vertex_count());
    }
    if let Some(max_vertices) = options.max_vertices {
        let (reduced, _) = set.simplify_to_budget(max_vertices, options.tolerance_step, options.max_tolerance)?;
        set = reduced;
    }

    match options.cluster {
        Some(max_clusters) => {
            let regions = set.cluster(max_clusters);
            info!("Clustered {} polygons into {} regions", set.len(), regions.len());
            Spatial::from_regions(&set, &regions)
        }
        None => Spatial::from_polygons(&set),
    }
}
