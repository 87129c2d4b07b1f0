use std::path::PathBuf;

/// Errors raised while reading polygon files and building subset queries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unlisted polygon type ({0})")]
    UnsupportedFormat(String),

    #[error("{} not found in file system", .0.display())]
    FileNotFound(PathBuf),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("No {suffix} member in archive {}", .archive.display())]
    MissingMember { archive: PathBuf, suffix: &'static str },

    #[error("Polygon set is empty")]
    EmptySet,

    #[error("Version string too long: \"{0}\"")]
    InvalidVersion(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("No tolerance up to {tolerance} reduces polygons to {max_vertices} vertices")]
    VertexBudget { max_vertices: usize, tolerance: f64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GeoJSON parsing error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("KML parsing error: {0}")]
    Kml(#[from] kml::Error),

    #[error("Shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),

    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, Error>;
