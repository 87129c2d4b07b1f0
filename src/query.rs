//! Query strings for the CMR granule search and the NSIDC subsetting service.
//!
//! Nothing here talks to the network: every builder takes an explicit
//! [`Endpoints`] value and returns URLs for the download layer to request.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};
use crate::polygon::{Bounds, PolygonSet};

/// Altimetry products served by the NSIDC subsetter.
pub const PRODUCTS: &[(&str, &str)] = &[
    ("GLAH12", "GLAS/ICESat L2 Antarctic and Greenland Ice Sheet Altimetry"),
    ("ILATM2", "Icebridge Airborne Topographic Mapper Icessn Product"),
    ("ILATM1B", "Icebridge Airborne Topographic Mapper QFIT Elevation"),
    ("ILVIS1B", "Icebridge LVIS Geolocated Return Energy Waveforms"),
    ("ILVIS2", "Icebridge Land, Vegetation and Ice Sensor Elevation Product"),
    ("ATL03", "Global Geolocated Photon Data"),
    ("ATL04", "Normalized Relative Backscatter"),
    ("ATL06", "Land Ice Height"),
    ("ATL07", "Sea Ice Height"),
    ("ATL08", "Land and Vegetation Height"),
    ("ATL09", "Atmospheric Layer Characteristics"),
    ("ATL10", "Sea Ice Freeboard"),
    ("ATL12", "Ocean Surface Height"),
    ("ATL13", "Inland Water Surface Height"),
];

/// Remote hosts and paging used to build request URLs.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    pub cmr: String,
    pub subsetter: String,
    pub provider: String,
    pub page_size: usize,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            cmr: "https://cmr.earthdata.nasa.gov".to_string(),
            subsetter: "https://n5eil02u.ecs.nsidc.org".to_string(),
            provider: "NSIDC_ECS".to_string(),
            page_size: 100,
        }
    }
}

impl Endpoints {
    /// Number of subset request pages needed for `granules` results.
    pub fn page_count(&self, granules: usize) -> usize {
        granules.div_ceil(self.page_size.max(1))
    }
}

/// `minLon,minLat,maxLon,maxLat` with six decimals.
pub fn bbox_fragment(bounds: Bounds) -> String {
    let (min_x, min_y, max_x, max_y) = bounds;
    format!("{min_x:.6},{min_y:.6},{max_x:.6},{max_y:.6}")
}

/// `lon1,lat1,lon2,lat2,...` with six decimals.
pub fn polygon_fragment(xy: &[(f64, f64)]) -> String {
    xy.iter()
        .map(|(x, y)| format!("{x:.6},{y:.6}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// `&version=` parameters for every zero-padded width of `version`.
///
/// The subsetter and CMR match versions as strings, so `4` is sent as
/// `004`, `04` and `4`.
pub fn build_version_query(version: &str, desired_pad_length: usize) -> Result<String> {
    let version = version.trim();
    if version.len() > desired_pad_length {
        return Err(Error::InvalidVersion(version.to_string()));
    }
    let number: u32 = version.parse().map_err(|_| Error::InvalidVersion(version.to_string()))?;
    let digits = number.to_string().len();

    let mut query = String::new();
    for width in (digits..=desired_pad_length).rev() {
        query.push_str(&format!("&version={number:0width$}"));
    }
    Ok(query)
}

/// Spatial subset from either an explicit box or a polygon file.
#[derive(Debug, Clone, PartialEq)]
pub enum Spatial {
    BoundingBox(Bounds),
    Polygon {
        bounds: Bounds,
        /// Counter-clockwise hull of the whole polygon set.
        hull: Vec<(f64, f64)>,
        /// Hulls of clustered regions, used as alternative CMR polygons.
        regions: Vec<Vec<(f64, f64)>>,
    },
}

impl Spatial {
    /// Bounds and convex hull of a polygon set.
    pub fn from_polygons(set: &PolygonSet) -> Result<Spatial> {
        let bounds = set.bounds()?;
        let hull = PolygonSet::exterior_xy(&set.convex_hull()?);
        Ok(Spatial::Polygon { bounds, hull, regions: Vec::new() })
    }

    /// As [`Spatial::from_polygons`], searching CMR with one polygon per
    /// member of `regions`.
    pub fn from_regions(set: &PolygonSet, regions: &PolygonSet) -> Result<Spatial> {
        let bounds = set.bounds()?;
        let hull = PolygonSet::exterior_xy(&set.convex_hull()?);
        let regions = regions.iter().map(PolygonSet::exterior_xy).collect();
        Ok(Spatial::Polygon { bounds, hull, regions })
    }

    pub fn bounds(&self) -> Bounds {
        match self {
            Spatial::BoundingBox(bounds) => *bounds,
            Spatial::Polygon { bounds, .. } => *bounds,
        }
    }

    fn cmr_flags(&self) -> String {
        let mut flags = format!("&bounding_box={}", bbox_fragment(self.bounds()));
        if let Spatial::Polygon { regions, .. } = self {
            if regions.len() > 1 {
                for region in regions {
                    flags.push_str(&format!("&polygon[]={}", polygon_fragment(region)));
                }
                flags.push_str("&options[polygon][or]=true");
            }
        }
        flags
    }

    fn subset_flags(&self) -> String {
        match self {
            Spatial::BoundingBox(bounds) => {
                let fragment = bbox_fragment(*bounds);
                format!("&bounding_box={fragment}&bbox={fragment}")
            }
            Spatial::Polygon { bounds, hull, .. } => {
                format!("&bounding_box={}&polygon={}", bbox_fragment(*bounds), polygon_fragment(hull))
            }
        }
    }
}

/// Start and end of a temporal subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

fn parse_time(value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(time) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(time);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| Error::InvalidTime(value.to_string()))
}

impl TimeRange {
    pub fn parse(start: &str, end: &str) -> Result<TimeRange> {
        let start = parse_time(start)?;
        let end = parse_time(end)?;
        if end < start {
            return Err(Error::InvalidTime(format!("end {end} is before start {start}")));
        }
        Ok(TimeRange { start, end })
    }

    fn fragment(&self) -> String {
        const ISO: &str = "%Y-%m-%dT%H:%M:%S";
        format!("{},{}", self.start.format(ISO), self.end.format(ISO))
    }
}

/// Output formats the subsetter can convert to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    TabularAscii,
    NetCdf4,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::TabularAscii => "TABULAR_ASCII",
            OutputFormat::NetCdf4 => "NetCDF4",
        }
    }

    pub fn parse(value: &str) -> Option<OutputFormat> {
        match value {
            "TABULAR_ASCII" => Some(OutputFormat::TabularAscii),
            "NetCDF4" => Some(OutputFormat::NetCdf4),
            _ => None,
        }
    }
}

/// Query parameters for one product.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryBuilder {
    product: String,
    version_flag: String,
    spatial: Option<Spatial>,
    time: Option<TimeRange>,
    format: Option<OutputFormat>,
}

impl QueryBuilder {
    pub fn new(product: &str) -> Self {
        Self {
            product: product.to_string(),
            version_flag: String::new(),
            spatial: None,
            time: None,
            format: None,
        }
    }

    pub fn version(mut self, version: &str) -> Result<Self> {
        self.version_flag = build_version_query(version, 3)?;
        Ok(self)
    }

    pub fn spatial(mut self, spatial: Spatial) -> Self {
        self.spatial = Some(spatial);
        self
    }

    pub fn time(mut self, time: TimeRange) -> Self {
        self.time = Some(time);
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Scrolling CMR granule search URL.
    pub fn cmr_url(&self, endpoints: &Endpoints) -> String {
        let mut url = format!(
            "{}/search/granules.json?short_name={}&provider={}&sort_key[]=start_date&sort_key[]=producer_granule_id&scroll=true",
            endpoints.cmr.trim_end_matches('/'),
            self.product,
            endpoints.provider
        );
        url.push_str(&self.version_flag);
        if let Some(spatial) = &self.spatial {
            url.push_str(&spatial.cmr_flags());
        }
        if let Some(time) = &self.time {
            url.push_str(&format!("&temporal={}", time.fragment()));
        }
        url.push_str(&format!("&page_size={}", endpoints.page_size));
        url
    }

    /// Subsetting request URL for one page of granules, numbered from 1.
    pub fn subset_url(&self, endpoints: &Endpoints, page_num: usize) -> String {
        let mut url = format!(
            "{}/egi/request?short_name={}",
            endpoints.subsetter.trim_end_matches('/'),
            self.product
        );
        url.push_str(&self.version_flag);
        if let Some(spatial) = &self.spatial {
            url.push_str(&spatial.subset_flags());
        }
        if let Some(time) = &self.time {
            url.push_str(&format!("&time={}", time.fragment()));
        }
        if let Some(format) = &self.format {
            url.push_str(&format!("&format={}", format.as_str()));
        }
        url.push_str(&format!("&page_size={}&page_num={}&request_mode=stream", endpoints.page_size, page_num));
        url
    }
}
