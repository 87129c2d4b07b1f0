//! Coordinate reference systems and the transformations between them.
//!
//! A [`Crs`] is either an EPSG code or a raw PROJ.4 definition. EPSG codes are
//! resolved through the EPSG registry shipped with `crs-definitions`; `.prj`
//! files without an authority are converted from WKT.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use geo::Coord;
use proj4rs::{proj::Proj as Proj4, transform::transform};
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};

/// Identifier of the coordinate reference system a set of rings is drawn in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Crs {
    Epsg(u32),
    Proj4(String),
}

impl Crs {
    /// WGS84 geographic longitude/latitude.
    pub const WGS84: Crs = Crs::Epsg(4326);

    /// PROJ.4 definition for this CRS.
    pub fn proj4(&self) -> Result<String> {
        match self {
            Crs::Epsg(code) => epsg_proj4(*code)
                .ok_or_else(|| Error::Projection(format!("unknown EPSG code {code}"))),
            Crs::Proj4(definition) => Ok(definition.clone()),
        }
    }

    /// True if coordinates are longitude/latitude in degrees.
    pub fn is_geographic(&self) -> Result<bool> {
        let definition = self.proj4()?;
        Ok(definition.split_whitespace().any(|token| {
            matches!(token, "+proj=longlat" | "+proj=latlong" | "+proj=lonlat" | "+proj=latlon")
        }))
    }

    /// Identify the CRS of an ESRI `.prj` (WKT1) definition.
    ///
    /// A trailing EPSG authority, ESRI UTM names and plain geographic systems
    /// map to EPSG codes; anything else is converted to a PROJ.4 string.
    pub fn from_wkt(wkt: &str) -> Result<Crs> {
        static AUTHORITY: OnceLock<Regex> = OnceLock::new();
        static ESRI_UTM: OnceLock<Regex> = OnceLock::new();

        let wkt = wkt.trim();
        let authority = AUTHORITY.get_or_init(|| {
            Regex::new(r#"AUTHORITY\[\s*"EPSG"\s*,\s*"?(\d+)"?\s*\]\s*\]\s*$"#).expect("valid regex")
        });
        if let Some(code) = authority.captures(wkt).and_then(|c| c[1].parse().ok()) {
            return Ok(Crs::Epsg(code));
        }

        let esri_utm = ESRI_UTM.get_or_init(|| {
            Regex::new(r#"^PROJCS\[\s*"(WGS_1984|NAD_1983)_UTM_Zone_(\d{1,2})([NS])""#).expect("valid regex")
        });
        if let Some(caps) = esri_utm.captures(wkt) {
            let zone: u32 = caps[2].parse().map_err(|_| Error::Projection(wkt.to_string()))?;
            return match (&caps[1], &caps[3]) {
                ("WGS_1984", "N") => Ok(Crs::Epsg(32600 + zone)),
                ("WGS_1984", _) => Ok(Crs::Epsg(32700 + zone)),
                ("NAD_1983", "N") => Ok(Crs::Epsg(26900 + zone)),
                _ => Err(Error::Projection(format!("unsupported projection definition: {wkt}"))),
            };
        }

        if wkt.starts_with("GEOGCS") {
            if wkt.contains("North_American_1983") || wkt.contains("NAD83") {
                return Ok(Crs::Epsg(4269));
            }
            if wkt.contains("WGS_1984") || wkt.contains("WGS 84") || wkt.contains("WGS84") {
                return Ok(Crs::WGS84);
            }
        }

        let definition = proj4wkt::wkt_to_projstring(wkt)
            .map_err(|e| Error::Projection(format!("unsupported projection definition: {e:?}: {wkt}")))?;
        debug!("Converted projection definition to {}", definition);
        Ok(Crs::Proj4(definition))
    }
}

impl Default for Crs {
    fn default() -> Self {
        Crs::WGS84
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{code}"),
            Crs::Proj4(definition) => f.write_str(definition),
        }
    }
}

impl FromStr for Crs {
    type Err = Error;

    /// Accepts `EPSG:N`, `epsg:N`, `urn:ogc:def:crs:EPSG::N`, `CRS84` URNs and
    /// raw `+proj=` strings.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with("+proj=") {
            return Ok(Crs::Proj4(s.to_string()));
        }
        let upper = s.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Ok(Crs::WGS84);
        }
        if let Some(idx) = upper.find("EPSG") {
            let code = upper[idx + 4..].trim_start_matches(':');
            // urn:ogc:def:crs:EPSG:6.3:4326 carries a version before the code
            let code = code.rsplit(':').next().unwrap_or(code);
            return code
                .parse()
                .map(Crs::Epsg)
                .map_err(|_| Error::Projection(format!("cannot parse CRS identifier {s}")));
        }
        Err(Error::Projection(format!("cannot parse CRS identifier {s}")))
    }
}

/// PROJ.4 definition of an EPSG code from the bundled EPSG registry.
pub fn epsg_proj4(code: u32) -> Option<String> {
    let code = u16::try_from(code).ok()?;
    let def = crs_definitions::from_code(code)?;
    // grid shift files are never loaded
    let definition = def
        .proj4
        .split_whitespace()
        .filter(|token| !matches!(*token, "+wktext" | "+nadgrids=@null"))
        .collect::<Vec<_>>()
        .join(" ");
    Some(definition)
}

/// Transforms coordinates from a source CRS to a target CRS.
///
/// Input and output are always (x, y) = (longitude, latitude) for geographic
/// systems and (easting, northing) for projected ones, whatever the axis
/// order the authority defines.
pub struct Reprojector {
    source: Crs,
    target: Crs,
    from: Proj4,
    to: Proj4,
    from_geographic: bool,
    to_geographic: bool,
}

impl Reprojector {
    pub fn new(source: &Crs, target: &Crs) -> Result<Self> {
        let build = |crs: &Crs| -> Result<Proj4> {
            let proj_string = crs.proj4()?;
            Proj4::from_proj_string(&proj_string)
                .map_err(|e| Error::Projection(format!("failed to build PROJ.4 {proj_string}: {e}")))
        };

        Ok(Self {
            from: build(source)?,
            to: build(target)?,
            from_geographic: source.is_geographic()?,
            to_geographic: target.is_geographic()?,
            source: source.clone(),
            target: target.clone(),
        })
    }

    pub fn is_identity(&self) -> bool {
        self.source == self.target
    }

    pub fn transform_coord(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        if self.is_identity() {
            return Ok(coord);
        }

        // proj4rs works in radians for geographic systems
        let mut point = if self.from_geographic {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };
        transform(&self.from, &self.to, &mut point).map_err(|e| {
            Error::Projection(format!("{} -> {} failed at ({}, {}): {e}", self.source, self.target, coord.x, coord.y))
        })?;

        let coord = if self.to_geographic {
            Coord { x: point.0.to_degrees(), y: point.1.to_degrees() }
        } else {
            Coord { x: point.0, y: point.1 }
        };
        if !coord.x.is_finite() || !coord.y.is_finite() {
            return Err(Error::Projection(format!("{} -> {} produced a non-finite coordinate", self.source, self.target)));
        }
        Ok(coord)
    }

    /// Transform a sequence of coordinates, preserving order.
    pub fn transform(&self, coords: &[Coord<f64>]) -> Result<Vec<Coord<f64>>> {
        coords.iter().map(|c| self.transform_coord(*c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_identifiers() {
        assert_eq!("EPSG:3413".parse::<Crs>().unwrap(), Crs::Epsg(3413));
        assert_eq!("epsg:4326".parse::<Crs>().unwrap(), Crs::WGS84);
        assert_eq!("urn:ogc:def:crs:EPSG::3031".parse::<Crs>().unwrap(), Crs::Epsg(3031));
        assert_eq!("urn:ogc:def:crs:OGC:1.3:CRS84".parse::<Crs>().unwrap(), Crs::WGS84);
        assert!(matches!("+proj=longlat +datum=WGS84".parse::<Crs>().unwrap(), Crs::Proj4(_)));
        assert!("not a crs".parse::<Crs>().is_err());
    }

    #[test]
    fn unknown_epsg_code_is_a_projection_error() {
        let err = Reprojector::new(&Crs::Epsg(999_999), &Crs::WGS84).err().unwrap();
        assert!(matches!(err, Error::Projection(_)));
    }

    #[test]
    fn identifies_prj_definitions() {
        let epsg = r#"PROJCS["WGS 84 / NSIDC Sea Ice Polar Stereographic North",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]],AUTHORITY["EPSG","4326"]],PROJECTION["Polar_Stereographic"],AUTHORITY["EPSG","3413"]]"#;
        assert_eq!(Crs::from_wkt(epsg).unwrap(), Crs::Epsg(3413));

        let utm = r#"PROJCS["WGS_1984_UTM_Zone_22N",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]]],PROJECTION["Transverse_Mercator"]]"#;
        assert_eq!(Crs::from_wkt(utm).unwrap(), Crs::Epsg(32622));

        let geographic = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;
        assert_eq!(Crs::from_wkt(geographic).unwrap(), Crs::WGS84);
    }

    #[test]
    fn identity_leaves_coordinates_untouched() {
        let reprojector = Reprojector::new(&Crs::WGS84, &Crs::WGS84).unwrap();
        let coord = Coord { x: -49.5, y: 69.1 };
        assert_eq!(reprojector.transform_coord(coord).unwrap(), coord);
    }

    #[test]
    fn utm_round_trip_reproduces_coordinates() {
        let utm = Crs::Epsg(32622);
        let forward = Reprojector::new(&Crs::WGS84, &utm).unwrap();
        let backward = Reprojector::new(&utm, &Crs::WGS84).unwrap();

        let coords = vec![
            Coord { x: -50.33333, y: 68.56667 },
            Coord { x: -49.33333, y: 69.56667 },
            Coord { x: -51.0, y: 70.25 },
        ];
        let projected = forward.transform(&coords).unwrap();
        // metres, not degrees
        assert!(projected[0].x.abs() > 1000.0);
        let back = backward.transform(&projected).unwrap();
        for (a, b) in coords.iter().zip(back.iter()) {
            assert!((a.x - b.x).abs() < 1e-6, "{a:?} vs {b:?}");
            assert!((a.y - b.y).abs() < 1e-6, "{a:?} vs {b:?}");
        }
    }

    fn assert_round_trip(crs: Crs, coords: &[Coord<f64>]) {
        let forward = Reprojector::new(&Crs::WGS84, &crs).unwrap();
        let backward = Reprojector::new(&crs, &Crs::WGS84).unwrap();
        let projected = forward.transform(coords).unwrap();
        let back = backward.transform(&projected).unwrap();
        for (a, b) in coords.iter().zip(back.iter()) {
            assert!((a.x - b.x).abs() < 1e-6, "{crs}: {a:?} vs {b:?}");
            assert!((a.y - b.y).abs() < 1e-6, "{crs}: {a:?} vs {b:?}");
        }
    }

    #[test]
    fn polar_stereographic_round_trips() {
        let greenland = [Coord { x: -49.5, y: 69.1 }, Coord { x: -38.2, y: 72.6 }, Coord { x: -60.0, y: 82.0 }];
        assert_round_trip(Crs::Epsg(3413), &greenland);
        assert_round_trip(Crs::Epsg(3995), &greenland);

        let antarctica = [Coord { x: -100.0, y: -75.0 }, Coord { x: 0.0, y: -70.5 }, Coord { x: 150.0, y: -85.0 }];
        assert_round_trip(Crs::Epsg(3031), &antarctica);
        assert_round_trip(Crs::Epsg(3976), &antarctica);
    }

    #[test]
    fn south_pole_is_origin_of_antarctic_stereographic() {
        let forward = Reprojector::new(&Crs::WGS84, &Crs::Epsg(3031)).unwrap();
        let pole = forward.transform_coord(Coord { x: 0.0, y: -90.0 }).unwrap();
        assert!(pole.x.abs() < 1e-3 && pole.y.abs() < 1e-3, "{pole:?}");
    }

    #[test]
    fn registry_covers_nsidc_frames() {
        for code in [3408, 3411, 3412, 3575, 6931, 32661, 2193] {
            assert!(Reprojector::new(&Crs::Epsg(code), &Crs::WGS84).is_ok(), "EPSG:{code}");
        }
    }

    #[test]
    fn prj_without_authority_is_converted() {
        let antarctic = r#"PROJCS["WGS 84 / Antarctic Polar Stereographic",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433]],PROJECTION["Polar_Stereographic"],PARAMETER["latitude_of_origin",-71],PARAMETER["central_meridian",0],PARAMETER["false_easting",0],PARAMETER["false_northing",0],UNIT["metre",1]]"#;
        let crs = Crs::from_wkt(antarctic).unwrap();
        assert!(matches!(crs, Crs::Proj4(_)));

        let backward = Reprojector::new(&crs, &Crs::WGS84).unwrap();
        let near_pole = backward.transform_coord(Coord { x: 1000.0, y: 1000.0 }).unwrap();
        assert!(near_pole.y < -60.0, "{near_pole:?}");
    }

    #[test]
    fn mercator_keeps_x_then_y_order() {
        let forward = Reprojector::new(&Crs::WGS84, &Crs::Epsg(3857)).unwrap();
        let projected = forward.transform_coord(Coord { x: 10.0, y: 0.0 }).unwrap();
        assert!((projected.x - 1_113_194.9).abs() < 1.0);
        assert!(projected.y.abs() < 1e-6);
    }
}
