use std::fs;
use std::io::Write;
use std::path::Path;

use altimetry_subset::{
    load_spatial_filter, read_polygons, Crs, Error, PolygonOptions, PolygonSet, Reprojector, Spatial,
};
use geo::Coord;
use shapefile::dbase::{FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, PolygonRing};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const TWO_SQUARES: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {"type": "Feature", "id": "A", "properties": {},
         "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
        {"type": "Feature", "id": "B", "properties": {},
         "geometry": {"type": "Polygon", "coordinates": [[[10,10],[11,10],[11,11],[10,11],[10,10]]]}}
    ]
}"#;

const THREE_SQUARES: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {"type": "Feature", "id": "A", "properties": {},
         "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
        {"type": "Feature", "id": "B", "properties": {},
         "geometry": {"type": "Polygon", "coordinates": [[[10,10],[11,10],[11,11],[10,11],[10,10]]]}},
        {"type": "Feature", "id": "C", "properties": {},
         "geometry": {"type": "Polygon", "coordinates": [[[20,20],[21,20],[21,21],[20,21],[20,20]]]}}
    ]
}"#;

const KML_DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Placemark id="A">
      <Polygon><outerBoundaryIs><LinearRing>
        <coordinates>0,0,0 1,0,0 1,1,0 0,1,0 0,0,0</coordinates>
      </LinearRing></outerBoundaryIs></Polygon>
    </Placemark>
    <Placemark>
      <name>B</name>
      <Polygon><outerBoundaryIs><LinearRing>
        <coordinates>10,10,0 11,10,0 11,11,0 10,11,0 10,10,0</coordinates>
      </LinearRing></outerBoundaryIs></Polygon>
    </Placemark>
  </Document>
</kml>"#;

const WGS84_PRJ: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

const ANTARCTIC_PRJ: &str = r#"PROJCS["WGS 84 / Antarctic Polar Stereographic",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433]],PROJECTION["Polar_Stereographic"],PARAMETER["latitude_of_origin",-71],PARAMETER["central_meridian",0],PARAMETER["false_easting",0],PARAMETER["false_northing",0],UNIT["metre",1],AUTHORITY["EPSG","3031"]]"#;

fn write(path: &Path, content: &[u8]) {
    fs::write(path, content).unwrap();
}

fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
    let mut zip = ZipWriter::new(fs::File::create(path).unwrap());
    for (name, content) in members {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap();
}

/// Write `<path>.shp/.shx/.dbf` with one polygon record per entry, each an
/// outer ring list, and an `ID` attribute holding the record number.
fn write_shapefile(path: &Path, records: &[Vec<Vec<(f64, f64)>>]) {
    let table = TableWriterBuilder::new().add_character_field("ID".try_into().unwrap(), 10);
    let mut writer = shapefile::Writer::from_path(path, table).unwrap();
    for (index, rings) in records.iter().enumerate() {
        let rings = rings
            .iter()
            .map(|ring| PolygonRing::Outer(ring.iter().map(|(x, y)| Point::new(*x, *y)).collect()))
            .collect();
        let mut record = Record::default();
        record.insert("ID".to_string(), FieldValue::Character(Some(index.to_string())));
        writer.write_shape_and_record(&shapefile::Polygon::with_rings(rings), &record).unwrap();
    }
}

fn square(x: f64, y: f64, size: f64) -> Vec<(f64, f64)> {
    vec![(x, y), (x, y + size), (x + size, y + size), (x + size, y), (x, y)]
}

#[test]
fn geojson_bounds_and_hull() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("regions.geojson");
    write(&path, TWO_SQUARES.as_bytes());

    let set = read_polygons(&path, None).unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.bounds().unwrap(), (0.0, 0.0, 11.0, 11.0));

    let hull = PolygonSet::exterior_xy(&set.convex_hull().unwrap());
    assert_eq!(hull.first(), Some(&(0.0, 0.0)));
    assert_eq!(hull.first(), hull.last());
    assert_eq!(hull[1], (1.0, 0.0));
}

#[test]
fn identifier_suffix_filters_features() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("regions.json");
    write(&path, THREE_SQUARES.as_bytes());

    let argument = format!("{}[B]", path.display());
    let spatial = load_spatial_filter(&argument, &PolygonOptions::default()).unwrap();
    assert_eq!(spatial.bounds(), (10.0, 10.0, 11.0, 11.0));

    let set = read_polygons(&path, Some(&["A".to_string(), "C".to_string()])).unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.bounds().unwrap(), (0.0, 0.0, 21.0, 21.0));
}

#[test]
fn empty_selection_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("regions.json");
    write(&path, THREE_SQUARES.as_bytes());

    let argument = format!("{}[Z]", path.display());
    assert!(matches!(load_spatial_filter(&argument, &PolygonOptions::default()), Err(Error::EmptySet)));
}

#[test]
fn kml_and_kmz_agree() {
    let dir = tempfile::tempdir().unwrap();
    let kml = dir.path().join("regions.kml");
    let kmz = dir.path().join("regions.kmz");
    write(&kml, KML_DOCUMENT.as_bytes());
    write_zip(&kmz, &[("doc.kml", KML_DOCUMENT.as_bytes())]);

    let from_kml = read_polygons(&kml, None).unwrap();
    let from_kmz = read_polygons(&kmz, None).unwrap();
    assert_eq!(from_kml, from_kmz);
    assert_eq!(from_kml.bounds().unwrap(), (0.0, 0.0, 11.0, 11.0));

    // the second placemark is identified by its name
    let named = read_polygons(&kml, Some(&["B".to_string()])).unwrap();
    assert_eq!(named.bounds().unwrap(), (10.0, 10.0, 11.0, 11.0));
}

#[test]
fn kmz_without_document_fails() {
    let dir = tempfile::tempdir().unwrap();
    let kmz = dir.path().join("empty.kmz");
    write_zip(&kmz, &[("readme.txt", b"nothing here".as_slice())]);
    assert!(matches!(read_polygons(&kmz, None), Err(Error::MissingMember { .. })));
}

#[test]
fn shapefile_records_use_their_index() {
    let dir = tempfile::tempdir().unwrap();
    let shp = dir.path().join("regions.shp");
    write_shapefile(&shp, &[vec![square(0.0, 0.0, 1.0)], vec![square(10.0, 10.0, 1.0), square(20.0, 20.0, 1.0)]]);
    write(&dir.path().join("regions.prj"), WGS84_PRJ.as_bytes());

    let set = read_polygons(&shp, None).unwrap();
    assert_eq!(set.len(), 3);
    assert_eq!(set.bounds().unwrap(), (0.0, 0.0, 21.0, 21.0));

    // the multi-part second record
    let second = read_polygons(&shp, Some(&["1".to_string()])).unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(second.bounds().unwrap(), (10.0, 10.0, 21.0, 21.0));
    assert!(read_polygons(&shp, Some(&["2".to_string()])).unwrap().is_empty());
}

#[test]
fn zipped_shapefile_is_read_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("regions.shp");
    write_shapefile(&staging, &[vec![square(-50.0, 68.0, 1.0)]]);
    let shp = fs::read(&staging).unwrap();
    let shx = fs::read(dir.path().join("regions.shx")).unwrap();
    let dbf = fs::read(dir.path().join("regions.dbf")).unwrap();

    let archive = dir.path().join("regions.zip");
    write_zip(
        &archive,
        &[
            ("regions/regions.shp", shp.as_slice()),
            ("regions/regions.shx", shx.as_slice()),
            ("regions/regions.dbf", dbf.as_slice()),
            ("regions/regions.prj", WGS84_PRJ.as_bytes()),
        ],
    );

    let set = read_polygons(&archive, None).unwrap();
    assert_eq!(set.len(), 1);
    assert_eq!(set.bounds().unwrap(), (-50.0, 68.0, -49.0, 69.0));
    assert_eq!(set.crs(), &Crs::WGS84);
}

#[test]
fn projected_shapefile_is_returned_in_degrees() {
    let corners = [
        Coord { x: -100.0, y: -80.0 },
        Coord { x: -100.0, y: -75.0 },
        Coord { x: -90.0, y: -75.0 },
        Coord { x: -90.0, y: -80.0 },
    ];
    let to_polar = Reprojector::new(&Crs::WGS84, &Crs::Epsg(3031)).unwrap();
    let projected = to_polar.transform(&corners).unwrap();
    let mut ring: Vec<(f64, f64)> = projected.iter().map(|c| (c.x, c.y)).collect();
    ring.push(ring[0]);

    let dir = tempfile::tempdir().unwrap();
    let shp = dir.path().join("basin.shp");
    write_shapefile(&shp, &[vec![ring]]);
    write(&dir.path().join("basin.prj"), ANTARCTIC_PRJ.as_bytes());

    let set = read_polygons(&shp, None).unwrap();
    assert_eq!(set.crs(), &Crs::WGS84);
    let (min_x, min_y, max_x, max_y) = set.bounds().unwrap();
    assert!((min_x + 100.0).abs() < 1e-6, "{min_x}");
    assert!((max_x + 90.0).abs() < 1e-6, "{max_x}");
    assert!((min_y + 80.0).abs() < 1e-6, "{min_y}");
    assert!((max_y + 75.0).abs() < 1e-6, "{max_y}");
}

#[test]
fn file_name_case_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir.path().join("Regions.GeoJSON"), TWO_SQUARES.as_bytes());

    let set = read_polygons(&dir.path().join("regions.geojson"), None).unwrap();
    assert_eq!(set.len(), 2);
}

#[test]
fn missing_and_unlisted_files_fail() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(read_polygons(&dir.path().join("absent.kml"), None), Err(Error::FileNotFound(_))));

    let csv = dir.path().join("regions.csv");
    write(&csv, b"0,0\n");
    match read_polygons(&csv, None) {
        Err(Error::UnsupportedFormat(extension)) => assert_eq!(extension, "csv"),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn self_intersecting_rings_are_repaired() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bowtie.geojson");
    let bowtie = r#"{"type": "Polygon", "coordinates": [[[0,0],[2,2],[2,0],[0,2],[0,0]]]}"#;
    write(&path, bowtie.as_bytes());

    let set = read_polygons(&path, None).unwrap();
    assert!(!set.is_empty());
    assert!(set.is_valid());
    let (min_x, min_y, max_x, max_y) = set.bounds().unwrap();
    assert!(min_x >= 0.0 && min_y >= 0.0 && max_x <= 2.0 && max_y <= 2.0);
}

#[test]
fn projected_geojson_is_returned_in_degrees() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("utm.geojson");
    let utm = r#"{
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::32622"}},
        "features": [
            {"type": "Feature", "properties": {},
             "geometry": {"type": "Polygon", "coordinates": [[[500000,7600000],[510000,7600000],[510000,7610000],[500000,7610000],[500000,7600000]]]}}
        ]
    }"#;
    write(&path, utm.as_bytes());

    let set = read_polygons(&path, None).unwrap();
    assert_eq!(set.crs(), &Crs::WGS84);
    let (min_x, min_y, max_x, max_y) = set.bounds().unwrap();
    // zone 22 is centred on 51 degrees west
    assert!((min_x + 51.0).abs() < 1e-6);
    assert!(max_x > min_x && max_x < -50.0);
    assert!(min_y > 68.0 && max_y < 69.0);
}

#[test]
fn clustering_searches_each_region() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("regions.json");
    write(&path, THREE_SQUARES.as_bytes());

    let options = PolygonOptions { cluster: Some(1), ..PolygonOptions::default() };
    match load_spatial_filter(path.to_str().unwrap(), &options).unwrap() {
        Spatial::Polygon { bounds, regions, .. } => {
            assert_eq!(bounds, (0.0, 0.0, 21.0, 21.0));
            assert_eq!(regions.len(), 1);
        }
        other => panic!("expected a polygon filter, got {:?}", other),
    }
}
