use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_json::json;
use tracing::{error, info, Level};

use altimetry_subset::query::PRODUCTS;
use altimetry_subset::{
    load_spatial_filter, Endpoints, OutputFormat, PolygonOptions, QueryBuilder, Result, Spatial, TimeRange,
};

fn cli() -> Command {
    Command::new("altimetry-subset")
        .author("Jesper Fjellin")
        .about("Builds CMR granule searches and NSIDC subsetting requests for altimetry products")
        .disable_version_flag(true)
        .arg(
            Arg::new("product")
                .value_name("PRODUCT")
                .num_args(1..)
                .required(true)
                .value_parser(PRODUCTS.iter().map(|(name, _)| *name).collect::<Vec<_>>())
                .help("Altimetry product"),
        )
        .arg(
            Arg::new("version")
                .short('v')
                .long("version")
                .num_args(1)
                .help("Version of the dataset to use"),
        )
        .arg(
            Arg::new("bbox")
                .short('B')
                .long("bbox")
                .num_args(4)
                .value_names(["lon_min", "lat_min", "lon_max", "lat_max"])
                .value_parser(value_parser!(f64))
                .allow_negative_numbers(true)
                .conflicts_with("polygon")
                .help("Bounding box"),
        )
        .arg(
            Arg::new("polygon")
                .short('p')
                .long("polygon")
                .num_args(1)
                .help("Georeferenced file containing a set of polygons, optionally followed by [id1,id2]"),
        )
        .arg(
            Arg::new("time")
                .short('T')
                .long("time")
                .num_args(2)
                .value_names(["start_time", "end_time"])
                .help("Time range"),
        )
        .arg(
            Arg::new("format")
                .short('F')
                .long("format")
                .num_args(1)
                .value_parser(["TABULAR_ASCII", "NetCDF4"])
                .help("Convert to output data format"),
        )
        .arg(
            Arg::new("cluster")
                .long("cluster")
                .num_args(1)
                .value_parser(value_parser!(usize))
                .requires("polygon")
                .help("Collapse the polygon file into at most N-1 convex regions"),
        )
        .arg(
            Arg::new("simplify")
                .long("simplify")
                .num_args(1)
                .value_parser(value_parser!(f64))
                .requires("polygon")
                .help("Douglas-Peucker tolerance applied to the polygon file"),
        )
        .arg(
            Arg::new("max-vertices")
                .long("max-vertices")
                .num_args(1)
                .value_parser(value_parser!(usize))
                .requires("polygon")
                .help("Simplify the polygon file until every ring has at most N vertices"),
        )
        .arg(
            Arg::new("page-size")
                .long("page-size")
                .num_args(1)
                .default_value("100")
                .value_parser(value_parser!(usize))
                .help("Granules per CMR page and subsetting request"),
        )
        .arg(
            Arg::new("pages")
                .long("pages")
                .num_args(1)
                .default_value("1")
                .value_parser(value_parser!(usize))
                .help("Number of subsetting request pages to print"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the requests for each product as JSON"),
        )
        .arg(
            Arg::new("verbose")
                .short('V')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Verbose output of processing run"),
        )
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn spatial_filter(matches: &ArgMatches) -> Result<Option<Spatial>> {
    if let Some(values) = matches.get_many::<f64>("bbox") {
        let b: Vec<f64> = values.copied().collect();
        return Ok(Some(Spatial::BoundingBox((b[0], b[1], b[2], b[3]))));
    }
    let Some(argument) = matches.get_one::<String>("polygon") else {
        return Ok(None);
    };
    let options = PolygonOptions {
        cluster: matches.get_one::<usize>("cluster").copied(),
        simplify: matches.get_one::<f64>("simplify").copied(),
        max_vertices: matches.get_one::<usize>("max-vertices").copied(),
        ..PolygonOptions::default()
    };
    load_spatial_filter(argument, &options).map(Some)
}

fn time_range(matches: &ArgMatches) -> Result<Option<TimeRange>> {
    match matches.get_many::<String>("time") {
        Some(values) => {
            let t: Vec<&String> = values.collect();
            TimeRange::parse(t[0], t[1]).map(Some)
        }
        None => Ok(None),
    }
}

fn product_query(
    product: &str,
    matches: &ArgMatches,
    spatial: &Option<Spatial>,
    time: &Option<TimeRange>,
) -> Result<QueryBuilder> {
    let mut query = QueryBuilder::new(product);
    if let Some(version) = matches.get_one::<String>("version") {
        query = query.version(version)?;
    }
    if let Some(spatial) = spatial {
        query = query.spatial(spatial.clone());
    }
    if let Some(time) = time {
        query = query.time(*time);
    }
    if let Some(format) = matches.get_one::<String>("format").and_then(|f| OutputFormat::parse(f)) {
        query = query.format(format);
    }
    Ok(query)
}

fn main() {
    let matches = cli().get_matches();
    init_logging(matches.get_count("verbose"));

    let endpoints = Endpoints {
        page_size: matches.get_one::<usize>("page-size").copied().unwrap_or(100),
        ..Endpoints::default()
    };
    let pages = matches.get_one::<usize>("pages").copied().unwrap_or(1);
    let as_json = matches.get_flag("json");

    let filters = spatial_filter(&matches).and_then(|spatial| Ok((spatial, time_range(&matches)?)));
    let (spatial, time) = match filters {
        Ok(filters) => filters,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut failed = false;
    for product in matches.get_many::<String>("product").into_iter().flatten() {
        let query = match product_query(product, &matches, &spatial, &time) {
            Ok(query) => query,
            Err(e) => {
                error!("Skipping {}: {}", product, e);
                failed = true;
                continue;
            }
        };
        info!("Building requests for {}", product);

        let cmr_url = query.cmr_url(&endpoints);
        let subset_urls: Vec<String> = (1..=pages).map(|page| query.subset_url(&endpoints, page)).collect();
        if as_json {
            let requests = json!({
                "product": product,
                "cmr": cmr_url,
                "subset": subset_urls,
            });
            println!("{}", requests);
        } else {
            println!("{}", cmr_url);
            for url in &subset_urls {
                println!("{}", url);
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}
