use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tileroute::osm::{self, FileFormat};
use tileroute::tiles::{TileFormat, TileWriter};

#[derive(Debug, thiserror::Error)]
#[error("{0}: {1}")]
struct TileBuildError(PathBuf, #[source] osm::Error);

#[derive(Debug, thiserror::Error)]
enum ArgumentError {
    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    #[error("expected {what}, got {got:?}")]
    Malformed { what: &'static str, got: String },
}

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert an OSM XML file into routing tiles
    Build {
        /// The path to the OSM file
        osm_file: PathBuf,

        /// Directory to write the tiles into
        segment_dir: PathBuf,

        /// Format of the OSM file, guessed from its content by default
        #[arg(long, value_enum)]
        format: Option<InputFormat>,

        /// Only keep ways usable by this profile (car, bicycle or foot)
        #[arg(long)]
        profile: Option<String>,

        /// Only keep nodes within "min_lon,min_lat,max_lon,max_lat"
        #[arg(long)]
        bbox: Option<String>,

        /// Write tiles with the coarser, legacy cell grid
        #[arg(long)]
        legacy: bool,
    },

    /// Find a route and print it as GeoJSON
    Route {
        /// Directory with the routing tiles
        segment_dir: PathBuf,

        /// Waypoints as "lon,lat"; prefix with "=" to reach one in a straight line
        #[arg(required = true, num_args = 2.., allow_hyphen_values = true)]
        waypoints: Vec<String>,

        /// Routing profile: car, bicycle or foot
        #[arg(long, default_value = "car")]
        profile: String,

        /// Nogo circle as "lon,lat,radius[,weight]"; zones without a weight are impassable
        #[arg(long, allow_hyphen_values = true)]
        nogo: Vec<String>,

        /// Routing parameter as "key=value"
        #[arg(long = "param")]
        params: Vec<String>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<f64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    Xml,
    XmlGz,
    XmlBz2,
}

impl From<InputFormat> for FileFormat {
    fn from(f: InputFormat) -> Self {
        match f {
            InputFormat::Xml => FileFormat::Xml,
            InputFormat::XmlGz => FileFormat::XmlGz,
            InputFormat::XmlBz2 => FileFormat::XmlBz2,
        }
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    colog::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Build {
            osm_file,
            segment_dir,
            format,
            profile,
            bbox,
            legacy,
        } => {
            let profile = profile.as_deref().map(parse_profile).transpose()?;
            let options = osm::Options {
                profile: profile.as_ref(),
                file_format: format.map(FileFormat::from).unwrap_or_default(),
                bbox: bbox.as_deref().map(parse_bbox).transpose()?.unwrap_or_default(),
            };
            let tile_format = if legacy {
                TileFormat::Legacy
            } else {
                TileFormat::Current
            };

            let w = build_tiles(&osm_file, &options, tile_format)?;
            std::fs::create_dir_all(&segment_dir)?;
            let written = w.write_to_dir(&segment_dir)?;
            log::info!("wrote {} tile files to {}", written.len(), segment_dir.display());
        }

        Command::Route {
            segment_dir,
            waypoints,
            profile,
            nogo,
            params,
            timeout,
        } => {
            let evaluator = osm::ProfileEvaluator::new(parse_profile(&profile)?);
            let mut ctx = tileroute::RoutingContext::new(Box::new(evaluator))?;
            for p in &params {
                let (key, value) = p.split_once('=').ok_or_else(|| ArgumentError::Malformed {
                    what: "key=value",
                    got: p.clone(),
                })?;
                ctx.set_parameter(key, value)?;
            }
            for (i, n) in nogo.iter().enumerate() {
                ctx.nogos.push(parse_nogo(i, n)?);
            }

            let waypoints = waypoints
                .iter()
                .enumerate()
                .map(|(i, w)| parse_waypoint(i, w))
                .collect::<Result<Vec<_>, _>>()?;

            let options = tileroute::EngineOptions {
                segment_dir,
                timeout: timeout.map(Duration::from_secs_f64),
                ..Default::default()
            };
            let mut engine = tileroute::RoutingEngine::new(ctx, options);
            let track = engine.route(&waypoints)?;
            print_geojson(&track);
        }
    }

    Ok(())
}

fn build_tiles<P: AsRef<Path>>(
    path: P,
    options: &osm::Options<'_>,
    format: TileFormat,
) -> Result<TileWriter, TileBuildError> {
    let mut w = TileWriter::new(osm::TAG_LOOKUP_VERSION, format);
    match osm::add_features_from_file(&mut w, options, path.as_ref()) {
        Ok(_) => Ok(w),
        Err(e) => Err(TileBuildError(PathBuf::from(path.as_ref()), e)),
    }
}

fn parse_profile(name: &str) -> Result<osm::Profile<'static>, ArgumentError> {
    osm::profile_by_name(name).ok_or_else(|| ArgumentError::UnknownProfile(name.to_string()))
}

fn parse_numbers(s: &str, what: &'static str) -> Result<Vec<f64>, ArgumentError> {
    s.split(',')
        .map(|x| x.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ArgumentError::Malformed {
            what,
            got: s.to_string(),
        })
}

fn parse_bbox(s: &str) -> Result<[f64; 4], ArgumentError> {
    parse_numbers(s, "min_lon,min_lat,max_lon,max_lat")?
        .try_into()
        .map_err(|_| ArgumentError::Malformed {
            what: "min_lon,min_lat,max_lon,max_lat",
            got: s.to_string(),
        })
}

fn parse_waypoint(i: usize, s: &str) -> Result<tileroute::Waypoint, ArgumentError> {
    let (direct, coords) = match s.strip_prefix('=') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    match parse_numbers(coords, "lon,lat")?.as_slice() {
        &[lon, lat] => {
            let mut w = tileroute::Waypoint::new(format!("via{i}"), lon, lat);
            w.direct = direct;
            Ok(w)
        }
        _ => Err(ArgumentError::Malformed {
            what: "lon,lat",
            got: s.to_string(),
        }),
    }
}

fn parse_nogo(i: usize, s: &str) -> Result<tileroute::NogoZone, Box<dyn Error>> {
    let (lon, lat, radius, weight) = match parse_numbers(s, "lon,lat,radius[,weight]")?.as_slice() {
        &[lon, lat, radius] => (lon, lat, radius, 0.0),
        &[lon, lat, radius, weight] => (lon, lat, radius, weight),
        _ => {
            return Err(ArgumentError::Malformed {
                what: "lon,lat,radius[,weight]",
                got: s.to_string(),
            }
            .into())
        }
    };
    let zone = tileroute::NogoZone::circle(
        format!("nogo{i}"),
        tileroute::lon_to_ilon(lon),
        tileroute::lat_to_ilat(lat),
        radius,
        weight,
    )?;
    Ok(zone)
}

fn print_geojson(track: &tileroute::Track) {
    println!("{{");
    println!("  \"type\": \"FeatureCollection\",");
    println!("  \"features\": [");
    println!("    {{");
    println!("      \"type\": \"Feature\",");
    println!("      \"properties\": {{");
    println!("        \"track-length\": {},", track.distance);
    println!("        \"filtered ascend\": {},", track.ascend);
    println!("        \"plain-ascend\": {},", track.plain_ascend);
    println!("        \"total-time\": {:.0},", track.time);
    println!("        \"total-energy\": {:.0},", track.energy);
    println!("        \"cost\": {}", track.cost);
    println!("      }},");

    println!("      \"geometry\": {{");
    println!("        \"type\": \"LineString\",");
    println!("        \"coordinates\": [");

    let mut points = track.points.iter().peekable();
    while let Some(p) = points.next() {
        let suffix = if points.peek().is_some() { "," } else { "" };
        match p.elevation_m() {
            Some(ele) => println!("          [{}, {}, {}]{}", p.lon(), p.lat(), ele, suffix),
            None => println!("          [{}, {}]{}", p.lon(), p.lat(), suffix),
        }
    }

    println!("        ]");
    println!("      }}");
    println!("    }}");
    println!("  ]");
    println!("}}");
}
