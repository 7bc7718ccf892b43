// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Offline routing over compact, tiled [OpenStreetMap](https://www.openstreetmap.org/) data.
//!
//! OSM data is first converted into routing tiles ([tiles::TileWriter],
//! [osm::add_features_from_file]). Tiles are loaded lazily by a [RoutingEngine],
//! which matches waypoints onto the road network and runs a bounded, multi-pass
//! A* search between them. Interpretation of way and node tags is delegated to a
//! [TagEvaluator], for example an [osm::ProfileEvaluator]. Costs are computed by
//! one of two models ([CostModel]): a heuristic distance-based one, and a
//! physics-based one which minimizes travel time.
//!
//! Supported are one-way streets, access tags, turn restrictions, elevation
//! penalties, nogo zones, direct (beeline) legs and recalculation of a route
//! which re-joins a previous track.
//!
//! # Example
//!
//! ```no_run
//! let mut w = tileroute::tiles::TileWriter::new(
//!     tileroute::osm::TAG_LOOKUP_VERSION,
//!     tileroute::tiles::TileFormat::Current,
//! );
//! tileroute::osm::add_features_from_file(
//!     &mut w,
//!     &tileroute::osm::Options::default(),
//!     "path/to/monaco.osm.gz",
//! ).expect("failed to load monaco.osm.gz");
//! w.write_to_dir(std::path::Path::new("segments")).expect("failed to write tiles");
//!
//! let evaluator = tileroute::osm::ProfileEvaluator::new(tileroute::osm::CAR_PROFILE);
//! let ctx = tileroute::RoutingContext::new(Box::new(evaluator)).unwrap();
//! let mut engine = tileroute::RoutingEngine::new(ctx, tileroute::EngineOptions::default());
//!
//! let track = engine
//!     .route(&[
//!         tileroute::Waypoint::new("from", 7.4246, 43.7384),
//!         tileroute::Waypoint::new("to", 7.4323, 43.7478),
//!     ])
//!     .expect("failed to find route");
//!
//! println!("Route: {} m, cost {}", track.distance, track.cost);
//! ```

mod context;
mod distance;
mod engine;
mod evaluator;
pub mod graph;
mod nogo;
mod open_set;
pub mod osm;
pub mod path;
pub mod tiles;
mod track;

pub use context::{CostModel, ParameterError, RoutingContext, ShortestMatch};
pub use distance::{distance, ilat_to_lat, ilon_to_lon, lat_to_ilat, lon_to_ilon};
pub use engine::{
    match_waypoint, CancelToken, EngineOptions, ErrorCategory, MatchedWaypoint, RoutingEngine,
    RoutingError, Waypoint, DEFAULT_STEP_LIMIT,
};
pub use evaluator::{classifier, NodeCost, TagEvaluator, VehicleMode, WayCost};
pub use nogo::{NogoError, NogoZone, ZoneShape};
pub use open_set::OpenSet;
pub use track::{SegmentMessage, Track, TrackPoint};
