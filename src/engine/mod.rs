// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! The routing engine: matches waypoints onto the graph, runs the search
//! passes for every leg and assembles the resulting [Track].
//!
//! Each leg is searched up to three times. The first pass uses a strong
//! air-distance heuristic to find some track quickly; its cost then bounds
//! the second, exact pass. The third pass re-tracks the result with detail
//! recording enabled, restricted to the links of the found track.

mod error;
mod matcher;
mod search;

pub use error::{ErrorCategory, RoutingError};
pub use matcher::{match_waypoint, MatchedWaypoint};

use crate::context::{CostModel, RoutingContext};
use crate::distance::{distance, lat_to_ilat, lon_to_ilon};
use crate::graph::GeoPoint;
use crate::path::{PathModel, StdModel};
use crate::tiles::{NodesCache, DEFAULT_MAX_MEMORY};
use crate::track::{Track, TrackPoint};
use search::{find_track, guide_segments, Limits, Outcome, Pass, ReferenceTrack};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Recommended number of allowed path expansions in a single search pass
/// before [RoutingError::StepLimitExceeded] is returned.
pub const DEFAULT_STEP_LIMIT: usize = 1_000_000;

/// A point to route through.
#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub name: String,
    pub lon: f64,
    pub lat: f64,

    /// Reach this waypoint in a straight line from the previous one,
    /// without using the graph.
    pub direct: bool,
}

impl Waypoint {
    pub fn new(name: impl Into<String>, lon: f64, lat: f64) -> Self {
        Self {
            name: name.into(),
            lon,
            lat,
            direct: false,
        }
    }

    /// Fixed-point position of the waypoint.
    pub fn position(&self) -> (i32, i32) {
        (lon_to_ilon(self.lon), lat_to_ilat(self.lat))
    }

    fn point(&self) -> GeoPoint {
        let (ilon, ilat) = self.position();
        GeoPoint::new(ilon, ilat, None)
    }
}

/// Cooperative cancellation flag, checked once per search step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clears the flag, so that the token may be reused for another request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Settings of a [RoutingEngine].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Directory with the `*.rd5` tile files.
    pub segment_dir: PathBuf,

    /// Memory budget of the tile cache, in bytes.
    pub max_memory: usize,

    /// Wall-clock budget of one request, if any.
    pub timeout: Option<Duration>,

    /// See [DEFAULT_STEP_LIMIT].
    pub step_limit: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            segment_dir: PathBuf::from("segments"),
            max_memory: DEFAULT_MAX_MEMORY,
            timeout: None,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }
}

/// Finds tracks over tiled graph data.
///
/// An engine owns its tile cache; the cache is released after every request,
/// whether it succeeded or not.
#[derive(Debug)]
pub struct RoutingEngine {
    ctx: RoutingContext,
    options: EngineOptions,
    cache: NodesCache,
    cancel: CancelToken,
}

impl RoutingEngine {
    pub fn new(ctx: RoutingContext, options: EngineOptions) -> Self {
        let cache = NodesCache::new(
            options.segment_dir.clone(),
            ctx.evaluator.lookup_version(),
            options.max_memory,
        );
        Self {
            ctx,
            options,
            cache,
            cancel: CancelToken::new(),
        }
    }

    pub fn context(&self) -> &RoutingContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RoutingContext {
        &mut self.ctx
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Token which cancels the running (or next) request of this engine.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Finds a track through all waypoints, in order.
    pub fn route(&mut self, waypoints: &[Waypoint]) -> Result<Track, RoutingError> {
        let limits = self.limits();
        let result = self.route_waypoints(waypoints, &limits);
        self.cache.close();
        result
    }

    /// Finds a track from `start` to the end of a previously found track,
    /// joining the old track as soon as the new search reaches it.
    ///
    /// If no junction with the old track is found within a third of the timeout,
    /// a regular search is run instead.
    pub fn recalculate(&mut self, start: &Waypoint, previous: &Track) -> Result<Track, RoutingError> {
        let limits = self.limits();
        let result = self.recalculate_from(start, previous, &limits);
        self.cache.close();
        result
    }

    fn limits(&self) -> Limits {
        Limits {
            started: Instant::now(),
            timeout: self.options.timeout,
            step_limit: self.options.step_limit,
            cancel: self.cancel.clone(),
        }
    }

    fn match_waypoint(&mut self, wp: &Waypoint) -> Result<MatchedWaypoint, RoutingError> {
        match_waypoint(&mut self.cache, &mut self.ctx, wp)?.ok_or_else(|| RoutingError::PositionNotMapped {
            name: wp.name.clone(),
            lon: wp.lon,
            lat: wp.lat,
        })
    }

    fn route_waypoints(&mut self, waypoints: &[Waypoint], limits: &Limits) -> Result<Track, RoutingError> {
        if waypoints.len() < 2 {
            return Err(RoutingError::TooFewWaypoints(waypoints.len()));
        }

        // only the ends of legs searched over the graph need matching
        let mut matched = Vec::with_capacity(waypoints.len());
        for (i, wp) in waypoints.iter().enumerate() {
            let starts_leg = waypoints.get(i + 1).is_some_and(|next| !next.direct);
            let ends_leg = i > 0 && !wp.direct;
            matched.push(if starts_leg || ends_leg {
                Some(self.match_waypoint(wp)?)
            } else {
                None
            });
        }

        let mut track = Track::default();
        for (i, pair) in waypoints.windows(2).enumerate() {
            let leg = match (&matched[i], &matched[i + 1]) {
                (Some(from), Some(to)) if !pair[1].direct => {
                    log::info!("routing from {} to {}", from.name, to.name);
                    self.route_leg(from, to, None, limits)?
                }
                (from, _) => {
                    let start = from.as_ref().map_or_else(|| pair[0].point(), |m| m.crosspoint);
                    beeline(start, pair[1].point())
                }
            };
            track.append(leg);
        }

        log::info!(
            "track found: {} m, cost {}, {} points",
            track.distance,
            track.cost,
            track.len()
        );
        Ok(track)
    }

    fn recalculate_from(
        &mut self,
        start: &Waypoint,
        previous: &Track,
        limits: &Limits,
    ) -> Result<Track, RoutingError> {
        let Some(last) = previous.points.last() else {
            return Err(RoutingError::TooFewWaypoints(1));
        };
        let end = Waypoint::new("end", last.lon(), last.lat());

        let from = self.match_waypoint(start)?;
        let to = self.match_waypoint(&end)?;
        let reference = ReferenceTrack::new(previous);

        match self.route_leg(&from, &to, Some(&reference), limits) {
            Err(RoutingError::Timeout { elapsed, .. }) if limits.timeout.is_some_and(|t| elapsed < t) => {
                log::info!("previous track not reached in {elapsed:?}, running a full search");
                self.route_leg(&from, &to, None, limits)
            }
            result => result,
        }
    }

    fn route_leg(
        &mut self,
        from: &MatchedWaypoint,
        to: &MatchedWaypoint,
        reference: Option<&ReferenceTrack>,
        limits: &Limits,
    ) -> Result<Track, RoutingError> {
        let (ctx, cache) = (&mut self.ctx, &mut self.cache);
        match ctx.model {
            CostModel::Standard => run_passes(&StdModel, ctx, cache, from, to, reference, limits),
            CostModel::Kinematic => {
                let model = ctx.kinematic;
                run_passes(&model, ctx, cache, from, to, reference, limits)
            }
        }
    }
}

/// Straight leg between two points.
fn beeline(from: GeoPoint, to: GeoPoint) -> Track {
    let mut end = TrackPoint::new(to);
    end.cost = distance(from.ilon, from.ilat, to.ilon, to.ilat).round() as i32;
    Track::from_points(vec![TrackPoint::new(from), end])
}

fn run_passes<M: PathModel>(
    model: &M,
    ctx: &mut RoutingContext,
    cache: &mut NodesCache,
    from: &MatchedWaypoint,
    to: &MatchedWaypoint,
    reference: Option<&ReferenceTrack>,
    limits: &Limits,
) -> Result<Track, RoutingError> {
    let base = Pass {
        number: 1,
        coefficient: ctx.pass1_coefficient,
        bound: None,
        detail: false,
        guide: None,
        reference: None,
    };

    if let Some(reference) = reference {
        let coefficient = if ctx.pass1_coefficient >= 0.0 {
            ctx.pass1_coefficient
        } else {
            ctx.pass2_coefficient
        };
        let pass = Pass {
            coefficient,
            reference: Some(reference),
            ..base
        };
        return match find_track(model, ctx, cache, from, to, pass, limits)? {
            Outcome::Merged(points) => {
                let mut track = Track::from_points(points);
                track.merged = true;
                Ok(track)
            }
            Outcome::Found(points) => retrack(model, ctx, cache, from, to, points, limits),
        };
    }

    let mut found = None;
    if ctx.pass1_coefficient >= 0.0 {
        log::debug!("pass 1 with coefficient {}", ctx.pass1_coefficient);
        if let Outcome::Found(points) = find_track(model, ctx, cache, from, to, base, limits)? {
            found = Some(points);
        }
    }

    let bound = found.as_ref().and_then(|p| p.last()).map(|p| p.cost);
    let pass = Pass {
        number: 2,
        coefficient: ctx.pass2_coefficient,
        bound,
        ..base
    };
    log::debug!("pass 2 with coefficient {} and bound {:?}", pass.coefficient, bound);
    let points = match find_track(model, ctx, cache, from, to, pass, limits) {
        Ok(Outcome::Found(points)) | Ok(Outcome::Merged(points)) => points,
        Err(RoutingError::NoTrackFound { .. }) if found.is_some() => {
            log::warn!("pass 2 found nothing below the bound, keeping the track of pass 1");
            found.unwrap_or_default()
        }
        Err(e) => return Err(e),
    };

    retrack(model, ctx, cache, from, to, points, limits)
}

/// Re-runs the search along the links of a found track, recording segment messages.
fn retrack<M: PathModel>(
    model: &M,
    ctx: &mut RoutingContext,
    cache: &mut NodesCache,
    from: &MatchedWaypoint,
    to: &MatchedWaypoint,
    points: Vec<TrackPoint>,
    limits: &Limits,
) -> Result<Track, RoutingError> {
    let guide = guide_segments(&points);
    let pass = Pass {
        number: 3,
        coefficient: 0.0,
        bound: points.last().map(|p| p.cost),
        detail: true,
        guide: Some(&guide),
        reference: None,
    };

    match find_track(model, ctx, cache, from, to, pass, limits) {
        Ok(Outcome::Found(detailed)) | Ok(Outcome::Merged(detailed)) => Ok(Track::from_points(detailed)),
        Err(e @ (RoutingError::NoTrackFound { .. } | RoutingError::StepLimitExceeded { .. })) => {
            log::warn!("re-tracking failed ({e}), using the track without details");
            Ok(Track::from_points(points))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::FlatEvaluator;
    use crate::distance::{ilat_to_lat, ilon_to_lon};
    use crate::nogo::NogoZone;
    use crate::tiles::{TileFormat, TileWriter};

    /// 901 units of longitude at the equator are 100 m.
    const STEP: i32 = 901;
    const X: i32 = 188_500_000;
    const Y: i32 = 90_000_000;

    /// Writes a straight road of `n` nodes, [STEP] apart, heading east from (X, Y).
    fn write_road(n: i32) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut w = TileWriter::new(1, TileFormat::Current);
        for i in 0..n {
            w.add_node(X + i * STEP, Y, Some(0), None);
        }
        for i in 1..n {
            w.add_link((X + (i - 1) * STEP, Y), (X + i * STEP, Y), b"road".to_vec(), vec![]);
        }
        w.write_to_dir(dir.path()).unwrap();
        dir
    }

    fn engine(dir: &tempfile::TempDir) -> RoutingEngine {
        let ctx = RoutingContext::new(Box::new(FlatEvaluator::default())).unwrap();
        let options = EngineOptions {
            segment_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        RoutingEngine::new(ctx, options)
    }

    fn wp(name: &str, ilon: i32, ilat: i32) -> Waypoint {
        Waypoint::new(name, ilon_to_lon(ilon), ilat_to_lat(ilat))
    }

    #[test]
    fn single_link() {
        let dir = write_road(2);
        let mut e = engine(&dir);
        let track = e.route(&[wp("a", X, Y), wp("b", X + STEP, Y)]).unwrap();
        assert_eq!(track.cost, 100);
        assert_eq!(track.len(), 2);
        assert_eq!(track.distance, 100);
        assert!(!track.merged);

        // re-tracking records messages
        let msg = track.points[1].message.as_ref().unwrap();
        assert_eq!(msg.way_tags, "road");
        assert_eq!(msg.distance, 100);
    }

    #[test]
    fn waypoints_off_the_road() {
        let dir = write_road(3);
        let mut e = engine(&dir);
        // 20 m north of the road, halfway along the first and second links
        let off = 180;
        let track = e
            .route(&[wp("a", X + STEP / 2, Y + off), wp("b", X + STEP + STEP / 2, Y + off)])
            .unwrap();
        assert_eq!(track.points.first().unwrap().position(), (X + STEP / 2, Y));
        assert_eq!(track.points.last().unwrap().position(), (X + STEP + STEP / 2, Y));
        assert_eq!(track.len(), 3);
        assert!((track.cost - 100).abs() <= 1);
    }

    #[test]
    fn hard_nogo_blocks() {
        let dir = write_road(2);
        let mut e = engine(&dir);
        let zone = NogoZone::circle("wall", X + STEP / 2, Y, 50.0, 0.0).unwrap();
        e.context_mut().nogos.push(zone);
        let err = e.route(&[wp("a", X, Y), wp("b", X + STEP, Y)]).unwrap_err();
        assert!(matches!(err, RoutingError::NoTrackFound { pass: 1 }));
        assert_eq!(err.category(), ErrorCategory::SearchExhausted);
    }

    #[test]
    fn kinematic_time_and_energy() {
        let dir = write_road(2);
        let mut e = engine(&dir);
        e.context_mut().set_parameter("costModel", "kinematic").unwrap();
        let vmax = e.context().kinematic.vmax;

        let track = e.route(&[wp("a", X, Y), wp("b", X + STEP, Y)]).unwrap();
        assert!(track.time as f64 > 100.0 / vmax);
        assert!(track.energy >= 0.0);
        assert!(track.cost > 0);
    }

    #[test]
    fn multiple_legs_and_direct() {
        let dir = write_road(3);
        let mut e = engine(&dir);
        let mut detour = wp("c", X + 2 * STEP, Y + STEP);
        detour.direct = true;
        let track = e
            .route(&[wp("a", X, Y), wp("b", X + 2 * STEP, Y), detour])
            .unwrap();
        assert_eq!(track.len(), 4);
        assert_eq!(track.points[2].cost, 200);
        assert_eq!(track.cost, 300);
    }

    #[test]
    fn unmapped_and_too_few() {
        let dir = write_road(2);
        let mut e = engine(&dir);
        let err = e.route(&[wp("a", X, Y)]).unwrap_err();
        assert!(matches!(err, RoutingError::TooFewWaypoints(1)));

        let err = e
            .route(&[wp("a", X, Y), Waypoint::new("far", 20.0, 10.0)])
            .unwrap_err();
        assert!(matches!(err, RoutingError::PositionNotMapped { ref name, .. } if name == "far"));
        assert_eq!(err.category(), ErrorCategory::UserInput);
    }

    #[test]
    fn cancellation() {
        let dir = write_road(2);
        let mut e = engine(&dir);
        e.cancel_token().cancel();
        let err = e.route(&[wp("a", X, Y), wp("b", X + STEP, Y)]).unwrap_err();
        assert!(matches!(err, RoutingError::Cancelled));

        e.cancel_token().reset();
        assert!(e.route(&[wp("a", X, Y), wp("b", X + STEP, Y)]).is_ok());
    }

    #[test]
    fn recalculation_joins_previous_track() {
        let dir = write_road(4);
        let mut e = engine(&dir);
        let previous = e.route(&[wp("a", X, Y), wp("d", X + 3 * STEP, Y)]).unwrap();
        assert_eq!(previous.cost, 300);

        let track = e.recalculate(&wp("a", X, Y), &previous).unwrap();
        assert!(track.merged);
        assert_eq!(track.cost, 300);
        assert_eq!(track.len(), 4);
        assert_eq!(track.points.last().unwrap().position(), (X + 3 * STEP, Y));
    }

    /// Limits of a request which started `late` seconds ago.
    fn late_limits(e: &RoutingEngine, late: u64, timeout: u64) -> Limits {
        Limits {
            started: Instant::now().checked_sub(Duration::from_secs(late)).unwrap(),
            timeout: Some(Duration::from_secs(timeout)),
            ..e.limits()
        }
    }

    #[test]
    fn timeout() {
        let dir = write_road(3);
        let mut e = engine(&dir);
        let limits = late_limits(&e, 1, 0);
        let err = e
            .route_waypoints(&[wp("a", X, Y), wp("c", X + 2 * STEP, Y)], &limits)
            .unwrap_err();
        assert!(matches!(err, RoutingError::Timeout { pass: 1, .. }), "{err:?}");
        assert_eq!(err.category(), ErrorCategory::SearchExhausted);
    }

    #[test]
    fn recalculation_falls_back_to_full_search() {
        let dir = write_road(4);
        let mut e = engine(&dir);
        let previous = e.route(&[wp("a", X, Y), wp("d", X + 3 * STEP, Y)]).unwrap();

        // 5 s are past a third of the 10 s budget, but not the whole budget
        let limits = late_limits(&e, 5, 10);
        let track = e.route_waypoints(&[wp("a", X, Y), wp("d", X + 3 * STEP, Y)], &limits).unwrap();
        assert_eq!(track.cost, 300);
        e.cache.close();

        let limits = late_limits(&e, 5, 10);
        let track = e.recalculate_from(&wp("a", X, Y), &previous, &limits).unwrap();
        assert!(!track.merged);
        assert_eq!(track.cost, 300);
        assert_eq!(track.len(), 4);
        e.cache.close();

        // no fallback once the whole budget is spent
        let limits = late_limits(&e, 11, 10);
        let err = e.recalculate_from(&wp("a", X, Y), &previous, &limits).unwrap_err();
        assert!(matches!(err, RoutingError::Timeout { pass: 1, .. }), "{err:?}");
    }
}
