// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! A single best-first search pass between two matched waypoints.

use super::matcher::MatchedWaypoint;
use super::{CancelToken, RoutingError};
use crate::context::RoutingContext;
use crate::distance::{cos_lat, distance};
use crate::graph::{GeoPoint, LinkId, NodeId};
use crate::open_set::OpenSet;
use crate::path::{sub_polyline, traverse, OsmPath, PathArena, PathId, PathModel, PrePath, Traversal};
use crate::tiles::NodesCache;
use crate::track::{Track, TrackPoint};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Tolerance added to a known cost bound before pruning, absorbing rounding differences.
const BOUND_SLACK: f64 = 10.0;

/// Distance (in fixed-point units) to the virtual point behind the start
/// which gives the first section its heading.
const HEADING_LEVER: f64 = 1000.0;

/// Pair of consecutive track positions.
pub(crate) type Segment = ((i32, i32), (i32, i32));

/// Budgets shared by all passes of one request.
#[derive(Debug, Clone)]
pub(crate) struct Limits {
    pub started: Instant,
    pub timeout: Option<Duration>,
    pub step_limit: usize,
    pub cancel: CancelToken,
}

/// Settings of one search pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pass<'r> {
    pub number: u8,

    /// Weight of the remaining air distance in the queue key.
    pub coefficient: f64,

    /// Cost of a known track; paths which can't beat it are dropped.
    pub bound: Option<i32>,

    /// Record segment messages and skip turn restrictions.
    pub detail: bool,

    /// Restricts the search to links starting with one of these segments.
    pub guide: Option<&'r HashSet<Segment>>,

    /// A previous track to re-join instead of searching all the way to the end.
    pub reference: Option<&'r ReferenceTrack>,
}

/// Result of a successful pass.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Found(Vec<TrackPoint>),

    /// A new prefix joined onto the tail of the reference track.
    Merged(Vec<TrackPoint>),
}

/// A previously computed track, indexed by its segments.
#[derive(Debug, Clone)]
pub(crate) struct ReferenceTrack {
    points: Vec<TrackPoint>,
    segments: HashMap<Segment, usize>,
}

impl ReferenceTrack {
    pub fn new(track: &Track) -> Self {
        let mut segments = HashMap::new();
        for (i, w) in track.points.windows(2).enumerate() {
            segments.entry((w[0].position(), w[1].position())).or_insert(i + 1);
        }
        Self {
            points: track.points.clone(),
            segments,
        }
    }

    /// Index of the point ending the segment `from → to`, if the track has one.
    fn find(&self, from: (i32, i32), to: (i32, i32)) -> Option<usize> {
        self.segments.get(&(from, to)).copied()
    }

    /// Cost of the track after its k-th point.
    fn remaining(&self, k: usize) -> i32 {
        self.points.last().map_or(0, |l| l.cost) - self.points[k].cost
    }

    /// Appends the points after the k-th one to `prefix`, whose last point
    /// coincides with it, continuing the cumulative values of the prefix.
    fn merge(&self, mut prefix: Vec<TrackPoint>, k: usize) -> Vec<TrackPoint> {
        let Some(joint) = prefix.last() else {
            return self.points.clone();
        };
        let base = &self.points[k];
        let cost = joint.cost - base.cost;
        let time = joint.time - base.time;
        let energy = joint.energy - base.energy;

        prefix.extend(self.points[k + 1..].iter().map(|p| TrackPoint {
            cost: p.cost + cost,
            time: p.time + time,
            energy: p.energy + energy,
            ..p.clone()
        }));
        prefix
    }
}

/// Consecutive position pairs of a track.
pub(crate) fn guide_segments(points: &[TrackPoint]) -> HashSet<Segment> {
    points.windows(2).map(|w| (w[0].position(), w[1].position())).collect()
}

/// Position behind `p` when heading in `direction` (degrees clockwise from north).
fn heading_origin(p: GeoPoint, direction: f64) -> (i32, i32) {
    let (sin, cos) = direction.to_radians().sin_cos();
    let dx = HEADING_LEVER * sin / cos_lat(p.ilat);
    let dy = HEADING_LEVER * cos;
    (p.ilon - dx.round() as i32, p.ilat - dy.round() as i32)
}

/// Paths competing for the same place in the graph: the same link traveled
/// towards the same node, or to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HolderKey {
    link: Option<LinkId>,
    target: Option<NodeId>,
    terminal: bool,
}

struct Search<'a, 'r, M: PathModel> {
    model: &'a M,
    ctx: &'a mut RoutingContext,
    cache: &'a mut NodesCache,
    end: &'a MatchedWaypoint,
    pass: Pass<'r>,
    arena: PathArena<M::State>,
    open: OpenSet,
    holders: HashMap<HolderKey, Vec<PathId>>,
    bound: Option<f64>,
}

/// Runs one search pass from `start` to `end`.
pub(crate) fn find_track<M: PathModel>(
    model: &M,
    ctx: &mut RoutingContext,
    cache: &mut NodesCache,
    start: &MatchedWaypoint,
    end: &MatchedWaypoint,
    pass: Pass<'_>,
    limits: &Limits,
) -> Result<Outcome, RoutingError> {
    let mut search = Search {
        model,
        ctx,
        cache,
        end,
        pass,
        arena: PathArena::default(),
        open: OpenSet::new(),
        holders: HashMap::new(),
        bound: pass.bound.map(f64::from),
    };
    search.seed(start);
    let result = search.run(limits);
    log::debug!(
        "pass {}: {} paths created, {} tiles loaded",
        pass.number,
        search.arena.len(),
        search.cache.stats().tiles_loaded,
    );
    result
}

impl<M: PathModel> Search<'_, '_, M> {
    /// Queues the paths leaving the start point along its link.
    fn seed(&mut self, start: &MatchedWaypoint) {
        let cp = start.crosspoint;
        let prev = self.ctx.start_direction.map(|d| heading_origin(cp, d));
        let root_path = OsmPath::start(cp, prev);
        let root = self.arena.push(root_path.clone());

        let forward_inverse = self.cache.graph().link(start.link).is_reverse(start.nodes[0]);
        let last = (start.polyline.len() - 1) as f64;
        for (to, node) in [(0.0, start.nodes[0]), (last, start.nodes[1])] {
            let points = sub_polyline(&start.polyline, start.position, to);
            let t = Traversal {
                link: start.link,
                inverse: forward_inverse ^ (to < start.position),
                points: &points,
                target: Some(node),
                terminal: false,
            };
            self.admit_traversal(&root_path, root, &t);
        }

        if start.link == self.end.link {
            let points = sub_polyline(&start.polyline, start.position, self.end.position);
            let t = Traversal {
                link: start.link,
                inverse: forward_inverse ^ (self.end.position < start.position),
                points: &points,
                target: None,
                terminal: true,
            };
            self.admit_traversal(&root_path, root, &t);
        }
    }

    fn run(&mut self, limits: &Limits) -> Result<Outcome, RoutingError> {
        let number = self.pass.number;
        let reference = self.pass.reference;
        let mut steps = 0;
        let mut best_match: Option<(PathId, usize, f64)> = None;

        while let Some((idx, _)) = self.open.pop_first() {
            if limits.cancel.is_cancelled() {
                return Err(RoutingError::Cancelled);
            }

            if let Some(timeout) = limits.timeout {
                // a re-join gets only a third of the budget to find its first match
                let budget = match (reference, best_match) {
                    (Some(_), None) => timeout / 3,
                    _ => timeout,
                };
                let elapsed = limits.started.elapsed();
                if elapsed > budget {
                    if let (Some(r), Some((id, k, _))) = (reference, best_match) {
                        log::info!("pass {number}: time is up, joining the previous track");
                        return Ok(Outcome::Merged(r.merge(self.arena.points(id), k)));
                    }
                    return Err(RoutingError::Timeout {
                        pass: number,
                        elapsed,
                    });
                }
            }

            steps += 1;
            if steps > limits.step_limit {
                return Err(RoutingError::StepLimitExceeded {
                    pass: number,
                    limit: limits.step_limit,
                });
            }

            let id = PathId::new(idx);
            let path = self.arena.get(id).clone();
            if path.terminal {
                log::debug!("pass {number}: track found with cost {} after {steps} steps", path.cost);
                return Ok(Outcome::Found(self.arena.points(id)));
            }

            // the bound may have tightened since the path was queued
            if self.exceeds_bound(&path) {
                continue;
            }

            if let Some(r) = reference {
                if let Some(k) = path.prev_position.and_then(|prev| r.find(prev, path.position)) {
                    let total = path.cost as f64 + r.remaining(k) as f64;
                    if best_match.map_or(true, |(_, _, t)| total < t) {
                        log::debug!("pass {number}: joined the previous track, total cost {total}");
                        best_match = Some((id, k, total));
                        self.bound = Some(self.bound.map_or(total, |b| b.min(total)));
                    }
                    continue;
                }
            }

            if let Some(node) = path.target {
                self.expand(&path, id, node)?;
            }
        }

        if let (Some(r), Some((id, k, _))) = (reference, best_match) {
            return Ok(Outcome::Merged(r.merge(self.arena.points(id), k)));
        }
        Err(RoutingError::NoTrackFound { pass: number })
    }

    fn air_distance(&self, position: (i32, i32)) -> f64 {
        let end = self.end.crosspoint;
        distance(position.0, position.1, end.ilon, end.ilat)
    }

    fn exceeds_bound(&self, path: &OsmPath<M::State>) -> bool {
        self.bound.is_some_and(|bound| {
            let estimate = path.cost as f64 + self.air_distance(path.position) * self.model.min_cost_per_meter();
            estimate > bound + BOUND_SLACK
        })
    }

    /// Follows every link leaving `node` from the end of `path`.
    fn expand(&mut self, path: &OsmPath<M::State>, id: PathId, node: NodeId) -> Result<(), RoutingError> {
        if !self.cache.obtain_non_hollow_node(node)? {
            return Ok(());
        }

        // link descriptions and elevations of the neighbors are needed up front
        let links = self.cache.graph().node(node).links().to_vec();
        for &link in &links {
            let target = self.cache.graph().link(link).target(node);
            self.cache.obtain_non_hollow_node(target)?;
        }
        self.collect_pre_paths(path, node, &links);

        let dead_end = links.len() == 1;
        for link in links {
            if path.link == Some(link) && !dead_end {
                continue;
            }

            let graph = self.cache.graph();
            let l = graph.link(link);
            let target = l.target(node);
            let inverse = l.is_reverse(node);

            if link == self.end.link {
                let from = self.end.node_position(node);
                let points = sub_polyline(&self.end.polyline, from, self.end.position);
                let t = Traversal {
                    link,
                    inverse,
                    points: &points,
                    target: None,
                    terminal: true,
                };
                self.admit_traversal(path, id, &t);
            }

            let graph = self.cache.graph();
            let l = graph.link(link);
            let mut points: Vec<GeoPoint> = l.transfer_points(node).copied().collect();
            points.push(graph.node(target).point());

            if let Some(guide) = self.pass.guide {
                let first = (points[0].ilon, points[0].ilat);
                if !guide.contains(&(path.position, first)) {
                    continue;
                }
            }

            let t = Traversal {
                link,
                inverse,
                points: &points,
                target: Some(target),
                terminal: false,
            };
            self.admit_traversal(path, id, &t);
        }
        Ok(())
    }

    /// Records the other links at `node` for the junction logic of the cost model.
    fn collect_pre_paths(&mut self, path: &OsmPath<M::State>, node: NodeId, links: &[LinkId]) {
        self.ctx.pre_paths.clear();
        let Some(prev) = path.prev_position else {
            return;
        };
        let pos = path.position;

        let graph = self.cache.graph();
        for &link in links {
            if path.link == Some(link) {
                continue;
            }
            let l = graph.link(link);
            let Some(description) = l.description() else {
                continue;
            };
            let first = l
                .transfer_points(node)
                .next()
                .copied()
                .unwrap_or_else(|| graph.node(l.target(node)).point());

            self.ctx.calc_distance(pos.0, pos.1, first.ilon, first.ilat);
            let (angle, _) = self.ctx.calc_angle(prev.0, prev.1, pos.0, pos.1, first.ilon, first.ilat);
            let way = self.ctx.evaluator.evaluate_way(l.is_reverse(node), description);
            self.ctx.pre_paths.push(PrePath {
                angle,
                priority_classifier: way.priority_classifier,
                classifier_mask: way.classifier_mask,
            });
        }
    }

    fn admit_traversal(&mut self, origin: &OsmPath<M::State>, origin_id: PathId, t: &Traversal<'_>) {
        let path = traverse(
            self.model,
            self.ctx,
            self.cache.graph(),
            origin,
            Some(origin_id),
            t,
            self.pass.detail,
        );
        if let Some(path) = path {
            self.admit(path);
        }
    }

    /// Queues a path unless it is bound to lose against the known bound or
    /// against another path on the same link. Paths it beats are dropped from the queue.
    fn admit(&mut self, path: OsmPath<M::State>) -> Option<PathId> {
        if self.exceeds_bound(&path) {
            return None;
        }

        let key = HolderKey {
            link: path.link,
            target: path.target,
            terminal: path.terminal,
        };
        let holders = self.holders.entry(key).or_default();
        for &h in holders.iter() {
            let other = self.arena.get(h);
            if self
                .model
                .definitely_worse_than(self.ctx, path.cost, &path.state, other.cost, &other.state)
            {
                return None;
            }
        }

        let (model, ctx, arena, open) = (self.model, &*self.ctx, &self.arena, &mut self.open);
        holders.retain(|&h| {
            let other = arena.get(h);
            let beaten = model.definitely_worse_than(ctx, other.cost, &other.state, path.cost, &path.state);
            if beaten {
                open.remove(h.index());
            }
            !beaten
        });

        let queue_key = path.cost as f64 + self.air_distance_of_end(&path) * self.pass.coefficient;
        let id = self.arena.push(path);
        if let Some(list) = self.holders.get_mut(&key) {
            list.push(id);
        }
        self.open.add(id.index(), queue_key as i64);
        Some(id)
    }

    fn air_distance_of_end(&self, path: &OsmPath<M::State>) -> f64 {
        if path.terminal {
            0.0
        } else {
            self.air_distance(path.position)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ilon: i32, cost: i32) -> TrackPoint {
        TrackPoint {
            cost,
            time: cost as f32,
            ..TrackPoint::new(GeoPoint::new(ilon, 0, None))
        }
    }

    #[test]
    fn reference_track_merge() {
        let old = Track::from_points(vec![point(0, 0), point(10, 10), point(20, 20), point(30, 35)]);
        let r = ReferenceTrack::new(&old);

        assert_eq!(r.find((10, 0), (20, 0)), Some(2));
        assert_eq!(r.find((20, 0), (10, 0)), None);
        assert_eq!(r.remaining(2), 15);

        // a new prefix reaching the old track at (20, 0) with cost 12
        let merged = r.merge(vec![point(5, 0), point(20, 12)], 2);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[2].position(), (30, 0));
        assert_eq!(merged[2].cost, 27);
        assert_eq!(merged[2].time, 27.0);
    }

    #[test]
    fn guide() {
        let g = guide_segments(&[point(0, 0), point(10, 1), point(20, 2)]);
        assert_eq!(g.len(), 2);
        assert!(g.contains(&((10, 0), (20, 0))));
    }

    #[test]
    fn heading() {
        // heading north: the virtual origin lies to the south
        let p = GeoPoint::new(0, 90_000_000, None);
        assert_eq!(heading_origin(p, 0.0), (0, 89_999_000));
        let (x, y) = heading_origin(p, 90.0);
        assert!(x < -999);
        assert_eq!(y, 90_000_000);
    }
}
