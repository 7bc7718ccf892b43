// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Search paths and the traversal of links.
//!
//! A path is the state of the search after following a link: its accumulated
//! cost, the model state (elevation buffers or kinetic energy) and the points
//! it covered. Paths form a tree through their parent index in a [PathArena];
//! they are never modified once pushed.

pub mod kinematic;
pub mod std_model;

use crate::context::RoutingContext;
use crate::evaluator::{NodeCost, WayCost};
use crate::graph::{is_turn_forbidden, GeoPoint, LinkId, NodeId, NodesMap};
use crate::track::{SegmentMessage, TrackPoint};
use std::fmt;

pub use kinematic::{KinematicModel, KinematicState};
pub use std_model::{StdModel, StdState};

/// Costs above this value are treated as an overflow and make the path impassable.
pub const MAX_COST: f64 = 2_000_000_000.0;

/// Index of an [OsmPath] in a [PathArena].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(u32);

impl PathId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Inputs of a single straight piece of a link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section {
    /// Length in meters, at least 1.
    pub distance: f64,

    /// Elevation change in meters.
    pub delta_h: f64,

    /// Elevation at the end of the section, in meters.
    pub elevation: f64,

    /// Turn angle at the start of the section, degrees, positive to the right.
    pub angle: f64,
    pub cos_angle: f64,

    /// True for the very first section of a route.
    pub is_start: bool,

    /// Index of the section within its link.
    pub index: usize,

    /// Priority classifier of the way the path arrived on.
    pub last_priority: i32,
}

/// Cost of a section, broken down for track messages.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SectionCost {
    pub cost: f64,
    pub turn_cost: f64,
    pub elevation_cost: f64,
    pub cost_factor: f64,
}

/// Angle and classification of a link leaving the junction a path is about to cross,
/// consulted by the kinematic model to slow down at junctions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrePath {
    pub angle: f64,
    pub priority_classifier: i32,
    pub classifier_mask: i32,
}

/// A way of turning way sections and nodes into costs.
pub trait PathModel {
    type State: Clone + Default + fmt::Debug;

    /// Cost of traveling one section of a way; updates the model state.
    fn process_way_section(
        &self,
        ctx: &RoutingContext,
        way: &WayCost,
        state: &mut Self::State,
        section: &Section,
    ) -> SectionCost;

    /// Cost of passing the node at the end of a link. Blocking nodes never reach this call.
    fn process_target_node(
        &self,
        ctx: &RoutingContext,
        state: &mut Self::State,
        node: &NodeCost,
    ) -> f64;

    /// Returns true if a path with `cost` and `state` can never become better
    /// than the other path on the same link.
    fn definitely_worse_than(
        &self,
        ctx: &RoutingContext,
        cost: i32,
        state: &Self::State,
        other_cost: i32,
        other_state: &Self::State,
    ) -> bool;

    /// Elapsed time (seconds) and energy (joules) accumulated in the state.
    fn totals(&self, state: &Self::State) -> (f32, f32);

    /// Lower bound of the cost of traveling one meter, used to prune against a known cost.
    fn min_cost_per_meter(&self) -> f64;
}

/// A node of the search tree.
#[derive(Debug, Clone)]
pub struct OsmPath<S> {
    pub parent: Option<PathId>,

    /// Link the path has followed; `None` for the path sitting at the start point.
    pub link: Option<LinkId>,

    /// Graph node the path has reached; `None` if it ends in the middle of a link.
    pub target: Option<NodeId>,

    /// Position of the end of the path.
    pub position: (i32, i32),

    /// Position of the point before [OsmPath::position], if any.
    pub prev_position: Option<(i32, i32)>,

    pub cost: i32,
    pub elevation: Option<i16>,
    pub last_classifier: i32,
    pub priority_classifier: i32,
    pub classifier_mask: i32,
    pub state: S,

    /// Points covered by the last link, ending at [OsmPath::position].
    pub points: Vec<TrackPoint>,

    /// True if the path ends at the destination.
    pub terminal: bool,
}

impl<S: Default> OsmPath<S> {
    /// Path standing at the start point, before any travel.
    pub fn start(point: GeoPoint, prev_position: Option<(i32, i32)>) -> Self {
        Self {
            parent: None,
            link: None,
            target: None,
            position: (point.ilon, point.ilat),
            prev_position,
            cost: 0,
            elevation: point.elevation,
            last_classifier: 0,
            priority_classifier: 0,
            classifier_mask: 0,
            state: S::default(),
            points: vec![TrackPoint::new(point)],
            terminal: false,
        }
    }
}

/// Append-only storage of [OsmPaths](OsmPath).
#[derive(Debug, Clone)]
pub struct PathArena<S> {
    paths: Vec<OsmPath<S>>,
}

impl<S> Default for PathArena<S> {
    fn default() -> Self {
        Self { paths: Vec::new() }
    }
}

impl<S> PathArena<S> {
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn push(&mut self, path: OsmPath<S>) -> PathId {
        let id = PathId(self.paths.len() as u32);
        self.paths.push(path);
        id
    }

    pub fn get(&self, id: PathId) -> &OsmPath<S> {
        &self.paths[id.index()]
    }

    /// Collects the points from the root of the tree to the end of `id`.
    pub fn points(&self, id: PathId) -> Vec<TrackPoint> {
        let mut chain = Vec::new();
        let mut cur = Some(id);
        while let Some(i) = cur {
            let p = self.get(i);
            chain.push(&p.points);
            cur = p.parent;
        }

        let mut points: Vec<TrackPoint> = Vec::new();
        for pts in chain.into_iter().rev() {
            for pt in pts.iter() {
                if points.last().is_some_and(|l| l.position() == pt.position()) {
                    // keep the later (more complete) copy of a repeated point
                    points.pop();
                }
                points.push(pt.clone());
            }
        }
        points
    }
}

/// What is being traversed: a whole link, or a part of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Traversal<'a> {
    pub link: LinkId,

    /// True if travel goes against the direction the way description was stored for.
    pub inverse: bool,

    /// Points to visit, excluding the current position of the origin path.
    pub points: &'a [GeoPoint],

    /// Node reached at the last point, if it is a graph node.
    pub target: Option<NodeId>,

    /// True if the last point is the destination.
    pub terminal: bool,
}

/// Extends `origin` along a link, returning `None` if the link can't be traveled:
/// the way or the target node is blocked, a hard nogo is crossed, a turn restriction
/// forbids the turn or the cost overflows.
///
/// With `detail`, per-link messages are recorded and turn restrictions are not checked.
pub fn traverse<M: PathModel>(
    model: &M,
    ctx: &mut RoutingContext,
    graph: &NodesMap,
    origin: &OsmPath<M::State>,
    origin_id: Option<PathId>,
    t: &Traversal<'_>,
    detail: bool,
) -> Option<OsmPath<M::State>> {
    let link = graph.link(t.link);
    let description = link.description()?;
    let way = ctx.evaluator.evaluate_way(t.inverse, description);
    if !way.is_passable() {
        return None;
    }

    // only the first point matters for turn restrictions
    if !detail && ctx.consider_turn_restrictions && origin.link.is_some() {
        if let (Some(via), Some(from), Some(to)) = (origin.target, origin.prev_position, t.points.first())
        {
            if is_turn_forbidden(
                graph.node(via).restrictions(),
                ctx.vehicle_mode(),
                from,
                (to.ilon, to.ilat),
            ) {
                return None;
            }
        }
    }

    let mut cost = origin.cost as f64;
    let mut state = origin.state.clone();
    let mut message = detail.then(|| SegmentMessage {
        way_tags: ctx.evaluator.describe(description),
        ..Default::default()
    });

    if way.initial_classifier != 0 && way.initial_classifier != origin.last_classifier {
        cost += way.initial_cost as f64;
        if let Some(m) = message.as_mut() {
            m.initial_cost += way.initial_cost as i32;
        }
    }

    ctx.reset_nogo_cost();
    let mut prev = origin.prev_position;
    let mut cur = origin.position;
    let mut elevation = origin.elevation;
    let mut points = Vec::with_capacity(t.points.len());

    for (index, p) in t.points.iter().enumerate() {
        let next = (p.ilon, p.ilat);
        if next == cur {
            continue;
        }

        let distance = ctx.calc_distance(cur.0, cur.1, next.0, next.1);
        if ctx.nogo_cost() < 0.0 {
            return None;
        }

        let (angle, cos_angle) = match prev {
            Some(prev) => ctx.calc_angle(prev.0, prev.1, cur.0, cur.1, next.0, next.1),
            None => (0.0, 1.0),
        };
        let delta_h = match (elevation, p.elevation) {
            (Some(a), Some(b)) => (b as f64 - a as f64) / 4.0,
            _ => 0.0,
        };

        let section = Section {
            distance: distance as f64,
            delta_h,
            elevation: p.elevation.or(elevation).map_or(100.0, |e| e as f64 / 4.0),
            angle,
            cos_angle,
            is_start: origin.link.is_none() && points.is_empty(),
            index,
            last_priority: origin.priority_classifier,
        };
        let c = model.process_way_section(ctx, &way, &mut state, &section);
        cost += c.cost.trunc();
        if cost > MAX_COST {
            return None;
        }

        if let Some(m) = message.as_mut() {
            m.distance += distance;
            m.cost_factor = c.cost_factor as f32;
            m.turn_cost += c.turn_cost as i32;
            m.elevation_cost += c.elevation_cost as i32;
        }

        let (time, energy) = model.totals(&state);
        points.push(TrackPoint {
            ilon: next.0,
            ilat: next.1,
            elevation: p.elevation.or(elevation),
            cost: cost as i32,
            time,
            energy,
            message: None,
        });

        prev = Some(cur);
        cur = next;
        if p.elevation.is_some() {
            elevation = p.elevation;
        }
    }

    cost += ctx.nogo_cost().trunc();

    if let Some(node) = t.target {
        if let Some(desc) = graph.node(node).description() {
            let node_cost = ctx.evaluator.evaluate_node(desc);
            if node_cost.is_blocking() {
                return None;
            }
            let c = model.process_target_node(ctx, &mut state, &node_cost);
            cost += c.trunc();
            if let Some(m) = message.as_mut() {
                m.node_cost += c as i32;
                m.node_tags = Some(ctx.evaluator.describe(desc));
            }
        }
    }

    if cost > MAX_COST {
        return None;
    }

    if let Some(last) = points.last_mut() {
        last.cost = cost as i32;
        let (time, energy) = model.totals(&state);
        last.time = time;
        last.energy = energy;
        last.message = message.map(Box::new);
    }

    Some(OsmPath {
        parent: origin_id,
        link: Some(t.link),
        target: t.target,
        position: cur,
        prev_position: prev,
        cost: cost as i32,
        elevation,
        last_classifier: way.initial_classifier,
        priority_classifier: way.priority_classifier,
        classifier_mask: way.classifier_mask,
        state,
        points,
        terminal: t.terminal,
    })
}

/// Points of a link from `nodes[0]` to `nodes[1]`, shape points included.
pub fn link_polyline(graph: &NodesMap, link: LinkId) -> Vec<GeoPoint> {
    let l = graph.link(link);
    let [a, b] = l.nodes();
    let mut points = Vec::with_capacity(l.transfer_count() + 2);
    points.push(graph.node(a).point());
    points.extend(l.transfer_points(a).copied());
    points.push(graph.node(b).point());
    points
}

/// Point at `position` along a polyline, where the integer part selects the
/// segment and the fractional part the place within it.
pub fn point_at(polyline: &[GeoPoint], position: f64) -> GeoPoint {
    let last = polyline.len().saturating_sub(1);
    let seg = (position.floor().max(0.0) as usize).min(last);
    let frac = position - seg as f64;
    if seg >= last || frac <= 0.0 {
        return polyline[seg];
    }

    let (a, b) = (polyline[seg], polyline[seg + 1]);
    let elevation = match (a.elevation, b.elevation) {
        (Some(x), Some(y)) => Some((x as f64 + (y as f64 - x as f64) * frac).round() as i16),
        (x, y) => x.or(y),
    };
    GeoPoint::new(
        crate::distance::interpolate(a.ilon, b.ilon, frac),
        crate::distance::interpolate(a.ilat, b.ilat, frac),
        elevation,
    )
}

/// Points passed when traveling along a polyline from position `from` to position `to`
/// (either direction), excluding the starting point and including the end point.
pub fn sub_polyline(polyline: &[GeoPoint], from: f64, to: f64) -> Vec<GeoPoint> {
    let mut points = Vec::new();
    if from < to {
        let first = from.floor() as usize + 1;
        let last = to.ceil() as usize;
        for i in first..last {
            points.push(polyline[i]);
        }
    } else if from > to {
        let first = from.ceil() as usize;
        let last = to.floor() as usize;
        for i in (last + 1..first).rev() {
            points.push(polyline[i]);
        }
    }
    points.push(point_at(polyline, to));
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::flat_context;
    use crate::graph::TurnRestriction;

    fn line() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(0, 0, Some(0)),
            GeoPoint::new(100, 0, Some(40)),
            GeoPoint::new(200, 0, None),
        ]
    }

    #[test]
    fn polyline_positions() {
        let pl = line();
        assert_eq!(point_at(&pl, 0.0), pl[0]);
        assert_eq!(point_at(&pl, 0.5), GeoPoint::new(50, 0, Some(20)));
        assert_eq!(point_at(&pl, 2.0), pl[2]);
        assert_eq!(point_at(&pl, 1.5), GeoPoint::new(150, 0, Some(40)));

        assert_eq!(
            sub_polyline(&pl, 0.5, 2.0),
            vec![pl[1], pl[2]],
        );
        assert_eq!(
            sub_polyline(&pl, 1.5, 0.0),
            vec![pl[1], pl[0]],
        );
        assert_eq!(
            sub_polyline(&pl, 0.25, 0.75),
            vec![GeoPoint::new(75, 0, Some(30))],
        );
        assert_eq!(sub_polyline(&pl, 1.0, 0.0), vec![pl[0]]);
        assert_eq!(sub_polyline(&pl, 1.0, 2.0), vec![pl[2]]);
    }

    /// Graph with a crossing at `o`: links to the west, east and north,
    /// each 1000 units long.
    fn crossing() -> (NodesMap, [NodeId; 4], [LinkId; 3]) {
        let mut g = NodesMap::new();
        let (x, y) = (10_000_000, 50_000_000);
        let o = g.get_or_insert(x, y);
        let w = g.get_or_insert(x - 1000, y);
        let e = g.get_or_insert(x + 1000, y);
        let n = g.get_or_insert(x, y + 1000);
        let restriction = TurnRestriction {
            is_positive: false,
            except_bikes: false,
            except_motorcars: false,
            from_lon: x - 1000,
            from_lat: y,
            to_lon: x,
            to_lat: y + 1000,
        };
        g.resolve(o, None, None, vec![restriction]);
        for node in [w, e, n] {
            g.resolve(node, None, None, vec![]);
        }

        let mut links = Vec::new();
        for (node, desc) in [(w, &b"w"[..]), (e, &b"blocked"[..]), (n, &b"n"[..])] {
            let l = g.add_link(o, node);
            g.describe_link(l, o, desc.into(), vec![]);
            links.push(l);
        }
        (g, [o, w, e, n], [links[0], links[1], links[2]])
    }

    #[test]
    fn traverse_costs_and_rejections() {
        let (g, [o, w, e, n], [lw, le, ln]) = crossing();
        let mut ctx = flat_context();
        let model = StdModel;

        let start: OsmPath<StdState> = OsmPath::start(g.node(w).point(), None);
        let to_o = [g.node(o).point()];
        let first = traverse(
            &model,
            &mut ctx,
            &g,
            &start,
            Some(PathId(0)),
            &Traversal {
                link: lw,
                inverse: g.link(lw).is_reverse(w),
                points: &to_o,
                target: Some(o),
                terminal: false,
            },
            false,
        )
        .unwrap();
        // 1000 units of longitude at 40°S are 85 m
        assert_eq!(first.cost, 85);
        assert_eq!(first.target, Some(o));
        assert_eq!(first.points.len(), 1);
        assert_eq!(first.points[0].cost, first.cost);

        // west -> north is forbidden by the restriction
        let to_n = [g.node(n).point()];
        let t = Traversal {
            link: ln,
            inverse: g.link(ln).is_reverse(o),
            points: &to_n,
            target: Some(n),
            terminal: false,
        };
        assert!(traverse(&model, &mut ctx, &g, &first, Some(PathId(1)), &t, false).is_none());

        // but not while re-tracking
        let detailed = traverse(&model, &mut ctx, &g, &first, Some(PathId(1)), &t, true).unwrap();
        assert!(detailed.cost > first.cost);
        let msg = detailed.points[0].message.as_ref().unwrap();
        assert_eq!(msg.way_tags, "n");

        // blocked way
        let to_e = [g.node(e).point()];
        let t = Traversal {
            link: le,
            inverse: false,
            points: &to_e,
            target: Some(e),
            terminal: false,
        };
        assert!(traverse(&model, &mut ctx, &g, &first, Some(PathId(1)), &t, false).is_none());
    }

    /// Plain ways whose description is their initial classifier, as a digit.
    #[derive(Debug)]
    struct ClassEvaluator;

    impl crate::evaluator::TagEvaluator for ClassEvaluator {
        fn lookup_version(&self) -> u16 {
            1
        }

        fn vehicle_mode(&self) -> crate::evaluator::VehicleMode {
            crate::evaluator::VehicleMode::Car
        }

        fn evaluate_way(&self, _inverse: bool, description: &[u8]) -> WayCost {
            WayCost {
                cost_factor: 1.0,
                initial_cost: 50.0,
                initial_classifier: (description[0] - b'0') as i32,
                priority_classifier: 30,
                max_speed: 50.0,
                ..WayCost::IMPASSABLE
            }
        }

        fn evaluate_node(&self, _description: &[u8]) -> NodeCost {
            NodeCost::default()
        }

        fn describe(&self, description: &[u8]) -> String {
            String::from_utf8_lossy(description).into_owned()
        }
    }

    /// Travels two consecutive, straight links of 85 m each, returning the costs
    /// after each link and the initial costs recorded in their messages.
    fn two_links(first: &[u8], second: &[u8]) -> ([i32; 2], [i32; 2]) {
        let mut g = NodesMap::new();
        let (x, y) = (10_000_000, 50_000_000);
        let nodes = [0, 1, 2].map(|i| g.get_or_insert(x + i * 1000, y));
        for node in nodes {
            g.resolve(node, None, None, vec![]);
        }
        let links = [(0, first), (1, second)].map(|(i, desc)| {
            let l = g.add_link(nodes[i], nodes[i + 1]);
            g.describe_link(l, nodes[i], desc.into(), vec![]);
            l
        });

        let mut ctx = RoutingContext::new(Box::new(ClassEvaluator)).unwrap();
        let mut path: OsmPath<StdState> = OsmPath::start(g.node(nodes[0]).point(), None);
        let mut costs = [0; 2];
        let mut initial = [0; 2];
        for i in 0..2 {
            let to = [g.node(nodes[i + 1]).point()];
            let t = Traversal {
                link: links[i],
                inverse: false,
                points: &to,
                target: Some(nodes[i + 1]),
                terminal: false,
            };
            path = traverse(&StdModel, &mut ctx, &g, &path, Some(PathId(i as u32)), &t, true).unwrap();
            costs[i] = path.cost;
            initial[i] = path.points[0].message.as_ref().unwrap().initial_cost;
        }
        (costs, initial)
    }

    #[test]
    fn class_change_cost() {
        // charged once for a run of the same class
        assert_eq!(two_links(b"1", b"1"), ([135, 220], [50, 0]));

        // charged again on every change
        assert_eq!(two_links(b"1", b"2"), ([135, 270], [50, 50]));

        // never charged for class 0
        assert_eq!(two_links(b"0", b"0"), ([85, 170], [0, 0]));
    }

    #[test]
    fn arena_points_skip_repeated_positions() {
        let mut arena: PathArena<StdState> = PathArena::default();
        let a = arena.push(OsmPath::start(GeoPoint::new(0, 0, None), None));
        let mut p = OsmPath::start(GeoPoint::new(0, 0, None), None);
        p.parent = Some(a);
        p.points = vec![
            TrackPoint::new(GeoPoint::new(0, 0, None)),
            TrackPoint::new(GeoPoint::new(5, 0, None)),
        ];
        let b = arena.push(p);
        let pts = arena.points(b);
        assert_eq!(pts.len(), 2);
        assert_eq!(pts[1].position(), (5, 0));
        assert_eq!(arena.len(), 2);
    }
}
