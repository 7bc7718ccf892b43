// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Snapping waypoints onto the closest routable link.

use super::Waypoint;
use crate::context::RoutingContext;
use crate::distance::meter_scales;
use crate::graph::{GeoPoint, LinkId, NodeId};
use crate::path::{link_polyline, point_at};
use crate::tiles::{NodesCache, TileError};
use std::collections::HashSet;

/// Number of cell rings searched around a waypoint's own cell.
const MAX_RING: i32 = 4;

/// Acceptable matching distance per unit of ring width, in meters.
const METERS_PER_RING_WIDTH: f64 = 50.0;

/// A waypoint snapped onto a link.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedWaypoint {
    pub name: String,

    /// Closest point of the link.
    pub crosspoint: GeoPoint,

    pub link: LinkId,

    /// Ends of the link; its polyline runs from the first to the second.
    pub nodes: [NodeId; 2],

    /// Points of the link, see [link_polyline].
    pub polyline: Vec<GeoPoint>,

    /// Position of the crosspoint along the polyline: segment index plus
    /// the fraction within that segment.
    pub position: f64,

    /// Distance between the waypoint and the crosspoint, in meters.
    pub distance: f64,
}

impl MatchedWaypoint {
    /// Position along the polyline of one of the link's nodes.
    pub fn node_position(&self, node: NodeId) -> f64 {
        if node == self.nodes[0] {
            0.0
        } else {
            (self.polyline.len() - 1) as f64
        }
    }
}

/// Cells `(dx, dy)` at Chebyshev distance `r` from the center cell.
fn ring(r: i32) -> impl Iterator<Item = (i32, i32)> {
    (-r..=r).flat_map(move |dy| {
        (-r..=r).filter_map(move |dx| (dx.abs() == r || dy.abs() == r).then_some((dx, dy)))
    })
}

/// Finds the link closest to a waypoint, searching rings of cells of growing size.
///
/// A match found after searching `r` rings is accepted if it is closer than
/// 50·(2r+1) meters and no closer than the border of the searched area, so
/// that an unexplored cell can't hold a better candidate. On the last ring,
/// the border condition is dropped.
pub fn match_waypoint(
    cache: &mut NodesCache,
    ctx: &mut RoutingContext,
    wp: &Waypoint,
) -> Result<Option<MatchedWaypoint>, TileError> {
    let (ilon, ilat) = wp.position();
    let Some(cell) = cache.cell_size_at(ilon, ilat)? else {
        log::debug!("no tile data for waypoint {}", wp.name);
        return Ok(None);
    };
    let origin = (ilon - ilon.rem_euclid(cell), ilat - ilat.rem_euclid(cell));
    let (kx, ky) = meter_scales(ilat);

    let max_distance = METERS_PER_RING_WIDTH * (2 * MAX_RING + 1) as f64;
    ctx.set_waypoint(ilon, ilat, max_distance);

    let mut seen = HashSet::new();
    let mut best: Option<(LinkId, f64, f64)> = None;
    let mut accepted = None;

    for r in 0..=MAX_RING {
        for (dx, dy) in ring(r) {
            let cx = origin.0 + dx * cell + cell / 2;
            let cy = origin.1 + dy * cell + cell / 2;
            for node in cache.load_all_in_segment(cx, cy)? {
                let links = cache.graph().node(node).links().to_vec();
                for link in links {
                    if !seen.insert(link) {
                        continue;
                    }
                    if let Some((position, distance)) = closest_on_link(cache, ctx, link)? {
                        best = Some((link, position, distance));
                    }
                }
            }
        }

        if let Some((link, position, distance)) = best {
            let border = [
                (ilon - (origin.0 - r * cell)) as f64 * kx,
                ((origin.0 + (r + 1) * cell) - ilon) as f64 * kx,
                (ilat - (origin.1 - r * cell)) as f64 * ky,
                ((origin.1 + (r + 1) * cell) - ilat) as f64 * ky,
            ]
            .into_iter()
            .fold(f64::INFINITY, f64::min);

            let limit = METERS_PER_RING_WIDTH * (2 * r + 1) as f64;
            if distance < limit && (distance <= border || r == MAX_RING) {
                accepted = Some((link, position, distance));
                break;
            }
        }
    }

    ctx.clear_waypoint();
    ctx.reset_nogo_cost();

    let Some((link, position, distance)) = accepted else {
        return Ok(None);
    };
    let polyline = link_polyline(cache.graph(), link);
    let crosspoint = point_at(&polyline, position);
    log::debug!(
        "matched waypoint {} onto link {:?} at {:.1} m",
        wp.name,
        link,
        distance
    );

    Ok(Some(MatchedWaypoint {
        name: wp.name.clone(),
        crosspoint,
        link,
        nodes: cache.graph().link(link).nodes(),
        polyline,
        position,
        distance,
    }))
}

/// Checks a link against the waypoint marker of the context. Returns the position
/// along the link and the distance, if the link came closer than every earlier one.
fn closest_on_link(
    cache: &mut NodesCache,
    ctx: &mut RoutingContext,
    link: LinkId,
) -> Result<Option<(f64, f64)>, TileError> {
    // both ends are needed for the description and the shape
    for node in cache.graph().link(link).nodes() {
        cache.obtain_non_hollow_node(node)?;
    }

    let graph = cache.graph();
    let l = graph.link(link);
    let Some(description) = l.description() else {
        return Ok(None);
    };
    let inverse = l.is_reverse(l.nodes()[0]);
    if !ctx.evaluator.evaluate_way(inverse, description).is_passable()
        && !ctx.evaluator.evaluate_way(!inverse, description).is_passable()
    {
        return Ok(None);
    }

    let mut found = None;
    for (i, w) in link_polyline(graph, link).windows(2).enumerate() {
        ctx.calc_distance(w[0].ilon, w[0].ilat, w[1].ilon, w[1].ilat);
        if let Some(m) = ctx.shortest_match() {
            found = Some((i as f64 + m.fraction, m.distance));
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rings() {
        assert_eq!(ring(0).collect::<Vec<_>>(), vec![(0, 0)]);
        assert_eq!(ring(1).count(), 8);
        assert_eq!(ring(2).count(), 16);
        assert!(ring(2).all(|(x, y)| x.abs() == 2 || y.abs() == 2));
    }
}
