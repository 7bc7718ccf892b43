// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::{HashMap, HashSet};

use super::model::{self, FeatureType};
use super::Options;
use crate::distance::{lat_to_ilat, lon_to_ilon};
use crate::graph::{GeoPoint, TurnRestriction};
use crate::osm::tags::{encode_node_tags, encode_way_tags};
use crate::tiles::TileWriter;

/// Counters describing the data written by a tile build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub nodes: usize,
    pub ways: usize,
    pub links: usize,
    pub restrictions: usize,
    pub skipped_restrictions: usize,
}

#[derive(Debug, Clone)]
struct NodeData {
    ilon: i32,
    ilat: i32,
    elevation: Option<i16>,
    description: Option<Vec<u8>>,
}

impl NodeData {
    fn position(&self) -> (i32, i32) {
        (self.ilon, self.ilat)
    }

    fn point(&self) -> GeoPoint {
        GeoPoint::new(self.ilon, self.ilat, self.elevation)
    }
}

#[derive(Debug, Clone)]
struct WayData {
    nodes: Vec<i64>,
    description: Vec<u8>,
}

/// Parses the `ele` tag (meters) into quarter-meters.
fn parse_elevation(tags: &HashMap<String, String>) -> Option<i16> {
    let raw = tags.get("ele")?;
    let meters: f64 = raw.trim().trim_end_matches('m').trim().parse().ok()?;
    let quarters = (meters * 4.0).round();
    (quarters.is_finite() && quarters.abs() <= i16::MAX as f64).then_some(quarters as i16)
}

/// Helper object used for storing state related to converting
/// [OSM features](super::model::Feature) into routing tiles.
///
/// Ways are split into links at junctions, at their ends, at nodes with
/// routing-relevant tags and at the via nodes of turn restrictions. The
/// remaining nodes become shape points of the links.
pub(super) struct TileBuilder<'a> {
    options: &'a Options<'a>,
    nodes: HashMap<i64, NodeData>,
    ways: HashMap<i64, WayData>,
    way_order: Vec<i64>,
    relations: Vec<model::Relation>,
    ignore_bbox: bool,
}

impl<'a> TileBuilder<'a> {
    pub(super) fn new(options: &'a Options<'a>) -> Self {
        let ignore_bbox =
            options.bbox.iter().all(|&x| x == 0.0) || options.bbox.iter().any(|x| !x.is_finite());
        if !ignore_bbox {
            log::debug!("filtering nodes by bbox {:?}", options.bbox);
        }

        Self {
            options,
            nodes: HashMap::default(),
            ways: HashMap::default(),
            way_order: Vec::default(),
            relations: Vec::default(),
            ignore_bbox,
        }
    }

    /// Add all features from the provided iterator.
    pub(super) fn add_features<E, I>(&mut self, features: I) -> Result<(), E>
    where
        I: Iterator<Item = Result<model::Feature, E>>,
    {
        for f in features {
            match f? {
                model::Feature::Node(n) => self.add_node(n),
                model::Feature::Way(w) => self.add_way(w),
                model::Feature::Relation(r) => self.add_relation(r),
            }
        }
        Ok(())
    }

    fn is_in_bbox(&self, lat: f64, lon: f64) -> bool {
        if self.ignore_bbox {
            return true;
        }
        let [min_lon, min_lat, max_lon, max_lat] = self.options.bbox;
        lat >= min_lat && lat <= max_lat && lon >= min_lon && lon <= max_lon
    }

    fn add_node(&mut self, n: model::Node) {
        if !self.is_in_bbox(n.lat, n.lon) {
            return;
        }
        self.nodes.insert(
            n.id,
            NodeData {
                ilon: lon_to_ilon(n.lon),
                ilat: lat_to_ilat(n.lat),
                elevation: parse_elevation(&n.tags),
                description: encode_node_tags(&n.tags),
            },
        );
    }

    fn add_way(&mut self, w: model::Way) {
        if !w.tags.contains_key("highway") {
            return;
        }

        if let Some(profile) = self.options.profile {
            let (forward, backward) = profile.way_direction(&w.tags);
            if profile.way_penalty(&w.tags).is_infinite() || !(forward || backward) {
                return;
            }
        }

        let Some(description) = encode_way_tags(&w.tags) else {
            return;
        };

        // Remove references to unknown nodes and repeated positions
        let mut nodes: Vec<i64> = Vec::with_capacity(w.nodes.len());
        for id in w.nodes {
            let Some(n) = self.nodes.get(&id) else {
                continue;
            };
            let repeated = nodes
                .last()
                .and_then(|last| self.nodes.get(last))
                .is_some_and(|last| last.position() == n.position());
            if !repeated {
                nodes.push(id);
            }
        }

        if nodes.len() < 2 {
            log::debug!("skipping way {}: fewer than 2 known nodes", w.id);
            return;
        }

        self.way_order.push(w.id);
        self.ways.insert(w.id, WayData { nodes, description });
    }

    fn add_relation(&mut self, r: model::Relation) {
        if r.tags.get("type").map(String::as_str) == Some("restriction") {
            self.relations.push(r);
        }
    }

    /// Converts a restriction relation into a [TurnRestriction] at its via node.
    fn restriction(&self, r: &model::Relation) -> Option<(i64, TurnRestriction)> {
        let value = r.tags.get("restriction")?;
        let is_positive = if value.starts_with("only_") {
            true
        } else if value.starts_with("no_") {
            false
        } else {
            return None;
        };

        let from = self.ways.get(&r.single_member("from", FeatureType::Way)?)?;
        let via = r.single_member("via", FeatureType::Node)?;
        let to = self.ways.get(&r.single_member("to", FeatureType::Way)?)?;

        // the way ends next to the via node, their other nodes give the direction
        let from_node = self.nodes.get(&neighbor_at_end(&from.nodes, via)?)?;
        let to_node = self.nodes.get(&neighbor_at_end(&to.nodes, via)?)?;

        let mut except_bikes = false;
        let mut except_motorcars = false;
        for mode in r.tags.get("except").map_or("", String::as_str).split(';') {
            match mode.trim() {
                "bicycle" => except_bikes = true,
                "motorcar" | "motor_vehicle" => except_motorcars = true,
                _ => {}
            }
        }

        Some((
            via,
            TurnRestriction {
                is_positive,
                except_bikes,
                except_motorcars,
                from_lon: from_node.ilon,
                from_lat: from_node.ilat,
                to_lon: to_node.ilon,
                to_lat: to_node.ilat,
            },
        ))
    }

    /// Nodes at which ways must be split into links.
    fn split_nodes(&self, via_nodes: &HashSet<i64>) -> HashSet<i64> {
        let mut uses: HashMap<i64, usize> = HashMap::new();
        let mut split: HashSet<i64> = via_nodes.clone();

        for way in self.ways.values() {
            let last = way.nodes.len() - 1;
            split.insert(way.nodes[0]);
            split.insert(way.nodes[last]);
            // a closed way needs a split in the middle to avoid a zero-length link
            if way.nodes[0] == way.nodes[last] && last >= 2 {
                split.insert(way.nodes[last / 2]);
            }
            for id in &way.nodes {
                *uses.entry(*id).or_default() += 1;
            }
        }

        split.extend(uses.into_iter().filter(|&(_, n)| n > 1).map(|(id, _)| id));
        split.extend(
            self.nodes
                .iter()
                .filter(|(_, n)| n.description.is_some())
                .map(|(&id, _)| id),
        );
        split
    }

    /// Writes all collected data into `w`.
    pub(super) fn finish(self, w: &mut TileWriter) -> BuildStats {
        let mut stats = BuildStats::default();

        let mut restrictions = Vec::new();
        for r in &self.relations {
            match self.restriction(r) {
                Some(x) => restrictions.push(x),
                None => {
                    log::debug!("skipping unsupported restriction relation {}", r.id);
                    stats.skipped_restrictions += 1;
                }
            }
        }
        let via_nodes: HashSet<i64> = restrictions.iter().map(|(via, _)| *via).collect();
        let split = self.split_nodes(&via_nodes);

        let mut written: HashSet<i64> = HashSet::new();
        for way_id in &self.way_order {
            let Some(way) = self.ways.get(way_id) else {
                continue;
            };
            stats.ways += 1;

            let mut start = &self.nodes[&way.nodes[0]];
            let mut shape: Vec<GeoPoint> = Vec::new();
            for id in &way.nodes {
                if split.contains(id) && written.insert(*id) {
                    let n = &self.nodes[id];
                    w.add_node(n.ilon, n.ilat, n.elevation, n.description.clone());
                    stats.nodes += 1;
                }
            }

            for id in &way.nodes[1..] {
                let n = &self.nodes[id];
                if !split.contains(id) {
                    shape.push(n.point());
                    continue;
                }
                w.add_link(
                    start.position(),
                    n.position(),
                    way.description.clone(),
                    std::mem::take(&mut shape),
                );
                stats.links += 1;
                start = n;
            }
        }

        for (via, restriction) in restrictions {
            let n = &self.nodes[&via];
            w.add_restriction(n.position(), restriction);
            stats.restrictions += 1;
        }

        log::info!(
            "converted {} ways into {} links between {} nodes, with {} turn restrictions",
            stats.ways,
            stats.links,
            stats.nodes,
            stats.restrictions
        );
        stats
    }
}

/// For a node at either end of a way, returns its neighbor along the way.
fn neighbor_at_end(nodes: &[i64], node: i64) -> Option<i64> {
    let last = nodes.len().checked_sub(1)?;
    if nodes[0] == node {
        nodes.get(1).copied()
    } else if nodes[last] == node {
        last.checked_sub(1).map(|i| nodes[i])
    } else {
        None
    }
}
