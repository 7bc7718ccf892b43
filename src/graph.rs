// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! In-memory graph materialized from tiles.
//!
//! Nodes and links live in an arena ([NodesMap]) and refer to each other through
//! [NodeId] and [LinkId] indices. A node starts out "hollow" (only its position
//! is known, because a neighbor linked to it) and becomes resolved once its own
//! body is decoded from a tile.

use crate::distance::position_id;
use crate::evaluator::VehicleMode;
use std::collections::HashMap;

/// Index of an [OsmNode] in a [NodesMap].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an [OsmLink] in a [NodesMap].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u32);

impl LinkId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A fixed-point position with an optional elevation, in quarter-meters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoPoint {
    pub ilon: i32,
    pub ilat: i32,
    pub elevation: Option<i16>,
}

impl GeoPoint {
    pub fn new(ilon: i32, ilat: i32, elevation: Option<i16>) -> Self {
        Self {
            ilon,
            ilat,
            elevation,
        }
    }

    pub fn id(&self) -> i64 {
        position_id(self.ilon, self.ilat)
    }
}

/// A turn restriction attached to its via node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnRestriction {
    /// `only_*` restriction if true, `no_*` restriction otherwise.
    pub is_positive: bool,
    pub except_bikes: bool,
    pub except_motorcars: bool,

    /// Position of the first node after the via node on the "from" way.
    pub from_lon: i32,
    pub from_lat: i32,

    /// Position of the first node after the via node on the "to" way.
    pub to_lon: i32,
    pub to_lat: i32,
}

impl TurnRestriction {
    /// Returns true if the restriction binds the given kind of vehicle.
    pub fn applies_to(&self, mode: VehicleMode) -> bool {
        match mode {
            VehicleMode::Car => !self.except_motorcars,
            VehicleMode::Bicycle => !self.except_bikes,
            VehicleMode::Foot => false,
        }
    }
}

/// Checks whether turning from `from` (the position before the via node) onto
/// `to` (the position after the via node) is forbidden by any of the restrictions.
///
/// A prohibitory restriction forbids exactly its turn; a mandatory restriction
/// forbids every other turn for vehicles arriving on its "from" segment.
pub fn is_turn_forbidden(
    restrictions: &[TurnRestriction],
    mode: VehicleMode,
    from: (i32, i32),
    to: (i32, i32),
) -> bool {
    let mut has_positive = false;
    let mut positive_matches = false;

    for r in restrictions.iter().filter(|r| r.applies_to(mode)) {
        if (r.from_lon, r.from_lat) != from {
            continue;
        }

        let matches_to = (r.to_lon, r.to_lat) == to;
        if r.is_positive {
            has_positive = true;
            positive_matches |= matches_to;
        } else if matches_to {
            return true;
        }
    }

    has_positive && !positive_matches
}

#[derive(Debug, Clone, PartialEq)]
enum NodeBody {
    Hollow,
    Resolved {
        elevation: Option<i16>,
        description: Option<Box<[u8]>>,
        restrictions: Vec<TurnRestriction>,
    },
}

/// A graph node, identified by its position.
#[derive(Debug, Clone, PartialEq)]
pub struct OsmNode {
    pub ilon: i32,
    pub ilat: i32,
    body: NodeBody,
    links: Vec<LinkId>,
}

impl OsmNode {
    pub fn id(&self) -> i64 {
        position_id(self.ilon, self.ilat)
    }

    /// Returns true if the node's own body hasn't been decoded yet.
    pub fn is_hollow(&self) -> bool {
        matches!(self.body, NodeBody::Hollow)
    }

    pub fn elevation(&self) -> Option<i16> {
        match &self.body {
            NodeBody::Resolved { elevation, .. } => *elevation,
            NodeBody::Hollow => None,
        }
    }

    pub fn description(&self) -> Option<&[u8]> {
        match &self.body {
            NodeBody::Resolved { description, .. } => description.as_deref(),
            NodeBody::Hollow => None,
        }
    }

    pub fn restrictions(&self) -> &[TurnRestriction] {
        match &self.body {
            NodeBody::Resolved { restrictions, .. } => restrictions,
            NodeBody::Hollow => &[],
        }
    }

    pub fn links(&self) -> &[LinkId] {
        &self.links
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.ilon, self.ilat, self.elevation())
    }
}

/// An undirected connection between two nodes, with its way description
/// and intermediate shape points.
#[derive(Debug, Clone, PartialEq)]
pub struct OsmLink {
    nodes: [NodeId; 2],
    description: Option<Box<[u8]>>,
    geometry: Vec<GeoPoint>,
    reversed: bool,
}

impl OsmLink {
    pub fn nodes(&self) -> [NodeId; 2] {
        self.nodes
    }

    /// Returns the node at the other end of the link.
    pub fn target(&self, from: NodeId) -> NodeId {
        if self.nodes[0] == from {
            self.nodes[1]
        } else {
            self.nodes[0]
        }
    }

    /// Returns true if traveling away from `from` goes against the direction
    /// the description was stored for.
    pub fn is_reverse(&self, from: NodeId) -> bool {
        (self.nodes[0] == from) == self.reversed
    }

    /// Way description, `None` while the owning end of the link is still hollow.
    pub fn description(&self) -> Option<&[u8]> {
        self.description.as_deref()
    }

    /// Intermediate shape points, in the order of travel away from `from`.
    pub fn transfer_points(&self, from: NodeId) -> impl Iterator<Item = &GeoPoint> + '_ {
        let rev = self.is_reverse(from);
        let n = self.geometry.len();
        (0..n).map(move |i| &self.geometry[if rev { n - 1 - i } else { i }])
    }

    pub fn transfer_count(&self) -> usize {
        self.geometry.len()
    }
}

/// Arena of [OsmNodes](OsmNode) and [OsmLinks](OsmLink), indexed by position.
#[derive(Debug, Default, Clone)]
pub struct NodesMap {
    nodes: Vec<OsmNode>,
    links: Vec<OsmLink>,
    by_position: HashMap<i64, NodeId>,
    payload_bytes: usize,
}

impl NodesMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of nodes in the map.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn node(&self, id: NodeId) -> &OsmNode {
        &self.nodes[id.index()]
    }

    pub fn link(&self, id: LinkId) -> &OsmLink {
        &self.links[id.index()]
    }

    /// Finds the node at the given position.
    pub fn find(&self, ilon: i32, ilat: i32) -> Option<NodeId> {
        self.by_position.get(&position_id(ilon, ilat)).copied()
    }

    /// Returns the node at the given position, creating a hollow one if necessary.
    pub fn get_or_insert(&mut self, ilon: i32, ilat: i32) -> NodeId {
        *self
            .by_position
            .entry(position_id(ilon, ilat))
            .or_insert_with(|| {
                let id = NodeId(self.nodes.len() as u32);
                self.nodes.push(OsmNode {
                    ilon,
                    ilat,
                    body: NodeBody::Hollow,
                    links: Vec::new(),
                });
                id
            })
    }

    /// Finds a link between two nodes, preferring one without a description.
    pub fn find_link(&self, a: NodeId, b: NodeId, without_description: bool) -> Option<LinkId> {
        self.node(a).links.iter().copied().find(|&l| {
            let link = self.link(l);
            link.target(a) == b && (!without_description || link.description.is_none())
        })
    }

    /// Creates a new link between two nodes, without a description.
    pub fn add_link(&mut self, a: NodeId, b: NodeId) -> LinkId {
        let id = LinkId(self.links.len() as u32);
        self.links.push(OsmLink {
            nodes: [a, b],
            description: None,
            geometry: Vec::new(),
            reversed: false,
        });
        self.nodes[a.index()].links.push(id);
        self.nodes[b.index()].links.push(id);
        id
    }

    /// Attaches a way description, stored for the direction `owner` → other end.
    pub fn describe_link(
        &mut self,
        link: LinkId,
        owner: NodeId,
        description: Box<[u8]>,
        geometry: Vec<GeoPoint>,
    ) {
        self.payload_bytes += description.len() + geometry.len() * std::mem::size_of::<GeoPoint>();
        let l = &mut self.links[link.index()];
        l.reversed = l.nodes[0] != owner;
        l.description = Some(description);
        l.geometry = geometry;
    }

    /// Turns a hollow node into a resolved one.
    pub fn resolve(
        &mut self,
        node: NodeId,
        elevation: Option<i16>,
        description: Option<Box<[u8]>>,
        restrictions: Vec<TurnRestriction>,
    ) {
        self.payload_bytes += description.as_ref().map_or(0, |d| d.len())
            + restrictions.len() * std::mem::size_of::<TurnRestriction>();
        self.nodes[node.index()].body = NodeBody::Resolved {
            elevation,
            description,
            restrictions,
        };
    }

    /// Rough number of bytes held by the map.
    pub fn memory_estimate(&self) -> usize {
        self.nodes.len() * (std::mem::size_of::<OsmNode>() + 2 * std::mem::size_of::<LinkId>() + 24)
            + self.links.len() * std::mem::size_of::<OsmLink>()
            + self.payload_bytes
    }

    /// Removes all nodes and links.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.links.clear();
        self.by_position.clear();
        self.payload_bytes = 0;
    }
}
