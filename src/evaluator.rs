// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Contract between the router and a profile evaluator.
//!
//! Ways and nodes carry opaque tag-description blobs. Turning those into numeric
//! cost factors is the job of a [TagEvaluator]; the search itself never looks
//! inside a description. [crate::osm::ProfileEvaluator] is the implementation shipped
//! with this crate.

/// Cost factors at or above this value make a way impassable in the evaluated direction.
pub const IMPASSABLE_COST_FACTOR: f32 = 9999.0;

/// Node costs at or above this value block passage through a node.
pub const BLOCKING_NODE_COST: f32 = 1_000_000.0;

/// Bits of [WayCost::classifier_mask].
pub mod classifier {
    /// The way is a connection ramp (`*_link`).
    pub const LINK: i32 = 8;

    /// The way is a residential street.
    pub const RESIDENTIAL: i32 = 32;

    /// Access on the way is limited to destination traffic.
    pub const DESTINATION: i32 = 64;
}

/// Kind of vehicle a profile describes, used for turn restriction exceptions
/// and the time estimate of the heuristic cost model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleMode {
    Car,
    Bicycle,
    Foot,
}

/// Numeric cost factors of a way, as seen in one direction of travel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WayCost {
    /// Cost per meter on level ground.
    pub cost_factor: f32,

    /// Cost per meter when going uphill; zero means "same as [WayCost::cost_factor]".
    pub uphill_cost_factor: f32,

    /// Cost per meter when going downhill; zero means "same as [WayCost::cost_factor]".
    pub downhill_cost_factor: f32,

    /// Cost of a 90° turn; turns are charged proportionally to `1 - cos(angle)`.
    pub turn_cost: f32,

    /// Cost charged once when entering a run of ways with a different
    /// [WayCost::initial_classifier].
    pub initial_cost: f32,

    /// Class of the way for the purpose of [WayCost::initial_cost].
    /// Zero disables the class-change penalty.
    pub initial_classifier: i32,

    /// Importance of the way; higher values describe more important roads.
    /// Values below 20 describe ways outside the road network (paths, tracks).
    pub priority_classifier: i32,

    /// Additional flags, see [classifier].
    pub classifier_mask: i32,

    /// Legal speed limit, in km/h. Zero means no limit.
    pub max_speed: f32,

    /// Minimum expected speed, in km/h. Zero means no minimum.
    pub min_speed: f32,
}

impl WayCost {
    /// Cost of a way which can't be used at all.
    pub const IMPASSABLE: Self = Self {
        cost_factor: IMPASSABLE_COST_FACTOR,
        uphill_cost_factor: 0.0,
        downhill_cost_factor: 0.0,
        turn_cost: 0.0,
        initial_cost: 0.0,
        initial_classifier: 0,
        priority_classifier: 0,
        classifier_mask: 0,
        max_speed: 0.0,
        min_speed: 0.0,
    };

    /// Returns true if the way can be used in the evaluated direction.
    pub fn is_passable(&self) -> bool {
        self.cost_factor.is_finite() && self.cost_factor < IMPASSABLE_COST_FACTOR
    }
}

/// Numeric costs of passing through a node.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeCost {
    /// Extra cost of passing through the node; see [BLOCKING_NODE_COST].
    pub initial_cost: f32,

    /// Maximum speed at the node, in km/h (e.g. zero for a stop sign).
    /// `None` if the node imposes no limit.
    pub max_speed: Option<f32>,
}

impl NodeCost {
    /// Returns true if the node can't be passed.
    pub fn is_blocking(&self) -> bool {
        !(self.initial_cost < BLOCKING_NODE_COST)
    }
}

/// Interprets tag-description blobs stored in tiles.
///
/// Implementations are expected to be deterministic: the same description
/// evaluated in the same direction must always produce the same costs.
pub trait TagEvaluator {
    /// Version of the description encoding this evaluator understands.
    /// Tiles written with a different version are rejected.
    fn lookup_version(&self) -> u16;

    /// Kind of vehicle described by the profile.
    fn vehicle_mode(&self) -> VehicleMode;

    /// Evaluates a way description. `inverse` is true when the way is traveled
    /// against the direction the description was stored for.
    fn evaluate_way(&self, inverse: bool, description: &[u8]) -> WayCost;

    /// Evaluates a node description.
    fn evaluate_node(&self, description: &[u8]) -> NodeCost;

    /// Human readable form of a description, used in track messages.
    fn describe(&self, description: &[u8]) -> String;

    /// Default routing parameters recommended by the profile, applied with
    /// [RoutingContext::set_parameter](crate::RoutingContext::set_parameter)
    /// when a context is created.
    fn parameters(&self) -> &[(&str, &str)] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn way_cost_passability() {
        assert!(!WayCost::IMPASSABLE.is_passable());

        let mut c = WayCost::IMPASSABLE;
        c.cost_factor = 1.0;
        assert!(c.is_passable());

        c.cost_factor = f32::NAN;
        assert!(!c.is_passable());
    }

    #[test]
    fn node_cost_blocking() {
        assert!(!NodeCost::default().is_blocking());
        assert!(NodeCost {
            initial_cost: BLOCKING_NODE_COST,
            max_speed: None
        }
        .is_blocking());
        assert!(NodeCost {
            initial_cost: f32::NAN,
            max_speed: None
        }
        .is_blocking());
    }
}
