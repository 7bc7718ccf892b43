// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use super::tags::{decode_tags, describe_tags, TAG_LOOKUP_VERSION};
use crate::evaluator::{
    classifier, NodeCost, TagEvaluator, VehicleMode, WayCost, BLOCKING_NODE_COST,
};
use std::cell::RefCell;
use std::collections::HashMap;

/// Describes how to interpret OSM tags stored in tiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Profile<'a> {
    /// Human readable name of the routing profile.
    pub name: &'a str,

    /// Kind of vehicle described by the profile.
    ///
    /// [VehicleMode::Foot] adds the following logic:
    /// - `oneway` tags are ignored - only `oneway:foot` tags are considered, except on:
    ///    - `highway=footway`,
    ///    - `highway=path`,
    ///    - `highway=steps`,
    ///    - `highway=platform`
    ///    - `public_transport=platform`,
    ///    - `railway=platform`.
    pub mode: VehicleMode,

    /// Array of tags which OSM ways can be used for routing.
    ///
    /// A way is matched against all [Penalty] objects in order, and
    /// once an exact key and value match is found; the way is used for routing,
    /// with the penalty as its cost factor (cost per meter).
    ///
    /// All penalties must be normal and not less than one.
    pub penalties: &'a [Penalty<'a>],

    /// Array of OSM [access tags](https://wiki.openstreetmap.org/wiki/Key:access#Land-based_transportation)
    /// (in order from least to most specific) to consider when checking for road prohibitions.
    ///
    /// This array is also used to follow mode-specific one-way tags (see [Profile::way_direction]).
    pub access: &'a [&'a str],

    /// Force no routing over [motorroad=yes](https://wiki.openstreetmap.org/wiki/Key:motorroad) ways.
    pub disallow_motorroad: bool,

    /// Cost of a 90° turn.
    pub turn_cost: f32,

    /// Cost of switching between the road network (ways with a priority of at least 20)
    /// and minor ways.
    pub network_change_cost: f32,

    /// Routing parameters recommended for this profile.
    pub parameters: &'a [(&'a str, &'a str)],
}

/// Numeric multiplier for OSM ways with specific keys and values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Penalty<'a> {
    /// Key of an OSM way for which this Penalty applies,
    /// used for [Penalty::value] comparison (e.g. "highway" or "railway")
    pub key: &'a str,

    /// Value under [Penalty::key] of an OSM way for which this Penalty applies.
    /// E.g. "motorway", "residential" or "rail".
    pub value: &'a str,

    /// Multiplier of the length, to express preference for a specific way.
    /// Must be not less than one and a finite floating-point number.
    pub penalty: f32,
}

const fn highway(value: &'static str, penalty: f32) -> Penalty<'static> {
    Penalty {
        key: "highway",
        value,
        penalty,
    }
}

impl<'a> Profile<'a> {
    /// Finds the first matching [Penalty] for a way with given tags.
    /// If there is no matching penalty, or if the way is disallowed
    /// by the access tags (as determined by [Profile::is_allowed]),
    /// returns [f32::INFINITY].
    pub fn way_penalty(&self, tags: &HashMap<String, String>) -> f32 {
        let penalty = self.get_penalty(tags);
        if !penalty.is_normal() || !self.is_allowed(tags) {
            return f32::INFINITY;
        }
        penalty
    }

    /// Returns the first matching penalty from way tags, or [f32::INFINITY] otherwise.
    fn get_penalty(&self, tags: &HashMap<String, String>) -> f32 {
        self.penalties
            .iter()
            .find(|p| tags.get(p.key).map(|v| v.as_str()) == Some(p.value))
            .map_or(f32::INFINITY, |p| p.penalty)
    }

    /// Returns the value of the most specific access tag, if any.
    fn access_value<'t>(&self, tags: &'t HashMap<String, String>) -> Option<&'t str> {
        self.access
            .iter()
            .rev()
            .find_map(|&mode| tags.get(mode).map(|v| v.as_str()))
    }

    /// Checks if the way is routable, by considering motor roads ([Profile::disallow_motorroad])
    /// and access tags ([Profile::access]).
    pub fn is_allowed(&self, tags: &HashMap<String, String>) -> bool {
        if self.disallow_motorroad && tags.get("motorroad").map(|v| v.as_str()) == Some("yes") {
            return false;
        }

        !matches!(self.access_value(tags), Some("no") | Some("private"))
    }

    /// Checks if a way is traversable forward (first return value) and
    /// backwards (second return value) by investigating mode-specific and generic one-way tags.
    ///
    /// Some ways (highway=motorway, highway=motorway_link, junction=roundabout and
    /// junction=circular) default to being one-way, except if overridden by specific tags.
    pub fn way_direction(&self, tags: &HashMap<String, String>) -> (bool, bool) {
        let mut forward = true;
        let mut backward = true;

        if self.mode != VehicleMode::Foot {
            if let Some("motorway" | "motorway_link") = tags.get("highway").map(|s| s.as_str()) {
                backward = false;
            }
            if let Some("roundabout" | "circular") = tags.get("junction").map(|s| s.as_str()) {
                backward = false;
            }
        }

        match self.get_active_oneway_value(tags) {
            "yes" | "true" | "1" => {
                forward = true;
                backward = false;
            }
            "-1" | "reverse" => {
                forward = false;
                backward = true;
            }
            "no" => {
                forward = true;
                backward = true;
            }
            _ => {}
        }

        (forward, backward)
    }

    /// Returns the value of the most specific "oneway:MODE" tag (based on [Profile::access]),
    /// falling back to simply "oneway", and returning an empty string if no relevant tag was found.
    fn get_active_oneway_value<'t>(&self, tags: &'t HashMap<String, String>) -> &'t str {
        if self.mode == VehicleMode::Foot {
            if let Some(oneway_foot) = tags.get("oneway:foot") {
                return oneway_foot.as_str();
            }

            if allow_generic_oneway_to_apply_on_foot(tags) {
                if let Some(oneway) = tags.get("oneway") {
                    return oneway.as_str();
                }
            }

            ""
        } else {
            self.access
                .iter()
                .rev()
                .filter(|&&mode| mode != "access")
                .find_map(|&mode| tags.get(&format!("oneway:{}", mode)))
                .or_else(|| tags.get("oneway"))
                .map_or("", |v| v.as_str())
        }
    }

    /// Legal speed limit on a way, in km/h; zero if unknown and without a default.
    pub fn max_speed(&self, tags: &HashMap<String, String>) -> f32 {
        if let Some(speed) = tags.get("maxspeed").and_then(|v| parse_max_speed(v)) {
            return speed;
        }

        if self.mode != VehicleMode::Car {
            return 0.0;
        }
        match tags.get("highway").map_or("", |v| v.as_str()) {
            "motorway" => 130.0,
            "trunk" => 100.0,
            "primary" => 90.0,
            "motorway_link" | "secondary" => 80.0,
            "trunk_link" | "tertiary" => 70.0,
            "primary_link" | "unclassified" => 60.0,
            "secondary_link" | "tertiary_link" | "residential" => 50.0,
            "service" => 30.0,
            "track" => 20.0,
            "living_street" => 10.0,
            _ => 0.0,
        }
    }

    /// Evaluates a way, traveled along (`inverse == false`) or against its direction.
    pub fn way_cost(&self, tags: &HashMap<String, String>, inverse: bool) -> WayCost {
        let penalty = self.way_penalty(tags);
        let (forward, backward) = self.way_direction(tags);
        if !penalty.is_finite() || !(if inverse { backward } else { forward }) {
            return WayCost::IMPASSABLE;
        }

        let hw = tags.get("highway").map_or("", |v| v.as_str());
        let priority = priority_classifier(hw);

        let mut mask = 0;
        if hw.ends_with("_link") {
            mask |= classifier::LINK;
        }
        if hw == "residential" || hw == "living_street" {
            mask |= classifier::RESIDENTIAL;
        }
        if self.access_value(tags) == Some("destination") {
            mask |= classifier::DESTINATION;
        }

        WayCost {
            cost_factor: penalty,
            uphill_cost_factor: 0.0,
            downhill_cost_factor: 0.0,
            turn_cost: self.turn_cost,
            initial_cost: self.network_change_cost,
            initial_classifier: if priority >= 20 { 1 } else { 2 },
            priority_classifier: priority,
            classifier_mask: mask,
            max_speed: self.max_speed(tags),
            min_speed: 0.0,
        }
    }

    /// Evaluates passing through a node.
    pub fn node_cost(&self, tags: &HashMap<String, String>) -> NodeCost {
        if matches!(self.access_value(tags), Some("no") | Some("private")) {
            return NodeCost {
                initial_cost: BLOCKING_NODE_COST,
                max_speed: None,
            };
        }
        let explicitly_allowed = matches!(
            self.access_value(tags),
            Some("yes") | Some("permissive") | Some("designated")
        );

        let barrier = tags.get("barrier").map_or("", |v| v.as_str());
        let initial_cost = match (self.mode, barrier) {
            (_, "") => 0.0,
            (_, _) if explicitly_allowed => 0.0,
            (
                VehicleMode::Car,
                "bollard" | "block" | "cycle_barrier" | "kissing_gate" | "stile" | "turnstile",
            ) => BLOCKING_NODE_COST,
            (VehicleMode::Car, "gate" | "lift_gate" | "swing_gate") => 100.0,
            (VehicleMode::Bicycle, "stile" | "turnstile" | "kissing_gate") => 200.0,
            (VehicleMode::Bicycle, "gate" | "lift_gate" | "swing_gate" | "cycle_barrier") => 20.0,
            _ => 0.0,
        };

        let highway = tags.get("highway").map_or("", |v| v.as_str());
        let (signal_cost, max_speed) = match (self.mode, highway) {
            (VehicleMode::Car, "traffic_signals") => (30.0, Some(0.0)),
            (VehicleMode::Car, "stop") => (0.0, Some(0.0)),
            (VehicleMode::Bicycle, "traffic_signals") => (10.0, None),
            _ => (0.0, None),
        };

        NodeCost {
            initial_cost: initial_cost + signal_cost,
            max_speed,
        }
    }
}

fn allow_generic_oneway_to_apply_on_foot(tags: &HashMap<String, String>) -> bool {
    // By default, on foot, only "oneway:foot" is considered. However, on the following
    // ways the generic "oneway" tag also applies.
    matches!(
        tags.get("highway").map(|v| v.as_str()),
        Some("footway") | Some("path") | Some("steps") | Some("platform")
    ) || tags.get("public_transport").map(|v| v.as_str()) == Some("platform")
        || tags.get("railway").map(|v| v.as_str()) == Some("platform")
}

/// Parses a `maxspeed` value into km/h. `none` maps to zero (no limit).
fn parse_max_speed(value: &str) -> Option<f32> {
    let value = value.trim();
    match value {
        "none" => return Some(0.0),
        "walk" => return Some(6.0),
        _ => {}
    }

    if let Some(mph) = value.strip_suffix("mph") {
        return mph.trim().parse::<f32>().ok().map(|v| v * 1.609_344);
    }
    value.parse::<f32>().ok().filter(|v| *v >= 0.0)
}

/// Importance of a way; 20 and above is the road network.
fn priority_classifier(highway: &str) -> i32 {
    match highway {
        "motorway" => 30,
        "motorway_link" => 29,
        "trunk" => 28,
        "trunk_link" => 27,
        "primary" => 26,
        "primary_link" => 25,
        "secondary" => 24,
        "secondary_link" => 23,
        "tertiary" => 22,
        "tertiary_link" => 21,
        "unclassified" | "residential" | "living_street" => 20,
        "service" => 6,
        "track" => 4,
        "cycleway" => 3,
        "path" | "footway" | "pedestrian" | "bridleway" | "steps" | "platform" => 2,
        _ => 0,
    }
}

/// Example routing [Profile] for cars, preferring faster roads.
pub const CAR_PROFILE: Profile = Profile {
    name: "car",
    mode: VehicleMode::Car,
    penalties: &[
        highway("motorway", 1.0),
        highway("trunk", 1.0),
        highway("motorway_link", 1.1),
        highway("trunk_link", 1.1),
        highway("primary", 1.1),
        highway("primary_link", 1.2),
        highway("secondary", 1.2),
        highway("secondary_link", 1.3),
        highway("tertiary", 1.3),
        highway("tertiary_link", 1.4),
        highway("unclassified", 1.5),
        highway("residential", 1.8),
        highway("living_street", 3.0),
        highway("service", 3.0),
        highway("track", 10.0),
    ],
    access: &["access", "vehicle", "motor_vehicle", "motorcar"],
    disallow_motorroad: false,
    turn_cost: 30.0,
    network_change_cost: 100.0,
    parameters: &[],
};

/// Example routing [Profile] for bicycles, with preferences for quieter roads.
pub const BICYCLE_PROFILE: Profile = Profile {
    name: "bicycle",
    mode: VehicleMode::Bicycle,
    penalties: &[
        highway("cycleway", 1.0),
        highway("residential", 1.1),
        highway("living_street", 1.1),
        highway("path", 1.2),
        highway("unclassified", 1.2),
        highway("service", 1.3),
        highway("tertiary", 1.4),
        highway("tertiary_link", 1.4),
        highway("track", 1.5),
        highway("secondary", 2.0),
        highway("secondary_link", 2.0),
        highway("footway", 3.0),
        highway("pedestrian", 3.0),
        highway("primary", 4.0),
        highway("primary_link", 4.0),
        highway("bridleway", 5.0),
        highway("trunk", 10.0),
        highway("trunk_link", 10.0),
        highway("steps", 20.0),
    ],
    access: &["access", "vehicle", "bicycle"],
    disallow_motorroad: true,
    turn_cost: 90.0,
    network_change_cost: 0.0,
    parameters: &[
        ("downhillcost", "60"),
        ("downhillcutoff", "1.5"),
        ("uphillcost", "0"),
        ("uphillcutoff", "1.5"),
    ],
};

/// Example routing [Profile] for pedestrians.
pub const FOOT_PROFILE: Profile = Profile {
    name: "foot",
    mode: VehicleMode::Foot,
    penalties: &[
        highway("footway", 1.0),
        highway("pedestrian", 1.0),
        highway("path", 1.0),
        highway("living_street", 1.0),
        highway("platform", 1.0),
        highway("residential", 1.1),
        highway("service", 1.1),
        highway("track", 1.1),
        highway("cycleway", 1.3),
        highway("unclassified", 1.3),
        highway("steps", 1.5),
        highway("tertiary", 1.5),
        highway("tertiary_link", 1.5),
        highway("secondary", 1.8),
        highway("secondary_link", 1.8),
        highway("primary", 2.0),
        highway("primary_link", 2.0),
    ],
    access: &["access", "foot"],
    disallow_motorroad: true,
    turn_cost: 0.0,
    network_change_cost: 0.0,
    parameters: &[("considerTurnRestrictions", "false")],
};

/// Returns one of the built-in profiles by name.
pub fn profile_by_name(name: &str) -> Option<Profile<'static>> {
    match name {
        "car" => Some(CAR_PROFILE),
        "bicycle" | "bike" => Some(BICYCLE_PROFILE),
        "foot" => Some(FOOT_PROFILE),
        _ => None,
    }
}

/// [TagEvaluator] backed by a [Profile], caching way evaluations by description.
#[derive(Debug)]
pub struct ProfileEvaluator {
    profile: Profile<'static>,
    way_cache: [RefCell<HashMap<Box<[u8]>, WayCost>>; 2],
}

impl ProfileEvaluator {
    pub fn new(profile: Profile<'static>) -> Self {
        Self {
            profile,
            way_cache: Default::default(),
        }
    }

    pub fn profile(&self) -> &Profile<'static> {
        &self.profile
    }
}

impl TagEvaluator for ProfileEvaluator {
    fn lookup_version(&self) -> u16 {
        TAG_LOOKUP_VERSION
    }

    fn vehicle_mode(&self) -> VehicleMode {
        self.profile.mode
    }

    fn evaluate_way(&self, inverse: bool, description: &[u8]) -> WayCost {
        let cache = &self.way_cache[inverse as usize];
        if let Some(&cost) = cache.borrow().get(description) {
            return cost;
        }

        let cost = self.profile.way_cost(&decode_tags(description), inverse);
        cache.borrow_mut().insert(description.into(), cost);
        cost
    }

    fn evaluate_node(&self, description: &[u8]) -> NodeCost {
        self.profile.node_cost(&decode_tags(description))
    }

    fn describe(&self, description: &[u8]) -> String {
        describe_tags(description)
    }

    fn parameters(&self) -> &[(&str, &str)] {
        self.profile.parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PROFILE: Profile = Profile {
        name: "cat",
        mode: VehicleMode::Bicycle,
        penalties: &[highway("footway", 1.0), highway("path", 2.0)],
        access: &["access", "cat"],
        disallow_motorroad: false,
        turn_cost: 10.0,
        network_change_cost: 5.0,
        parameters: &[],
    };

    const TEST_PROFILE_WITHOUT_MOTORROAD: Profile = Profile {
        disallow_motorroad: true,
        ..TEST_PROFILE
    };

    macro_rules! tags {
        {} => { HashMap::default() };
        {$( $k:literal : $v:literal ),+} => {
            HashMap::from_iter([ $( ($k.to_string(), $v.to_string()) ),+ ])
        };
    }

    #[test]
    fn way_penalty() {
        assert_eq!(TEST_PROFILE.way_penalty(&tags! {"highway": "footway"}), 1.0);
        assert_eq!(TEST_PROFILE.way_penalty(&tags! {"highway": "path"}), 2.0);
        assert_eq!(
            TEST_PROFILE.way_penalty(&tags! {"highway": "motorway"}),
            f32::INFINITY,
        );
        assert_eq!(TEST_PROFILE.way_penalty(&tags! {}), f32::INFINITY);
        assert_eq!(
            TEST_PROFILE.way_penalty(&tags! {"highway": "path", "access": "no"}),
            f32::INFINITY,
        );
        assert_eq!(
            TEST_PROFILE
                .way_penalty(&tags! {"highway": "path", "access": "no", "cat": "destination"}),
            2.0,
        );
        assert_eq!(
            TEST_PROFILE_WITHOUT_MOTORROAD
                .way_penalty(&tags! {"highway": "path", "motorroad": "yes"}),
            f32::INFINITY,
        );
    }

    #[test]
    fn way_direction() {
        assert_eq!(
            TEST_PROFILE.way_direction(&tags! {"highway": "path"}),
            (true, true),
        );
        assert_eq!(
            TEST_PROFILE.way_direction(&tags! {"highway": "path", "oneway": "yes"}),
            (true, false),
        );
        assert_eq!(
            TEST_PROFILE.way_direction(&tags! {"highway": "path", "oneway": "-1"}),
            (false, true),
        );
        assert_eq!(
            TEST_PROFILE.way_direction(&tags! {"highway": "motorway_link"}),
            (true, false),
        );
        assert_eq!(
            TEST_PROFILE.way_direction(&tags! {"highway": "path", "junction": "roundabout"}),
            (true, false),
        );
        assert_eq!(
            TEST_PROFILE.way_direction(&tags! {"highway": "path", "oneway": "yes", "oneway:cat": "no"}),
            (true, true),
        );
    }

    #[test]
    fn way_direction_foot() {
        assert_eq!(
            FOOT_PROFILE.way_direction(&tags! {"highway": "residential", "oneway": "yes"}),
            (true, true),
        );
        assert_eq!(
            FOOT_PROFILE.way_direction(&tags! {"highway": "residential", "oneway:foot": "-1"}),
            (false, true),
        );
        assert_eq!(
            FOOT_PROFILE.way_direction(&tags! {"highway": "footway", "oneway": "yes"}),
            (true, false),
        );
    }

    #[test]
    fn way_cost() {
        let c = TEST_PROFILE.way_cost(&tags! {"highway": "path", "oneway": "yes"}, false);
        assert_eq!(c.cost_factor, 2.0);
        assert_eq!(c.turn_cost, 10.0);
        assert_eq!(c.priority_classifier, 2);
        assert_eq!(c.initial_classifier, 2);
        assert_eq!(c.initial_cost, 5.0);
        assert!(c.is_passable());

        let c = TEST_PROFILE.way_cost(&tags! {"highway": "path", "oneway": "yes"}, true);
        assert!(!c.is_passable());

        let c = CAR_PROFILE.way_cost(&tags! {"highway": "primary_link"}, false);
        assert_eq!(c.priority_classifier, 25);
        assert_eq!(c.classifier_mask, classifier::LINK);
        assert_eq!(c.max_speed, 60.0);

        let c = CAR_PROFILE.way_cost(
            &tags! {"highway": "residential", "maxspeed": "20 mph", "motor_vehicle": "destination"},
            false,
        );
        assert_eq!(c.classifier_mask, classifier::RESIDENTIAL | classifier::DESTINATION);
        assert!((c.max_speed - 32.19).abs() < 0.01);
    }

    #[test]
    fn node_cost() {
        assert_eq!(CAR_PROFILE.node_cost(&tags! {}), NodeCost::default());
        assert!(CAR_PROFILE.node_cost(&tags! {"barrier": "bollard"}).is_blocking());
        assert!(!CAR_PROFILE
            .node_cost(&tags! {"barrier": "bollard", "motor_vehicle": "yes"})
            .is_blocking());
        assert!(!BICYCLE_PROFILE.node_cost(&tags! {"barrier": "bollard"}).is_blocking());
        assert!(FOOT_PROFILE.node_cost(&tags! {"access": "private"}).is_blocking());

        let signals = CAR_PROFILE.node_cost(&tags! {"highway": "traffic_signals"});
        assert_eq!(signals.max_speed, Some(0.0));
        assert_eq!(signals.initial_cost, 30.0);
    }

    #[test]
    fn max_speed_parsing() {
        assert_eq!(parse_max_speed("50"), Some(50.0));
        assert_eq!(parse_max_speed("none"), Some(0.0));
        assert_eq!(parse_max_speed("walk"), Some(6.0));
        assert_eq!(parse_max_speed("signals"), None);
        assert_eq!(parse_max_speed("-5"), None);
    }

    #[test]
    fn evaluator_caches_by_direction() {
        let e = ProfileEvaluator::new(CAR_PROFILE);
        let desc = b"highway\0motorway\0";
        assert!(e.evaluate_way(false, desc).is_passable());
        assert!(!e.evaluate_way(true, desc).is_passable());
        assert!(e.evaluate_way(false, desc).is_passable());
        assert_eq!(e.describe(desc), "highway=motorway");
        assert_eq!(e.lookup_version(), TAG_LOOKUP_VERSION);
    }
}
