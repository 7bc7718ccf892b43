// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Per-request routing state: the profile, tunables, nogo zones and the stateful
//! distance computation shared by the cost models and the waypoint matcher.

use crate::distance::{cos_lat, distance, mid_lat, project_onto_segment, turn_angle};
use crate::evaluator::{TagEvaluator, VehicleMode};
use crate::nogo::NogoZone;
use crate::path::kinematic::KinematicModel;
use crate::path::PrePath;
use std::fmt;

/// Errors produced by [RoutingContext::set_parameter].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterError {
    #[error("parameter {key}: expected a number, got {value:?}")]
    InvalidNumber { key: String, value: String },

    #[error("parameter {key}: expected a boolean, got {value:?}")]
    InvalidBool { key: String, value: String },

    #[error("parameter {key}: unknown cost model {value:?} (expected \"std\" or \"kinematic\")")]
    UnknownModel { key: String, value: String },
}

/// Selects how path costs are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CostModel {
    /// Heuristic model: distance times cost factors, turn and elevation penalties.
    #[default]
    Standard,

    /// Physics-based model: the cost is travel time for a motor vehicle.
    Kinematic,
}

/// Closest match of the waypoint marker found by [RoutingContext::calc_distance].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShortestMatch {
    /// Distance in meters between the waypoint and the segment.
    pub distance: f64,

    /// Position of the match along the segment, from its first point (0.0) to its last (1.0).
    pub fraction: f64,

    pub ilon: i32,
    pub ilat: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WaypointMarker {
    ilon: i32,
    ilat: i32,
    radius: f64,
}

/// Routing parameters and the mutable state shared by the cost computations of one request.
pub struct RoutingContext {
    pub evaluator: Box<dyn TagEvaluator>,
    pub model: CostModel,
    pub kinematic: KinematicModel,
    pub nogos: Vec<NogoZone>,

    /// Grade (in micrometers per meter) below which descents cost nothing extra.
    pub downhill_cutoff: i64,

    /// Grade (in micrometers per meter) below which ascents cost nothing extra.
    pub uphill_cutoff: i64,

    /// Meters of descent charged as one meter of distance; zero disables the penalty.
    pub downhill_cost_div: i64,

    /// Meters of ascent charged as one meter of distance; zero disables the penalty.
    pub uphill_cost_div: i64,

    /// Elevation difference (in micrometers) which may accumulate before it is charged.
    pub elevation_penalty_buffer: i64,

    /// Largest elevation difference (in micrometers) kept in the hysteresis buffers.
    pub elevation_max_buffer: i64,

    /// Buffer decay (in micrometers per meter) applied while traveling.
    pub elevation_buffer_reduce: i64,

    pub consider_turn_restrictions: bool,

    /// Weight of the air-distance heuristic in the first pass; negative skips the pass.
    pub pass1_coefficient: f64,

    /// Weight of the air-distance heuristic in the second pass.
    pub pass2_coefficient: f64,

    /// Initial heading in degrees (0 = north, clockwise), if known.
    pub start_direction: Option<f64>,

    /// Speed limit (m/s) for the time estimate of the heuristic model.
    pub max_speed: f64,

    /// Mass (kg) of vehicle and rider, for the time estimate of the heuristic model.
    pub total_mass: f64,

    /// Sustained power (W) of a cyclist.
    pub biker_power: f64,

    /// Rolling resistance coefficient.
    pub rolling_resistance: f64,

    /// Air drag factor (½·ρ·A·Cd, in kg/m).
    pub air_drag: f64,

    pub(crate) pre_paths: Vec<PrePath>,

    coslat: f64,
    nogo_cost: f64,
    marker: Option<WaypointMarker>,
    shortest_match: Option<ShortestMatch>,
}

impl fmt::Debug for RoutingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingContext")
            .field("model", &self.model)
            .field("vehicle", &self.evaluator.vehicle_mode())
            .field("nogos", &self.nogos.len())
            .field("pass1_coefficient", &self.pass1_coefficient)
            .field("pass2_coefficient", &self.pass2_coefficient)
            .finish_non_exhaustive()
    }
}

impl RoutingContext {
    /// Creates a context with default tunables, then applies the profile's
    /// recommended [parameters](TagEvaluator::parameters).
    pub fn new(evaluator: Box<dyn TagEvaluator>) -> Result<Self, ParameterError> {
        let defaults: Vec<(String, String)> = evaluator
            .parameters()
            .iter()
            .map(|&(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut ctx = Self {
            evaluator,
            model: CostModel::Standard,
            kinematic: KinematicModel::default(),
            nogos: Vec::new(),
            downhill_cutoff: 0,
            uphill_cutoff: 0,
            downhill_cost_div: 0,
            uphill_cost_div: 0,
            elevation_penalty_buffer: 5_000_000,
            elevation_max_buffer: 10_000_000,
            elevation_buffer_reduce: 0,
            consider_turn_restrictions: true,
            pass1_coefficient: 1.5,
            pass2_coefficient: 0.0,
            start_direction: None,
            max_speed: 45.0 / 3.6,
            total_mass: 90.0,
            biker_power: 100.0,
            rolling_resistance: 0.01,
            air_drag: 0.225,
            pre_paths: Vec::new(),
            coslat: 1.0,
            nogo_cost: 0.0,
            marker: None,
            shortest_match: None,
        };

        for (key, value) in &defaults {
            ctx.set_parameter(key, value)?;
        }
        Ok(ctx)
    }

    pub fn vehicle_mode(&self) -> VehicleMode {
        self.evaluator.vehicle_mode()
    }

    /// Sets a tunable by name. Unknown keys are logged and ignored.
    ///
    /// Grades (`uphillcutoff`, `downhillcutoff`) are given in percent,
    /// buffers in meters and speeds in km/h.
    pub fn set_parameter(&mut self, key: &str, value: &str) -> Result<(), ParameterError> {
        let number = || {
            value
                .trim()
                .parse::<f64>()
                .map_err(|_| ParameterError::InvalidNumber {
                    key: key.to_string(),
                    value: value.to_string(),
                })
        };
        let boolean = || match value.trim() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ParameterError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        };
        let cost_div = |v: f64| if v > 0.0 { (1_000_000.0 / v) as i64 } else { 0 };

        match key {
            "costModel" | "model" => {
                self.model = match value.trim() {
                    "std" | "standard" => CostModel::Standard,
                    "kinematic" => CostModel::Kinematic,
                    _ => {
                        return Err(ParameterError::UnknownModel {
                            key: key.to_string(),
                            value: value.to_string(),
                        })
                    }
                }
            }
            "downhillcutoff" => self.downhill_cutoff = (number()? * 10_000.0) as i64,
            "uphillcutoff" => self.uphill_cutoff = (number()? * 10_000.0) as i64,
            "downhillcost" => self.downhill_cost_div = cost_div(number()?),
            "uphillcost" => self.uphill_cost_div = cost_div(number()?),
            "elevationpenaltybuffer" => {
                self.elevation_penalty_buffer = (number()? * 1_000_000.0) as i64
            }
            "elevationmaxbuffer" => self.elevation_max_buffer = (number()? * 1_000_000.0) as i64,
            "elevationbufferreduce" => {
                self.elevation_buffer_reduce = (number()? * 10_000.0) as i64
            }
            "considerTurnRestrictions" => self.consider_turn_restrictions = boolean()?,
            "pass1coefficient" => self.pass1_coefficient = number()?,
            "pass2coefficient" => self.pass2_coefficient = number()?,
            "startDirection" => self.start_direction = Some(number()?),
            "maxSpeed" => self.max_speed = number()? / 3.6,
            "totalMass" => self.total_mass = number()?,
            "bikerPower" => self.biker_power = number()?,
            "C_r" => self.rolling_resistance = number()?,
            "S_C_x" => self.air_drag = number()?,
            _ if KinematicModel::has_parameter(key) => self.kinematic.set_parameter(key, number()?),
            _ => log::debug!("ignoring unknown routing parameter {key}={value}"),
        }

        Ok(())
    }

    /// Installs a waypoint marker: subsequent [calc_distance](Self::calc_distance)
    /// calls record segments passing closer than `radius` meters to the waypoint.
    /// Nogo checks always use the whole segment.
    pub fn set_waypoint(&mut self, ilon: i32, ilat: i32, radius: f64) {
        self.marker = Some(WaypointMarker { ilon, ilat, radius });
        self.shortest_match = None;
    }

    pub fn clear_waypoint(&mut self) {
        self.marker = None;
        self.shortest_match = None;
    }

    /// Match recorded by the last [calc_distance](Self::calc_distance) call, if
    /// the segment came closer to the waypoint than all previous ones.
    pub fn shortest_match(&self) -> Option<ShortestMatch> {
        self.shortest_match
    }

    /// Resets the nogo cost accumulated by [calc_distance](Self::calc_distance).
    pub fn reset_nogo_cost(&mut self) {
        self.nogo_cost = 0.0;
    }

    /// Nogo cost accumulated since the last reset: negative if a hard zone was hit.
    pub fn nogo_cost(&self) -> f64 {
        self.nogo_cost
    }

    /// Distance in meters (rounded, at least 1) between two positions.
    ///
    /// As side effects, it remembers the longitude correction for [calc_angle](Self::calc_angle),
    /// records the waypoint marker match and accumulates the nogo cost of the segment.
    pub fn calc_distance(&mut self, lon1: i32, lat1: i32, lon2: i32, lat2: i32) -> i32 {
        self.coslat = cos_lat(mid_lat(lat1, lat2));
        let d = distance(lon1, lat1, lon2, lat2);
        self.shortest_match = None;

        if let Some(marker) = self.marker.as_mut() {
            let p = project_onto_segment(marker.ilon, marker.ilat, lon1, lat1, lon2, lat2);
            if p.distance < marker.radius {
                marker.radius = p.distance;
                self.shortest_match = Some(ShortestMatch {
                    distance: p.distance,
                    fraction: p.fraction,
                    ilon: p.ilon,
                    ilat: p.ilat,
                });
            }
        }

        // A degenerate segment can't cross anything; it also keeps a path starting
        // right inside a nogo able to leave it.
        if (lon1, lat1) != (lon2, lat2) && self.nogo_cost >= 0.0 {
            for zone in &self.nogos {
                if zone.center_distance(lon1, lat1, lon2, lat2) >= zone.radius {
                    continue;
                }

                if zone.is_hard() {
                    if zone.intersects(lon1, lat1, lon2, lat2) {
                        self.nogo_cost = -1.0;
                        break;
                    }
                } else {
                    self.nogo_cost += zone.weighted_cost(lon1, lat1, lon2, lat2);
                }
            }
        }

        (d.round() as i32).max(1)
    }

    /// Turn angle (degrees, positive to the right) and its cosine at `(lon1, lat1)`,
    /// using the longitude correction of the last [calc_distance](Self::calc_distance) call.
    pub fn calc_angle(
        &self,
        lon0: i32,
        lat0: i32,
        lon1: i32,
        lat1: i32,
        lon2: i32,
        lat2: i32,
    ) -> (f64, f64) {
        turn_angle(self.coslat, lon0, lat0, lon1, lat1, lon2, lat2)
    }

    pub(crate) fn coslat(&self) -> f64 {
        self.coslat
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::distance::{lat_to_ilat, lon_to_ilon, METERS_PER_DEGREE, UNITS_PER_DEGREE};
    use crate::evaluator::{NodeCost, WayCost};

    /// Evaluator treating every description as a plain way with cost factor 1,
    /// unless the description is `b"blocked"`.
    #[derive(Debug, Default)]
    pub(crate) struct FlatEvaluator {
        pub params: Vec<(&'static str, &'static str)>,
    }

    impl TagEvaluator for FlatEvaluator {
        fn lookup_version(&self) -> u16 {
            1
        }

        fn vehicle_mode(&self) -> VehicleMode {
            VehicleMode::Car
        }

        fn evaluate_way(&self, _inverse: bool, description: &[u8]) -> WayCost {
            if description == b"blocked" {
                return WayCost::IMPASSABLE;
            }
            WayCost {
                cost_factor: 1.0,
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

        fn parameters(&self) -> &[(&str, &str)] {
            &self.params
        }
    }

    pub(crate) fn flat_context() -> RoutingContext {
        RoutingContext::new(Box::new(FlatEvaluator::default())).unwrap()
    }

    fn meters(m: f64) -> i32 {
        (m * UNITS_PER_DEGREE / METERS_PER_DEGREE).round() as i32
    }

    #[test]
    fn parameters() {
        let mut ctx = flat_context();
        ctx.set_parameter("uphillcutoff", "1.5").unwrap();
        ctx.set_parameter("downhillcost", "60").unwrap();
        ctx.set_parameter("elevationpenaltybuffer", "3").unwrap();
        ctx.set_parameter("considerTurnRestrictions", "false").unwrap();
        ctx.set_parameter("costModel", "kinematic").unwrap();
        ctx.set_parameter("something_else", "whatever-it-is").unwrap();
        ctx.set_parameter("vmax", "90").unwrap();

        assert_eq!(ctx.uphill_cutoff, 15_000);
        assert_eq!(ctx.downhill_cost_div, 16_666);
        assert_eq!(ctx.elevation_penalty_buffer, 3_000_000);
        assert!(!ctx.consider_turn_restrictions);
        assert_eq!(ctx.model, CostModel::Kinematic);
        assert!((ctx.kinematic.vmax - 25.0).abs() < 1e-9);

        assert!(matches!(
            ctx.set_parameter("pass1coefficient", "abc"),
            Err(ParameterError::InvalidNumber { .. })
        ));
        assert!(matches!(
            ctx.set_parameter("costModel", "teleport"),
            Err(ParameterError::UnknownModel { .. })
        ));
    }

    #[test]
    fn profile_parameters_are_applied() {
        let ctx = RoutingContext::new(Box::new(FlatEvaluator {
            params: vec![("pass1coefficient", "-1"), ("uphillcost", "50")],
        }))
        .unwrap();
        assert_eq!(ctx.pass1_coefficient, -1.0);
        assert_eq!(ctx.uphill_cost_div, 20_000);
    }

    #[test]
    fn calc_distance_basics() {
        let mut ctx = flat_context();
        let (x, y) = (lon_to_ilon(0.0), lat_to_ilat(0.0));
        assert_eq!(ctx.calc_distance(x, y, x + meters(100.0), y), 100);
        assert_eq!(ctx.calc_distance(x, y, x, y), 1);
        assert_eq!(ctx.nogo_cost(), 0.0);
    }

    #[test]
    fn calc_distance_nogos() {
        let mut ctx = flat_context();
        let (x, y) = (lon_to_ilon(0.0), lat_to_ilat(0.0));
        ctx.nogos
            .push(NogoZone::circle("hard", x + meters(50.0), y, 10.0, 0.0).unwrap());

        ctx.calc_distance(x, y, x + meters(100.0), y);
        assert!(ctx.nogo_cost() < 0.0);

        ctx.reset_nogo_cost();
        ctx.calc_distance(x, y + meters(50.0), x + meters(100.0), y + meters(50.0));
        assert_eq!(ctx.nogo_cost(), 0.0);

        ctx.nogos.clear();
        ctx.nogos
            .push(NogoZone::circle("soft", x + meters(50.0), y, 10.0, 2.0).unwrap());
        ctx.reset_nogo_cost();
        ctx.calc_distance(x, y, x + meters(100.0), y);
        assert!((ctx.nogo_cost() - 40.0).abs() < 0.5);
    }

    #[test]
    fn waypoint_marker() {
        let mut ctx = flat_context();
        let (x, y) = (lon_to_ilon(0.0), lat_to_ilat(0.0));
        ctx.set_waypoint(x + meters(30.0), y + meters(10.0), 50.0);

        ctx.calc_distance(x, y, x + meters(100.0), y);
        let m = ctx.shortest_match().unwrap();
        let offset = meters(10.0) as f64 * METERS_PER_DEGREE / UNITS_PER_DEGREE;
        assert!((m.distance - offset).abs() < 0.01, "{}", m.distance);
        assert!((m.fraction - 0.3).abs() < 0.001);

        // further away than the previous match: not recorded
        ctx.calc_distance(x, y + meters(30.0), x + meters(100.0), y + meters(30.0));
        assert_eq!(ctx.shortest_match(), None);

        // a nogo behind the match still blocks the whole segment
        ctx.nogos
            .push(NogoZone::circle("hard", x + meters(80.0), y, 10.0, 0.0).unwrap());
        ctx.set_waypoint(x + meters(30.0), y + meters(10.0), 50.0);
        ctx.calc_distance(x, y, x + meters(100.0), y);
        assert!(ctx.shortest_match().is_some());
        assert!(ctx.nogo_cost() < 0.0);

        ctx.clear_waypoint();
        assert_eq!(ctx.shortest_match(), None);
    }

    #[test]
    fn calc_angle_uses_last_latitude() {
        let mut ctx = flat_context();
        let (x, y) = (lon_to_ilon(0.0), lat_to_ilat(0.0));
        ctx.calc_distance(x, y, x, y + 100);
        let (angle, cos) = ctx.calc_angle(x, y, x, y + 100, x + 100, y + 100);
        assert!((angle - 90.0).abs() < 1e-6);
        assert!(cos.abs() < 1e-6);
    }
}
