// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Point-mass vehicle simulation: the cost of a path is a weighted sum of
//! the travel time and the energy drawn from the engine.

use super::{PathModel, Section, SectionCost};
use crate::context::RoutingContext;
use crate::evaluator::{classifier, NodeCost, WayCost};

const GRAVITY: f64 = 9.81;

/// Longest distance integrated in a single acceleration step, in meters.
const MAX_STEP: f64 = 50.0;

/// Speed kept on climbs too steep to accelerate on, in m/s.
const CRAWL_SPEED: f64 = 1.0;

/// Vehicle constants of the kinematic cost model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicModel {
    /// Mass of the vehicle, in kg.
    pub total_mass: f64,

    /// Highest speed the vehicle travels at, in m/s.
    pub vmax: f64,

    /// Rolling resistance coefficient.
    pub c_roll: f64,

    /// Air drag factor (½·ρ·A·Cd), in kg/m.
    pub f_air: f64,

    /// Traction force available for accelerating, in N.
    pub f_drive: f64,

    /// Braking force recuperated when slowing down, in N.
    pub f_recup: f64,

    /// Share of braking energy recovered.
    pub recup_efficiency: f64,

    /// Power drawn regardless of motion, in W.
    pub p_standby: f64,

    /// Outside temperature, in °C.
    pub outside_temp: f64,

    /// Speed (m/s) when crossing a junction with traffic from the left.
    pub left_way_speed: f64,

    /// Speed (m/s) when crossing a junction with traffic from the right.
    pub right_way_speed: f64,

    /// Time constant (s) of the memory of recent turns.
    pub turn_angle_decay_time: f64,

    /// Cost of one second expressed as power, in W.
    pub time_cost: f64,
}

impl Default for KinematicModel {
    fn default() -> Self {
        Self {
            total_mass: 1640.0,
            vmax: 130.0 / 3.6,
            c_roll: 0.0055,
            f_air: 0.4,
            f_drive: 2500.0,
            f_recup: 400.0,
            recup_efficiency: 0.7,
            p_standby: 250.0,
            outside_temp: 20.0,
            left_way_speed: 12.0 / 3.6,
            right_way_speed: 12.0 / 3.6,
            turn_angle_decay_time: 5.0,
            time_cost: 2000.0,
        }
    }
}

const PARAMETERS: &[&str] = &[
    "vmax",
    "totalweight",
    "c_roll",
    "f_air",
    "f_drive",
    "f_recup",
    "recup_efficiency",
    "p_standby",
    "outside_temp",
    "leftWaySpeed",
    "rightWaySpeed",
    "turnAngleDecayTime",
    "timeCost",
];

/// State of a path under the [KinematicModel].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KinematicState {
    /// Kinetic energy, in J.
    pub ekin: f64,
    pub time: f64,
    pub energy: f64,
    pub floating_angle_left: f64,
    pub floating_angle_right: f64,
}

impl KinematicModel {
    /// Returns true if `key` names one of the vehicle constants.
    pub fn has_parameter(key: &str) -> bool {
        PARAMETERS.contains(&key)
    }

    /// Sets a vehicle constant. Speeds are given in km/h.
    pub fn set_parameter(&mut self, key: &str, value: f64) {
        match key {
            "vmax" => self.vmax = value / 3.6,
            "totalweight" => self.total_mass = value,
            "c_roll" => self.c_roll = value,
            "f_air" => self.f_air = value,
            "f_drive" => self.f_drive = value,
            "f_recup" => self.f_recup = value,
            "recup_efficiency" => self.recup_efficiency = value,
            "p_standby" => self.p_standby = value,
            "outside_temp" => self.outside_temp = value,
            "leftWaySpeed" => self.left_way_speed = value / 3.6,
            "rightWaySpeed" => self.right_way_speed = value / 3.6,
            "turnAngleDecayTime" => self.turn_angle_decay_time = value,
            "timeCost" => self.time_cost = value,
            _ => log::debug!("ignoring unknown kinematic parameter {key}={value}"),
        }
    }

    fn f_roll(&self) -> f64 {
        self.total_mass * GRAVITY * self.c_roll
    }

    /// Cost units per joule: cruising on level ground at [KinematicModel::vmax]
    /// costs one unit per meter.
    fn cost_per_joule(&self) -> f64 {
        let v = self.vmax;
        v / (self.time_cost + self.p_standby + self.f_roll() * v + self.f_air * v * v * v)
    }

    fn speed_limit(&self, way: &WayCost) -> f64 {
        if way.max_speed > 0.0 {
            self.vmax.min(way.max_speed as f64 / 3.6)
        } else {
            self.vmax
        }
    }

    fn cut_ekin(&self, state: &mut KinematicState, speed: f64) {
        let e = 0.5 * self.total_mass * speed * speed;
        if state.ekin > e {
            state.ekin = e;
        }
    }

    /// Integrates the motion over a section, returning the elapsed time and the energy drawn.
    ///
    /// While below the target speed, the vehicle accelerates with full traction. Air drag
    /// makes the kinetic energy follow `dE/dx = c - b·E`, which is integrated in closed form,
    /// the exponential replaced with its truncated series.
    fn evolve(&self, state: &mut KinematicState, dist: f64, delta_h: f64, f_air: f64, limit: f64) -> (f64, f64) {
        let m = self.total_mass;
        let f_roll = self.f_roll();
        let f_h = delta_h * m * GRAVITY / dist;
        let b = 2.0 * f_air / m;
        let c = self.f_drive - f_roll - f_h;

        let mut target = 0.5 * m * limit * limit;
        if b > 0.0 && c > 0.0 {
            target = target.min(0.99 * c / b);
        }
        if state.ekin > target && target >= 0.5 * m * limit * limit {
            // slowing down to a lower limit
            state.ekin = target;
        }

        let mut time = 0.0;
        let mut energy = 0.0;
        let mut d = dist;
        while d > 0.0 {
            let e0 = state.ekin;
            let v0 = (2.0 * e0 / m).sqrt();
            let k = c - b * e0;

            if e0 >= 0.9999 * target || k <= 0.0 {
                // cruising, or unable to accelerate any further
                let v = v0.max(CRAWL_SPEED);
                state.ekin = 0.5 * m * v * v;
                let f = f_roll + f_air * v * v + f_h;
                time += d / v;
                energy += if f > 0.0 { f * d } else { f * d * self.recup_efficiency };
                break;
            }

            let x0 = (target - e0) / k;
            let y = b * x0;
            let x_full = x0 * (1.0 + y * (0.5 + y * (1.0 / 3.0 + y * 0.25)));
            let step = x_full.min(d).min(MAX_STEP);
            let e1 = if step < x_full {
                let z = b * step;
                e0 + k * step * (1.0 - z * (0.5 - z * (1.0 / 6.0 - z / 24.0)))
            } else {
                target
            };

            let v1 = (2.0 * e1 / m).sqrt();
            time += step / (0.5 * (v0 + v1)).max(1e-3);
            energy += self.f_drive * step;
            state.ekin = e1;
            d -= step;
        }

        energy += time * self.p_standby;
        (time, energy)
    }

    /// Slowdown at a junction, from the classification of the other ways meeting there.
    fn junction_speed(&self, ctx: &RoutingContext, way: &WayCost, angle: f64) -> f64 {
        let mut speed = f64::INFINITY;
        let mut has_left_ways = false;
        let mut has_right_ways = false;

        for pp in &ctx.pre_paths {
            // link roads only yield to link roads
            if (pp.classifier_mask ^ way.classifier_mask) & classifier::LINK != 0 {
                continue;
            }
            if pp.classifier_mask & classifier::RESIDENTIAL != 0 {
                continue;
            }

            if pp.priority_classifier > way.priority_classifier
                || (pp.priority_classifier == way.priority_classifier && way.priority_classifier < 20)
            {
                let diff = pp.angle - angle;
                if diff < -40.0 && diff > -140.0 {
                    has_left_ways = true;
                }
                if diff > 40.0 && diff < 140.0 {
                    has_right_ways = true;
                }
            }
        }

        if has_left_ways {
            speed = speed.min(self.left_way_speed);
        }
        if has_right_ways {
            speed = speed.min(self.right_way_speed);
        }
        speed
    }
}

impl PathModel for KinematicModel {
    type State = KinematicState;

    fn process_way_section(
        &self,
        ctx: &RoutingContext,
        way: &WayCost,
        state: &mut KinematicState,
        s: &Section,
    ) -> SectionCost {
        let mut extra_time = 0.0;

        if s.is_start {
            // turning around on the spot, when the start direction is known
            extra_time += 0.5 * (1.0 - s.cos_angle) * 40.0;
        } else {
            let mut turn_speed = f64::INFINITY;

            if self.turn_angle_decay_time > 0.0 {
                if s.angle < 0.0 {
                    state.floating_angle_left -= s.angle;
                } else {
                    state.floating_angle_right += s.angle;
                }
                let aa = state.floating_angle_left.max(state.floating_angle_right);
                let curve_speed = if aa > 10.0 { 200.0 / aa } else { 20.0 };
                // unbounded exponent, so no truncated series here
                let decay = (-(s.distance / curve_speed) / self.turn_angle_decay_time).exp();
                state.floating_angle_left *= decay;
                state.floating_angle_right *= decay;
                if curve_speed < 20.0 {
                    turn_speed = curve_speed;
                }
            }

            if s.index == 0 {
                let mut junction_speed = self.junction_speed(ctx, way, s.angle);

                // entering or leaving the road network means a full stop
                if (s.last_priority < 20) != (way.priority_classifier < 20) {
                    extra_time += 10.0;
                    junction_speed = 0.0;
                }
                if s.last_priority != way.priority_classifier
                    && way.classifier_mask & classifier::LINK != 0
                {
                    extra_time += 2.0;
                }
                turn_speed = turn_speed.min(junction_speed);
            }

            self.cut_ekin(state, turn_speed);
        }

        // air density: linear temperature correction, pressure down 1 mbar per 8 m
        let t_corr = (20.0 - self.outside_temp) / 200.0;
        let e_corr = 0.000_137_5 * (s.elevation - 100.0);
        let f_air = self.f_air * (1.0 + t_corr - e_corr);

        let limit = self.speed_limit(way).max(way.min_speed as f64 / 3.6);
        let (time, energy) = self.evolve(state, s.distance, s.delta_h, f_air, limit);
        state.time += time + extra_time;
        state.energy += energy;

        let k = self.cost_per_joule();
        let distance_cost = (time * self.time_cost + energy).max(0.0) * k;
        let cost = distance_cost + extra_time * self.time_cost * k;

        SectionCost {
            cost: cost + 0.5,
            turn_cost: extra_time * self.time_cost * k,
            elevation_cost: 0.0,
            cost_factor: distance_cost / s.distance,
        }
    }

    fn process_target_node(
        &self,
        _ctx: &RoutingContext,
        state: &mut KinematicState,
        node: &NodeCost,
    ) -> f64 {
        if let Some(speed) = node.max_speed {
            self.cut_ekin(state, speed as f64 / 3.6);
        }
        node.initial_cost as f64
    }

    /// Plain cost comparison: the kinetic state can't be credited the way elevation buffers can.
    fn definitely_worse_than(
        &self,
        _ctx: &RoutingContext,
        cost: i32,
        _state: &KinematicState,
        other_cost: i32,
        _other: &KinematicState,
    ) -> bool {
        cost > other_cost
    }

    fn totals(&self, state: &KinematicState) -> (f32, f32) {
        (state.time as f32, state.energy as f32)
    }

    fn min_cost_per_meter(&self) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::flat_context;
    use crate::path::PrePath;

    fn open_road() -> WayCost {
        WayCost {
            cost_factor: 1.0,
            priority_classifier: 30,
            ..WayCost::IMPASSABLE
        }
    }

    fn section(distance: f64, delta_h: f64, angle: f64, index: usize) -> Section {
        Section {
            distance,
            delta_h,
            elevation: 100.0,
            angle,
            cos_angle: angle.to_radians().cos(),
            is_start: false,
            index,
            last_priority: 30,
        }
    }

    #[test]
    fn accelerating_from_rest() {
        let ctx = flat_context();
        let km = KinematicModel::default();
        let mut st = KinematicState::default();

        let length = 2000.0;
        let c = km.process_way_section(&ctx, &open_road(), &mut st, &section(length, 0.0, 0.0, 0));
        assert!(st.time > length / km.vmax, "time {}", st.time);
        assert!(st.energy >= 0.0);
        assert!(c.cost > 0.0);

        // reached cruising speed on the way
        let v = (2.0 * st.ekin / km.total_mass).sqrt();
        assert!(v > 0.9 * km.vmax && v <= km.vmax + 1e-6, "speed {v}");
    }

    #[test]
    fn cruising_costs_about_one_per_meter() {
        let ctx = flat_context();
        let km = KinematicModel::default();
        let mut st = KinematicState {
            ekin: 0.5 * km.total_mass * km.vmax * km.vmax,
            ..Default::default()
        };
        let c = km.process_way_section(&ctx, &open_road(), &mut st, &section(1000.0, 0.0, 0.0, 1));
        assert!((c.cost - 1000.0).abs() < 2.0, "cost {}", c.cost);
        assert!((st.time - 1000.0 / km.vmax).abs() < 0.01);
    }

    #[test]
    fn speed_limits_and_stops() {
        let ctx = flat_context();
        let km = KinematicModel::default();
        let mut st = KinematicState {
            ekin: 0.5 * km.total_mass * km.vmax * km.vmax,
            ..Default::default()
        };

        let mut slow = open_road();
        slow.max_speed = 50.0;
        km.process_way_section(&ctx, &slow, &mut st, &section(500.0, 0.0, 0.0, 1));
        let v = (2.0 * st.ekin / km.total_mass).sqrt();
        assert!((v - 50.0 / 3.6).abs() < 0.01);

        km.process_target_node(
            &ctx,
            &mut st,
            &NodeCost {
                initial_cost: 0.0,
                max_speed: Some(0.0),
            },
        );
        assert_eq!(st.ekin, 0.0);
    }

    #[test]
    fn junctions_slow_down() {
        let mut ctx = flat_context();
        let km = KinematicModel::default();
        let cruising = KinematicState {
            ekin: 0.5 * km.total_mass * km.vmax * km.vmax,
            ..Default::default()
        };

        // more important road coming from the left
        ctx.pre_paths.push(PrePath {
            angle: -90.0,
            priority_classifier: 30,
            classifier_mask: 0,
        });
        let mut minor = open_road();
        minor.priority_classifier = 22;

        let mut st = cruising;
        let with_junction = km.process_way_section(&ctx, &minor, &mut st, &section(200.0, 0.0, 0.0, 0));

        ctx.pre_paths.clear();
        let mut st = cruising;
        let without = km.process_way_section(&ctx, &minor, &mut st, &section(200.0, 0.0, 0.0, 0));
        assert!(with_junction.cost > without.cost);
    }

    #[test]
    fn turn_angles_fade_with_distance() {
        let ctx = flat_context();
        let km = KinematicModel::default();

        // 90° right: curve speed 200/90 m/s, fading over 5 s
        let mut st = KinematicState::default();
        km.process_way_section(&ctx, &open_road(), &mut st, &section(1.0, 0.0, 90.0, 1));
        let expected = 90.0 * (-(1.0 / (200.0 / 90.0)) / 5.0_f64).exp();
        assert!((st.floating_angle_right - expected).abs() < 1e-9);
        assert_eq!(st.floating_angle_left, 0.0);

        // a long section forgets the turn entirely
        let mut st = KinematicState::default();
        km.process_way_section(&ctx, &open_road(), &mut st, &section(1000.0, 0.0, 90.0, 1));
        assert!(st.floating_angle_right >= 0.0 && st.floating_angle_right < 1e-6);
    }

    #[test]
    fn dominance_is_plain_cost() {
        let ctx = flat_context();
        let km = KinematicModel::default();
        let a = KinematicState::default();
        let b = KinematicState {
            ekin: 1e6,
            ..Default::default()
        };
        assert!(km.definitely_worse_than(&ctx, 11, &a, 10, &b));
        assert!(!km.definitely_worse_than(&ctx, 10, &a, 10, &b));
    }

    #[test]
    fn parameters() {
        let mut km = KinematicModel::default();
        assert!(KinematicModel::has_parameter("totalweight"));
        assert!(!KinematicModel::has_parameter("uphillcost"));
        km.set_parameter("vmax", 72.0);
        km.set_parameter("totalweight", 1000.0);
        assert!((km.vmax - 20.0).abs() < 1e-9);
        assert_eq!(km.total_mass, 1000.0);
    }
}
