// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use super::{PathModel, Section, SectionCost};
use crate::context::RoutingContext;
use crate::evaluator::{NodeCost, VehicleMode, WayCost};

const GRAVITY: f64 = 9.81;

/// The heuristic cost model: distance times the way's cost factor, plus turn
/// penalties and elevation penalties filtered through hysteresis buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StdModel;

/// State of a path under the [StdModel].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StdState {
    /// Descent (in micrometers) absorbed by the downhill hysteresis buffer.
    pub ehbd: i64,

    /// Ascent (in micrometers) absorbed by the uphill hysteresis buffer.
    pub ehbu: i64,

    pub time: f64,
    pub energy: f64,
}

/// Drains the part of a hysteresis buffer above the penalty threshold.
/// Returns the weight of the slope cost factor and the drained amount.
fn drain_buffer(ctx: &RoutingContext, buffer: &mut i64, dist: i64) -> (f64, i64) {
    if *buffer <= ctx.elevation_penalty_buffer {
        if *buffer < 0 {
            *buffer = 0;
        }
        return (0.0, 0);
    }

    let mut weight = 1.0;
    let excess = *buffer - ctx.elevation_penalty_buffer;
    let mut reduce = dist * ctx.elevation_buffer_reduce;
    if reduce > excess {
        weight = excess as f64 / reduce as f64;
        reduce = excess;
    }

    let over_max = *buffer - ctx.elevation_max_buffer;
    if reduce < over_max {
        reduce = over_max;
    }
    *buffer -= reduce;
    (weight, reduce)
}

/// Solves `a·v³ + b·v = c` for the positive speed `v` by bisection.
fn solve_cubic(a: f64, b: f64, c: f64) -> f64 {
    let (mut lo, mut hi) = (0.0, 100.0);
    for _ in 0..40 {
        let v = 0.5 * (lo + hi);
        if a * v * v * v + b * v > c {
            hi = v;
        } else {
            lo = v;
        }
    }
    0.5 * (lo + hi)
}

impl StdModel {
    /// Travel time and energy of a section, from a simple power model.
    fn time_and_energy(ctx: &RoutingContext, way: &WayCost, dist: f64, delta_h: f64) -> (f64, f64) {
        let incline = delta_h / dist;
        let f_roll = ctx.total_mass * GRAVITY * (ctx.rolling_resistance + incline);

        let mut max_speed = ctx.max_speed;
        if way.max_speed > 0.0 {
            max_speed = max_speed.min(way.max_speed as f64 / 3.6);
        }

        let speed = match ctx.vehicle_mode() {
            // Tobler's hiking function
            VehicleMode::Foot => 6.0 * (-3.5 * (incline + 0.05).abs()).exp() / 3.6,
            VehicleMode::Bicycle => solve_cubic(ctx.air_drag, f_roll, ctx.biker_power),
            VehicleMode::Car => max_speed,
        }
        .min(max_speed)
        .max(0.1);

        let force = f_roll + ctx.air_drag * speed * speed;
        (dist / speed, (dist * force).max(0.0))
    }
}

impl PathModel for StdModel {
    type State = StdState;

    fn process_way_section(
        &self,
        ctx: &RoutingContext,
        way: &WayCost,
        state: &mut StdState,
        s: &Section,
    ) -> SectionCost {
        let cf = way.cost_factor as f64;
        let cf_up = if way.uphill_cost_factor == 0.0 { cf } else { way.uphill_cost_factor as f64 };
        let cf_down = if way.downhill_cost_factor == 0.0 {
            cf
        } else {
            way.downhill_cost_factor as f64
        };
        let dist = s.distance as i64;

        // 90° with turn_cost=90 costs as much as 90 m
        let turn_cost = ((1.0 - s.cos_angle) * way.turn_cost as f64 + 0.2).trunc();
        let mut cost = turn_cost;
        let mut elevation_cost = 0.0;

        // Only the part of a climb or descent which doesn't fit into the buffers is charged
        let delta_h = (s.delta_h * 1_000_000.0) as i64;
        state.ehbd += -delta_h - dist * ctx.downhill_cutoff;
        state.ehbu += delta_h - dist * ctx.uphill_cutoff;

        let (down_weight, reduced) = drain_buffer(ctx, &mut state.ehbd, dist);
        if ctx.downhill_cost_div > 0 {
            elevation_cost += (reduced / ctx.downhill_cost_div) as f64;
        }
        let (up_weight, reduced) = drain_buffer(ctx, &mut state.ehbu, dist);
        if ctx.uphill_cost_div > 0 {
            elevation_cost += (reduced / ctx.uphill_cost_div) as f64;
        }
        cost += elevation_cost;

        let cost_factor =
            cf_up * up_weight + cf * (1.0 - up_weight - down_weight) + cf_down * down_weight;
        cost += dist as f64 * cost_factor + 0.5;

        let (dt, de) = Self::time_and_energy(ctx, way, s.distance, s.delta_h);
        state.time += dt;
        state.energy += de;

        SectionCost {
            cost,
            turn_cost,
            elevation_cost,
            cost_factor,
        }
    }

    fn process_target_node(&self, _ctx: &RoutingContext, _state: &mut StdState, node: &NodeCost) -> f64 {
        node.initial_cost as f64
    }

    /// The other path may still release its buffers at a cost; credit that
    /// before comparing.
    fn definitely_worse_than(
        &self,
        ctx: &RoutingContext,
        cost: i32,
        state: &StdState,
        other_cost: i32,
        other: &StdState,
    ) -> bool {
        let mut c = other_cost as i64;
        if ctx.downhill_cost_div > 0 {
            let delta = other.ehbd / ctx.downhill_cost_div - state.ehbd / ctx.downhill_cost_div;
            if delta > 0 {
                c += delta;
            }
        }
        if ctx.uphill_cost_div > 0 {
            let delta = other.ehbu / ctx.uphill_cost_div - state.ehbu / ctx.uphill_cost_div;
            if delta > 0 {
                c += delta;
            }
        }
        cost as i64 > c
    }

    fn totals(&self, state: &StdState) -> (f32, f32) {
        (state.time as f32, state.energy as f32)
    }

    fn min_cost_per_meter(&self) -> f64 {
        1.0
    }
}
