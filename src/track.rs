// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Routing results: a sequence of points with cumulative costs, plus summary statistics.

use crate::distance::{distance, ilat_to_lat, ilon_to_lon};
use crate::graph::GeoPoint;

/// Elevation change (in meters) swallowed before counting towards [Track::ascend].
const ASCEND_HYSTERESIS: f64 = 10.0;

/// Cost breakdown of the link ending at a [TrackPoint].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentMessage {
    /// Length of the link, in meters.
    pub distance: i32,

    /// Effective cost factor of the last section of the link.
    pub cost_factor: f32,
    pub turn_cost: i32,
    pub initial_cost: i32,
    pub node_cost: i32,
    pub elevation_cost: i32,

    /// Human readable way tags.
    pub way_tags: String,

    /// Human readable tags of the node at the end of the link, if it has any.
    pub node_tags: Option<String>,
}

/// A point of a [Track].
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPoint {
    pub ilon: i32,
    pub ilat: i32,

    /// Elevation in quarter-meters.
    pub elevation: Option<i16>,

    /// Cost accumulated from the start of the track.
    pub cost: i32,

    /// Seconds elapsed from the start of the track.
    pub time: f32,

    /// Energy (J) spent from the start of the track.
    pub energy: f32,

    pub message: Option<Box<SegmentMessage>>,
}

impl TrackPoint {
    pub fn new(p: GeoPoint) -> Self {
        Self {
            ilon: p.ilon,
            ilat: p.ilat,
            elevation: p.elevation,
            cost: 0,
            time: 0.0,
            energy: 0.0,
            message: None,
        }
    }

    pub fn position(&self) -> (i32, i32) {
        (self.ilon, self.ilat)
    }

    pub fn lon(&self) -> f64 {
        ilon_to_lon(self.ilon)
    }

    pub fn lat(&self) -> f64 {
        ilat_to_lat(self.ilat)
    }

    /// Elevation in meters.
    pub fn elevation_m(&self) -> Option<f64> {
        self.elevation.map(|e| e as f64 / 4.0)
    }
}

/// A route: points in order of travel with cumulative costs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    pub points: Vec<TrackPoint>,

    /// Total length, in meters.
    pub distance: i32,

    /// Total climb in meters, ignoring changes smaller than 10 m.
    pub ascend: i32,

    /// Elevation difference between the end and the start, in meters.
    pub plain_ascend: i32,

    pub cost: i32,
    pub time: f32,
    pub energy: f32,

    /// True if the track was spliced from a new prefix and a previous track.
    pub merged: bool,
}

impl Track {
    /// Builds a track and computes its statistics.
    pub fn from_points(points: Vec<TrackPoint>) -> Self {
        let mut t = Self {
            points,
            ..Default::default()
        };
        t.update_stats();
        t
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    fn update_stats(&mut self) {
        let mut d = 0.0;
        for w in self.points.windows(2) {
            d += distance(w[0].ilon, w[0].ilat, w[1].ilon, w[1].ilat);
        }
        self.distance = d.round() as i32;

        let elevations: Vec<f64> = self.points.iter().filter_map(|p| p.elevation_m()).collect();
        let mut ascend = 0.0;
        let mut buffer = 0.0;
        for w in elevations.windows(2) {
            buffer += w[1] - w[0];
            if buffer > ASCEND_HYSTERESIS {
                ascend += buffer - ASCEND_HYSTERESIS;
                buffer = ASCEND_HYSTERESIS;
            } else if buffer < 0.0 {
                buffer = 0.0;
            }
        }
        self.ascend = ascend.round() as i32;
        self.plain_ascend = match (elevations.first(), elevations.last()) {
            (Some(a), Some(b)) => (b - a).round() as i32,
            _ => 0,
        };

        if let Some(last) = self.points.last() {
            self.cost = last.cost;
            self.time = last.time;
            self.energy = last.energy;
        }
    }

    /// Appends the next leg of a route. Costs, times and energies of the leg are
    /// shifted to continue from the end of this track.
    pub fn append(&mut self, next: Track) {
        let (cost, time, energy) = self
            .points
            .last()
            .map_or((0, 0.0, 0.0), |p| (p.cost, p.time, p.energy));

        let mut points = next.points.into_iter().peekable();
        if let (Some(last), Some(first)) = (self.points.last(), points.peek()) {
            if last.position() == first.position() {
                points.next();
            }
        }

        self.points.extend(points.map(|mut p| {
            p.cost += cost;
            p.time += time;
            p.energy += energy;
            p
        }));
        self.merged |= next.merged;
        self.update_stats();
    }

    /// Points as `(lon, lat)` pairs in degrees.
    pub fn coordinates(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.points.iter().map(|p| (p.lon(), p.lat()))
    }
}
