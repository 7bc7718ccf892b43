// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Exclusion zones ("nogos") which block or penalize route segments.

use crate::distance::{meter_scales, mid_lat, project_onto_segment};

/// Errors produced when constructing an invalid [NogoZone].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NogoError {
    #[error("nogo {0:?}: radius must be a positive, finite number of meters")]
    InvalidRadius(String),

    #[error("nogo {0:?}: weight must be NaN, zero or a positive, finite number")]
    InvalidWeight(String),

    #[error("nogo {name:?}: {what} requires at least {min} points")]
    TooFewPoints {
        name: String,
        what: &'static str,
        min: usize,
    },
}

/// Geometry of a [NogoZone].
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneShape {
    /// A circle around the zone's center.
    Circle,

    /// A polygon (when `closed`) or a polyline (when not) of fixed-point positions.
    Polygon { points: Vec<(i32, i32)>, closed: bool },
}

/// A named exclusion zone.
///
/// A zone with a NaN or zero weight is a hard block: any segment touching it
/// makes its path impassable. A zone with a positive weight only charges the
/// part of the segment lying inside the zone, multiplied by the weight.
/// Open polylines, having no interior, charge the weight once per crossing.
#[derive(Debug, Clone, PartialEq)]
pub struct NogoZone {
    pub name: String,

    /// Fixed-point longitude of the center (or of the bounding circle's center).
    pub ilon: i32,

    /// Fixed-point latitude of the center (or of the bounding circle's center).
    pub ilat: i32,

    /// Radius in meters (or the bounding circle's radius).
    pub radius: f64,

    pub weight: f64,

    pub shape: ZoneShape,
}

impl NogoZone {
    /// Creates a circular zone.
    pub fn circle(
        name: impl Into<String>,
        ilon: i32,
        ilat: i32,
        radius: f64,
        weight: f64,
    ) -> Result<Self, NogoError> {
        let name = name.into();
        if !(radius.is_finite() && radius > 0.0) {
            return Err(NogoError::InvalidRadius(name));
        }
        check_weight(&name, weight)?;

        Ok(Self {
            name,
            ilon,
            ilat,
            radius,
            weight,
            shape: ZoneShape::Circle,
        })
    }

    /// Creates a polygon (`closed == true`) or polyline zone.
    /// The bounding circle is derived from the points.
    pub fn polygon(
        name: impl Into<String>,
        points: Vec<(i32, i32)>,
        closed: bool,
        weight: f64,
    ) -> Result<Self, NogoError> {
        let name = name.into();
        let (what, min) = if closed { ("polygon", 3) } else { ("polyline", 2) };
        if points.len() < min {
            return Err(NogoError::TooFewPoints { name, what, min });
        }
        check_weight(&name, weight)?;

        let min_lon = points.iter().map(|p| p.0).min().unwrap_or_default();
        let max_lon = points.iter().map(|p| p.0).max().unwrap_or_default();
        let min_lat = points.iter().map(|p| p.1).min().unwrap_or_default();
        let max_lat = points.iter().map(|p| p.1).max().unwrap_or_default();
        let ilon = ((min_lon as i64 + max_lon as i64) / 2) as i32;
        let ilat = ((min_lat as i64 + max_lat as i64) / 2) as i32;

        let (kx, ky) = meter_scales(ilat);
        let radius = points
            .iter()
            .map(|&(lon, lat)| {
                let dx = (lon as f64 - ilon as f64) * kx;
                let dy = (lat as f64 - ilat as f64) * ky;
                (dx * dx + dy * dy).sqrt()
            })
            .fold(0.0, f64::max)
            // Points exactly on the bounding circle must still pass the prefilter.
            + 1.0;

        Ok(Self {
            name,
            ilon,
            ilat,
            radius,
            weight,
            shape: ZoneShape::Polygon { points, closed },
        })
    }

    /// Returns true if touching this zone makes a path impassable.
    pub fn is_hard(&self) -> bool {
        self.weight.is_nan() || self.weight == 0.0
    }

    /// Distance in meters between the zone's (bounding) center and the segment.
    pub fn center_distance(&self, lon1: i32, lat1: i32, lon2: i32, lat2: i32) -> f64 {
        project_onto_segment(self.ilon, self.ilat, lon1, lat1, lon2, lat2).distance
    }

    /// Returns true if the segment touches the zone.
    pub fn intersects(&self, lon1: i32, lat1: i32, lon2: i32, lat2: i32) -> bool {
        if self.center_distance(lon1, lat1, lon2, lat2) >= self.radius {
            return false;
        }

        match &self.shape {
            ZoneShape::Circle => true,
            ZoneShape::Polygon { points, closed } => {
                (*closed
                    && (contains(points, lon1, lat1) || contains(points, lon2, lat2)))
                    || edges(points, *closed)
                        .any(|(a, b)| segments_intersect((lon1, lat1), (lon2, lat2), a, b))
            }
        }
    }

    /// Returns true if the point lies inside the zone.
    pub fn contains(&self, ilon: i32, ilat: i32) -> bool {
        match &self.shape {
            ZoneShape::Circle => {
                let (kx, ky) = meter_scales(self.ilat);
                let dx = (ilon as f64 - self.ilon as f64) * kx;
                let dy = (ilat as f64 - self.ilat as f64) * ky;
                (dx * dx + dy * dy).sqrt() < self.radius
            }
            ZoneShape::Polygon {
                points,
                closed: true,
            } => contains(points, ilon, ilat),
            ZoneShape::Polygon { closed: false, .. } => false,
        }
    }

    /// Cost charged by a weighted zone for the segment. Always zero for hard zones.
    pub fn weighted_cost(&self, lon1: i32, lat1: i32, lon2: i32, lat2: i32) -> f64 {
        if self.is_hard() || self.center_distance(lon1, lat1, lon2, lat2) >= self.radius {
            return 0.0;
        }

        match &self.shape {
            ZoneShape::Circle => self.distance_within_circle(lon1, lat1, lon2, lat2) * self.weight,
            ZoneShape::Polygon {
                points,
                closed: true,
            } => distance_within_polygon(points, lon1, lat1, lon2, lat2) * self.weight,
            ZoneShape::Polygon {
                points,
                closed: false,
            } => {
                let crossings = edges(points, false)
                    .filter(|&(a, b)| segments_intersect((lon1, lat1), (lon2, lat2), a, b))
                    .count();
                crossings as f64 * self.weight
            }
        }
    }

    /// Length in meters of the part of the segment lying inside the circle.
    pub fn distance_within_circle(&self, lon1: i32, lat1: i32, lon2: i32, lat2: i32) -> f64 {
        // Circle-line intersection in a zone-centered frame (mathworld.wolfram.com/Circle-LineIntersection)
        let (kx, ky) = meter_scales(mid_lat(lat1, lat2));
        let mut p1 = (
            (lon1 as f64 - self.ilon as f64) * kx,
            (lat1 as f64 - self.ilat as f64) * ky,
        );
        let mut p2 = (
            (lon2 as f64 - self.ilon as f64) * kx,
            (lat2 as f64 - self.ilat as f64) * ky,
        );
        let r = self.radius;
        let inside1 = p1.0.hypot(p1.1) < r;
        let inside2 = p2.0.hypot(p2.1) < r;

        if inside1 && inside2 {
            return (p2.0 - p1.0).hypot(p2.1 - p1.1);
        }
        if inside1 {
            // keep the inside point as p2
            std::mem::swap(&mut p1, &mut p2);
        }
        let one_inside = inside1 || inside2;

        let dx = p2.0 - p1.0;
        let dy = p2.1 - p1.1;
        let dr2 = dx * dx + dy * dy;
        if dr2 == 0.0 {
            return 0.0;
        }
        let d = p1.0 * p2.1 - p2.0 * p1.1;
        let discriminant = r * r * dr2 - d * d;
        if discriminant < 0.0 {
            return 0.0;
        }

        let sq = discriminant.sqrt();
        let sgn = if dy < 0.0 { -1.0 } else { 1.0 };
        let a = (
            (d * dy + sgn * dx * sq) / dr2,
            (-d * dx + dy.abs() * sq) / dr2,
        );
        let b = (
            (d * dy - sgn * dx * sq) / dr2,
            (-d * dx - dy.abs() * sq) / dr2,
        );
        let param = |p: (f64, f64)| ((p.0 - p1.0) * dx + (p.1 - p1.1) * dy) / dr2;
        let (ta, tb) = (param(a), param(b));

        if one_inside {
            // Exactly one intersection lies between the outside and the inside point.
            let entry = if (ta - 0.5).abs() <= (tb - 0.5).abs() { a } else { b };
            (p2.0 - entry.0).hypot(p2.1 - entry.1)
        } else if (0.0..=1.0).contains(&ta) && (0.0..=1.0).contains(&tb) {
            (a.0 - b.0).hypot(a.1 - b.1)
        } else {
            0.0
        }
    }
}

fn check_weight(name: &str, weight: f64) -> Result<(), NogoError> {
    if weight.is_nan() || (weight.is_finite() && weight >= 0.0) {
        Ok(())
    } else {
        Err(NogoError::InvalidWeight(name.to_string()))
    }
}

fn edges(
    points: &[(i32, i32)],
    closed: bool,
) -> impl Iterator<Item = ((i32, i32), (i32, i32))> + '_ {
    let closing = if closed && points.len() > 2 {
        Some((points[points.len() - 1], points[0]))
    } else {
        None
    };
    points.windows(2).map(|w| (w[0], w[1])).chain(closing)
}

fn orientation(a: (i32, i32), b: (i32, i32), c: (i32, i32)) -> i64 {
    let abx = b.0 as i64 - a.0 as i64;
    let aby = b.1 as i64 - a.1 as i64;
    let acx = c.0 as i64 - a.0 as i64;
    let acy = c.1 as i64 - a.1 as i64;
    (abx * acy - aby * acx).signum()
}

fn on_segment(a: (i32, i32), b: (i32, i32), p: (i32, i32)) -> bool {
    p.0 >= a.0.min(b.0) && p.0 <= a.0.max(b.0) && p.1 >= a.1.min(b.1) && p.1 <= a.1.max(b.1)
}

/// Exact segment intersection test (touching counts), using integer orientation tests.
fn segments_intersect(p1: (i32, i32), p2: (i32, i32), q1: (i32, i32), q2: (i32, i32)) -> bool {
    let o1 = orientation(p1, p2, q1);
    let o2 = orientation(p1, p2, q2);
    let o3 = orientation(q1, q2, p1);
    let o4 = orientation(q1, q2, p2);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    (o1 == 0 && on_segment(p1, p2, q1))
        || (o2 == 0 && on_segment(p1, p2, q2))
        || (o3 == 0 && on_segment(q1, q2, p1))
        || (o4 == 0 && on_segment(q1, q2, p2))
}

/// Even-odd point in polygon test.
fn contains(points: &[(i32, i32)], ilon: i32, ilat: i32) -> bool {
    let (x, y) = (ilon as f64, ilat as f64);
    let mut inside = false;
    for (a, b) in edges(points, true) {
        let (ax, ay) = (a.0 as f64, a.1 as f64);
        let (bx, by) = (b.0 as f64, b.1 as f64);
        if (ay > y) != (by > y) && x < (bx - ax) * (y - ay) / (by - ay) + ax {
            inside = !inside;
        }
    }
    inside
}

/// Parameter along `p1-p2` of its intersection with `q1-q2`, if the segments properly cross.
fn crossing_parameter(p1: (i32, i32), p2: (i32, i32), q1: (i32, i32), q2: (i32, i32)) -> Option<f64> {
    let rx = p2.0 as f64 - p1.0 as f64;
    let ry = p2.1 as f64 - p1.1 as f64;
    let sx = q2.0 as f64 - q1.0 as f64;
    let sy = q2.1 as f64 - q1.1 as f64;
    let denom = rx * sy - ry * sx;
    if denom == 0.0 {
        return None;
    }

    let qpx = q1.0 as f64 - p1.0 as f64;
    let qpy = q1.1 as f64 - p1.1 as f64;
    let t = (qpx * sy - qpy * sx) / denom;
    let u = (qpx * ry - qpy * rx) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(t)
    } else {
        None
    }
}

/// Length in meters of the part of a segment lying inside a closed polygon.
fn distance_within_polygon(points: &[(i32, i32)], lon1: i32, lat1: i32, lon2: i32, lat2: i32) -> f64 {
    let p1 = (lon1, lat1);
    let p2 = (lon2, lat2);

    let mut params: Vec<f64> = edges(points, true)
        .filter_map(|(a, b)| crossing_parameter(p1, p2, a, b))
        .collect();
    params.push(0.0);
    params.push(1.0);
    params.sort_by(f64::total_cmp);

    let length = crate::distance::distance(lon1, lat1, lon2, lat2);
    params
        .windows(2)
        .filter(|w| w[1] > w[0])
        .filter(|w| {
            let mid = (w[0] + w[1]) / 2.0;
            let lon = crate::distance::interpolate(lon1, lon2, mid);
            let lat = crate::distance::interpolate(lat1, lat2, mid);
            contains(points, lon, lat)
        })
        .map(|w| (w[1] - w[0]) * length)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{lat_to_ilat, lon_to_ilon, METERS_PER_DEGREE, UNITS_PER_DEGREE};

    macro_rules! assert_almost_eq {
        ($a:expr, $b:expr, $eps:expr) => {
            assert!(
                (($a - $b) as f64).abs() < $eps,
                "assertion failed: {} ≈ {}",
                $a,
                $b
            )
        };
    }

    /// Fixed-point units per meter along both axes on the equator.
    const UNITS_PER_METER: f64 = UNITS_PER_DEGREE / METERS_PER_DEGREE;

    fn meters(m: f64) -> i32 {
        (m * UNITS_PER_METER).round() as i32
    }

    fn origin() -> (i32, i32) {
        (lon_to_ilon(0.0), lat_to_ilat(0.0))
    }

    #[test]
    fn construction_validation() {
        let (x, y) = origin();
        assert!(NogoZone::circle("a", x, y, 10.0, 0.0).is_ok());
        assert!(NogoZone::circle("a", x, y, 10.0, f64::NAN).is_ok());
        assert!(NogoZone::circle("a", x, y, 10.0, 2.5).is_ok());
        assert_eq!(
            NogoZone::circle("a", x, y, 0.0, 0.0),
            Err(NogoError::InvalidRadius("a".to_string()))
        );
        assert_eq!(
            NogoZone::circle("a", x, y, 10.0, -1.0),
            Err(NogoError::InvalidWeight("a".to_string()))
        );
        assert!(matches!(
            NogoZone::polygon("p", vec![(x, y), (x + 1, y)], true, 0.0),
            Err(NogoError::TooFewPoints { min: 3, .. })
        ));
        assert!(NogoZone::polygon("p", vec![(x, y), (x + 1, y)], false, 0.0).is_ok());
    }

    #[test]
    fn hard_and_weighted() {
        let (x, y) = origin();
        assert!(NogoZone::circle("a", x, y, 10.0, 0.0).unwrap().is_hard());
        assert!(NogoZone::circle("a", x, y, 10.0, f64::NAN).unwrap().is_hard());
        assert!(!NogoZone::circle("a", x, y, 10.0, 1.0).unwrap().is_hard());
    }

    #[test]
    fn circle_intersection() {
        let (x, y) = origin();
        let zone = NogoZone::circle("c", x, y, 50.0, 0.0).unwrap();

        // passes through the center
        assert!(zone.intersects(x - meters(100.0), y, x + meters(100.0), y));

        // passes 40 m north of the center
        let n = y + meters(40.0);
        assert!(zone.intersects(x - meters(100.0), n, x + meters(100.0), n));

        // passes 60 m north of the center
        let n = y + meters(60.0);
        assert!(!zone.intersects(x - meters(100.0), n, x + meters(100.0), n));

        // ends before the circle
        assert!(!zone.intersects(x - meters(200.0), y, x - meters(60.0), y));

        assert!(zone.contains(x + meters(10.0), y));
        assert!(!zone.contains(x + meters(60.0), y));
    }

    #[test]
    fn distance_within_circle() {
        let (x, y) = origin();
        let zone = NogoZone::circle("c", x, y, 50.0, 2.0).unwrap();

        // crossing the whole diameter
        let d = zone.distance_within_circle(x - meters(100.0), y, x + meters(100.0), y);
        assert_almost_eq!(d, 100.0, 0.1);

        // both points inside
        let d = zone.distance_within_circle(x - meters(10.0), y, x + meters(20.0), y);
        assert_almost_eq!(d, 30.0, 0.1);

        // entering from outside, ending at the center
        let d = zone.distance_within_circle(x - meters(100.0), y, x, y);
        assert_almost_eq!(d, 50.0, 0.1);

        // leaving from the center (swapped inside/outside)
        let d = zone.distance_within_circle(x, y, x, y + meters(100.0));
        assert_almost_eq!(d, 50.0, 0.1);

        // chord 30 m off the center: 2 * sqrt(50² - 30²) = 80
        let n = y + meters(30.0);
        let d = zone.distance_within_circle(x - meters(100.0), n, x + meters(100.0), n);
        assert_almost_eq!(d, 80.0, 0.1);

        // the line crosses the circle, but the segment stops short of it
        let d = zone.distance_within_circle(x - meters(200.0), y, x - meters(100.0), y);
        assert_eq!(d, 0.0);

        // weighted cost scales by the weight
        let c = zone.weighted_cost(x - meters(100.0), y, x + meters(100.0), y);
        assert_almost_eq!(c, 200.0, 0.2);
    }

    #[test]
    fn polygon_zone() {
        let (x, y) = origin();
        let square = vec![
            (x - meters(50.0), y - meters(50.0)),
            (x + meters(50.0), y - meters(50.0)),
            (x + meters(50.0), y + meters(50.0)),
            (x - meters(50.0), y + meters(50.0)),
        ];
        let zone = NogoZone::polygon("sq", square.clone(), true, 1.0).unwrap();

        assert!(zone.contains(x, y));
        assert!(!zone.contains(x + meters(60.0), y));
        assert!(zone.intersects(x - meters(100.0), y, x + meters(100.0), y));
        assert!(!zone.intersects(x - meters(100.0), y + meters(60.0), x + meters(100.0), y + meters(60.0)));

        // fully inside: no edge crossings, must still intersect
        assert!(zone.intersects(x - meters(10.0), y, x + meters(10.0), y));

        let c = zone.weighted_cost(x - meters(100.0), y, x + meters(100.0), y);
        assert_almost_eq!(c, 100.0, 0.5);

        // the same square as an open polyline without the closing edge
        let line = NogoZone::polygon("ln", square, false, 3.0).unwrap();
        assert!(!line.contains(x, y));
        assert!(!line.intersects(x - meters(10.0), y, x + meters(10.0), y));
        assert_almost_eq!(line.weighted_cost(x, y, x + meters(100.0), y), 3.0, 1e-9);
    }
}
