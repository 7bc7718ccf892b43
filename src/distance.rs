// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Fixed-point coordinates and the cheap planar geometry used by the router.
//!
//! Positions are stored as 32-bit integers in micro-degrees, offset so that
//! 0 corresponds to -180° longitude and -90° latitude. All distances are computed
//! with an equirectangular approximation, which is accurate enough at the scale
//! of single road segments.

/// Number of fixed-point units in one degree.
pub const UNITS_PER_DEGREE: f64 = 1_000_000.0;

/// Length of one degree of latitude, in meters, as assumed by the planar approximation.
pub const METERS_PER_DEGREE: f64 = 110_984.0;

/// Converts a longitude in degrees into its fixed-point representation.
pub fn lon_to_ilon(lon: f64) -> i32 {
    ((lon + 180.0) * UNITS_PER_DEGREE).round() as i32
}

/// Converts a latitude in degrees into its fixed-point representation.
pub fn lat_to_ilat(lat: f64) -> i32 {
    ((lat + 90.0) * UNITS_PER_DEGREE).round() as i32
}

/// Converts a fixed-point longitude back into degrees.
pub fn ilon_to_lon(ilon: i32) -> f64 {
    ilon as f64 / UNITS_PER_DEGREE - 180.0
}

/// Converts a fixed-point latitude back into degrees.
pub fn ilat_to_lat(ilat: i32) -> f64 {
    ilat as f64 / UNITS_PER_DEGREE - 90.0
}

/// Packs a fixed-point position into a single identifier. Graph nodes are identified
/// by their position, so this is also the node id.
#[inline]
pub fn position_id(ilon: i32, ilat: i32) -> i64 {
    ((ilon as i64) << 32) | (ilat as u32 as i64)
}

/// Reverses [position_id].
#[inline]
pub fn id_to_position(id: i64) -> (i32, i32) {
    ((id >> 32) as i32, id as u32 as i32)
}

/// Approximates the cosine of a fixed-point latitude with a truncated Taylor series.
pub fn cos_lat(ilat: i32) -> f64 {
    // l² = lat²/2, thus 1 - l² + l⁴/6 = 1 - lat²/2 + lat⁴/24
    let l = (ilat as f64 - 90_000_000.0) * 0.000_000_012_341_34;
    let l2 = l * l;
    let l4 = l2 * l2;
    1.0 - l2 + l4 / 6.0
}

/// Latitude at which the longitude correction of a segment is evaluated.
#[inline]
pub fn mid_lat(lat1: i32, lat2: i32) -> i32 {
    ((lat1 as i64 + lat2 as i64) / 2) as i32
}

/// Planar distance in meters between two fixed-point positions.
pub fn distance(lon1: i32, lat1: i32, lon2: i32, lat2: i32) -> f64 {
    let coslat = cos_lat(mid_lat(lat1, lat2));
    let dx = (lon2 as f64 - lon1 as f64) * coslat;
    let dy = lat2 as f64 - lat1 as f64;
    (dx * dx + dy * dy).sqrt() * (METERS_PER_DEGREE / UNITS_PER_DEGREE)
}

/// Number of meters per fixed-point unit along the longitude and latitude axes
/// at the given latitude.
pub fn meter_scales(ilat: i32) -> (f64, f64) {
    let dlat = METERS_PER_DEGREE / UNITS_PER_DEGREE;
    (dlat * cos_lat(ilat), dlat)
}

/// Angle of a turn at `(lon1, lat1)` for a path arriving from `(lon0, lat0)` and
/// continuing to `(lon2, lat2)`. `coslat` is the longitude correction factor.
///
/// Returns the angle in degrees (positive for right turns, within -180..=180)
/// and its cosine. Degenerate (zero-length) legs are treated as going straight.
pub fn turn_angle(
    coslat: f64,
    lon0: i32,
    lat0: i32,
    lon1: i32,
    lat1: i32,
    lon2: i32,
    lat2: i32,
) -> (f64, f64) {
    let dlat1 = lat1 as f64 - lat0 as f64;
    let dlon1 = (lon1 as f64 - lon0 as f64) * coslat;
    let dlat2 = lat2 as f64 - lat1 as f64;
    let dlon2 = (lon2 as f64 - lon1 as f64) * coslat;

    let dd = ((dlat1 * dlat1 + dlon1 * dlon1) * (dlat2 * dlat2 + dlon2 * dlon2)).sqrt();
    if dd == 0.0 {
        return (0.0, 1.0);
    }

    let sinp = (dlat1 * dlon2 - dlon1 * dlat2) / dd;
    let cosp = ((dlat1 * dlat2 + dlon1 * dlon2) / dd).clamp(-1.0, 1.0);
    (sinp.atan2(cosp).to_degrees(), cosp)
}

/// Result of projecting a point onto a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Distance in meters between the point and the closest point of the segment.
    pub distance: f64,

    /// Position of the closest point along the segment, within `0.0..=1.0`.
    pub fraction: f64,

    /// Fixed-point longitude of the closest point.
    pub ilon: i32,

    /// Fixed-point latitude of the closest point.
    pub ilat: i32,
}

/// Projects the point `(plon, plat)` onto the segment `(lon1, lat1)-(lon2, lat2)`.
pub fn project_onto_segment(
    plon: i32,
    plat: i32,
    lon1: i32,
    lat1: i32,
    lon2: i32,
    lat2: i32,
) -> Projection {
    let (kx, ky) = meter_scales(mid_lat(lat1, lat2));
    let dx = (lon2 as f64 - lon1 as f64) * kx;
    let dy = (lat2 as f64 - lat1 as f64) * ky;
    let px = (plon as f64 - lon1 as f64) * kx;
    let py = (plat as f64 - lat1 as f64) * ky;

    let len2 = dx * dx + dy * dy;
    let fraction = if len2 > 0.0 {
        ((px * dx + py * dy) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let ilon = interpolate(lon1, lon2, fraction);
    let ilat = interpolate(lat1, lat2, fraction);
    let ex = px - fraction * dx;
    let ey = py - fraction * dy;

    Projection {
        distance: (ex * ex + ey * ey).sqrt(),
        fraction,
        ilon,
        ilat,
    }
}

/// Linear interpolation between two fixed-point values.
#[inline]
pub fn interpolate(a: i32, b: i32, fraction: f64) -> i32 {
    (a as f64 + (b as f64 - a as f64) * fraction).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn coordinate_conversion() {
        assert_eq!(lon_to_ilon(-180.0), 0);
        assert_eq!(lat_to_ilat(-90.0), 0);
        assert_eq!(lon_to_ilon(8.5), 188_500_000);
        assert_eq!(lat_to_ilat(49.25), 139_250_000);
        assert_almost_eq!(ilon_to_lon(188_500_000), 8.5, 1e-9);
        assert_almost_eq!(ilat_to_lat(139_250_000), 49.25, 1e-9);
    }

    #[test]
    fn position_id_round_trip() {
        let id = position_id(188_500_000, 139_250_000);
        assert_eq!(id_to_position(id), (188_500_000, 139_250_000));
        assert!(position_id(1, 0) > position_id(0, 179_999_999));
    }

    #[test]
    fn cos_lat_approximation() {
        assert_almost_eq!(cos_lat(90_000_000), 1.0, 1e-12);
        assert_almost_eq!(cos_lat(lat_to_ilat(45.0)), 45.0_f64.to_radians().cos(), 2e-3);
        assert_almost_eq!(cos_lat(lat_to_ilat(-30.0)), 30.0_f64.to_radians().cos(), 1e-3);
    }

    #[test]
    fn planar_distance() {
        // one degree of latitude
        assert_almost_eq!(distance(0, 0, 0, 1_000_000), METERS_PER_DEGREE, 1e-6);

        // one degree of longitude on the equator
        let lat = lat_to_ilat(0.0);
        assert_almost_eq!(distance(0, lat, 1_000_000, lat), METERS_PER_DEGREE, 1e-6);

        // symmetry
        let a = (lon_to_ilon(8.1), lat_to_ilat(49.0));
        let b = (lon_to_ilon(8.13), lat_to_ilat(49.02));
        assert_eq!(distance(a.0, a.1, b.0, b.1), distance(b.0, b.1, a.0, a.1));
    }

    #[test]
    fn turn_angles() {
        let coslat = 1.0;

        let (angle, cos) = turn_angle(coslat, 0, 0, 0, 100, 0, 200);
        assert_almost_eq!(angle, 0.0, 1e-9);
        assert_almost_eq!(cos, 1.0, 1e-9);

        // heading north, then east: right turn
        let (angle, cos) = turn_angle(coslat, 0, 0, 0, 100, 100, 100);
        assert_almost_eq!(angle, 90.0, 1e-9);
        assert_almost_eq!(cos, 0.0, 1e-9);

        // heading north, then west: left turn
        let (angle, _) = turn_angle(coslat, 0, 0, 0, 100, -100, 100);
        assert_almost_eq!(angle, -90.0, 1e-9);

        // u-turn
        let (angle, cos) = turn_angle(coslat, 0, 0, 0, 100, 0, 0);
        assert_almost_eq!(angle.abs(), 180.0, 1e-9);
        assert_almost_eq!(cos, -1.0, 1e-9);

        // degenerate
        assert_eq!(turn_angle(coslat, 5, 5, 5, 5, 10, 10), (0.0, 1.0));
    }

    #[test]
    fn projection() {
        let lat = lat_to_ilat(0.0);
        let p = project_onto_segment(500, lat + 100, 0, lat, 1000, lat);
        assert_almost_eq!(p.fraction, 0.5, 1e-9);
        assert_eq!((p.ilon, p.ilat), (500, lat));
        assert_almost_eq!(p.distance, 100.0 * METERS_PER_DEGREE / UNITS_PER_DEGREE, 1e-6);

        let p = project_onto_segment(-300, lat, 0, lat, 1000, lat);
        assert_eq!(p.fraction, 0.0);
        assert_eq!((p.ilon, p.ilat), (0, lat));

        let p = project_onto_segment(7, 7, 3, 3, 3, 3);
        assert_eq!(p.fraction, 0.0);
        assert_eq!((p.ilon, p.ilat), (3, 3));
    }
}
