//! Planar angle helpers shared by the filter, observer and presence tracker.

use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI, TAU};

/// Wrap an angle into (-π, π].
pub fn normalize_angle(angle: f64) -> f64 {
    if angle > -PI && angle <= PI {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Signed shortest rotation taking `from` onto `to`, in (-π, π].
pub fn angle_diff(from: f64, to: f64) -> f64 {
    normalize_angle(to - from)
}

/// Point reached by walking `distance` from `(x, y)` along `angle`.
pub fn project(x: f64, y: f64, angle: f64, distance: f64) -> (f64, f64) {
    (x + distance * angle.cos(), y + distance * angle.sin())
}

pub fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

/// One of the four cardinal orientations a road sign can face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadingBucket {
    East,
    North,
    South,
    West,
}

impl HeadingBucket {
    /// Quantize a heading: [-45°, 45°) East, [45°, 135°) North,
    /// [-135°, -45°) South, everything else West.
    pub fn quantize(heading: f64) -> Self {
        let deg = normalize_angle(heading).to_degrees();
        if (-45.0..45.0).contains(&deg) {
            HeadingBucket::East
        } else if (45.0..135.0).contains(&deg) {
            HeadingBucket::North
        } else if (-135.0..-45.0).contains(&deg) {
            HeadingBucket::South
        } else {
            HeadingBucket::West
        }
    }

    /// Exact bucket for a map direction in degrees, if it lies within
    /// `tolerance_deg` of a cardinal orientation.
    pub fn from_direction_deg(direction: f64, tolerance_deg: f64) -> Option<Self> {
        let bucket = Self::quantize(direction.to_radians());
        let off = angle_diff(bucket.radians(), direction.to_radians()).to_degrees();
        (off.abs() <= tolerance_deg).then_some(bucket)
    }

    pub fn radians(self) -> f64 {
        match self {
            HeadingBucket::East => 0.0,
            HeadingBucket::North => FRAC_PI_2,
            HeadingBucket::South => -FRAC_PI_2,
            HeadingBucket::West => PI,
        }
    }

    pub fn degrees(self) -> f64 {
        match self {
            HeadingBucket::East => 0.0,
            HeadingBucket::North => 90.0,
            HeadingBucket::South => -90.0,
            HeadingBucket::West => 180.0,
        }
    }
}
