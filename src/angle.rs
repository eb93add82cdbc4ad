//! Angle helpers shared by the processor and the broker.

use std::f64::consts::{PI, TAU};
use std::fmt;

/// Normalize an angle in degrees into [0, 360).
pub fn wrap360(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Shortest signed arc from `from` to `to`, in degrees (-180, 180].
pub fn ang_diff_deg(to: f64, from: f64) -> f64 {
    let mut diff = (to - from).rem_euclid(360.0);
    if diff > 180.0 {
        diff -= 360.0;
    }
    diff
}

/// Shortest signed arc from `from` to `to`, in radians (-PI, PI].
pub fn ang_diff_rad(to: f64, from: f64) -> f64 {
    let mut diff = (to - from).rem_euclid(TAU);
    if diff > PI {
        diff -= TAU;
    }
    diff
}

/// A 16-point compass rose direction, used for human readable status lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompassPoint {
    N,
    NNE,
    NE,
    ENE,
    E,
    ESE,
    SE,
    SSE,
    S,
    SSW,
    SW,
    WSW,
    W,
    WNW,
    NW,
    NNW,
}

const POINTS: [CompassPoint; 16] = [
    CompassPoint::N,
    CompassPoint::NNE,
    CompassPoint::NE,
    CompassPoint::ENE,
    CompassPoint::E,
    CompassPoint::ESE,
    CompassPoint::SE,
    CompassPoint::SSE,
    CompassPoint::S,
    CompassPoint::SSW,
    CompassPoint::SW,
    CompassPoint::WSW,
    CompassPoint::W,
    CompassPoint::WNW,
    CompassPoint::NW,
    CompassPoint::NNW,
];

impl CompassPoint {
    /// Nearest point for a heading in degrees. Each point covers 22.5°.
    pub fn from_heading(heading_deg: f64) -> Self {
        let sector = ((wrap360(heading_deg) + 11.25) / 22.5) as usize % 16;
        POINTS[sector]
    }

    pub fn abbreviation(&self) -> &'static str {
        match self {
            CompassPoint::N => "N",
            CompassPoint::NNE => "NNE",
            CompassPoint::NE => "NE",
            CompassPoint::ENE => "ENE",
            CompassPoint::E => "E",
            CompassPoint::ESE => "ESE",
            CompassPoint::SE => "SE",
            CompassPoint::SSE => "SSE",
            CompassPoint::S => "S",
            CompassPoint::SSW => "SSW",
            CompassPoint::SW => "SW",
            CompassPoint::WSW => "WSW",
            CompassPoint::W => "W",
            CompassPoint::WNW => "WNW",
            CompassPoint::NW => "NW",
            CompassPoint::NNW => "NNW",
        }
    }
}

impl fmt::Display for CompassPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abbreviation())
    }
}
