//! Harmonic deviation model.
//!
//! Deviation is modelled as
//! `A + B·sin θ + C·cos θ + D·sin 2θ + E·cos 2θ`, fitted by least squares from
//! eight deviations measured at the cardinal and intercardinal headings.

use serde::{Deserialize, Serialize};

/// Headings (degrees) at which the eight deviation samples are measured.
pub const MEASURED_HEADINGS_DEG: [f64; 8] = [0.0, 45.0, 90.0, 135.0, 180.0, 225.0, 270.0, 315.0];

const TERMS: usize = 5;
const PIVOT_EPSILON: f64 = 1e-9;
const TABLE_SIZE: usize = 360;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HarmonicCoeffs {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
}

impl HarmonicCoeffs {
    /// Closed-form deviation (degrees) at a heading (degrees).
    pub fn deviation(&self, heading_deg: f64) -> f64 {
        let th = heading_deg.to_radians();
        self.a
            + self.b * th.sin()
            + self.c * th.cos()
            + self.d * (2.0 * th).sin()
            + self.e * (2.0 * th).cos()
    }
}

fn basis(heading_deg: f64) -> [f64; TERMS] {
    let th = heading_deg.to_radians();
    [1.0, th.sin(), th.cos(), (2.0 * th).sin(), (2.0 * th).cos()]
}

/// Fit the five coefficients from deviations measured at [`MEASURED_HEADINGS_DEG`].
///
/// Solves the normal equations `MᵗM x = Mᵗy` with Gauss-Jordan elimination and
/// partial pivoting. A column whose best pivot is below 1e-9 is skipped, leaving
/// that coefficient unresolved instead of failing.
pub fn compute_harmonic_coeffs(measured_deg: &[f64; 8]) -> HarmonicCoeffs {
    // Augmented matrix [MᵗM | Mᵗy]
    let mut aug = [[0.0f64; TERMS + 1]; TERMS];
    for (&heading, &y) in MEASURED_HEADINGS_DEG.iter().zip(measured_deg) {
        let v = basis(heading);
        for r in 0..TERMS {
            aug[r][TERMS] += v[r] * y;
            for c in 0..TERMS {
                aug[r][c] += v[r] * v[c];
            }
        }
    }

    for col in 0..TERMS {
        let pivot = (col..TERMS)
            .max_by(|&x, &y| aug[x][col].abs().total_cmp(&aug[y][col].abs()))
            .unwrap_or(col);
        if pivot != col {
            aug.swap(pivot, col);
        }

        let diag = aug[col][col];
        if diag.abs() < PIVOT_EPSILON {
            continue;
        }
        for c in col..=TERMS {
            aug[col][c] /= diag;
        }
        for r in 0..TERMS {
            if r == col {
                continue;
            }
            let factor = aug[r][col];
            if factor == 0.0 {
                continue;
            }
            for c in col..=TERMS {
                aug[r][c] -= factor * aug[col][c];
            }
        }
    }

    HarmonicCoeffs {
        a: aug[0][TERMS],
        b: aug[1][TERMS],
        c: aug[2][TERMS],
        d: aug[3][TERMS],
        e: aug[4][TERMS],
    }
}

/// Deviation per integer degree, queried by linear interpolation.
#[derive(Clone, Debug)]
pub struct DeviationTable {
    table: [f64; TABLE_SIZE],
    built: bool,
}

impl Default for DeviationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviationTable {
    pub fn new() -> Self {
        Self {
            table: [0.0; TABLE_SIZE],
            built: false,
        }
    }

    pub fn from_coeffs(coeffs: &HarmonicCoeffs) -> Self {
        let mut table = Self::new();
        table.build(coeffs);
        table
    }

    pub fn build(&mut self, coeffs: &HarmonicCoeffs) {
        for (deg, slot) in self.table.iter_mut().enumerate() {
            *slot = coeffs.deviation(deg as f64);
        }
        self.built = true;
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Interpolated deviation (degrees) at a compass heading.
    ///
    /// Returns 0.0 when the table was never built or the heading is not finite.
    pub fn lookup(&self, compass_deg: f64) -> f64 {
        if !self.built || !compass_deg.is_finite() {
            return 0.0;
        }
        let heading = crate::angle::wrap360(compass_deg);
        let idx = (heading.floor() as usize).min(TABLE_SIZE - 1);
        let frac = heading - idx as f64;
        let next = (idx + 1) % TABLE_SIZE;
        self.table[idx] * (1.0 - frac) + self.table[next] * frac
    }
}
