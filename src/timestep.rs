// tokamak-core - time-stepping engine for tokamak core plasma transport
// Copyright (C) 2024

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Adaptive CFL/diffusion-based timestep and the double-precision time
//! accumulator (SPEC_FULL.md §4.5, §4.6).

use crate::transport::TransportCoefficients;

const CFL_SAFETY: f32 = 0.9;

/// `dt_diff = 0.5 dr^2 / max(chi_i, chi_e, d)`, clamped to `[dt_min, dt_max]`
/// and scaled by a safety factor. The first step of a run should use
/// `dt_init` directly instead of calling this.
pub fn adaptive_dt(transport: &TransportCoefficients, dr: f32, dt_min: f32, dt_max: f32) -> f32 {
    let max_diff = transport.max_diffusivity().max(f32::EPSILON);
    let dt_diff = 0.5 * dr * dr / max_diff;
    (CFL_SAFETY * dt_diff).clamp(dt_min, dt_max)
}

/// Accumulates elapsed simulation time in `f64` while every other
/// quantity stays `f32`; the only sanctioned precision exception (§4.6).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeAccumulator {
    total: f64,
}

impl TimeAccumulator {
    pub fn new(start: f32) -> Self {
        Self { total: start as f64 }
    }

    /// `dt` must be finite and non-negative; violating this is a
    /// programming error, not a recoverable run-time condition.
    pub fn advance(&mut self, dt: f32) {
        assert!(dt.is_finite() && dt >= 0.0, "dt must be finite and non-negative, got {dt}");
        self.total += dt as f64;
    }

    pub fn as_f32(&self) -> f32 {
        self.total as f32
    }

    pub fn as_f64(&self) -> f64 {
        self.total
    }
}
