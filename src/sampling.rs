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

//! Time-series sampling, run statistics, and the in-memory restart
//! contract (`Checkpoint`).

use serde::{Deserialize, Serialize};

use crate::conservation::ConservationResult;
use crate::derived::DerivedQuantities;
use crate::profiles::CoreProfiles;
use crate::solver::JacobianConditioning;

/// Tier-3 numerical diagnostics for one sampled step (SPEC_FULL.md §6):
/// conservation-drift reports plus whatever Jacobian conditioning the
/// solver produced on the step that landed on this sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub conservation: Vec<ConservationResult>,
    pub jacobian_conditioning: Option<JacobianConditioning>,
}

/// One recorded instant in the time series, tiered by
/// [`crate::config::SamplingPolicy`]: profiles are always present when
/// Tier 1 sampling is on, `derived`/`diagnostics` only when Tier 2/3 are.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    pub time: f32,
    pub step: usize,
    pub profiles: Option<CoreProfiles>,
    pub derived: Option<DerivedQuantities>,
    pub diagnostics: Option<DiagnosticsReport>,
}

/// Running statistics updated once per completed step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationStatistics {
    pub total_steps: usize,
    pub total_newton_iterations: u64,
    pub max_residual_norm: f32,
    pub sawtooth_crash_count: usize,
    pub conservation_correction_count: usize,
}

impl SimulationStatistics {
    pub fn record_step(&mut self, iterations: u32, residual_norm: f32) {
        self.total_steps += 1;
        self.total_newton_iterations += iterations as u64;
        self.max_residual_norm = self.max_residual_norm.max(residual_norm);
    }

    pub fn record_sawtooth(&mut self) {
        self.sawtooth_crash_count += 1;
    }

    pub fn record_conservation_correction(&mut self) {
        self.conservation_correction_count += 1;
    }
}

/// In-memory restart contract (§9.1 Open Question resolution: no NetCDF
/// I/O lives in this crate, only the data the "generators/lazy sequences"
/// design note calls a resumable sequence needs to carry).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub profiles: CoreProfiles,
    pub time_accumulator: f64,
    pub step: usize,
    pub statistics: SimulationStatistics,
    pub reference_quantities: Vec<f32>,
}
