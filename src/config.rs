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

//! Static and dynamic configuration data model.
//!
//! This module owns the shape of the input an external loader (CLI args,
//! JSON file, environment overrides -- all out of scope for this crate)
//! hands to [`crate::orchestrator::Orchestrator::initialize`]. No parsing
//! logic lives here, only validated plain data.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::profiles::BoundaryCondition;

/// Which geometry model the static mesh configuration selects.
///
/// Only a circular-limiter geometry is bundled; non-uniform grids and
/// shaped equilibria are a future concern (see the crate's Open Questions).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryKind {
    CircularLimited,
}

/// Which implicit solver the orchestrator should construct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverKind {
    Linear,
    Newton,
    /// Configured but not behaviourally distinguished from `Newton` (see
    /// the Open Questions in the crate's design notes). Treated as an
    /// alias until a distinct optimizer-based solver is specified.
    Optimizer,
}

/// Output encoding an external writer would use (no writer lives here).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    NetCdf,
    Json,
}

/// Tier 1/2/3 sampling policy controlling what the orchestrator records
/// into the time series each step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingPolicy {
    /// Tier 1: always captured (profiles at sampled steps).
    pub sample_profiles: bool,
    /// Tier 2: derived scalar quantities (tau_E, Q, beta_N, ...).
    pub sample_derived: bool,
    /// Tier 3: numerical diagnostics (Jacobian conditioning, conservation).
    pub sample_diagnostics: bool,
    /// Record an interior sample every `profile_sampling_interval` steps.
    /// Step 0 and the final step are always recorded regardless.
    pub profile_sampling_interval: usize,
}

impl SamplingPolicy {
    pub const fn minimal() -> Self {
        Self {
            sample_profiles: false,
            sample_derived: false,
            sample_diagnostics: false,
            profile_sampling_interval: usize::MAX,
        }
    }

    pub const fn balanced() -> Self {
        Self {
            sample_profiles: true,
            sample_derived: true,
            sample_diagnostics: false,
            profile_sampling_interval: 100,
        }
    }

    pub const fn detailed() -> Self {
        Self {
            sample_profiles: true,
            sample_derived: true,
            sample_diagnostics: true,
            profile_sampling_interval: 10,
        }
    }

    /// Whether `step` (out of `total_steps`, `final_step` being the last
    /// one that will ever run) should produce a `TimePoint`.
    pub fn should_sample(&self, step: usize, final_step: usize) -> bool {
        if !self.sample_profiles {
            return step == 0 || step == final_step;
        }
        step == 0
            || step == final_step
            || (self.profile_sampling_interval > 0 && step % self.profile_sampling_interval == 0)
    }
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self::balanced()
    }
}

/// Static mesh parameters, fixed for the lifetime of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshConfiguration {
    pub n_cells: usize,
    pub r0: f32,
    pub a: f32,
    pub b_tor: f32,
    pub geometry_type: GeometryKind,
}

/// Which of the four transport equations are actually evolved; a flag
/// set to `false` holds that profile fixed at its initial value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionFlags {
    pub evolve_ti: bool,
    pub evolve_te: bool,
    pub evolve_ne: bool,
    pub evolve_psi: bool,
}

impl EvolutionFlags {
    pub const fn all() -> Self {
        Self {
            evolve_ti: true,
            evolve_te: true,
            evolve_ne: true,
            evolve_psi: true,
        }
    }

    /// A bitmask suitable as a compilation-cache key component.
    pub fn bitmask(&self) -> u8 {
        (self.evolve_ti as u8)
            | (self.evolve_te as u8) << 1
            | (self.evolve_ne as u8) << 2
            | (self.evolve_psi as u8) << 3
    }
}

impl Default for EvolutionFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Solver tolerances and iteration caps shared by the linear and Newton
/// solvers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverConfiguration {
    pub solver_kind: SolverKind,
    pub theta: f32,
    pub newton_tol: f32,
    pub newton_tol_x: f32,
    pub newton_max_iter: u32,
    pub use_pereverzev_corrector: bool,
    pub n_corrector_steps: u32,
}

impl Default for SolverConfiguration {
    fn default() -> Self {
        Self {
            solver_kind: SolverKind::Newton,
            theta: 1.0,
            newton_tol: 1e-6,
            newton_tol_x: 1e-6,
            newton_max_iter: 20,
            use_pereverzev_corrector: false,
            n_corrector_steps: 0,
        }
    }
}

/// Time configuration: integration bounds and the adaptive-timestep
/// toggle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeConfiguration {
    pub start: f32,
    pub end: f32,
    pub initial_dt: f32,
    pub adaptive: bool,
    pub dt_min: f32,
    pub dt_max: f32,
}

impl Default for TimeConfiguration {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 1.0,
            initial_dt: 1e-5,
            adaptive: true,
            dt_min: 1e-6,
            dt_max: 1e-2,
        }
    }
}

/// Output configuration: data only, no writer logic (persistence is an
/// external collaborator).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputConfiguration {
    pub output_dir: Option<String>,
    pub output_format: OutputFormat,
}

impl Default for OutputConfiguration {
    fn default() -> Self {
        Self {
            output_dir: None,
            output_format: OutputFormat::Json,
        }
    }
}

/// Parameters for the sawtooth MHD event engine.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SawtoothParameters {
    pub min_crash_interval: f32,
    pub rho_min: f32,
    pub s_crit: f32,
    pub mixing_multiplier: f32,
    pub flattening_factor: f32,
    pub flux_scale_factor: f32,
}

impl Default for SawtoothParameters {
    fn default() -> Self {
        Self {
            min_crash_interval: 10e-3,
            rho_min: 0.2,
            s_crit: 0.2,
            mixing_multiplier: 1.5,
            flattening_factor: 1.01,
            flux_scale_factor: 0.8,
        }
    }
}

/// Per-run parameters that may be re-supplied on every call to `run`:
/// boundary conditions plus the opaque parameter bags consumed by the
/// transport/source models the orchestrator was constructed with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicParameters {
    pub boundary_conditions: [BoundaryCondition; 4],
    pub sawtooth: SawtoothParameters,
    pub conservation_interval: usize,
    pub particle_tolerance: f32,
    pub energy_tolerance: f32,
}

/// The full aggregate input to [`crate::orchestrator::Orchestrator::initialize`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfiguration {
    pub mesh: MeshConfiguration,
    pub evolution: EvolutionFlags,
    pub solver: SolverConfiguration,
    pub time: TimeConfiguration,
    pub sampling: SamplingPolicy,
    pub output: OutputConfiguration,
}

impl SimulationConfiguration {
    /// Validate static/solver/time parameters. Dynamic parameters (boundary
    /// conditions) are validated separately by
    /// [`DynamicParameters::validate`] since they may change between calls
    /// to `run`.
    pub fn validate(&self) -> CoreResult<()> {
        if self.mesh.n_cells < 3 {
            return Err(CoreError::MeshTooCoarse {
                message: format!(
                    "n_cells must be at least 3, got {}",
                    self.mesh.n_cells
                ),
            });
        }
        if !(self.mesh.r0 > 0.0 && self.mesh.r0.is_finite()) {
            return Err(CoreError::InvalidConfiguration {
                message: "R0 must be positive and finite".into(),
            });
        }
        if !(self.mesh.a > 0.0 && self.mesh.a.is_finite()) {
            return Err(CoreError::InvalidConfiguration {
                message: "minor radius `a` must be positive and finite".into(),
            });
        }
        if !(self.mesh.b_tor > 0.0 && self.mesh.b_tor.is_finite()) {
            return Err(CoreError::InvalidConfiguration {
                message: "B_tor must be positive and finite".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.solver.theta) || !self.solver.theta.is_finite() {
            return Err(CoreError::InvalidConfiguration {
                message: format!("theta must lie in [0,1], got {}", self.solver.theta),
            });
        }
        if !self.solver.newton_tol.is_finite() || self.solver.newton_tol <= 0.0 {
            return Err(CoreError::InvalidConfiguration {
                message: "newton_tol must be positive and finite".into(),
            });
        }
        if self.time.end <= self.time.start {
            return Err(CoreError::InvalidConfiguration {
                message: "time.end must be greater than time.start".into(),
            });
        }
        if self.time.initial_dt <= 0.0 || !self.time.initial_dt.is_finite() {
            return Err(CoreError::TimeStepTooSmall {
                message: "initial_dt must be positive and finite".into(),
            });
        }
        if self.time.dt_min <= 0.0 || self.time.dt_max < self.time.dt_min {
            return Err(CoreError::TimeStepTooSmall {
                message: "require 0 < dt_min <= dt_max".into(),
            });
        }
        Ok(())
    }
}

impl DynamicParameters {
    /// Validate boundary conditions and conservation thresholds. Called at
    /// `initialize` and again every time fresh dynamic parameters are
    /// supplied to `run`.
    pub fn validate(&self) -> CoreResult<()> {
        for bc in &self.boundary_conditions {
            bc.validate()
                .map_err(|message| CoreError::InvalidBoundaryConditions { message })?;
        }
        if !(self.particle_tolerance > 0.0 && self.particle_tolerance.is_finite()) {
            return Err(CoreError::InvalidConfiguration {
                message: "particle_tolerance must be positive and finite".into(),
            });
        }
        if !(self.energy_tolerance > 0.0 && self.energy_tolerance.is_finite()) {
            return Err(CoreError::InvalidConfiguration {
                message: "energy_tolerance must be positive and finite".into(),
            });
        }
        Ok(())
    }
}
