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

//! The single mutable state owner that drives the step loop
//! (SPEC_FULL.md §4.9, §5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::coefficients::assemble_with_geometry;
use crate::config::{DynamicParameters, SimulationConfiguration, SolverKind};
use crate::conservation::{ConservationEnforcer, ConservationResult};
use crate::derived::DerivedQuantities;
use crate::error::{CoreError, CoreResult};
use crate::geometry::GeometryProvider;
use crate::mhd::MHDModel;
use crate::profiles::CoreProfiles;
use crate::sampling::{Checkpoint, DiagnosticsReport, SimulationStatistics, TimePoint};
use crate::solver::{JacobianConditioning, LinearThetaSolver, NewtonSolver, PDESolver};
use crate::sources::{SourceMetadata, SourceModel};
use crate::timestep::{adaptive_dt, TimeAccumulator};
use crate::transport::TransportModel;

/// A cooperative cancellation flag: checked only between steps, never
/// mid-step (§5).
#[derive(Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot handed to the progress callback after each completed step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    pub current_time: f32,
    pub total_steps: usize,
    pub last_dt: f32,
    pub converged: bool,
    pub profiles: Option<CoreProfiles>,
    pub derived: Option<DerivedQuantities>,
}

/// What `run` returns once it stops (reaching `until`, being cancelled,
/// or failing).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub final_profiles: CoreProfiles,
    pub statistics: SimulationStatistics,
    pub time_series: Option<Vec<TimePoint>>,
}

struct SimulationState {
    profiles: CoreProfiles,
    time: TimeAccumulator,
    step: usize,
    last_dt: f32,
    statistics: SimulationStatistics,
    time_series: Vec<TimePoint>,
    last_progress: Option<ProgressInfo>,
    /// Aggregated source metadata from the step just completed, threaded
    /// into [`DerivedQuantities::compute`] so `tau_E`/`Q` see real heating
    /// power instead of an empty slice.
    last_metadata: Vec<SourceMetadata>,
    /// Results of the most recent conservation enforcement pass, retained
    /// between enforcement steps (the enforcer runs only every
    /// `conservation_interval` steps) so a Tier-3 sample always reports
    /// the latest drift, not a stale `None`.
    last_conservation: Option<Vec<ConservationResult>>,
    last_jacobian_conditioning: Option<JacobianConditioning>,
}

fn build_solver(config: &SimulationConfiguration) -> Box<dyn PDESolver> {
    match config.solver.solver_kind {
        SolverKind::Linear => Box::new(LinearThetaSolver::new(
            config.evolution,
            config.solver.use_pereverzev_corrector,
            config.solver.n_corrector_steps,
        )),
        // `Optimizer` resolves to the same construction as `Newton` (§9.1
        // Open Question resolution) until a distinct solver is specified.
        SolverKind::Newton | SolverKind::Optimizer => Box::new(NewtonSolver::new(
            config.evolution,
            config.solver.newton_tol,
            config.solver.newton_tol_x,
            config.solver.newton_max_iter,
        )),
    }
}

/// Tags a fallible step's error with the time it happened at; the solver
/// itself does not know the absolute simulation time.
fn tag_error_time(error: CoreError, time: f32) -> CoreError {
    match error {
        CoreError::NumericInstability { variable, value, .. } => CoreError::NumericInstability { time, variable, value },
        other => other,
    }
}

/// Drives initialization, the step loop, and pause/resume/progress for
/// one simulation run. The single mutable owner described in §5 --
/// models are frozen after construction and carry no mutable state of
/// their own.
pub struct Orchestrator {
    config: SimulationConfiguration,
    geometry_provider: Box<dyn GeometryProvider>,
    transport_model: Box<dyn TransportModel>,
    source_model: Box<dyn SourceModel>,
    mhd_models: Vec<Box<dyn MHDModel>>,
    solver: Box<dyn PDESolver>,
    conservation_enforcer: Option<ConservationEnforcer>,
    dynamic_params: DynamicParameters,
    reference_quantities: Vec<f32>,
    state: SimulationState,
    pause_state: Arc<(Mutex<bool>, Condvar)>,
}

impl Orchestrator {
    /// Validates configuration and dynamic parameters, constructs the
    /// configured solver, and captures conservation reference quantities
    /// from `initial_profiles`. Fails fast with the relevant `CoreError`
    /// variant on any invalid input (§7).
    #[allow(clippy::too_many_arguments)]
    pub fn initialize(
        config: SimulationConfiguration,
        geometry_provider: Box<dyn GeometryProvider>,
        transport_model: Box<dyn TransportModel>,
        source_model: Box<dyn SourceModel>,
        mhd_models: Vec<Box<dyn MHDModel>>,
        conservation_enforcer: Option<ConservationEnforcer>,
        initial_profiles: CoreProfiles,
        dynamic_params: DynamicParameters,
    ) -> CoreResult<Self> {
        config.validate()?;
        dynamic_params.validate()?;
        if initial_profiles.n_cells() != config.mesh.n_cells {
            return Err(CoreError::InvalidConfiguration {
                message: format!(
                    "initial profiles have {} cells, mesh configuration declares {}",
                    initial_profiles.n_cells(),
                    config.mesh.n_cells
                ),
            });
        }
        if !initial_profiles.is_valid() {
            return Err(CoreError::InvalidConfiguration {
                message: "initial profiles are not physically valid (non-positive or non-finite entries)".into(),
            });
        }

        let solver = build_solver(&config);
        let reference_quantities = conservation_enforcer
            .as_ref()
            .map(|enforcer| enforcer.references().to_vec())
            .unwrap_or_default();
        let state = SimulationState {
            profiles: initial_profiles,
            time: TimeAccumulator::new(config.time.start),
            step: 0,
            last_dt: config.time.initial_dt,
            statistics: SimulationStatistics::default(),
            time_series: Vec::new(),
            last_progress: None,
            last_metadata: Vec::new(),
            last_conservation: None,
            last_jacobian_conditioning: None,
        };

        info!(n_cells = config.mesh.n_cells, "orchestrator initialized");

        Ok(Self {
            config,
            geometry_provider,
            transport_model,
            source_model,
            mhd_models,
            solver,
            conservation_enforcer,
            dynamic_params,
            reference_quantities,
            state,
            pause_state: Arc::new((Mutex::new(false), Condvar::new())),
        })
    }

    pub fn pause(&self) {
        let (lock, _) = &*self.pause_state;
        *lock.lock().expect("pause mutex poisoned") = true;
    }

    pub fn resume(&self) {
        let (lock, cvar) = &*self.pause_state;
        *lock.lock().expect("pause mutex poisoned") = false;
        cvar.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_state.0.lock().expect("pause mutex poisoned")
    }

    pub fn get_progress(&self) -> Option<ProgressInfo> {
        self.state.last_progress.clone()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            profiles: self.state.profiles.clone(),
            time_accumulator: self.state.time.as_f64(),
            step: self.state.step,
            statistics: self.state.statistics.clone(),
            reference_quantities: self.reference_quantities.clone(),
        }
    }

    fn wait_while_paused(&self) {
        let (lock, cvar) = &*self.pause_state;
        let mut paused = lock.lock().expect("pause mutex poisoned");
        while *paused {
            paused = cvar.wait(paused).expect("pause condvar poisoned");
        }
    }

    /// One step of §4.9's loop. Retries with a halved `dt` up to three
    /// times on solver failure before surfacing `ConvergenceFailure`.
    fn step_once(&mut self) -> CoreResult<()> {
        let geometry = self.geometry_provider.geometry_at(self.state.time.as_f32(), &self.state.profiles);

        let mut dt = if self.state.step == 0 {
            self.config.time.initial_dt
        } else if self.config.time.adaptive {
            let transport_now = self.transport_model.compute_coefficients(&self.state.profiles, &geometry, &self.dynamic_params);
            adaptive_dt(&transport_now, geometry.dr, self.config.time.dt_min, self.config.time.dt_max)
        } else {
            self.state.last_dt
        };

        let transport_model = &self.transport_model;
        let source_model = &self.source_model;
        let dynamic_params = &self.dynamic_params;
        // `coeffs_cb` may be invoked more than once per step (Newton
        // iterations, the Pereverzev-Corriveau corrector); the metadata
        // from its last invocation is what `DerivedQuantities::compute`
        // sees for this step, captured through a `RefCell` since the
        // callback signature has no return channel of its own for it.
        let captured_metadata: std::cell::RefCell<Option<SourceMetadata>> = std::cell::RefCell::new(None);
        let captured_metadata_ref = &captured_metadata;
        let coeffs_cb = move |profiles: &CoreProfiles, geometry: &crate::geometry::Geometry| {
            let transport = transport_model.compute_coefficients(profiles, geometry, dynamic_params);
            let (sources, metadata) = source_model.compute_terms_with_metadata(profiles, geometry, dynamic_params);
            *captured_metadata_ref.borrow_mut() = metadata;
            assemble_with_geometry(profiles, &transport, &sources, geometry).expect("coefficient assembly shape invariants hold")
        };

        let mut attempt = 0;
        let outcome = loop {
            let result = self.solver.step(&self.state.profiles, &coeffs_cb, &geometry, &self.dynamic_params.boundary_conditions, dt, self.config.solver.theta);
            match result {
                Ok(outcome) => break outcome,
                Err(err) if attempt < 3 => {
                    attempt += 1;
                    dt /= 2.0;
                    warn!(attempt, dt, error = %err, "solver step failed, retrying with halved dt");
                }
                Err(err) => return Err(tag_error_time(err, self.state.time.as_f32())),
            }
        };

        self.state.last_metadata = captured_metadata.borrow().clone().into_iter().collect();
        self.state.last_jacobian_conditioning = outcome.jacobian_conditioning;

        let mut profiles = outcome.updated_profiles;

        for mhd_model in self.mhd_models.iter_mut() {
            if let Some(event) = mhd_model.maybe_trigger(&profiles, &geometry, dt) {
                info!(rho_q1 = event.rho_q1, "sawtooth trigger fired");
                profiles = mhd_model.apply(&profiles, &geometry, &event);
                self.state.statistics.record_sawtooth();
            }
        }

        if let Some(enforcer) = &self.conservation_enforcer {
            if enforcer.should_enforce(self.state.step + 1) {
                let (corrected, results) = enforcer.enforce(&profiles, &geometry, self.state.step + 1, self.state.time.as_f32());
                profiles = corrected;
                for result in &results {
                    if result.corrected {
                        self.state.statistics.record_conservation_correction();
                        info!(law = %result.law, drift = result.drift, factor = result.factor, "conservation correction applied");
                    }
                }
                self.state.last_conservation = Some(results);
            }
        }

        self.state.time.advance(dt);
        self.state.step += 1;
        self.state.last_dt = dt;
        self.state.statistics.record_step(outcome.iterations, outcome.residual_norm);
        self.state.profiles = profiles;

        debug!(step = self.state.step, time = self.state.time.as_f32(), dt, "step completed");

        let progress = ProgressInfo {
            current_time: self.state.time.as_f32(),
            total_steps: self.state.step,
            last_dt: dt,
            converged: outcome.converged,
            profiles: None,
            derived: None,
        };
        self.state.last_progress = Some(progress);

        Ok(())
    }

    /// Runs steps until `time >= until`, cancellation, or failure.
    /// `dynamic_params`, if supplied, replaces the parameters used for
    /// every subsequent step (including this call's).
    pub fn run(
        &mut self,
        until: f32,
        dynamic_params: Option<DynamicParameters>,
        progress_cb: &mut dyn FnMut(f32, &ProgressInfo),
        cancel: &CancelToken,
    ) -> CoreResult<SimulationResult> {
        if let Some(params) = dynamic_params {
            params.validate()?;
            self.dynamic_params = params;
        }

        loop {
            self.wait_while_paused();

            if cancel.is_cancelled() {
                info!(step = self.state.step, "run cancelled between steps");
                break;
            }
            if self.state.time.as_f32() >= until {
                break;
            }

            self.step_once()?;

            let reached_end = self.state.time.as_f32() >= until;
            // `run` does not know the eventual final step count in advance
            // (adaptive `dt` makes it a moving target), so the "final step"
            // boundary is handled entirely by `reached_end` here; passing a
            // sentinel that can never equal `step` keeps `should_sample`'s
            // own `step == final_step` check from matching every iteration.
            if self.config.sampling.should_sample(self.state.step, usize::MAX) || reached_end {
                let profiles = if self.config.sampling.sample_profiles || reached_end {
                    Some(self.state.profiles.clone())
                } else {
                    None
                };
                let derived = if self.config.sampling.sample_derived {
                    Some(DerivedQuantities::compute(
                        &self.state.profiles,
                        &self.geometry_provider.geometry_at(self.state.time.as_f32(), &self.state.profiles),
                        &self.state.last_metadata,
                    ))
                } else {
                    None
                };
                let diagnostics = if self.config.sampling.sample_diagnostics {
                    Some(DiagnosticsReport {
                        conservation: self.state.last_conservation.clone().unwrap_or_default(),
                        jacobian_conditioning: self.state.last_jacobian_conditioning,
                    })
                } else {
                    None
                };
                self.state.time_series.push(TimePoint {
                    time: self.state.time.as_f32(),
                    step: self.state.step,
                    profiles,
                    derived,
                    diagnostics,
                });
            }

            if let Some(progress) = self.state.last_progress.clone() {
                let fraction = ((self.state.time.as_f32() - self.config.time.start) / (until - self.config.time.start)).clamp(0.0, 1.0);
                progress_cb(fraction, &progress);
            }

            if reached_end {
                break;
            }
        }

        let time_series = if self.config.sampling.sample_profiles || self.config.sampling.sample_derived {
            Some(self.state.time_series.clone())
        } else {
            None
        };

        Ok(SimulationResult {
            final_profiles: self.state.profiles.clone(),
            statistics: self.state.statistics.clone(),
            time_series,
        })
    }
}
