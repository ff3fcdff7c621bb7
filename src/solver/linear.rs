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

//! Single implicit theta-scheme step, solved equation-by-equation via the
//! Thomas algorithm, with an optional Pereverzev-Corriveau corrector.

use tracing::trace;

use crate::config::EvolutionFlags;
use crate::coefficients::Block1DCoeffs;
use crate::error::{CoreError, CoreResult};
use crate::geometry::Geometry;
use crate::profiles::{BoundaryCondition, CoreProfiles};

use super::{assemble_equation_system, equation_inputs, thomas_solve, PDESolver, SolverOutcome};

/// Solves the four-equation system one theta-scheme step at a time,
/// equation-independent (cross-variable coupling enters only through the
/// per-cell `source_mat_cell` reaction term, not through off-diagonal
/// blocks -- see SPEC_FULL.md §4.3).
pub struct LinearThetaSolver {
    evolution: EvolutionFlags,
    use_pereverzev_corrector: bool,
    n_corrector_steps: u32,
}

impl LinearThetaSolver {
    pub fn new(evolution: EvolutionFlags, use_pereverzev_corrector: bool, n_corrector_steps: u32) -> Self {
        Self {
            evolution,
            use_pereverzev_corrector,
            n_corrector_steps,
        }
    }

    fn solve_one(&self, evolve: bool, old: &[f32], block: &Block1DCoeffs, bc_index: usize, boundary_conditions: &[BoundaryCondition; 4], dr: f32, dt: f32, theta: f32) -> CoreResult<Vec<f32>> {
        if !evolve {
            return Ok(old.to_vec());
        }
        let inputs = equation_inputs(block, boundary_conditions);
        let input = &inputs[bc_index];
        let (lower, diag, upper, rhs) = assemble_equation_system(old, input.coeffs, dr, dt, theta, input.bc);
        thomas_solve(&lower, &diag, &upper, &rhs).ok_or_else(|| CoreError::NumericInstability {
            time: f32::NAN,
            variable: ["Ti", "Te", "ne", "psi"][bc_index].to_string(),
            value: f32::NAN,
        })
    }

    fn solve_once(
        &self,
        profiles_old: &CoreProfiles,
        coeffs_cb: &dyn Fn(&CoreProfiles, &Geometry) -> Block1DCoeffs,
        geometry: &Geometry,
        boundary_conditions: &[BoundaryCondition; 4],
        dt: f32,
        theta: f32,
        eval_point: &CoreProfiles,
    ) -> CoreResult<CoreProfiles> {
        let block = coeffs_cb(eval_point, geometry);
        block
            .validate(profiles_old.n_cells())
            .map_err(|message| CoreError::ModelInitializationFailed { message })?;
        let dr = geometry.dr;
        let ti = self.solve_one(self.evolution.evolve_ti, &profiles_old.Ti, &block, 0, boundary_conditions, dr, dt, theta)?;
        let te = self.solve_one(self.evolution.evolve_te, &profiles_old.Te, &block, 1, boundary_conditions, dr, dt, theta)?;
        let ne = self.solve_one(self.evolution.evolve_ne, &profiles_old.ne, &block, 2, boundary_conditions, dr, dt, theta)?;
        let psi = self.solve_one(self.evolution.evolve_psi, &profiles_old.psi, &block, 3, boundary_conditions, dr, dt, theta)?;
        Ok(CoreProfiles::new(ti, te, ne, psi))
    }
}

impl PDESolver for LinearThetaSolver {
    fn step(
        &mut self,
        profiles_old: &CoreProfiles,
        coeffs_cb: &dyn Fn(&CoreProfiles, &Geometry) -> Block1DCoeffs,
        geometry: &Geometry,
        boundary_conditions: &[BoundaryCondition; 4],
        dt: f32,
        theta: f32,
    ) -> CoreResult<SolverOutcome> {
        let mut tentative = self.solve_once(profiles_old, coeffs_cb, geometry, boundary_conditions, dt, theta, profiles_old)?;

        if self.use_pereverzev_corrector {
            for step in 0..self.n_corrector_steps {
                trace!(step, "running Pereverzev-Corriveau corrector iteration");
                tentative = self.solve_once(profiles_old, coeffs_cb, geometry, boundary_conditions, dt, theta, &tentative)?;
            }
        }

        if let Some((variable, value)) = tentative.first_non_finite() {
            return Err(CoreError::NumericInstability {
                time: f32::NAN,
                variable: variable.to_string(),
                value,
            });
        }

        Ok(SolverOutcome {
            updated_profiles: tentative,
            residual_norm: 0.0,
            iterations: 1,
            converged: true,
            metadata: None,
            jacobian_conditioning: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coefficients::assemble;
    use crate::profiles::Constraint;
    use crate::sources::SourceTerms;
    use crate::transport::TransportCoefficients;
    use approx::assert_relative_eq;

    fn fixed_bc(value: f32) -> BoundaryCondition {
        BoundaryCondition {
            left: Constraint::Neumann(0.0),
            right: Constraint::Dirichlet(value),
        }
    }

    fn flat_geometry(n: usize) -> Geometry {
        let dr = 1.0 / n as f32;
        Geometry {
            r0: 6.2,
            a: 2.0,
            b_tor: 5.3,
            dr,
            r_cell: (0..n).map(|i| (i as f32 + 0.5) * dr).collect(),
            cell_volume: vec![1.0; n],
            safety_factor: vec![1.0; n],
            radii: (0..n).map(|i| (i as f32 + 0.5) * dr).collect(),
            r_face: (0..=n).map(|i| i as f32 * dr).collect(),
            face_area: vec![1.0; n + 1],
            g0: vec![1.0; n + 1],
            g1: vec![1.0; n + 1],
            g2: vec![1.0; n + 1],
            g3: vec![1.0; n + 1],
        }
    }

    #[test]
    fn zero_transport_and_sources_leave_profiles_unchanged() {
        let n = 10;
        let profiles = CoreProfiles::new(vec![1000.0; n], vec![1000.0; n], vec![1e20; n], vec![0.0; n]);
        let geometry = flat_geometry(n);
        let bc = [fixed_bc(1000.0), fixed_bc(1000.0), fixed_bc(1e20), fixed_bc(0.0)];
        let mut solver = LinearThetaSolver::new(EvolutionFlags::all(), false, 0);
        let cb = |p: &CoreProfiles, _g: &Geometry| {
            let transport = TransportCoefficients {
                chi_i: vec![0.0; n],
                chi_e: vec![0.0; n],
                d: vec![0.0; n],
                v: vec![0.0; n],
            };
            assemble(p, &transport, &SourceTerms::zero(n)).unwrap()
        };
        let outcome = solver.step(&profiles, &cb, &geometry, &bc, 1e-4, 1.0).unwrap();
        assert!(outcome.converged);
        for (a, b) in outcome.updated_profiles.Ti.iter().zip(&profiles.Ti) {
            assert_relative_eq!(a, b, max_relative = 1e-4);
        }
    }

    #[test]
    fn disabled_equation_is_held_fixed() {
        let n = 5;
        let profiles = CoreProfiles::new(vec![500.0; n], vec![500.0; n], vec![1e20; n], vec![0.0; n]);
        let geometry = flat_geometry(n);
        let bc = [fixed_bc(500.0), fixed_bc(500.0), fixed_bc(1e20), fixed_bc(0.0)];
        let mut flags = EvolutionFlags::all();
        flags.evolve_psi = false;
        let mut solver = LinearThetaSolver::new(flags, false, 0);
        let cb = |p: &CoreProfiles, _g: &Geometry| {
            let transport = TransportCoefficients {
                chi_i: vec![1.0; n],
                chi_e: vec![1.0; n],
                d: vec![1.0; n],
                v: vec![0.0; n],
            };
            assemble(p, &transport, &SourceTerms::zero(n)).unwrap()
        };
        let outcome = solver.step(&profiles, &cb, &geometry, &bc, 1e-4, 1.0).unwrap();
        assert_eq!(outcome.updated_profiles.psi, profiles.psi);
    }
}
