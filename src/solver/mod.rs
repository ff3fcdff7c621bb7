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

//! Implicit PDE solvers: the `PDESolver` capability trait and its two
//! bundled implementations, [`linear::LinearThetaSolver`] and
//! [`newton::NewtonSolver`].

pub mod linear;
pub mod newton;

pub use linear::LinearThetaSolver;
pub use newton::{JacobianConditioning, NewtonSolver};

use serde::{Deserialize, Serialize};

use crate::cell_variable::CellVariable;
use crate::coefficients::{Block1DCoeffs, EquationCoeffs};
use crate::error::CoreResult;
use crate::geometry::Geometry;
use crate::profiles::{BoundaryCondition, Constraint, CoreProfiles};

/// What one solver step produced. Referred to as `SolverResult` in the
/// contract prose; named `SolverOutcome` here to avoid colliding with
/// [`crate::error::CoreResult`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverOutcome {
    pub updated_profiles: CoreProfiles,
    pub residual_norm: f32,
    pub iterations: u32,
    pub converged: bool,
    pub metadata: Option<String>,
    /// Set by [`NewtonSolver`] from the last dense Jacobian it factored;
    /// `None` for [`LinearThetaSolver`], which never forms one.
    pub jacobian_conditioning: Option<JacobianConditioning>,
}

/// One implicit step of the coupled four-equation system. `coeffs_cb` is
/// invoked by the solver (possibly more than once, for Newton iterations
/// or a Pereverzev-Corriveau corrector) so the coefficients can depend on
/// the tentative updated profiles.
pub trait PDESolver {
    fn step(
        &mut self,
        profiles_old: &CoreProfiles,
        coeffs_cb: &dyn Fn(&CoreProfiles, &Geometry) -> Block1DCoeffs,
        geometry: &Geometry,
        boundary_conditions: &[BoundaryCondition; 4],
        dt: f32,
        theta: f32,
    ) -> CoreResult<SolverOutcome>;
}

/// Solves `lower[i]*x[i-1] + diag[i]*x[i] + upper[i]*x[i+1] = rhs[i]` via
/// the Thomas algorithm. `lower[0]` and `upper[n-1]` are ignored. Returns
/// `None` if a zero pivot is encountered.
pub(crate) fn thomas_solve(lower: &[f32], diag: &[f32], upper: &[f32], rhs: &[f32]) -> Option<Vec<f32>> {
    let n = diag.len();
    if n == 0 {
        return Some(Vec::new());
    }
    let mut c_prime = vec![0.0f32; n];
    let mut d_prime = vec![0.0f32; n];
    if diag[0].abs() < 1e-30 {
        return None;
    }
    c_prime[0] = upper[0] / diag[0];
    d_prime[0] = rhs[0] / diag[0];
    for i in 1..n {
        let denom = diag[i] - lower[i] * c_prime[i - 1];
        if denom.abs() < 1e-30 {
            return None;
        }
        c_prime[i] = upper.get(i).copied().unwrap_or(0.0) / denom;
        d_prime[i] = (rhs[i] - lower[i] * d_prime[i - 1]) / denom;
    }
    let mut x = vec![0.0f32; n];
    x[n - 1] = d_prime[n - 1];
    for i in (0..n - 1).rev() {
        x[i] = d_prime[i] - c_prime[i] * x[i + 1];
    }
    Some(x)
}

/// Builds the tridiagonal system for one equation's implicit theta-scheme
/// step, per SPEC_FULL.md §4.3: transient + theta-weighted implicit
/// diffusion (central difference) and convection (upwind), with the
/// explicit (time *t*) part folded into the right-hand side. Boundary
/// cells incorporate the declared constraint directly rather than
/// referencing a ghost cell.
pub(crate) fn assemble_equation_system(
    old_values: &[f32],
    coeffs: &EquationCoeffs,
    dr: f32,
    dt: f32,
    theta: f32,
    bc: &BoundaryCondition,
) -> (Vec<f32>, Vec<f32>, Vec<f32>, Vec<f32>) {
    let n = old_values.len();
    let mut lower = vec![0.0f32; n];
    let mut diag = vec![0.0f32; n];
    let mut upper = vec![0.0f32; n];
    let mut rhs = vec![0.0f32; n];

    let cell_var_old = CellVariable::new(old_values.to_vec(), dr, bc.left, bc.right);
    let face_grad_old = cell_var_old.face_gradients();
    let face_val_old = cell_var_old.face_values();

    for i in 0..n {
        let d_left = coeffs.d_face[i];
        let d_right = coeffs.d_face[i + 1];
        let v_left = coeffs.v_face[i];
        let v_right = coeffs.v_face[i + 1];
        let src_mat = coeffs.source_mat_cell[i];

        let diff_old = (d_right * face_grad_old[i + 1] - d_left * face_grad_old[i]) / dr;
        let conv_old = (v_right * face_val_old[i + 1] - v_left * face_val_old[i]) / dr;
        rhs[i] = coeffs.transient_in_cell[i] * old_values[i] / dt
            + (1.0 - theta) * (diff_old - conv_old)
            + (1.0 - theta) * src_mat * old_values[i]
            + coeffs.source_cell[i];

        diag[i] += coeffs.transient_out_cell[i] / dt - theta * src_mat;

        // Implicit diffusion (central difference), boundary cells use the
        // half-cell distance to the declared face constraint.
        if i > 0 {
            let coeff = theta * d_left / (dr * dr);
            diag[i] += coeff;
            lower[i] += -coeff;
        } else if let Constraint::Dirichlet(v) = bc.left {
            let coeff = theta * d_left * 2.0 / (dr * dr);
            diag[i] += coeff;
            rhs[i] += coeff * v;
        }
        if i < n - 1 {
            let coeff = theta * d_right / (dr * dr);
            diag[i] += coeff;
            upper[i] += -coeff;
        } else if let Constraint::Dirichlet(v) = bc.right {
            let coeff = theta * d_right * 2.0 / (dr * dr);
            diag[i] += coeff;
            rhs[i] += coeff * v;
        }

        // Implicit convection (first-order upwind), interior faces only;
        // boundary convective flux is carried entirely by the explicit part.
        if i < n - 1 {
            if v_right >= 0.0 {
                diag[i] += theta * v_right / dr;
            } else {
                upper[i] += theta * v_right / dr;
            }
        }
        if i > 0 {
            if v_left >= 0.0 {
                lower[i] += -theta * v_left / dr;
            } else {
                diag[i] += -theta * v_left / dr;
            }
        }
    }

    (lower, diag, upper, rhs)
}

/// The residual `A(x)*x - b(x)` of the assembled tridiagonal system,
/// evaluated at `x` itself (not solved for), used by the Newton solver.
pub(crate) fn tridiagonal_residual(lower: &[f32], diag: &[f32], upper: &[f32], rhs: &[f32], x: &[f32]) -> Vec<f32> {
    let n = x.len();
    let mut residual = vec![0.0f32; n];
    for i in 0..n {
        let mut row = diag[i] * x[i];
        if i > 0 {
            row += lower[i] * x[i - 1];
        }
        if i < n - 1 {
            row += upper[i] * x[i + 1];
        }
        residual[i] = row - rhs[i];
    }
    residual
}

/// Per-equation coefficients and boundary condition bundled together so
/// call sites do not need to pick the right slice out of `Block1DCoeffs`
/// and `[BoundaryCondition; 4]` by hand.
pub(crate) struct EquationInputs<'a> {
    pub coeffs: &'a EquationCoeffs,
    pub bc: &'a BoundaryCondition,
}

pub(crate) fn equation_inputs<'a>(
    block: &'a Block1DCoeffs,
    boundary_conditions: &'a [BoundaryCondition; 4],
) -> [EquationInputs<'a>; 4] {
    [
        EquationInputs {
            coeffs: &block.ti,
            bc: &boundary_conditions[0],
        },
        EquationInputs {
            coeffs: &block.te,
            bc: &boundary_conditions[1],
        },
        EquationInputs {
            coeffs: &block.ne,
            bc: &boundary_conditions[2],
        },
        EquationInputs {
            coeffs: &block.psi,
            bc: &boundary_conditions[3],
        },
    ]
}
