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

//! Turns transport coefficients, source terms, geometry, and profiles
//! into the per-equation coefficients the PDE solvers consume.

use crate::cell_variable::CellVariable;
use crate::geometry::Geometry;
use crate::profiles::{BoundaryCondition, Constraint, CoreProfiles, N_MIN};
use crate::sources::SourceTerms;
use crate::transport::TransportCoefficients;

/// 1 MW/m^3 expressed in eV/(m^3 s): `1 / e` with `e` in Coulombs, i.e.
/// `1e6 / 1.602176634e-19` (§4.2, point 5).
pub const MW_PER_M3_TO_EV_PER_M3_S: f32 = 6.241_509e24;

/// Geometric factors shared by all four equations, carried alongside each
/// [`Block1DCoeffs`] so the solver does not need a separate `Geometry`
/// reference.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometricFactors {
    pub cell_volume: Vec<f32>,
    pub face_area: Vec<f32>,
    pub cell_distances: Vec<f32>,
}

impl GeometricFactors {
    pub fn from_geometry(geometry: &Geometry) -> Self {
        let n = geometry.n_cells();
        let cell_distances = vec![geometry.dr; n.saturating_sub(1)];
        Self {
            cell_volume: geometry.cell_volume.clone(),
            face_area: geometry.face_area.clone(),
            cell_distances,
        }
    }

    pub fn validate(&self, n_cells: usize) -> Result<(), String> {
        if self.cell_volume.len() != n_cells {
            return Err(format!(
                "cell_volume has length {}, expected {n_cells}",
                self.cell_volume.len()
            ));
        }
        if self.face_area.len() != n_cells + 1 {
            return Err(format!(
                "face_area has length {}, expected {}",
                self.face_area.len(),
                n_cells + 1
            ));
        }
        if self.cell_distances.len() != n_cells.saturating_sub(1) {
            return Err(format!(
                "cell_distances has length {}, expected {}",
                self.cell_distances.len(),
                n_cells.saturating_sub(1)
            ));
        }
        Ok(())
    }
}

/// Per-equation coefficients for the implicit finite-volume operator
/// (§3, §4.3).
#[derive(Clone, Debug, PartialEq)]
pub struct EquationCoeffs {
    pub transient_in_cell: Vec<f32>,
    pub transient_out_cell: Vec<f32>,
    pub d_face: Vec<f32>,
    pub v_face: Vec<f32>,
    pub source_mat_cell: Vec<f32>,
    pub source_cell: Vec<f32>,
}

impl EquationCoeffs {
    pub fn validate(&self, n_cells: usize) -> Result<(), String> {
        let n_faces = n_cells + 1;
        let checks: &[(&str, usize, usize)] = &[
            ("transient_in_cell", self.transient_in_cell.len(), n_cells),
            ("transient_out_cell", self.transient_out_cell.len(), n_cells),
            ("d_face", self.d_face.len(), n_faces),
            ("v_face", self.v_face.len(), n_faces),
            ("source_mat_cell", self.source_mat_cell.len(), n_cells),
            ("source_cell", self.source_cell.len(), n_cells),
        ];
        for (name, got, expected) in checks {
            if got != expected {
                return Err(format!(
                    "EquationCoeffs field `{name}` has length {got}, expected {expected}"
                ));
            }
        }
        Ok(())
    }
}

/// Coefficients for all four equations plus the geometric factors they
/// share.
#[derive(Clone, Debug, PartialEq)]
pub struct Block1DCoeffs {
    pub ti: EquationCoeffs,
    pub te: EquationCoeffs,
    pub ne: EquationCoeffs,
    pub psi: EquationCoeffs,
    pub geometric_factors: GeometricFactors,
}

impl Block1DCoeffs {
    pub fn validate(&self, n_cells: usize) -> Result<(), String> {
        self.ti.validate(n_cells)?;
        self.te.validate(n_cells)?;
        self.ne.validate(n_cells)?;
        self.psi.validate(n_cells)?;
        self.geometric_factors.validate(n_cells)?;
        Ok(())
    }
}

/// Harmonic mean of two adjacent-cell diffusivities, safe under the
/// density floor and avoiding overflow at realistic densities (§4.2,
/// point 2). Returns 0 when both inputs are 0 (no diffusion there).
fn harmonic_mean(a: f32, b: f32) -> f32 {
    if a <= 0.0 || b <= 0.0 {
        return 0.0;
    }
    2.0 * a * b / (a + b)
}

/// Interior-face harmonic mean of a cell array, with boundary faces
/// copying the adjacent cell value (no "outside" neighbor to average
/// with).
fn face_harmonic_mean(cells: &[f32]) -> Vec<f32> {
    let n = cells.len();
    let mut faces = vec![0.0f32; n + 1];
    faces[0] = cells[0];
    faces[n] = cells[n - 1];
    for i in 1..n {
        faces[i] = harmonic_mean(cells[i - 1], cells[i]);
    }
    faces
}

/// Simple face average (used for convection velocity, which is not
/// floor-sensitive the way diffusivities are).
fn face_average(cells: &[f32]) -> Vec<f32> {
    let n = cells.len();
    let mut faces = vec![0.0f32; n + 1];
    faces[0] = cells[0];
    faces[n] = cells[n - 1];
    for i in 1..n {
        faces[i] = (cells[i - 1] + cells[i]) / 2.0;
    }
    faces
}

/// `g1_face / g0_face` geometric weight applied to face diffusivity and
/// convection (§4.2, point 3).
fn geometric_weight(geometry: &Geometry) -> Vec<f32> {
    geometry
        .g1
        .iter()
        .zip(&geometry.g0)
        .map(|(&g1, &g0)| if g0.abs() > 1e-30 { g1 / g0 } else { 0.0 })
        .collect()
}

/// Assembles [`Block1DCoeffs`] from transport coefficients, source terms,
/// geometry, and the profiles being solved. Pure: no hidden globals,
/// deterministic given its inputs (§4.2).
pub fn assemble(
    profiles: &CoreProfiles,
    transport: &TransportCoefficients,
    sources: &SourceTerms,
) -> Result<Block1DCoeffs, String> {
    assemble_with_geometry(profiles, transport, sources, &placeholder_geometry(profiles.n_cells()))
}

/// Full entry point taking an explicit geometry (the placeholder variant
/// above exists only for call sites that do not yet have one, e.g. very
/// early unit tests; production call sites always go through this one).
pub fn assemble_with_geometry(
    profiles: &CoreProfiles,
    transport: &TransportCoefficients,
    sources: &SourceTerms,
    geometry: &Geometry,
) -> Result<Block1DCoeffs, String> {
    let n = profiles.n_cells();
    transport.validate(n)?;
    sources.validate(n)?;
    geometry.validate_shape()?;

    let ne_floored: Vec<f32> = profiles.ne.iter().map(|&x| x.max(N_MIN)).collect();
    let weight = geometric_weight(geometry);

    let chi_i_face = face_harmonic_mean(&transport.chi_i);
    let chi_e_face = face_harmonic_mean(&transport.chi_e);
    let d_face_raw = face_harmonic_mean(&transport.d);
    let v_face_raw = face_average(&transport.v);

    let d_face_ti: Vec<f32> = chi_i_face.iter().zip(&weight).map(|(&d, &w)| d * w).collect();
    let d_face_te: Vec<f32> = chi_e_face.iter().zip(&weight).map(|(&d, &w)| d * w).collect();
    let d_face_ne: Vec<f32> = d_face_raw.iter().zip(&weight).map(|(&d, &w)| d * w).collect();
    let v_face: Vec<f32> = v_face_raw.iter().zip(&weight).map(|(&v, &w)| v * w).collect();
    let zero_v = vec![0.0f32; n + 1];

    let ion_heating_ev: Vec<f32> = sources
        .ion_heating
        .iter()
        .map(|&q| q * MW_PER_M3_TO_EV_PER_M3_S)
        .collect();
    let electron_heating_ev: Vec<f32> = sources
        .electron_heating
        .iter()
        .map(|&q| q * MW_PER_M3_TO_EV_PER_M3_S)
        .collect();

    let ti = EquationCoeffs {
        transient_in_cell: ne_floored.clone(),
        transient_out_cell: ne_floored.clone(),
        d_face: d_face_ti,
        v_face: zero_v.clone(),
        source_mat_cell: vec![0.0; n],
        source_cell: ion_heating_ev,
    };
    let te = EquationCoeffs {
        transient_in_cell: ne_floored.clone(),
        transient_out_cell: ne_floored.clone(),
        d_face: d_face_te,
        v_face: zero_v.clone(),
        source_mat_cell: vec![0.0; n],
        source_cell: electron_heating_ev,
    };
    let ne = EquationCoeffs {
        transient_in_cell: vec![1.0; n],
        transient_out_cell: vec![1.0; n],
        d_face: d_face_ne,
        v_face,
        source_mat_cell: vec![0.0; n],
        source_cell: sources.particle_source.clone(),
    };
    let psi = EquationCoeffs {
        transient_in_cell: vec![1.0; n],
        transient_out_cell: vec![1.0; n],
        d_face: vec![0.0; n + 1],
        v_face: zero_v,
        source_mat_cell: vec![0.0; n],
        source_cell: sources.current_source.clone(),
    };

    let block = Block1DCoeffs {
        ti,
        te,
        ne,
        psi,
        geometric_factors: GeometricFactors::from_geometry(geometry),
    };
    block.validate(n)?;
    Ok(block)
}

/// Builds the four [`CellVariable`]s the solvers operate on from the
/// current profiles and boundary conditions.
pub fn profiles_to_cell_variables(
    profiles: &CoreProfiles,
    dr: f32,
    boundary_conditions: &[BoundaryCondition; 4],
) -> [CellVariable; 4] {
    let ti = CellVariable::new(
        profiles.Ti.clone(),
        dr,
        boundary_conditions[0].left,
        boundary_conditions[0].right,
    );
    let te = CellVariable::new(
        profiles.Te.clone(),
        dr,
        boundary_conditions[1].left,
        boundary_conditions[1].right,
    );
    let ne = CellVariable::new(
        profiles.ne.clone(),
        dr,
        boundary_conditions[2].left,
        boundary_conditions[2].right,
    );
    let psi = CellVariable::new(
        profiles.psi.clone(),
        dr,
        boundary_conditions[3].left,
        boundary_conditions[3].right,
    );
    [ti, te, ne, psi]
}

/// A trivial single-cell-volume geometry used only when a caller has not
/// yet constructed a real [`Geometry`] (kept minimal deliberately; all
/// production call sites go through [`assemble_with_geometry`]).
fn placeholder_geometry(n_cells: usize) -> Geometry {
    Geometry {
        r0: 1.0,
        a: 1.0,
        b_tor: 1.0,
        dr: 1.0 / n_cells as f32,
        r_cell: vec![0.0; n_cells],
        cell_volume: vec![1.0; n_cells],
        safety_factor: vec![1.0; n_cells],
        radii: vec![0.0; n_cells],
        r_face: vec![0.0; n_cells + 1],
        face_area: vec![1.0; n_cells + 1],
        g0: vec![1.0; n_cells + 1],
        g1: vec![1.0; n_cells + 1],
        g2: vec![1.0; n_cells + 1],
        g3: vec![1.0; n_cells + 1],
    }
}
