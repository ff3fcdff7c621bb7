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

//! Geometric factors on a fixed, equidistant radial mesh.
//!
//! Non-uniform grids are unsupported: every `dr` usage in this crate
//! assumes equidistant cells (see the Open Questions in the design notes).

use crate::config::MeshConfiguration;

/// Immutable per-step geometry: scalar device parameters plus cell- and
/// face-aligned geometric factors.
///
/// `nFaces = nCells + 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    pub r0: f32,
    pub a: f32,
    pub b_tor: f32,
    /// Distance between adjacent cell centers (uniform grid only).
    pub dr: f32,

    pub r_cell: Vec<f32>,
    pub cell_volume: Vec<f32>,
    pub safety_factor: Vec<f32>,
    /// Normalized radial coordinate `rho` at cell centers.
    pub radii: Vec<f32>,

    pub r_face: Vec<f32>,
    pub face_area: Vec<f32>,
    pub g0: Vec<f32>,
    pub g1: Vec<f32>,
    pub g2: Vec<f32>,
    pub g3: Vec<f32>,
}

impl Geometry {
    pub fn n_cells(&self) -> usize {
        self.r_cell.len()
    }

    pub fn n_faces(&self) -> usize {
        self.r_face.len()
    }

    /// Structural shape invariants described in §3.
    pub fn validate_shape(&self) -> Result<(), String> {
        let n = self.n_cells();
        let nf = n + 1;
        let checks: &[(&str, usize, usize)] = &[
            ("cell_volume", self.cell_volume.len(), n),
            ("safety_factor", self.safety_factor.len(), n),
            ("radii", self.radii.len(), n),
            ("r_face", self.r_face.len(), nf),
            ("face_area", self.face_area.len(), nf),
            ("g0", self.g0.len(), nf),
            ("g1", self.g1.len(), nf),
            ("g2", self.g2.len(), nf),
            ("g3", self.g3.len(), nf),
        ];
        for (name, got, expected) in checks {
            if got != expected {
                return Err(format!(
                    "geometry field `{name}` has length {got}, expected {expected}"
                ));
            }
        }
        Ok(())
    }

    /// `q(0)`: the safety factor at the magnetic axis.
    pub fn q_axis(&self) -> f32 {
        self.safety_factor[0]
    }
}

/// Produces a fresh [`Geometry`] at each simulated time; allows the
/// geometry to evolve (e.g. through an evolving `psi` feeding back into
/// the safety factor) without the orchestrator needing to know how.
pub trait GeometryProvider {
    fn geometry_at(&self, time: f32, profiles: &crate::profiles::CoreProfiles) -> Geometry;
}

/// Simplified circular, large-aspect-ratio limiter geometry: cell volumes
/// grow linearly with minor radius, face areas follow the cylindrical
/// limit, and the safety factor is read off from `psi`'s radial gradient
/// via `q = (r * B_tor) / (R0 * dpsi/dr)` (cylindrical safe-factor
/// approximation), floored away from zero to avoid division blowups on a
/// flat `psi`.
pub struct CircularGeometryProvider {
    mesh: MeshConfiguration,
}

impl CircularGeometryProvider {
    pub fn new(mesh: MeshConfiguration) -> Self {
        Self { mesh }
    }

    fn base_geometry(&self) -> Geometry {
        let n = self.mesh.n_cells;
        let dr = 1.0 / n as f32;
        let r_cell: Vec<f32> = (0..n).map(|i| (i as f32 + 0.5) * dr).collect();
        let r_face: Vec<f32> = (0..=n).map(|i| i as f32 * dr).collect();
        let cell_volume: Vec<f32> = r_cell
            .iter()
            .map(|&rho| 2.0 * std::f32::consts::PI * rho * self.mesh.a * dr * self.mesh.a)
            .collect();
        let face_area: Vec<f32> = r_face
            .iter()
            .map(|&rho| 2.0 * std::f32::consts::PI * (rho * self.mesh.a).max(1e-6) * self.mesh.a)
            .collect();
        // Cylindrical metric factors: g0 is the face area itself, g1 the
        // same area (flux-surface average of |grad rho|^2 reduces to it in
        // the cylindrical limit), g2/g3 carry an extra factor of rho that
        // the current/flux diagnostics use.
        let g0 = face_area.clone();
        let g1 = face_area.clone();
        let g2: Vec<f32> = r_face.iter().zip(&face_area).map(|(&rho, &a)| rho * a).collect();
        let g3: Vec<f32> = g2.clone();
        Geometry {
            r0: self.mesh.r0,
            a: self.mesh.a,
            b_tor: self.mesh.b_tor,
            dr,
            radii: r_cell.clone(),
            r_cell,
            cell_volume,
            safety_factor: vec![1.0; n],
            r_face,
            face_area,
            g0,
            g1,
            g2,
            g3,
        }
    }

    /// Safety factor from a `psi` profile: `q(rho) = rho * B_tor * a / (R0 * dpsi/drho)`,
    /// central differenced on cells and floored at `rho=0` (the magnetic
    /// axis) using a one-sided estimate.
    fn safety_factor_from_psi(&self, geometry: &mut Geometry, psi: &[f32]) {
        let n = geometry.n_cells();
        let dr = geometry.dr;
        let mut q = vec![0.0f32; n];
        for i in 0..n {
            let dpsi_drho = if i == 0 {
                (psi[1] - psi[0]) / dr
            } else if i == n - 1 {
                (psi[i] - psi[i - 1]) / dr
            } else {
                (psi[i + 1] - psi[i - 1]) / (2.0 * dr)
            };
            let denom = (geometry.r0 * dpsi_drho).abs().max(1e-8);
            let rho = geometry.radii[i].max(1e-6);
            q[i] = rho * geometry.b_tor * geometry.a / denom;
        }
        geometry.safety_factor = q;
    }
}

impl GeometryProvider for CircularGeometryProvider {
    fn geometry_at(&self, _time: f32, profiles: &crate::profiles::CoreProfiles) -> Geometry {
        let mut geometry = self.base_geometry();
        self.safety_factor_from_psi(&mut geometry, &profiles.psi);
        geometry
    }
}

/// Linear interpolation of `rho` at the innermost `q=1` surface given
/// cell-centered `q` and `rho` arrays; returns `None` if no such surface
/// exists (`q(0) >= 1` or `q` never crosses 1).
pub fn find_q1_surface(q: &[f32], radii: &[f32]) -> Option<(f32, usize)> {
    if q.is_empty() || q[0] >= 1.0 {
        return None;
    }
    for i in 0..q.len() - 1 {
        if q[i] < 1.0 && q[i + 1] >= 1.0 {
            let frac = (1.0 - q[i]) / (q[i + 1] - q[i]);
            let rho_q1 = radii[i] + frac * (radii[i + 1] - radii[i]);
            return Some((rho_q1, i));
        }
    }
    None
}

/// Magnetic shear `s = (r/q) dq/dr` evaluated at cell `i` via a central
/// difference (one-sided at the boundaries).
pub fn magnetic_shear(q: &[f32], radii: &[f32], i: usize) -> f32 {
    let n = q.len();
    let dq_dr = if i == 0 {
        (q[1] - q[0]) / (radii[1] - radii[0])
    } else if i == n - 1 {
        (q[i] - q[i - 1]) / (radii[i] - radii[i - 1])
    } else {
        (q[i + 1] - q[i - 1]) / (radii[i + 1] - radii[i - 1])
    };
    (radii[i] / q[i].max(1e-6)) * dq_dr
}
