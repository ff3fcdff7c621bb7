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

//! The four-profile plasma state and its boundary conditions.

use serde::{Deserialize, Serialize};

/// Density floor used throughout coefficient assembly and validity checks.
pub const N_MIN: f32 = 1e18;

/// Ion temperature, electron temperature, electron density and poloidal
/// flux on a common radial cell grid.
///
/// Invariant: all four arrays share `n_cells()`; `Ti, Te > 0`; `ne > 0`;
/// every value is finite.
#[allow(non_snake_case)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoreProfiles {
    pub Ti: Vec<f32>,
    pub Te: Vec<f32>,
    pub ne: Vec<f32>,
    pub psi: Vec<f32>,
}

#[allow(non_snake_case)]
impl CoreProfiles {
    pub fn new(Ti: Vec<f32>, Te: Vec<f32>, ne: Vec<f32>, psi: Vec<f32>) -> Self {
        let n = Ti.len();
        assert_eq!(Te.len(), n, "Te must have the same length as Ti");
        assert_eq!(ne.len(), n, "ne must have the same length as Ti");
        assert_eq!(psi.len(), n, "psi must have the same length as Ti");
        Self { Ti, Te, ne, psi }
    }

    pub fn n_cells(&self) -> usize {
        self.Ti.len()
    }

    /// Whether the profile set is physically valid: positive temperatures
    /// and density, all values finite. Used by the conservation enforcer
    /// (§4.7, point 4) to decide whether it is safe to touch the state at
    /// all.
    pub fn is_valid(&self) -> bool {
        let all_finite = |v: &[f32]| v.iter().all(|x| x.is_finite());
        all_finite(&self.Ti)
            && all_finite(&self.Te)
            && all_finite(&self.ne)
            && all_finite(&self.psi)
            && self.Ti.iter().all(|&t| t > 0.0)
            && self.Te.iter().all(|&t| t > 0.0)
            && self.ne.iter().all(|&n| n > 0.0)
    }

    /// Which single non-finite value (if any) would be reported by
    /// [`crate::error::CoreError::NumericInstability`].
    pub fn first_non_finite(&self) -> Option<(&'static str, f32)> {
        for (name, arr) in [
            ("Ti", &self.Ti),
            ("Te", &self.Te),
            ("ne", &self.ne),
            ("psi", &self.psi),
        ] {
            if let Some(&v) = arr.iter().find(|v| !v.is_finite()) {
                return Some((name, v));
            }
        }
        None
    }

    /// Flatten into the solver's `[Ti | Te | ne | psi]` equation-major
    /// layout.
    pub fn to_flat(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(4 * self.n_cells());
        flat.extend_from_slice(&self.Ti);
        flat.extend_from_slice(&self.Te);
        flat.extend_from_slice(&self.ne);
        flat.extend_from_slice(&self.psi);
        flat
    }

    /// Inverse of [`CoreProfiles::to_flat`].
    pub fn from_flat(flat: &[f32], n_cells: usize) -> Self {
        assert_eq!(flat.len(), 4 * n_cells, "flat state has the wrong length");
        let (ti, rest) = flat.split_at(n_cells);
        let (te, rest) = rest.split_at(n_cells);
        let (ne, psi) = rest.split_at(n_cells);
        Self::new(ti.to_vec(), te.to_vec(), ne.to_vec(), psi.to_vec())
    }
}

/// Lossless flat-array representation of [`CoreProfiles`] for external
/// (de)serialization; arrays are exactly `n_cells` long (§6).
#[allow(non_snake_case)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializableProfiles {
    pub n_cells: usize,
    pub Ti: Vec<f32>,
    pub Te: Vec<f32>,
    pub ne: Vec<f32>,
    pub psi: Vec<f32>,
}

impl From<&CoreProfiles> for SerializableProfiles {
    fn from(p: &CoreProfiles) -> Self {
        Self {
            n_cells: p.n_cells(),
            Ti: p.Ti.clone(),
            Te: p.Te.clone(),
            ne: p.ne.clone(),
            psi: p.psi.clone(),
        }
    }
}

impl From<SerializableProfiles> for CoreProfiles {
    fn from(s: SerializableProfiles) -> Self {
        CoreProfiles::new(s.Ti, s.Te, s.ne, s.psi)
    }
}

/// A single face's boundary constraint: exactly one of a Dirichlet value
/// or a Neumann gradient.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    Dirichlet(f32),
    Neumann(f32),
}

impl Constraint {
    pub fn is_finite(&self) -> bool {
        match self {
            Constraint::Dirichlet(v) | Constraint::Neumann(v) => v.is_finite(),
        }
    }
}

/// Left/right face constraints for one evolved variable.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundaryCondition {
    pub left: Constraint,
    pub right: Constraint,
}

impl BoundaryCondition {
    pub fn validate(&self) -> Result<(), String> {
        if !self.left.is_finite() || !self.right.is_finite() {
            return Err("boundary condition values must be finite".into());
        }
        if let Constraint::Dirichlet(v) = self.left {
            if !v.is_finite() {
                return Err("left Dirichlet value must be finite".into());
            }
        }
        if let Constraint::Dirichlet(v) = self.right {
            if !v.is_finite() {
                return Err("right Dirichlet value must be finite".into());
            }
        }
        Ok(())
    }
}
