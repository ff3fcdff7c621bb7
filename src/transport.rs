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

//! Transport coefficients and the `TransportModel` capability trait.
//!
//! Concrete physics closures (neoclassical/turbulent transport) are out of
//! scope for this crate; only the contract and a deterministic stand-in
//! sufficient to drive the integration scenarios are provided here.

use crate::config::DynamicParameters;
use crate::geometry::Geometry;
use crate::profiles::CoreProfiles;

/// Ion/electron heat diffusivity, particle diffusivity, and convection
/// velocity on cells, in m^2/s (m/s for `v`).
#[derive(Clone, Debug, PartialEq)]
pub struct TransportCoefficients {
    pub chi_i: Vec<f32>,
    pub chi_e: Vec<f32>,
    pub d: Vec<f32>,
    pub v: Vec<f32>,
}

impl TransportCoefficients {
    pub fn validate(&self, n_cells: usize) -> Result<(), String> {
        for (name, arr) in [
            ("chi_i", &self.chi_i),
            ("chi_e", &self.chi_e),
            ("d", &self.d),
            ("v", &self.v),
        ] {
            if arr.len() != n_cells {
                return Err(format!(
                    "transport coefficient `{name}` has length {}, expected {n_cells}",
                    arr.len()
                ));
            }
        }
        Ok(())
    }

    /// Largest of `chi_i, chi_e, d` at any cell, used by the adaptive
    /// timestep's CFL estimate (§4.5). `v` does not enter a diffusive CFL
    /// bound.
    pub fn max_diffusivity(&self) -> f32 {
        self.chi_i
            .iter()
            .chain(self.chi_e.iter())
            .chain(self.d.iter())
            .cloned()
            .fold(0.0f32, f32::max)
    }
}

/// Produces transport coefficients from the current profiles, geometry,
/// and dynamic parameters. Implementations must be pure and carry no
/// mutable state (§5).
pub trait TransportModel {
    fn compute_coefficients(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &DynamicParameters,
    ) -> TransportCoefficients;
}

/// Spatially and temporally constant transport coefficients; used to drive
/// the "static equilibrium" and "density drift" end-to-end scenarios.
pub struct ConstantTransportModel {
    pub chi_i: f32,
    pub chi_e: f32,
    pub d: f32,
    pub v: f32,
}

impl ConstantTransportModel {
    pub fn new(chi_i: f32, chi_e: f32, d: f32, v: f32) -> Self {
        Self { chi_i, chi_e, d, v }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

impl TransportModel for ConstantTransportModel {
    fn compute_coefficients(
        &self,
        profiles: &CoreProfiles,
        _geometry: &Geometry,
        _params: &DynamicParameters,
    ) -> TransportCoefficients {
        let n = profiles.n_cells();
        TransportCoefficients {
            chi_i: vec![self.chi_i; n],
            chi_e: vec![self.chi_e; n],
            d: vec![self.d; n],
            v: vec![self.v; n],
        }
    }
}

/// Transport model with density-dependent ion heat diffusivity
/// `chi_i = chi_i0 / (ne / n_ref)`, used to exercise the Newton solver's
/// handling of profile-dependent coefficients (§8 scenario 6).
pub struct InverseDensityTransportModel {
    pub chi_i0: f32,
    pub chi_e: f32,
    pub d: f32,
    pub v: f32,
    pub n_ref: f32,
}

impl TransportModel for InverseDensityTransportModel {
    fn compute_coefficients(
        &self,
        profiles: &CoreProfiles,
        _geometry: &Geometry,
        _params: &DynamicParameters,
    ) -> TransportCoefficients {
        let n = profiles.n_cells();
        let chi_i: Vec<f32> = profiles
            .ne
            .iter()
            .map(|&ne| self.chi_i0 / (ne / self.n_ref).max(1e-6))
            .collect();
        TransportCoefficients {
            chi_i,
            chi_e: vec![self.chi_e; n],
            d: vec![self.d; n],
            v: vec![self.v; n],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_diffusivity_ignores_convection_velocity() {
        let tc = TransportCoefficients {
            chi_i: vec![1.0, 2.0],
            chi_e: vec![0.5, 0.5],
            d: vec![0.1, 0.1],
            v: vec![100.0, 100.0],
        };
        assert_eq!(tc.max_diffusivity(), 2.0);
    }

    #[test]
    fn validate_rejects_mismatched_length() {
        let tc = TransportCoefficients {
            chi_i: vec![1.0, 2.0, 3.0],
            chi_e: vec![1.0, 2.0],
            d: vec![1.0, 2.0],
            v: vec![1.0, 2.0],
        };
        assert!(tc.validate(2).is_err());
    }
}
