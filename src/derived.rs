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

//! Derived scalar diagnostics (SPEC_FULL.md §4.10): pure functions over
//! already-computed profiles, geometry, and source metadata. No hidden
//! state.

use serde::{Deserialize, Serialize};

use crate::geometry::Geometry;
use crate::profiles::CoreProfiles;
use crate::sources::SourceMetadata;

const MU0: f32 = 4.0 * std::f32::consts::PI * 1e-7;
const EV_TO_JOULE: f32 = 1.602_176_6e-19;

/// Volume-averaged `<f> = sum(f_i V_i) / sum(V_i)`.
pub fn volume_average(values: &[f32], geometry: &Geometry) -> f32 {
    let total_volume: f32 = geometry.cell_volume.iter().sum();
    if total_volume.abs() < f32::EPSILON {
        return 0.0;
    }
    let weighted: f32 = values.iter().zip(&geometry.cell_volume).map(|(v, vol)| v * vol).sum();
    weighted / total_volume
}

/// Value at the magnetic axis (the innermost cell).
pub fn central_value(values: &[f32]) -> f32 {
    values[0]
}

/// Stored thermal energy `W = sum(1.5 (Ti+Te) ne V_i)`, in eV (convertible
/// to joules by the caller via `EV_TO_JOULE`).
pub fn stored_thermal_energy_ev(profiles: &CoreProfiles, geometry: &Geometry) -> f32 {
    profiles
        .Ti
        .iter()
        .zip(&profiles.Te)
        .zip(&profiles.ne)
        .zip(&geometry.cell_volume)
        .map(|(((ti, te), ne), v)| 1.5 * (ti + te) * ne * v)
        .sum()
}

pub fn stored_thermal_energy_joules(profiles: &CoreProfiles, geometry: &Geometry) -> f32 {
    stored_thermal_energy_ev(profiles, geometry) * EV_TO_JOULE
}

/// Total heating power (ion + electron) summed across source metadata, in
/// MW.
fn total_heating_power_mw(metadata: &[SourceMetadata]) -> f32 {
    metadata.iter().map(|m| m.ion_power_mw + m.electron_power_mw).sum()
}

fn total_fusion_power_mw(metadata: &[SourceMetadata]) -> f32 {
    metadata
        .iter()
        .filter(|m| matches!(m.category, crate::sources::SourceCategory::Fusion))
        .map(|m| m.alpha_power_mw)
        .sum()
}

/// Energy confinement time proxy `tau_E = W / P_loss`, `P_loss` taken as
/// the summed heating power in the absence of a dedicated loss-power
/// model. Returns `0.0` when there is no heating power (avoids a
/// division by zero rather than propagating a spurious infinity).
pub fn confinement_time_proxy(profiles: &CoreProfiles, geometry: &Geometry, metadata: &[SourceMetadata]) -> f32 {
    let p_loss_mw = total_heating_power_mw(metadata);
    if p_loss_mw.abs() < f32::EPSILON {
        return 0.0;
    }
    let w_joules = stored_thermal_energy_joules(profiles, geometry);
    let p_loss_watts = p_loss_mw * 1e6;
    w_joules / p_loss_watts
}

/// Fusion gain proxy `Q = P_fusion / P_heating`.
pub fn fusion_gain_proxy(metadata: &[SourceMetadata]) -> f32 {
    let heating = total_heating_power_mw(metadata);
    if heating.abs() < f32::EPSILON {
        return 0.0;
    }
    total_fusion_power_mw(metadata) / heating
}

/// Plasma current proxy derived from `psi`'s edge gradient through
/// `g2`/`g3`: `I_p ~ (g3_edge / g2_edge) * dpsi/drho|_edge / mu0`.
fn plasma_current_proxy(profiles: &CoreProfiles, geometry: &Geometry) -> f32 {
    let n = geometry.n_cells();
    if n < 2 {
        return 0.0;
    }
    let dpsi_drho_edge = (profiles.psi[n - 1] - profiles.psi[n - 2]) / geometry.dr;
    let g2_edge = *geometry.g2.last().unwrap_or(&1.0);
    let g3_edge = *geometry.g3.last().unwrap_or(&1.0);
    let ratio = if g2_edge.abs() > f32::EPSILON {
        g3_edge / g2_edge
    } else {
        1.0
    };
    (ratio * dpsi_drho_edge / MU0).abs()
}

/// Normalized beta `beta_N = beta[%] * a[m] * B_tor[T] / I_p[MA]`, with
/// `beta` the volume-averaged plasma pressure over the magnetic pressure.
pub fn normalized_beta(profiles: &CoreProfiles, geometry: &Geometry) -> f32 {
    let pressure_ev_per_m3 = {
        let p: Vec<f32> = profiles
            .Ti
            .iter()
            .zip(&profiles.Te)
            .zip(&profiles.ne)
            .map(|((ti, te), ne)| (ti + te) * ne)
            .collect();
        volume_average(&p, geometry)
    };
    let pressure_pa = pressure_ev_per_m3 * EV_TO_JOULE;
    let magnetic_pressure_pa = geometry.b_tor * geometry.b_tor / (2.0 * MU0);
    if magnetic_pressure_pa.abs() < f32::EPSILON {
        return 0.0;
    }
    let beta_percent = 100.0 * pressure_pa / magnetic_pressure_pa;
    let i_p_ma = plasma_current_proxy(profiles, geometry) / 1e6;
    if i_p_ma.abs() < f32::EPSILON {
        return 0.0;
    }
    beta_percent * geometry.a * geometry.b_tor / i_p_ma
}

/// Bundle of derived quantities computed once per sampled step, suitable
/// for [`crate::sampling::TimePoint::derived`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DerivedQuantities {
    pub ti_central: f32,
    pub te_central: f32,
    pub ne_volume_average: f32,
    pub stored_energy_joules: f32,
    pub confinement_time_proxy: f32,
    pub fusion_gain_proxy: f32,
    pub normalized_beta: f32,
}

impl DerivedQuantities {
    pub fn compute(profiles: &CoreProfiles, geometry: &Geometry, metadata: &[SourceMetadata]) -> Self {
        Self {
            ti_central: central_value(&profiles.Ti),
            te_central: central_value(&profiles.Te),
            ne_volume_average: volume_average(&profiles.ne, geometry),
            stored_energy_joules: stored_thermal_energy_joules(profiles, geometry),
            confinement_time_proxy: confinement_time_proxy(profiles, geometry, metadata),
            fusion_gain_proxy: fusion_gain_proxy(metadata),
            normalized_beta: normalized_beta(profiles, geometry),
        }
    }
}
