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

//! Sawtooth trigger (Porcelli-style) and Kadomtsev-style redistribution
//! (SPEC_FULL.md §4.8).

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::SawtoothParameters;
use crate::geometry::{find_q1_surface, magnetic_shear, Geometry};
use crate::profiles::CoreProfiles;

/// A detected sawtooth trigger: the `q=1` surface location and the mixing
/// radius redistribution will extend to.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SawtoothEvent {
    pub rho_q1: f32,
    pub rho_mix: f32,
    pub trigger_index: usize,
}

/// Detects a sawtooth trigger and, once detected, redistributes profiles.
pub trait MHDModel {
    fn maybe_trigger(&mut self, profiles: &CoreProfiles, geometry: &Geometry, dt: f32) -> Option<SawtoothEvent>;
    fn apply(&self, profiles: &CoreProfiles, geometry: &Geometry, event: &SawtoothEvent) -> CoreProfiles;
}

/// Linear interpolation of `values` (aligned with `radii`) at an
/// arbitrary `rho`; clamps to the nearest endpoint outside the grid.
fn interpolate_at(values: &[f32], radii: &[f32], rho: f32) -> f32 {
    let n = radii.len();
    if rho <= radii[0] {
        return values[0];
    }
    if rho >= radii[n - 1] {
        return values[n - 1];
    }
    for i in 0..n - 1 {
        if radii[i] <= rho && rho <= radii[i + 1] {
            let frac = (rho - radii[i]) / (radii[i + 1] - radii[i]);
            return values[i] + frac * (values[i + 1] - values[i]);
        }
    }
    values[n - 1]
}

/// Flattens `values` toward `flattening_factor * value(rho_q1)` for
/// `rho <= rho_q1`, linearly ramping back to the original profile over
/// `(rho_q1, rho_mix]`, unchanged beyond `rho_mix`.
fn flatten(values: &[f32], radii: &[f32], rho_q1: f32, rho_mix: f32, flattening_factor: f32) -> Vec<f32> {
    let target = flattening_factor * interpolate_at(values, radii, rho_q1);
    values
        .iter()
        .zip(radii)
        .map(|(&v, &rho)| {
            if rho <= rho_q1 {
                target
            } else if rho <= rho_mix {
                let span = (rho_mix - rho_q1).max(1e-6);
                let frac = (rho - rho_q1) / span;
                target * (1.0 - frac) + v * frac
            } else {
                v
            }
        })
        .collect()
}

/// Rescales `values` on `[0, rho_mix]` so that `sum(values * weight * V)`
/// over that region matches `target_integral`; cells outside the region
/// are untouched.
fn rescale_within_region(values: &[f32], weight: &[f32], cell_volume: &[f32], radii: &[f32], rho_mix: f32, target_integral: f32) -> Vec<f32> {
    let current_integral: f32 = values
        .iter()
        .zip(weight)
        .zip(cell_volume)
        .zip(radii)
        .filter(|(((_, _), _), &rho)| rho <= rho_mix)
        .map(|(((v, w), vol), _)| v * w * vol)
        .sum();
    let factor = if current_integral.abs() > f32::EPSILON {
        target_integral / current_integral
    } else {
        1.0
    };
    values
        .iter()
        .zip(radii)
        .map(|(&v, &rho)| if rho <= rho_mix { v * factor } else { v })
        .collect()
}

fn region_integral(values: &[f32], weight: &[f32], cell_volume: &[f32], radii: &[f32], rho_mix: f32) -> f32 {
    values
        .iter()
        .zip(weight)
        .zip(cell_volume)
        .zip(radii)
        .filter(|(((_, _), _), &rho)| rho <= rho_mix)
        .map(|(((v, w), vol), _)| v * w * vol)
        .sum()
}

/// Bundled sawtooth implementation: Porcelli-style trigger plus a
/// Kadomtsev-style flatten-and-rescale redistribution.
pub struct SawtoothModel {
    params: SawtoothParameters,
}

impl SawtoothModel {
    pub fn new(params: SawtoothParameters) -> Self {
        Self { params }
    }
}

impl MHDModel for SawtoothModel {
    fn maybe_trigger(&mut self, _profiles: &CoreProfiles, geometry: &Geometry, dt: f32) -> Option<SawtoothEvent> {
        if dt < self.params.min_crash_interval {
            return None;
        }
        if geometry.q_axis() >= 1.0 {
            return None;
        }
        let (rho_q1, trigger_index) = find_q1_surface(&geometry.safety_factor, &geometry.radii)?;
        if rho_q1 <= self.params.rho_min {
            return None;
        }
        let s_q1 = magnetic_shear(&geometry.safety_factor, &geometry.radii, trigger_index);
        if s_q1 <= self.params.s_crit {
            return None;
        }
        Some(SawtoothEvent {
            rho_q1,
            rho_mix: self.params.mixing_multiplier * rho_q1,
            trigger_index,
        })
    }

    fn apply(&self, profiles: &CoreProfiles, geometry: &Geometry, event: &SawtoothEvent) -> CoreProfiles {
        let radii = &geometry.radii;
        let cell_volume = &geometry.cell_volume;
        let ones = vec![1.0f32; radii.len()];

        let ne_flat = flatten(&profiles.ne, radii, event.rho_q1, event.rho_mix, self.params.flattening_factor);
        let target_n = region_integral(&profiles.ne, &ones, cell_volume, radii, event.rho_mix);
        let ne_corrected = rescale_within_region(&ne_flat, &ones, cell_volume, radii, event.rho_mix, target_n);

        let ti_flat = flatten(&profiles.Ti, radii, event.rho_q1, event.rho_mix, self.params.flattening_factor);
        let target_ti_energy = region_integral(&profiles.Ti, &profiles.ne, cell_volume, radii, event.rho_mix);
        let ti_corrected = rescale_within_region(&ti_flat, &ne_corrected, cell_volume, radii, event.rho_mix, target_ti_energy);

        let te_flat = flatten(&profiles.Te, radii, event.rho_q1, event.rho_mix, self.params.flattening_factor);
        let target_te_energy = region_integral(&profiles.Te, &profiles.ne, cell_volume, radii, event.rho_mix);
        let te_corrected = rescale_within_region(&te_flat, &ne_corrected, cell_volume, radii, event.rho_mix, target_te_energy);

        let psi_new: Vec<f32> = profiles
            .psi
            .iter()
            .zip(radii)
            .map(|(&p, &rho)| {
                if rho <= event.rho_q1 && event.rho_q1 > 0.0 {
                    let factor = 1.0 - (1.0 - self.params.flux_scale_factor) * (1.0 - rho / event.rho_q1);
                    p * factor
                } else {
                    p
                }
            })
            .collect();

        info!(rho_q1 = event.rho_q1, rho_mix = event.rho_mix, "applying sawtooth redistribution");
        CoreProfiles::new(ti_corrected, te_corrected, ne_corrected, psi_new)
    }
}
