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

//! Periodic projection of profiles back onto reference invariants
//! (SPEC_FULL.md §4.7).

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geometry::Geometry;
use crate::profiles::CoreProfiles;

const FACTOR_MIN: f32 = 0.8;
const FACTOR_MAX: f32 = 1.2;
const CRITICAL_DRIFT: f32 = 0.05;

/// One applied (or skipped) correction, suitable for a diagnostic report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConservationResult {
    pub law: String,
    pub reference: f32,
    pub current: f32,
    pub drift: f32,
    pub factor: f32,
    pub corrected: bool,
    pub step: usize,
    pub time: f32,
}

/// A quantity that should stay constant (up to its own tolerance) over
/// the run, captured at `t = 0` and rescaled multiplicatively when drift
/// exceeds tolerance.
pub trait ConservationLaw {
    fn name(&self) -> &'static str;
    fn tolerance(&self) -> f32;
    fn compute_quantity(&self, profiles: &CoreProfiles, geometry: &Geometry) -> f32;
    fn apply_correction(&self, profiles: &CoreProfiles, factor: f32) -> CoreProfiles;
}

fn correction_factor(current: f32, reference: f32) -> f32 {
    if current.is_finite() && reference.is_finite() && current > 0.0 && reference > 0.0 {
        (reference / current).clamp(FACTOR_MIN, FACTOR_MAX)
    } else {
        1.0
    }
}

/// Integrates `ne` over cell volumes: `N = sum(ne_i * V_i)`.
pub struct ParticleConservation {
    pub tolerance: f32,
}

impl ConservationLaw for ParticleConservation {
    fn name(&self) -> &'static str {
        "ParticleConservation"
    }

    fn tolerance(&self) -> f32 {
        self.tolerance
    }

    fn compute_quantity(&self, profiles: &CoreProfiles, geometry: &Geometry) -> f32 {
        profiles.ne.iter().zip(&geometry.cell_volume).map(|(n, v)| n * v).sum()
    }

    fn apply_correction(&self, profiles: &CoreProfiles, factor: f32) -> CoreProfiles {
        let ne = profiles.ne.iter().map(|&n| n * factor).collect();
        CoreProfiles::new(profiles.Ti.clone(), profiles.Te.clone(), ne, profiles.psi.clone())
    }
}

/// Integrates thermal energy density `1.5 (Ti + Te) ne` over cell volumes.
pub struct EnergyConservation {
    pub tolerance: f32,
}

impl ConservationLaw for EnergyConservation {
    fn name(&self) -> &'static str {
        "EnergyConservation"
    }

    fn tolerance(&self) -> f32 {
        self.tolerance
    }

    fn compute_quantity(&self, profiles: &CoreProfiles, geometry: &Geometry) -> f32 {
        profiles
            .Ti
            .iter()
            .zip(&profiles.Te)
            .zip(&profiles.ne)
            .zip(&geometry.cell_volume)
            .map(|(((ti, te), ne), v)| 1.5 * (ti + te) * ne * v)
            .sum()
    }

    fn apply_correction(&self, profiles: &CoreProfiles, factor: f32) -> CoreProfiles {
        // Rescale both temperatures so the temperature*density product
        // scales by `factor` while leaving `ne` untouched -- this law runs
        // after particle conservation, which already corrected `ne`.
        let ti = profiles.Ti.iter().map(|&t| t * factor).collect();
        let te = profiles.Te.iter().map(|&t| t * factor).collect();
        CoreProfiles::new(ti, te, profiles.ne.clone(), profiles.psi.clone())
    }
}

/// Simplified proxy treating `integral(psi dV)` as a stand-in for
/// `integral(j . dA)`; not enabled by default (§9.1 Open Question
/// resolution). Emits a `tracing::warn!` the first time it is
/// constructed to flag the simplification.
pub struct PsiProxyConservation {
    pub tolerance: f32,
}

impl PsiProxyConservation {
    pub fn new(tolerance: f32) -> Self {
        warn!("PsiProxyConservation uses integral(psi dV) as a simplified proxy for integral(j.dA)");
        Self { tolerance }
    }
}

impl ConservationLaw for PsiProxyConservation {
    fn name(&self) -> &'static str {
        "PsiProxyConservation"
    }

    fn tolerance(&self) -> f32 {
        self.tolerance
    }

    fn compute_quantity(&self, profiles: &CoreProfiles, geometry: &Geometry) -> f32 {
        profiles.psi.iter().zip(&geometry.cell_volume).map(|(p, v)| p * v).sum()
    }

    fn apply_correction(&self, profiles: &CoreProfiles, factor: f32) -> CoreProfiles {
        let psi = profiles.psi.iter().map(|&p| p * factor).collect();
        CoreProfiles::new(profiles.Ti.clone(), profiles.Te.clone(), profiles.ne.clone(), psi)
    }
}

/// Drives a deterministically ordered list of laws: each law's reference
/// quantity is captured once, at construction, from the initial profiles.
pub struct ConservationEnforcer {
    laws: Vec<Box<dyn ConservationLaw>>,
    references: Vec<f32>,
    interval: usize,
}

impl ConservationEnforcer {
    /// Captures reference quantities from `initial_profiles` for every law
    /// in `laws`, in the given order. Order is part of the design
    /// contract (§4.7, point 3): downstream laws see already-corrected
    /// profiles.
    pub fn new(laws: Vec<Box<dyn ConservationLaw>>, initial_profiles: &CoreProfiles, geometry: &Geometry, interval: usize) -> Self {
        let references = laws.iter().map(|law| law.compute_quantity(initial_profiles, geometry)).collect();
        Self {
            laws,
            references,
            interval,
        }
    }

    pub fn should_enforce(&self, step: usize) -> bool {
        step > 0 && self.interval > 0 && step % self.interval == 0
    }

    /// The reference quantity captured for each law, in the same order as
    /// the laws themselves; exposed so a checkpoint can record what an
    /// enforcement pass will compare against (§3 "reference quantities").
    pub fn references(&self) -> &[f32] {
        &self.references
    }

    /// Runs the enforcer, returning the (possibly corrected) profiles and
    /// one `ConservationResult` per law. Never mutates profiles that fail
    /// [`CoreProfiles::is_valid`]; in that case every result is reported
    /// with `corrected = false` and a diagnostic is logged.
    pub fn enforce(&self, profiles: &CoreProfiles, geometry: &Geometry, step: usize, time: f32) -> (CoreProfiles, Vec<ConservationResult>) {
        if !profiles.is_valid() {
            warn!(step, time, "skipping conservation enforcement on invalid profiles");
            let results = self
                .laws
                .iter()
                .zip(&self.references)
                .map(|(law, &reference)| ConservationResult {
                    law: law.name().to_string(),
                    reference,
                    current: f32::NAN,
                    drift: f32::NAN,
                    factor: 1.0,
                    corrected: false,
                    step,
                    time,
                })
                .collect();
            return (profiles.clone(), results);
        }

        let mut current_profiles = profiles.clone();
        let mut results = Vec::with_capacity(self.laws.len());
        for (law, &reference) in self.laws.iter().zip(&self.references) {
            let current = law.compute_quantity(&current_profiles, geometry);
            let drift = if reference.abs() > f32::EPSILON {
                (current - reference).abs() / reference.abs()
            } else {
                0.0
            };
            let corrected = drift > law.tolerance();
            let factor = if corrected {
                correction_factor(current, reference)
            } else {
                1.0
            };
            if corrected {
                current_profiles = law.apply_correction(&current_profiles, factor);
            }
            if drift > CRITICAL_DRIFT {
                warn!(law = law.name(), drift, "conservation drift exceeds critical threshold");
            }
            results.push(ConservationResult {
                law: law.name().to_string(),
                reference,
                current,
                drift,
                factor,
                corrected,
                step,
                time,
            });
        }
        (current_profiles, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn geometry(n: usize) -> Geometry {
        Geometry {
            r0: 6.2,
            a: 2.0,
            b_tor: 5.3,
            dr: 1.0 / n as f32,
            r_cell: vec![0.0; n],
            cell_volume: vec![1.0; n],
            safety_factor: vec![1.0; n],
            radii: vec![0.0; n],
            r_face: vec![0.0; n + 1],
            face_area: vec![1.0; n + 1],
            g0: vec![1.0; n + 1],
            g1: vec![1.0; n + 1],
            g2: vec![1.0; n + 1],
            g3: vec![1.0; n + 1],
        }
    }

    #[test]
    fn particle_conservation_restores_drifted_density() {
        let n = 4;
        let initial = CoreProfiles::new(vec![1000.0; n], vec![1000.0; n], vec![1e20; n], vec![0.0; n]);
        let g = geometry(n);
        let enforcer = ConservationEnforcer::new(
            vec![Box::new(ParticleConservation { tolerance: 0.005 })],
            &initial,
            &g,
            100,
        );
        let mut drifted = initial.clone();
        for n in drifted.ne.iter_mut() {
            *n *= 1.10;
        }
        assert!(enforcer.should_enforce(100));
        let (corrected, results) = enforcer.enforce(&drifted, &g, 100, 0.01);
        assert!(results[0].corrected);
        let total: f32 = corrected.ne.iter().sum();
        let reference: f32 = initial.ne.iter().sum();
        assert_relative_eq!(total, reference, max_relative = 0.005);
    }

    #[test]
    fn correction_factor_is_clamped() {
        assert_eq!(correction_factor(10.0, 1.0), FACTOR_MAX);
        assert_eq!(correction_factor(1.0, 10.0), FACTOR_MIN);
    }

    #[test]
    fn enforcement_is_idempotent() {
        let n = 4;
        let initial = CoreProfiles::new(vec![1000.0; n], vec![1000.0; n], vec![1e20; n], vec![0.0; n]);
        let g = geometry(n);
        let enforcer = ConservationEnforcer::new(
            vec![Box::new(ParticleConservation { tolerance: 0.005 })],
            &initial,
            &g,
            100,
        );
        let mut drifted = initial.clone();
        for n in drifted.ne.iter_mut() {
            *n *= 1.10;
        }
        let (once, _) = enforcer.enforce(&drifted, &g, 100, 0.0);
        let (twice, results) = enforcer.enforce(&once, &g, 200, 0.0);
        assert!(!results[0].corrected);
        assert_eq!(once, twice);
    }

    #[test]
    fn invalid_profiles_are_left_untouched() {
        let n = 3;
        let initial = CoreProfiles::new(vec![1000.0; n], vec![1000.0; n], vec![1e20; n], vec![0.0; n]);
        let g = geometry(n);
        let enforcer = ConservationEnforcer::new(
            vec![Box::new(ParticleConservation { tolerance: 0.005 })],
            &initial,
            &g,
            100,
        );
        let mut invalid = initial.clone();
        invalid.ne[0] = -1.0;
        let (result_profiles, results) = enforcer.enforce(&invalid, &g, 100, 0.0);
        assert_eq!(result_profiles, invalid);
        assert!(!results[0].corrected);
    }
}
