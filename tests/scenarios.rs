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

//! End-to-end scenarios driven through [`Orchestrator`] (SPEC_FULL.md §8):
//! each test builds a complete configuration and checks run-level
//! behaviour rather than a single solver/model call.

use approx::{assert_abs_diff_eq, assert_relative_eq};

use tokamak_core::conservation::ParticleConservation;
use tokamak_core::config::{
    DynamicParameters, EvolutionFlags, GeometryKind, MeshConfiguration, OutputConfiguration, SamplingPolicy, SawtoothParameters, SolverConfiguration, TimeConfiguration,
};
use tokamak_core::geometry::{find_q1_surface, magnetic_shear, CircularGeometryProvider};
use tokamak_core::sources::{ConstantHeatingSourceModel, SourceCategory};
use tokamak_core::transport::{ConstantTransportModel, InverseDensityTransportModel};
use tokamak_core::{
    BoundaryCondition, CancelToken, ConservationEnforcer, Constraint, CoreProfiles, GeometryProvider, Orchestrator, ProgressInfo, SimulationConfiguration, SolverKind, TimeAccumulator,
};

fn bc(value: f32) -> BoundaryCondition {
    BoundaryCondition {
        left: Constraint::Neumann(0.0),
        right: Constraint::Dirichlet(value),
    }
}

fn mesh(n_cells: usize) -> MeshConfiguration {
    MeshConfiguration {
        n_cells,
        r0: 6.2,
        a: 2.0,
        b_tor: 5.3,
        geometry_type: GeometryKind::CircularLimited,
    }
}

fn solver_config(kind: SolverKind) -> SolverConfiguration {
    SolverConfiguration {
        solver_kind: kind,
        theta: 1.0,
        newton_tol: 1e-6,
        newton_tol_x: 1e-6,
        newton_max_iter: 20,
        use_pereverzev_corrector: false,
        n_corrector_steps: 0,
    }
}

fn no_op(_fraction: f32, _progress: &ProgressInfo) {}

fn particle_count(ne: &[f32], cell_volume: &[f32]) -> f32 {
    ne.iter().zip(cell_volume).map(|(n, v)| n * v).sum()
}

fn region_sum(values: &[f32], weight: &[f32], cell_volume: &[f32], radii: &[f32], rho_max: f32) -> f32 {
    values
        .iter()
        .zip(weight)
        .zip(cell_volume)
        .zip(radii)
        .filter(|(((_, _), _), &rho)| rho <= rho_max)
        .map(|(((v, w), vol), _)| v * w * vol)
        .sum()
}

fn thermal_energy_region(ti: &[f32], te: &[f32], ne: &[f32], cell_volume: &[f32], radii: &[f32], rho_max: f32) -> f32 {
    ti.iter()
        .zip(te)
        .zip(ne)
        .zip(cell_volume)
        .zip(radii)
        .filter(|((((_, _), _), _), &rho)| rho <= rho_max)
        .map(|((((t, e), n), v), _)| 1.5 * (t + e) * n * v)
        .sum()
}

fn interp(values: &[f32], radii: &[f32], rho: f32) -> f32 {
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

/// Builds a `psi` profile whose recovered `q(rho) = rho*B_tor*a/(R0*dpsi/drho)`
/// follows the target cubic `q0 + k*rho^3` (crossing `q=1` at
/// `rho_q1_target`), by numerically integrating `dpsi/drho = C*rho/q(rho)`
/// on a fine sub-grid and sampling the result at the mesh's cell centers.
/// A linear `psi` gives `q(0) -> 0` under the geometry's own reconstruction,
/// which is unusable for a pre-crash `q(0) < 1` seed; the cubic keeps the
/// axis finite.
fn seeded_sawtooth_psi(radii: &[f32], r0: f32, a: f32, b_tor: f32, rho_q1_target: f32) -> Vec<f32> {
    let c = b_tor * a / r0;
    let q0 = 0.9f32;
    let k = (1.0 - q0) / rho_q1_target.powi(3);
    let q_at = |rho: f32| q0 + k * rho.powi(3);

    let n_sub = 20_000usize;
    let d_sub = 1.0f32 / n_sub as f32;
    let mut psi_fine = vec![0.0f32; n_sub + 1];
    for i in 1..=n_sub {
        let rho_prev = (i - 1) as f32 * d_sub;
        let rho_curr = i as f32 * d_sub;
        let slope_prev = c * rho_prev / q_at(rho_prev.max(1e-6));
        let slope_curr = c * rho_curr / q_at(rho_curr);
        psi_fine[i] = psi_fine[i - 1] + 0.5 * (slope_prev + slope_curr) * d_sub;
    }

    radii
        .iter()
        .map(|&rho| {
            let idx = ((rho / d_sub).round() as usize).min(n_sub);
            psi_fine[idx]
        })
        .collect()
}

#[test]
fn static_equilibrium_holds_profiles_fixed() {
    let n = 25;
    let initial = CoreProfiles::new(vec![10_000.0; n], vec![10_000.0; n], vec![1e20; n], vec![0.0; n]);

    let config = SimulationConfiguration {
        mesh: mesh(n),
        evolution: EvolutionFlags::all(),
        solver: solver_config(SolverKind::Linear),
        time: TimeConfiguration {
            start: 0.0,
            end: 0.01,
            initial_dt: 1e-4,
            adaptive: false,
            dt_min: 1e-6,
            dt_max: 1e-2,
        },
        sampling: SamplingPolicy::minimal(),
        output: OutputConfiguration::default(),
    };

    let dynamic_params = DynamicParameters {
        boundary_conditions: [bc(10_000.0), bc(10_000.0), bc(1e20), bc(0.0)],
        sawtooth: SawtoothParameters::default(),
        conservation_interval: 1000,
        particle_tolerance: 0.005,
        energy_tolerance: 0.01,
    };

    let mut orchestrator = Orchestrator::initialize(
        config,
        Box::new(CircularGeometryProvider::new(mesh(n))),
        Box::new(ConstantTransportModel::zero()),
        Box::new(ConstantHeatingSourceModel {
            ion_heating_mw: 0.0,
            electron_heating_mw: 0.0,
            particle_source: 0.0,
            category: SourceCategory::Other,
        }),
        Vec::new(),
        None,
        initial.clone(),
        dynamic_params,
    )
    .unwrap();

    let result = orchestrator.run(0.01, None, &mut no_op, &CancelToken::new()).unwrap();

    assert_eq!(result.statistics.total_steps, 100);
    assert!(orchestrator.get_progress().unwrap().converged);

    for (&a, &b) in result.final_profiles.Ti.iter().zip(&initial.Ti) {
        assert_relative_eq!(a, b, max_relative = 1e-4);
    }
    for (&a, &b) in result.final_profiles.Te.iter().zip(&initial.Te) {
        assert_relative_eq!(a, b, max_relative = 1e-4);
    }
    for (&a, &b) in result.final_profiles.ne.iter().zip(&initial.ne) {
        assert_relative_eq!(a, b, max_relative = 1e-4);
    }
    for (&a, &b) in result.final_profiles.psi.iter().zip(&initial.psi) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-4);
    }

    let geometry = CircularGeometryProvider::new(mesh(n)).geometry_at(0.0, &initial);
    let n0 = particle_count(&initial.ne, &geometry.cell_volume);
    let n_final = particle_count(&result.final_profiles.ne, &geometry.cell_volume);
    assert_abs_diff_eq!(n_final, n0, epsilon = 1e-4 * n0);
}

#[test]
fn density_drifts_without_conservation() {
    let n = 25;
    let initial = CoreProfiles::new(vec![10_000.0; n], vec![10_000.0; n], vec![1e20; n], vec![0.0; n]);

    let config = SimulationConfiguration {
        mesh: mesh(n),
        evolution: EvolutionFlags::all(),
        solver: solver_config(SolverKind::Linear),
        time: TimeConfiguration {
            start: 0.0,
            end: 0.1,
            initial_dt: 1e-4,
            adaptive: false,
            dt_min: 1e-6,
            dt_max: 1e-2,
        },
        sampling: SamplingPolicy {
            sample_profiles: true,
            sample_derived: false,
            sample_diagnostics: false,
            profile_sampling_interval: 100,
        },
        output: OutputConfiguration::default(),
    };

    // The scenario leaves the boundary value unstated; a 2% excess over the
    // initial density at the outer Dirichlet face is what drives the drift
    // this scenario exercises.
    let dynamic_params = DynamicParameters {
        boundary_conditions: [bc(10_000.0), bc(10_000.0), bc(1.02e20), bc(0.0)],
        sawtooth: SawtoothParameters::default(),
        conservation_interval: 1000,
        particle_tolerance: 0.005,
        energy_tolerance: 0.01,
    };

    let mut orchestrator = Orchestrator::initialize(
        config,
        Box::new(CircularGeometryProvider::new(mesh(n))),
        Box::new(ConstantTransportModel::new(1.0, 1.0, 1.0, 0.0)),
        Box::new(ConstantHeatingSourceModel {
            ion_heating_mw: 1.0,
            electron_heating_mw: 1.0,
            particle_source: 0.0,
            category: SourceCategory::Auxiliary,
        }),
        Vec::new(),
        None,
        initial.clone(),
        dynamic_params,
    )
    .unwrap();

    let result = orchestrator.run(0.1, None, &mut no_op, &CancelToken::new()).unwrap();

    let geometry = CircularGeometryProvider::new(mesh(n)).geometry_at(0.0, &initial);
    let n0 = particle_count(&initial.ne, &geometry.cell_volume);

    let series = result.time_series.expect("profile sampling was requested");
    let totals: Vec<f32> = series
        .iter()
        .map(|point| particle_count(&point.profiles.as_ref().expect("profiles were requested").ne, &geometry.cell_volume))
        .collect();

    assert!(totals.len() >= 2, "expected more than one sampled point");
    for window in totals.windows(2) {
        assert!(window[1] >= window[0] - 1e-6 * n0, "N must drift monotonically, got {totals:?}");
    }

    let final_total = *totals.last().unwrap();
    let drift = (final_total - n0).abs() / n0;
    assert!(drift < 0.05, "relative drift {drift} exceeds the 5% bound");
    assert!(final_total > n0, "the excess boundary density should drive N upward");
}

#[test]
fn conservation_restores_particle_number() {
    let n = 25;
    let initial = CoreProfiles::new(vec![10_000.0; n], vec![10_000.0; n], vec![1e20; n], vec![0.0; n]);
    let geometry = CircularGeometryProvider::new(mesh(n)).geometry_at(0.0, &initial);

    let config = SimulationConfiguration {
        mesh: mesh(n),
        evolution: EvolutionFlags::all(),
        solver: solver_config(SolverKind::Linear),
        time: TimeConfiguration {
            start: 0.0,
            end: 0.01,
            initial_dt: 1e-4,
            adaptive: false,
            dt_min: 1e-6,
            dt_max: 1e-2,
        },
        sampling: SamplingPolicy {
            sample_profiles: true,
            sample_derived: false,
            sample_diagnostics: true,
            profile_sampling_interval: 100,
        },
        output: OutputConfiguration::default(),
    };

    // 10% over-density at the boundary, large enough that the particle law
    // reliably crosses its 0.5% tolerance within the first enforcement
    // window.
    let dynamic_params = DynamicParameters {
        boundary_conditions: [bc(10_000.0), bc(10_000.0), bc(1.1e20), bc(0.0)],
        sawtooth: SawtoothParameters::default(),
        conservation_interval: 100,
        particle_tolerance: 0.005,
        energy_tolerance: 0.01,
    };

    let enforcer = ConservationEnforcer::new(vec![Box::new(ParticleConservation { tolerance: 0.005 })], &initial, &geometry, 100);

    let mut orchestrator = Orchestrator::initialize(
        config,
        Box::new(CircularGeometryProvider::new(mesh(n))),
        Box::new(ConstantTransportModel::new(1.0, 1.0, 1.0, 0.0)),
        Box::new(ConstantHeatingSourceModel {
            ion_heating_mw: 1.0,
            electron_heating_mw: 1.0,
            particle_source: 0.0,
            category: SourceCategory::Auxiliary,
        }),
        Vec::new(),
        Some(enforcer),
        initial.clone(),
        dynamic_params,
    )
    .unwrap();

    let result = orchestrator.run(0.01, None, &mut no_op, &CancelToken::new()).unwrap();

    let n0 = particle_count(&initial.ne, &geometry.cell_volume);
    let series = result.time_series.expect("profile/diagnostics sampling was requested");
    let at_100 = series.iter().find(|point| point.step == 100).expect("step 100 should be sampled");

    let profiles_100 = at_100.profiles.as_ref().expect("profiles were requested");
    let n_after = particle_count(&profiles_100.ne, &geometry.cell_volume);
    let drift_after = (n_after - n0).abs() / n0;
    assert!(drift_after <= 0.005 + 1e-3, "post-enforcement drift {drift_after} exceeds tolerance");

    let diagnostics = at_100.diagnostics.as_ref().expect("diagnostics were requested");
    let particle_result = diagnostics
        .conservation
        .iter()
        .find(|r| r.law == "ParticleConservation")
        .expect("the particle law should have run at the enforcement interval");
    assert!(particle_result.factor >= 0.8 && particle_result.factor <= 1.2);
    assert!(particle_result.corrected, "a 10% boundary-driven drift should exceed the 0.5% tolerance by step 100");
}

#[test]
fn sawtooth_crash_preserves_invariants() {
    let n = 40;
    let m = mesh(n);
    let radii: Vec<f32> = (0..n).map(|i| (i as f32 + 0.5) / n as f32).collect();
    let rho_q1_target = 0.3;
    let psi = seeded_sawtooth_psi(&radii, m.r0, m.a, m.b_tor, rho_q1_target);
    let ti: Vec<f32> = radii.iter().map(|&rho| 10_000.0 - 9_000.0 * rho).collect();
    let te = ti.clone();
    let ne = vec![1e20; n];
    let initial = CoreProfiles::new(ti, te, ne, psi);

    let provider = CircularGeometryProvider::new(m.clone());
    let initial_geometry = provider.geometry_at(0.0, &initial);
    assert!(initial_geometry.q_axis() < 1.0, "seeded psi must keep q(0) below 1 before the crash, got {}", initial_geometry.q_axis());

    let (rho_q1, trigger_index) = find_q1_surface(&initial_geometry.safety_factor, &initial_geometry.radii).expect("seeded psi must cross q=1");
    assert!((rho_q1 - rho_q1_target).abs() < 0.05, "q=1 surface drifted away from the seeded target, got {rho_q1}");
    let shear = magnetic_shear(&initial_geometry.safety_factor, &initial_geometry.radii, trigger_index);
    assert!(shear > SawtoothParameters::default().s_crit, "seeded shear {shear} must clear the crash threshold");
    let rho_mix = 1.5 * rho_q1;

    let config = SimulationConfiguration {
        mesh: m.clone(),
        evolution: EvolutionFlags::all(),
        solver: solver_config(SolverKind::Linear),
        time: TimeConfiguration {
            start: 0.0,
            end: 0.011,
            initial_dt: 0.011,
            adaptive: false,
            dt_min: 1e-6,
            dt_max: 0.1,
        },
        sampling: SamplingPolicy::minimal(),
        output: OutputConfiguration::default(),
    };

    let dynamic_params = DynamicParameters {
        boundary_conditions: [bc(1_000.0), bc(1_000.0), bc(1e20), bc(0.0)],
        sawtooth: SawtoothParameters::default(),
        conservation_interval: 1000,
        particle_tolerance: 0.005,
        energy_tolerance: 0.01,
    };

    let mut orchestrator = Orchestrator::initialize(
        config,
        Box::new(CircularGeometryProvider::new(m.clone())),
        Box::new(ConstantTransportModel::zero()),
        Box::new(ConstantHeatingSourceModel {
            ion_heating_mw: 0.0,
            electron_heating_mw: 0.0,
            particle_source: 0.0,
            category: SourceCategory::Other,
        }),
        vec![Box::new(tokamak_core::SawtoothModel::new(SawtoothParameters::default()))],
        None,
        initial.clone(),
        dynamic_params,
    )
    .unwrap();

    let result = orchestrator.run(0.011, None, &mut no_op, &CancelToken::new()).unwrap();

    assert_eq!(result.statistics.sawtooth_crash_count, 1, "the seeded q-profile must trigger exactly one crash");

    let ti_axis = interp(&result.final_profiles.Ti, &radii, 0.0);
    let ti_q1 = interp(&result.final_profiles.Ti, &radii, rho_q1);
    assert!(ti_axis / ti_q1 <= 1.02, "post-crash Ti(0)/Ti(rho_q1) = {}", ti_axis / ti_q1);

    let ones = vec![1.0f32; n];
    let particles_before = region_sum(&initial.ne, &ones, &initial_geometry.cell_volume, &radii, rho_mix);
    let particles_after = region_sum(&result.final_profiles.ne, &ones, &initial_geometry.cell_volume, &radii, rho_mix);
    assert_relative_eq!(particles_before, particles_after, max_relative = 1e-4);

    let energy_before = thermal_energy_region(&initial.Ti, &initial.Te, &initial.ne, &initial_geometry.cell_volume, &radii, rho_mix);
    let energy_after = thermal_energy_region(&result.final_profiles.Ti, &result.final_profiles.Te, &result.final_profiles.ne, &initial_geometry.cell_volume, &radii, rho_mix);
    assert_relative_eq!(energy_before, energy_after, max_relative = 1e-4);

    let post_geometry = provider.geometry_at(0.011, &result.final_profiles);
    assert!(post_geometry.q_axis() > 1.0, "post-crash q(0) should exceed 1, got {}", post_geometry.q_axis());
}

#[test]
fn time_accumulator_reaches_two_seconds() {
    let mut accumulator = TimeAccumulator::new(0.0);
    for _ in 0..20_000 {
        accumulator.advance(1e-4);
    }
    assert!((accumulator.as_f64() - 2.0).abs() < 1e-9, "accumulated time: {}", accumulator.as_f64());
}

#[test]
fn newton_handles_density_dependent_diffusivity() {
    let n = 8;
    let initial = CoreProfiles::new(vec![1_000.0; n], vec![1_000.0; n], vec![1e20; n], vec![0.0; n]);

    let config = SimulationConfiguration {
        mesh: mesh(n),
        evolution: EvolutionFlags::all(),
        solver: solver_config(SolverKind::Newton),
        time: TimeConfiguration {
            start: 0.0,
            end: 1e-4,
            initial_dt: 1e-4,
            adaptive: false,
            dt_min: 1e-6,
            dt_max: 1e-2,
        },
        sampling: SamplingPolicy::minimal(),
        output: OutputConfiguration::default(),
    };

    let dynamic_params = DynamicParameters {
        boundary_conditions: [bc(900.0), bc(900.0), bc(1e20), bc(0.0)],
        sawtooth: SawtoothParameters::default(),
        conservation_interval: 1000,
        particle_tolerance: 0.005,
        energy_tolerance: 0.01,
    };

    let mut orchestrator = Orchestrator::initialize(
        config,
        Box::new(CircularGeometryProvider::new(mesh(n))),
        Box::new(InverseDensityTransportModel {
            chi_i0: 1.0,
            chi_e: 1.0,
            d: 0.0,
            v: 0.0,
            n_ref: 1e20,
        }),
        Box::new(ConstantHeatingSourceModel {
            ion_heating_mw: 0.0,
            electron_heating_mw: 0.0,
            particle_source: 0.0,
            category: SourceCategory::Other,
        }),
        Vec::new(),
        None,
        initial.clone(),
        dynamic_params,
    )
    .unwrap();

    let result = orchestrator.run(1e-4, None, &mut no_op, &CancelToken::new()).unwrap();

    assert_eq!(result.statistics.total_steps, 1);
    assert!(result.statistics.total_newton_iterations <= 8, "Newton took too many iterations: {}", result.statistics.total_newton_iterations);

    // `ne` stays pinned at `n_ref` (d = v = 0, no particle source), so the
    // density-dependent closure reduces to a constant chi_i = chi_i0; both
    // `ne` and `psi` equations are exactly invariant regardless of how the
    // nonlinear Ti/Te equations converge.
    for (&ne, &ne0) in result.final_profiles.ne.iter().zip(&initial.ne) {
        assert_relative_eq!(ne, ne0, max_relative = 1e-6);
    }
    for (&psi, &psi0) in result.final_profiles.psi.iter().zip(&initial.psi) {
        assert_abs_diff_eq!(psi, psi0, epsilon = 1e-6);
    }
}
