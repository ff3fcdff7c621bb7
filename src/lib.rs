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

//! Implicit finite-volume time-stepping engine for tokamak core plasma
//! transport: a coupled four-equation system (`Ti`, `Te`, `ne`, `psi`)
//! advanced on a fixed radial mesh, with adaptive timestepping, periodic
//! conservation enforcement, and a sawtooth MHD event model.
//!
//! Configuration loading, persistence and visualization are deliberately
//! out of scope; this crate exposes the data model and step loop that
//! those collaborators drive.
//!
//! Usage
//! -----
//! Most callers build a [`config::SimulationConfiguration`], a
//! [`geometry::GeometryProvider`], transport/source/MHD models, and drive
//! [`orchestrator::Orchestrator::initialize`] followed by `run`. See the
//! orchestrator module's test suite for a complete example.

pub mod cache;
pub mod cell_variable;
pub mod coefficients;
pub mod config;
pub mod conservation;
pub mod derived;
pub mod error;
pub mod geometry;
pub mod mhd;
pub mod orchestrator;
pub mod profiles;
pub mod sampling;
pub mod solver;
pub mod sources;
pub mod timestep;
pub mod transport;

pub use cache::{CompilationCache, CompilationKey};
pub use cell_variable::CellVariable;
pub use coefficients::{assemble_with_geometry, Block1DCoeffs, EquationCoeffs, GeometricFactors};
pub use config::{SimulationConfiguration, SolverKind};
pub use conservation::{ConservationEnforcer, ConservationLaw, ConservationResult};
pub use derived::DerivedQuantities;
pub use error::{CoreError, CoreResult};
pub use geometry::{Geometry, GeometryProvider};
pub use mhd::{MHDModel, SawtoothEvent, SawtoothModel};
pub use orchestrator::{CancelToken, Orchestrator, ProgressInfo, SimulationResult};
pub use profiles::{BoundaryCondition, Constraint, CoreProfiles};
pub use sampling::{Checkpoint, DiagnosticsReport, SimulationStatistics, TimePoint};
pub use solver::{JacobianConditioning, LinearThetaSolver, NewtonSolver, PDESolver, SolverOutcome};
pub use sources::{SourceMetadata, SourceModel, SourceTerms};
pub use timestep::{adaptive_dt, TimeAccumulator};
pub use transport::{TransportCoefficients, TransportModel};