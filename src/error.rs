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

//! Crate-wide error taxonomy.

use thiserror::Error;

/// The single error type returned at the boundary of every fallible
/// operation in this crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("run() was called before initialize()")]
    NotInitialized,

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("invalid boundary conditions: {message}")]
    InvalidBoundaryConditions { message: String },

    #[error("mesh too coarse: {message}")]
    MeshTooCoarse { message: String },

    #[error("timestep too small: {message}")]
    TimeStepTooSmall { message: String },

    #[error("model initialization failed: {message}")]
    ModelInitializationFailed { message: String },

    #[error("numeric instability in `{variable}` at t={time}: value={value}")]
    NumericInstability {
        time: f32,
        variable: String,
        value: f32,
    },

    #[error("Newton solver failed to converge after {iterations} iterations (residual={residual})")]
    ConvergenceFailure { iterations: u32, residual: f32 },

    #[error("conservation drift for `{law}` is {drift} (critical threshold exceeded)")]
    ConservationViolation { law: String, drift: f32 },

    #[error("sampling memory budget exceeded: {message}")]
    SamplingOverflow { message: String },
}

/// Crate-wide `Result` alias.
pub type CoreResult<T> = Result<T, CoreError>;
