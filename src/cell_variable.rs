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

//! A single 1-D profile together with its per-face boundary constraints.

use crate::profiles::Constraint;

/// Cell-centered values, grid spacing, and exactly-one-of-value-or-gradient
/// boundary constraints on each face.
#[derive(Clone, Debug)]
pub struct CellVariable {
    values: Vec<f32>,
    dr: f32,
    left: Constraint,
    right: Constraint,
}

impl CellVariable {
    /// Preconditions (`dr > 0`) are programming errors and fail fast via
    /// `assert!`, matching §4.1's "violations are programming errors".
    pub fn new(values: Vec<f32>, dr: f32, left: Constraint, right: Constraint) -> Self {
        assert!(dr > 0.0, "CellVariable requires dr > 0, got {dr}");
        assert!(!values.is_empty(), "CellVariable requires at least one cell");
        Self {
            values,
            dr,
            left,
            right,
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dr(&self) -> f32 {
        self.dr
    }

    pub fn n_cells(&self) -> usize {
        self.values.len()
    }

    /// Face-centered values, length `n_cells + 1` (§4.1).
    pub fn face_values(&self) -> Vec<f32> {
        let n = self.n_cells();
        let mut out = vec![0.0f32; n + 1];
        for i in 1..n {
            out[i] = (self.values[i - 1] + self.values[i]) / 2.0;
        }
        out[0] = match self.left {
            Constraint::Dirichlet(v) => v,
            Constraint::Neumann(grad) => self.values[0] - grad * self.dr / 2.0,
        };
        out[n] = match self.right {
            Constraint::Dirichlet(v) => v,
            Constraint::Neumann(grad) => self.values[n - 1] + grad * self.dr / 2.0,
        };
        out
    }

    /// Face-centered gradients, length `n_cells + 1` (§4.1).
    pub fn face_gradients(&self) -> Vec<f32> {
        let n = self.n_cells();
        let mut out = vec![0.0f32; n + 1];
        for i in 1..n {
            out[i] = (self.values[i] - self.values[i - 1]) / self.dr;
        }
        out[0] = match self.left {
            Constraint::Dirichlet(v) => (self.values[0] - v) / (self.dr / 2.0),
            Constraint::Neumann(grad) => grad,
        };
        out[n] = match self.right {
            Constraint::Dirichlet(v) => (v - self.values[n - 1]) / (self.dr / 2.0),
            Constraint::Neumann(grad) => grad,
        };
        out
    }

    /// Cell-centered gradient obtained by differencing face values
    /// (`diff(face_value)/dr`, §4.1).
    pub fn cell_gradients(&self) -> Vec<f32> {
        let face_values = self.face_values();
        face_values
            .windows(2)
            .map(|w| (w[1] - w[0]) / self.dr)
            .collect()
    }
}
