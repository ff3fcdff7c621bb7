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

//! Source terms, source metadata, and the `SourceModel` capability trait.

use serde::{Deserialize, Serialize};

use crate::config::DynamicParameters;
use crate::geometry::Geometry;
use crate::profiles::CoreProfiles;

/// Ion heating, electron heating [MW/m^3], particle source [m^-3/s], and
/// current source on cells.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceTerms {
    pub ion_heating: Vec<f32>,
    pub electron_heating: Vec<f32>,
    pub particle_source: Vec<f32>,
    pub current_source: Vec<f32>,
}

impl SourceTerms {
    pub fn zero(n_cells: usize) -> Self {
        Self {
            ion_heating: vec![0.0; n_cells],
            electron_heating: vec![0.0; n_cells],
            particle_source: vec![0.0; n_cells],
            current_source: vec![0.0; n_cells],
        }
    }

    pub fn validate(&self, n_cells: usize) -> Result<(), String> {
        for (name, arr) in [
            ("ion_heating", &self.ion_heating),
            ("electron_heating", &self.electron_heating),
            ("particle_source", &self.particle_source),
            ("current_source", &self.current_source),
        ] {
            if arr.len() != n_cells {
                return Err(format!(
                    "source term `{name}` has length {}, expected {n_cells}",
                    arr.len()
                ));
            }
        }
        Ok(())
    }

    /// Elementwise sum, used when a [`CompositeSourceModel`] concatenates
    /// several models' contributions.
    pub fn add(&mut self, other: &SourceTerms) {
        for (a, b) in self.ion_heating.iter_mut().zip(&other.ion_heating) {
            *a += b;
        }
        for (a, b) in self.electron_heating.iter_mut().zip(&other.electron_heating) {
            *a += b;
        }
        for (a, b) in self.particle_source.iter_mut().zip(&other.particle_source) {
            *a += b;
        }
        for (a, b) in self.current_source.iter_mut().zip(&other.current_source) {
            *a += b;
        }
    }
}

/// Which physical process a source model contributes, for power-balance
/// accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceCategory {
    Fusion,
    Auxiliary,
    Ohmic,
    Radiation,
    Other,
}

/// Integrated powers contributed by one model, enabling exact
/// power-balance accounting independent of the per-cell source arrays.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub category: SourceCategory,
    pub ion_power_mw: f32,
    pub electron_power_mw: f32,
    pub alpha_power_mw: f32,
    pub radiation_power_mw: f32,
}

/// Produces source terms (and, optionally, power-balance metadata) from
/// the current profiles, geometry, and dynamic parameters.
pub trait SourceModel {
    fn compute_terms_with_metadata(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &DynamicParameters,
    ) -> (SourceTerms, Option<SourceMetadata>);
}

/// Spatially constant ion/electron heating and particle source; used to
/// drive the "density drift" and "conservation restores particle number"
/// scenarios.
pub struct ConstantHeatingSourceModel {
    pub ion_heating_mw: f32,
    pub electron_heating_mw: f32,
    pub particle_source: f32,
    pub category: SourceCategory,
}

impl SourceModel for ConstantHeatingSourceModel {
    fn compute_terms_with_metadata(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        _params: &DynamicParameters,
    ) -> (SourceTerms, Option<SourceMetadata>) {
        let n = profiles.n_cells();
        let terms = SourceTerms {
            ion_heating: vec![self.ion_heating_mw; n],
            electron_heating: vec![self.electron_heating_mw; n],
            particle_source: vec![self.particle_source; n],
            current_source: vec![0.0; n],
        };
        let volume: f32 = geometry.cell_volume.iter().sum();
        let metadata = SourceMetadata {
            category: self.category,
            ion_power_mw: self.ion_heating_mw * volume,
            electron_power_mw: self.electron_heating_mw * volume,
            alpha_power_mw: 0.0,
            radiation_power_mw: 0.0,
        };
        (terms, Some(metadata))
    }
}

/// Concatenation of several source models: sums all per-cell terms and
/// aggregates whatever metadata the members produce (§9, "a composite
/// source model is the concatenation variant").
pub struct CompositeSourceModel {
    models: Vec<Box<dyn SourceModel>>,
}

impl CompositeSourceModel {
    pub fn new(models: Vec<Box<dyn SourceModel>>) -> Self {
        Self { models }
    }
}

impl SourceModel for CompositeSourceModel {
    fn compute_terms_with_metadata(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &DynamicParameters,
    ) -> (SourceTerms, Option<SourceMetadata>) {
        let n = profiles.n_cells();
        let mut total = SourceTerms::zero(n);
        let mut metadata = Vec::new();
        for model in &self.models {
            let (terms, meta) = model.compute_terms_with_metadata(profiles, geometry, params);
            total.add(&terms);
            if let Some(meta) = meta {
                metadata.push(meta);
            }
        }
        // A composite has no single category; summarize as the sum of ion
        // power across members under `Other` if any metadata was produced.
        let aggregated = if metadata.is_empty() {
            None
        } else {
            Some(SourceMetadata {
                category: SourceCategory::Other,
                ion_power_mw: metadata.iter().map(|m| m.ion_power_mw).sum(),
                electron_power_mw: metadata.iter().map(|m| m.electron_power_mw).sum(),
                alpha_power_mw: metadata.iter().map(|m| m.alpha_power_mw).sum(),
                radiation_power_mw: metadata.iter().map(|m| m.radiation_power_mw).sum(),
            })
        };
        (total, aggregated)
    }
}
