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

//! Optional compilation cache (SPEC_FULL.md §5, §9): memoizes opaque
//! values keyed by static configuration. Turning it off must not change
//! simulation output -- it only memoizes, never alters, its thunk's
//! result.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 10;

/// A key built from the parts of [`crate::config::SimulationConfiguration`]
/// that determine a solver closure's shape: mesh resolution, solver kind,
/// evolution-flags bitmask, and theta (bit-cast to make it hashable).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CompilationKey {
    pub n_cells: usize,
    pub solver_kind_tag: u8,
    pub evolution_bitmask: u8,
    pub theta_bits: u32,
}

impl CompilationKey {
    pub fn new(n_cells: usize, solver_kind_tag: u8, evolution_bitmask: u8, theta: f32) -> Self {
        Self {
            n_cells,
            solver_kind_tag,
            evolution_bitmask,
            theta_bits: theta.to_bits(),
        }
    }
}

/// Thread-safe, capacity-bounded memoization. Eviction is a simple "drop
/// one arbitrary entry when full" policy, not LRU -- sufficient for the
/// small, slowly-changing key space this crate produces.
pub struct CompilationCache<V> {
    capacity: usize,
    entries: Mutex<HashMap<CompilationKey, V>>,
}

impl<V: Clone> CompilationCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Returns the cached value for `key`, computing and inserting it via
    /// `thunk` on a miss.
    pub fn get_or_compile(&self, key: CompilationKey, thunk: impl FnOnce() -> V) -> V {
        let mut entries = self.entries.lock().expect("compilation cache mutex poisoned");
        if let Some(value) = entries.get(&key) {
            return value.clone();
        }
        let value = thunk();
        if entries.len() >= self.capacity {
            if let Some(evict_key) = entries.keys().next().copied() {
                entries.remove(&evict_key);
            }
        }
        entries.insert(key, value.clone());
        value
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("compilation cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
