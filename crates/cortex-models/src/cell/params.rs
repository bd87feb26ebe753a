// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Parameter storage.

A cell's `init_params` returns a [`ParamSet`] of numeric initial values.
On registration every entry is promoted to a [`SharedParam`], a named
handle keyed `"<cell>.<key>"` (or `"<cell>.<key>[i]"` for list entries)
in the build context's trainable-parameter registry. Two cells resolving
the same name share one handle.
*/

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::ArrayD;
use parking_lot::{RwLock, RwLockReadGuard};

/// One `init_params` entry: a tensor or a list of tensors
#[derive(Debug, Clone, PartialEq)]
pub enum ParamEntry {
    Single(ArrayD<f32>),
    Group(Vec<ArrayD<f32>>),
}

impl ParamEntry {
    pub fn len(&self) -> usize {
        match self {
            ParamEntry::Single(_) => 1,
            ParamEntry::Group(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered numeric parameters produced by `init_params`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet {
    entries: IndexMap<String, ParamEntry>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ArrayD<f32>) {
        self.entries.insert(key.into(), ParamEntry::Single(value));
    }

    pub fn insert_group(&mut self, key: impl Into<String>, values: Vec<ArrayD<f32>>) {
        self.entries.insert(key.into(), ParamEntry::Group(values));
    }

    pub fn get(&self, key: &str) -> Option<&ParamEntry> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Number of tensors, counting list entries individually
    pub fn count(&self) -> usize {
        self.entries.values().map(ParamEntry::len).sum()
    }

    /// Flattened `(key, value)` pairs; list entries are keyed `key[i]`
    pub fn flatten(&self) -> Vec<(String, ArrayD<f32>)> {
        let mut flat = Vec::with_capacity(self.count());
        for (key, entry) in &self.entries {
            match entry {
                ParamEntry::Single(value) => flat.push((key.clone(), value.clone())),
                ParamEntry::Group(values) => {
                    for (i, value) in values.iter().enumerate() {
                        flat.push((format!("{}[{}]", key, i), value.clone()));
                    }
                }
            }
        }
        flat
    }
}

/// Named, shared, mutable parameter handle
#[derive(Clone)]
pub struct SharedParam {
    name: Arc<str>,
    value: Arc<RwLock<ArrayD<f32>>>,
}

impl SharedParam {
    pub fn new(name: impl Into<Arc<str>>, value: ArrayD<f32>) -> Self {
        Self {
            name: name.into(),
            value: Arc::new(RwLock::new(value)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the current value
    pub fn get(&self) -> ArrayD<f32> {
        self.value.read().clone()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ArrayD<f32>> {
        self.value.read()
    }

    pub fn set(&self, value: ArrayD<f32>) {
        *self.value.write() = value;
    }

    pub fn shape(&self) -> Vec<usize> {
        self.value.read().shape().to_vec()
    }

    /// True when both handles refer to the same storage
    pub fn ptr_eq(&self, other: &SharedParam) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for SharedParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedParam")
            .field("name", &self.name)
            .field("shape", &self.shape())
            .finish()
    }
}

/// Parameter as returned by `get_params`: the shared handle, or a
/// noise-perturbed copy of it when weight noise is active
#[derive(Debug, Clone)]
pub enum ParamRef {
    Shared(SharedParam),
    Perturbed {
        source: SharedParam,
        value: ArrayD<f32>,
    },
}

impl ParamRef {
    pub fn name(&self) -> &str {
        self.source().name()
    }

    pub fn source(&self) -> &SharedParam {
        match self {
            ParamRef::Shared(p) => p,
            ParamRef::Perturbed { source, .. } => source,
        }
    }

    pub fn is_perturbed(&self) -> bool {
        matches!(self, ParamRef::Perturbed { .. })
    }

    /// Numeric value used for computation
    pub fn value(&self) -> ArrayD<f32> {
        match self {
            ParamRef::Shared(p) => p.get(),
            ParamRef::Perturbed { value, .. } => value.clone(),
        }
    }
}
