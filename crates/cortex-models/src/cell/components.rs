// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Component templates.

A composite cell declares its sub-cells as templates. Template arguments
are literals or references to the owner's attributes, resolved when the
owner is constructed.
*/

use indexmap::IndexMap;
use serde_json::Value;

use crate::types::{Kwargs, ModelError, ModelResult};

/// Template argument value
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateArg {
    Literal(Value),
    /// Read the named attribute of the owning cell
    OwnerAttribute(String),
}

impl TemplateArg {
    pub fn resolve(&self, owner: &str, attrs: &Kwargs) -> ModelResult<Value> {
        match self {
            TemplateArg::Literal(value) => Ok(value.clone()),
            TemplateArg::OwnerAttribute(name) => attrs.get(name).cloned().ok_or_else(|| {
                ModelError::ReferenceNotFound(format!("attribute `{}` of cell {}", name, owner))
            }),
        }
    }
}

impl From<Value> for TemplateArg {
    fn from(value: Value) -> Self {
        TemplateArg::Literal(value)
    }
}

/// Declaration of one component slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentTemplate {
    pub cell_type: Option<TemplateArg>,
    pub args: IndexMap<String, TemplateArg>,
    /// Owner keyword arguments forwarded to (and consumed by) this component
    pub passed: Vec<String>,
    /// Arguments forced onto the component
    pub forced: Kwargs,
    /// Build this many copies named `<key>_<i>`
    pub replicas: Option<usize>,
}

impl ComponentTemplate {
    pub fn new(cell_type: &str) -> Self {
        Self {
            cell_type: Some(TemplateArg::Literal(Value::from(cell_type))),
            ..Self::default()
        }
    }

    /// Component whose type is read from an owner attribute
    pub fn typed_by(attribute: &str) -> Self {
        Self {
            cell_type: Some(TemplateArg::OwnerAttribute(attribute.to_string())),
            ..Self::default()
        }
    }

    pub fn arg(mut self, key: &str, value: Value) -> Self {
        self.args.insert(key.to_string(), TemplateArg::Literal(value));
        self
    }

    pub fn owner_arg(mut self, key: &str, attribute: &str) -> Self {
        self.args
            .insert(key.to_string(), TemplateArg::OwnerAttribute(attribute.to_string()));
        self
    }

    pub fn passed(mut self, keys: &[&str]) -> Self {
        self.passed = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn force(mut self, key: &str, value: Value) -> Self {
        self.forced.insert(key.to_string(), value);
        self
    }

    pub fn replicas(mut self, n: usize) -> Self {
        self.replicas = Some(n);
        self
    }

    /// Apply an owner-supplied override map (`{"<component>": {...}}`)
    pub fn apply_overrides(&mut self, overrides: &serde_json::Map<String, Value>) {
        for (key, value) in overrides {
            if key == "cell_type" {
                self.cell_type = Some(TemplateArg::Literal(value.clone()));
            } else {
                self.args.insert(key.clone(), TemplateArg::Literal(value.clone()));
            }
        }
    }

    /// Local names of the cells this template produces
    pub fn instance_names(&self, key: &str) -> Vec<String> {
        match self.replicas {
            Some(n) => (0..n).map(|i| format!("{}_{}", key, i)).collect(),
            None => vec![key.to_string()],
        }
    }
}

/// What a component key resolved to on a built cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentSlot {
    /// Declared with no template
    Empty,
    /// Full name of the component cell
    Single(String),
    /// Full names of replicated component cells
    Group(Vec<String>),
}

impl ComponentSlot {
    pub fn cell_names(&self) -> &[String] {
        match self {
            ComponentSlot::Empty => &[],
            ComponentSlot::Single(name) => std::slice::from_ref(name),
            ComponentSlot::Group(names) => names,
        }
    }
}
