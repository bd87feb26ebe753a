// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Dimension-propagating links.

A link connects `"<owner>.<port>"` references on two cells (or a dataset
and a cell). Resolution infers the shared dimension and distribution from
whichever endpoint knows them; each cell endpoint becomes a [`Node`] that
can later query the link for the arguments it was back-filled with.
*/

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::cell::{ArgView, DistributionKey};
use crate::context::BuildContext;
use crate::types::{ModelError, ModelResult};

/// A cell endpoint of a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub cell_type: String,
    /// Port name on the cell (`input`, `output`, ...)
    pub link_key: String,
    /// Argument carrying the port's dimension
    pub dim_key: String,
    pub dist_key: Option<DistributionKey>,
}

#[derive(Debug, Clone)]
pub struct Link {
    name: String,
    source: String,
    target: String,
    value: Option<Value>,
    distribution: Option<String>,
    nodes: IndexMap<String, Node>,
}

enum Endpoint {
    Dataset { name: String, key: String },
    Cell { name: String, key: String, cell_type: String },
}

/// Split `"owner.key"` at the last dot
pub fn split_reference(reference: &str) -> ModelResult<(&str, &str)> {
    reference
        .rsplit_once('.')
        .filter(|(owner, key)| !owner.is_empty() && !key.is_empty())
        .ok_or_else(|| ModelError::ReferenceNotFound(format!("malformed reference `{}`", reference)))
}

impl Link {
    /// Unresolved link between two references
    pub fn declare(source: &str, target: &str) -> Self {
        Self {
            name: format!("{}->{}", source, target),
            source: source.to_string(),
            target: target.to_string(),
            value: None,
            distribution: None,
            nodes: IndexMap::new(),
        }
    }

    /// Declare and resolve against a build context
    pub fn new(source: &str, target: &str, ctx: &BuildContext) -> ModelResult<Self> {
        let mut link = Self::declare(source, target);
        link.resolve(ctx)?;
        Ok(link)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn distribution(&self) -> Option<&str> {
        self.distribution.as_deref()
    }

    pub fn nodes(&self) -> &IndexMap<String, Node> {
        &self.nodes
    }

    pub fn is_resolved(&self) -> bool {
        self.value.is_some()
    }

    #[cfg(test)]
    pub(crate) fn set_value(&mut self, value: Value) {
        self.value = Some(value);
    }

    fn endpoint(&self, reference: &str, ctx: &BuildContext) -> ModelResult<Endpoint> {
        let (owner, key) = split_reference(reference)?;
        if ctx.datasets().contains_key(owner) {
            return Ok(Endpoint::Dataset {
                name: owner.to_string(),
                key: key.to_string(),
            });
        }
        let cell_type = ctx.cell_type_of(owner).ok_or_else(|| {
            ModelError::ReferenceNotFound(format!(
                "`{}` (from link {}) is neither a dataset nor a declared cell",
                owner, self.name
            ))
        })?;
        Ok(Endpoint::Cell {
            name: owner.to_string(),
            key: key.to_string(),
            cell_type,
        })
    }

    fn node_for(&self, key: &str, cell_type: &str, ctx: &BuildContext) -> ModelResult<Node> {
        let class = ctx.resolve_class(cell_type)?;
        let spec = class.spec();
        let dim_key = spec.dim_map.get(key).ok_or_else(|| ModelError::UnsupportedKey {
            owner: format!("{} (link {})", cell_type, self.name),
            key: key.to_string(),
        })?;
        Ok(Node {
            cell_type: cell_type.to_string(),
            link_key: key.to_string(),
            dim_key: dim_key.clone(),
            dist_key: spec.distribution.clone(),
        })
    }

    /// Infer value and distribution from the endpoints and record cell nodes
    pub fn resolve(&mut self, ctx: &BuildContext) -> ModelResult<()> {
        let source = self.endpoint(&self.source, ctx)?;
        let target = self.endpoint(&self.target, ctx)?;

        let mut nodes = IndexMap::new();
        for endpoint in [&source, &target] {
            if let Endpoint::Cell { name, key, cell_type } = endpoint {
                nodes.insert(name.clone(), self.node_for(key, cell_type, ctx)?);
            }
        }

        match (&source, &target) {
            (Endpoint::Dataset { .. }, Endpoint::Dataset { .. }) => {
                return Err(ModelError::InvalidLink {
                    link: self.name.clone(),
                    reason: "cannot link two datasets".to_string(),
                });
            }
            (Endpoint::Dataset { name, key }, _) | (_, Endpoint::Dataset { name, key }) => {
                let info = ctx
                    .datasets()
                    .get(name)
                    .ok_or_else(|| ModelError::ReferenceNotFound(format!("dataset `{}`", name)))?;
                let value = info.dims.get(key).cloned().ok_or_else(|| {
                    ModelError::ReferenceNotFound(format!("dimension `{}` of dataset `{}`", key, name))
                })?;
                self.value = Some(value);
                self.distribution = info.distributions.get(key).cloned();
            }
            _ => {
                let mut value = None;
                let mut distribution = None;
                // Target is asked first; a source answer overrides it
                for endpoint in [&target, &source] {
                    if let Endpoint::Cell { name, key, cell_type } = endpoint {
                        let class = ctx.resolve_class(cell_type)?;
                        let record = ctx.cell_record(name)?;
                        let view = ArgView::new(record, ctx.links());
                        if let Some(v) = class.set_link_value(key, &view)? {
                            value = Some(v);
                        }
                        if let Some(d) = class.set_link_distribution(key, &view)? {
                            distribution = Some(d);
                        }
                    }
                }
                let value = value.ok_or_else(|| ModelError::UnresolvableLink(self.name.clone()))?;
                self.value = Some(value);
                self.distribution = distribution;
            }
        }

        self.nodes = nodes;
        debug!(
            target: "cortex-models",
            "Resolved link {} (value={:?}, distribution={:?})",
            self.name, self.value, self.distribution
        );
        Ok(())
    }

    /// Answer a node's query for one of its arguments
    pub fn query(&self, node_name: &str, key: &str) -> ModelResult<Value> {
        let value = self
            .value
            .as_ref()
            .ok_or_else(|| ModelError::LinkNotReady(self.name.clone()))?;
        let node = self.nodes.get(node_name).ok_or_else(|| {
            ModelError::ReferenceNotFound(format!("link {} has no node `{}`", self.name, node_name))
        })?;

        if key == node.dim_key {
            return Ok(value.clone());
        }
        let dist_arg = node.dist_key.as_ref().map(DistributionKey::arg_name);
        if key == "cell_type" || Some(key) == dist_arg {
            return Ok(self
                .distribution
                .as_ref()
                .map(|d| Value::from(d.as_str()))
                .unwrap_or(Value::Null));
        }
        Err(ModelError::UnsupportedKey {
            owner: format!("link {} node {}", self.name, node_name),
            key: key.to_string(),
        })
    }
}
