// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Dataset descriptors.

Models only need a dataset's per-key dimensions and distribution tags to
resolve links against it; loading the data itself is out of scope. A
[`DatasetClass`] turns keyword arguments into a [`DatasetInfo`].
*/

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Kwargs, ModelError, ModelResult};

/// Dimensions and distributions a dataset exposes per key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub dims: IndexMap<String, Value>,
    #[serde(default)]
    pub distributions: IndexMap<String, String>,
}

impl DatasetInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: declare a key's dimension
    pub fn with_dim(mut self, key: &str, dim: Value) -> Self {
        self.dims.insert(key.to_string(), dim);
        self
    }

    /// Builder: declare a key's distribution
    pub fn with_distribution(mut self, key: &str, distribution: &str) -> Self {
        self.distributions
            .insert(key.to_string(), distribution.to_string());
        self
    }
}

/// Factory for dataset descriptors
pub trait DatasetClass: Send + Sync + fmt::Debug {
    fn tag(&self) -> &str;

    fn describe(&self, name: &str, kwargs: &Kwargs) -> ModelResult<DatasetInfo>;
}

/// Dataset declared directly by its `dims` and `distributions` objects
#[derive(Debug, Default)]
pub struct DeclaredDataset;

impl DatasetClass for DeclaredDataset {
    fn tag(&self) -> &str {
        "Declared"
    }

    fn describe(&self, name: &str, kwargs: &Kwargs) -> ModelResult<DatasetInfo> {
        let mut info = DatasetInfo::new();
        match kwargs.get("dims") {
            Some(Value::Object(dims)) => {
                for (key, dim) in dims {
                    info.dims.insert(key.clone(), dim.clone());
                }
            }
            Some(other) => return Err(ModelError::type_mismatch("dims", "object", other)),
            None => {
                return Err(ModelError::MissingRequiredArgument {
                    cell: name.to_string(),
                    cell_type: self.tag().to_string(),
                    key: "dims".to_string(),
                })
            }
        }
        match kwargs.get("distributions") {
            Some(Value::Object(dists)) => {
                for (key, dist) in dists {
                    let tag = dist
                        .as_str()
                        .ok_or_else(|| ModelError::type_mismatch(key, "string", dist))?;
                    info.distributions.insert(key.clone(), tag.to_string());
                }
            }
            Some(Value::Null) | None => {}
            Some(other) => return Err(ModelError::type_mismatch("distributions", "object", other)),
        }
        Ok(info)
    }
}
