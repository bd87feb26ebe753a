// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Class registries.

Cell and dataset classes are registered by tag. Cell classes are checked
at registration: their links must name declared components and their
dimension maps must name non-empty arguments.
*/

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::cell::CellClass;
use crate::datasets::{DatasetClass, DeclaredDataset};
use crate::layers;
use crate::link::split_reference;
use crate::types::{ModelError, ModelResult};

/// Tag -> cell class
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: IndexMap<String, Arc<dyn CellClass>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every built-in cell class
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for class in layers::builtin_classes() {
            let tag = class.tag().to_string();
            if let Err(e) = registry.register(tag, class) {
                warn!(target: "cortex-models", "Skipping built-in class: {}", e);
            }
        }
        registry
    }

    /// Register a class under `tag`, replacing any previous holder
    pub fn register(&mut self, tag: impl Into<String>, class: Arc<dyn CellClass>) -> ModelResult<()> {
        let tag = tag.into();
        validate_class(&tag, class.as_ref())?;
        if self.classes.insert(tag.clone(), class).is_some() {
            warn!(target: "cortex-models", "Cell class `{}` re-registered", tag);
        } else {
            debug!(target: "cortex-models", "Registered cell class `{}`", tag);
        }
        Ok(())
    }

    pub fn resolve(&self, tag: &str) -> ModelResult<Arc<dyn CellClass>> {
        self.classes
            .get(tag)
            .cloned()
            .ok_or_else(|| ModelError::UnknownCellType {
                tag: tag.to_string(),
                available: self.tags(),
            })
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.classes.contains_key(tag)
    }

    pub fn tags(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }
}

fn validate_class(tag: &str, class: &dyn CellClass) -> ModelResult<()> {
    let spec = class.spec();
    let invalid = |reason: String| ModelError::InvalidClass {
        tag: tag.to_string(),
        reason,
    };

    for (port, arg) in &spec.dim_map {
        if port.is_empty() || arg.is_empty() {
            return Err(invalid(format!("dimension map entry `{}` -> `{}` is empty", port, arg)));
        }
    }
    for (port, arg) in &spec.dist_map {
        if port.is_empty() || arg.is_empty() {
            return Err(invalid(format!("distribution map entry `{}` -> `{}` is empty", port, arg)));
        }
    }
    for key in &spec.required {
        if spec.options.contains_key(key) {
            return Err(invalid(format!("`{}` is both required and optional", key)));
        }
    }
    for (from, to) in &spec.links {
        for reference in [from, to] {
            let (component, _) = split_reference(reference).map_err(|_| {
                invalid(format!("link endpoint `{}` is not `<component>.<port>`", reference))
            })?;
            if !spec.components.contains_key(component) {
                return Err(invalid(format!(
                    "link endpoint `{}` names undeclared component `{}`",
                    reference, component
                )));
            }
        }
    }
    Ok(())
}

/// Tag -> dataset class
#[derive(Debug, Clone)]
pub struct DatasetRegistry {
    classes: IndexMap<String, Arc<dyn DatasetClass>>,
}

impl Default for DatasetRegistry {
    fn default() -> Self {
        let mut classes: IndexMap<String, Arc<dyn DatasetClass>> = IndexMap::new();
        classes.insert("Declared".to_string(), Arc::new(DeclaredDataset));
        Self { classes }
    }
}

impl DatasetRegistry {
    pub fn register(&mut self, tag: impl Into<String>, class: Arc<dyn DatasetClass>) {
        let tag = tag.into();
        if self.classes.insert(tag.clone(), class).is_some() {
            warn!(target: "cortex-models", "Dataset class `{}` re-registered", tag);
        }
    }

    pub fn resolve(&self, tag: &str) -> ModelResult<Arc<dyn DatasetClass>> {
        self.classes
            .get(tag)
            .cloned()
            .ok_or_else(|| ModelError::UnknownDatasetType {
                tag: tag.to_string(),
                available: self.classes.keys().cloned().collect(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{ClassSpec, ComponentTemplate};

    #[derive(Debug)]
    struct Custom(ClassSpec);

    impl CellClass for Custom {
        fn spec(&self) -> &ClassSpec {
            &self.0
        }
    }

    #[test]
    fn test_builtin_tags() {
        let registry = ClassRegistry::with_builtin();
        for tag in ["Cell", "MLP", "DistributionMLP", "RNN", "GenRNN", "CNN2D"] {
            assert!(registry.contains(tag), "missing {}", tag);
        }
    }

    #[test]
    fn test_unknown_tag_lists_available() {
        let registry = ClassRegistry::with_builtin();
        match registry.resolve("LSTM") {
            Err(ModelError::UnknownCellType { tag, available }) => {
                assert_eq!(tag, "LSTM");
                assert!(available.contains(&"MLP".to_string()));
            }
            other => panic!("expected UnknownCellType, got {:?}", other),
        }
    }

    #[test]
    fn test_link_to_undeclared_component_is_rejected() {
        let spec = ClassSpec::new("Broken")
            .component("a", Some(ComponentTemplate::new("MLP")))
            .link("a.output", "b.input");
        let mut registry = ClassRegistry::new();
        let err = registry.register("Broken", Arc::new(Custom(spec))).unwrap_err();
        assert!(matches!(err, ModelError::InvalidClass { .. }));
    }

    #[test]
    fn test_empty_dim_entry_is_rejected() {
        let spec = ClassSpec::new("Broken").dim("input", "");
        let mut registry = ClassRegistry::new();
        assert!(registry.register("Broken", Arc::new(Custom(spec))).is_err());
    }

    #[test]
    fn test_empty_dist_entry_is_rejected() {
        let mut registry = ClassRegistry::new();
        let spec = ClassSpec::new("Broken").dim("P", "dim_out").dist("P", "");
        let err = registry.register("Broken", Arc::new(Custom(spec))).unwrap_err();
        assert!(matches!(err, ModelError::InvalidClass { ref reason, .. } if reason.contains("distribution map")));

        let spec = ClassSpec::new("Broken").dist("", "distribution_type");
        assert!(registry.register("Broken", Arc::new(Custom(spec))).is_err());
        assert!(!registry.contains("Broken"));
    }

    #[test]
    fn test_dataset_registry_has_declared() {
        let registry = DatasetRegistry::default();
        assert!(registry.resolve("Declared").is_ok());
        assert!(matches!(
            registry.resolve("MNIST"),
            Err(ModelError::UnknownDatasetType { .. })
        ));
    }
}
