// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Cell classes.

A [`CellClass`] carries the static metadata of a cell variant
([`ClassSpec`]) and its behavior hooks: attribute derivation, component
templates, parameter initialization, link dimension resolution and the
forward computation. Classes are registered by tag in a
[`crate::ClassRegistry`] and instantiated by the build context.
*/

use std::fmt;

use indexmap::IndexMap;
use ndarray::ArrayD;
use rand::rngs::StdRng;
use serde_json::Value;

use super::components::ComponentTemplate;
use super::params::ParamSet;
use super::Cell;
use crate::context::BuildContext;
use crate::init::norm_weight;
use crate::link::Link;
use crate::rng::normal_array;
use crate::types::{ArgRecord, CellArg, Kwargs, ModelError, ModelResult, Outputs};

/// Where a cell's distribution tag is read from when a link asks for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributionKey {
    /// Read the named argument of the cell
    Argument(String),
    /// The cell's own type tag
    CellType,
}

impl DistributionKey {
    /// Argument name a link back-fills and answers for
    pub fn arg_name(&self) -> &str {
        match self {
            DistributionKey::Argument(name) => name,
            DistributionKey::CellType => "cell_type",
        }
    }
}

/// Static metadata of a cell class
#[derive(Debug, Clone, Default)]
pub struct ClassSpec {
    pub tag: String,
    /// Arguments that must be present and non-null at construction
    pub required: Vec<String>,
    /// Optional arguments and their defaults
    pub options: Kwargs,
    /// Identifying arguments: reported by `get_args` and forwarded from owners
    pub args: Vec<String>,
    /// Link port -> argument carrying that port's dimension
    pub dim_map: IndexMap<String, String>,
    /// Link port -> argument carrying that port's distribution tag
    pub dist_map: IndexMap<String, String>,
    pub distribution: Option<DistributionKey>,
    pub components: IndexMap<String, Option<ComponentTemplate>>,
    /// `(from, to)` links between components, relative to the owner
    pub links: Vec<(String, String)>,
    /// Substrings selecting parameters that receive weight noise
    pub weights: Vec<String>,
}

impl ClassSpec {
    /// Spec with the base-cell option `weight_noise = 0`
    pub fn new(tag: impl Into<String>) -> Self {
        let mut options = Kwargs::new();
        options.insert("weight_noise".to_string(), Value::from(0));
        Self {
            tag: tag.into(),
            options,
            ..Self::default()
        }
    }

    pub fn required(mut self, keys: &[&str]) -> Self {
        self.required = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Replace the option table
    pub fn options(mut self, options: &[(&str, Value)]) -> Self {
        self.options = options
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self
    }

    pub fn args(mut self, keys: &[&str]) -> Self {
        self.args = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn dim(mut self, port: &str, arg: &str) -> Self {
        self.dim_map.insert(port.to_string(), arg.to_string());
        self
    }

    pub fn dist(mut self, port: &str, arg: &str) -> Self {
        self.dist_map.insert(port.to_string(), arg.to_string());
        self
    }

    pub fn distribution(mut self, key: DistributionKey) -> Self {
        self.distribution = Some(key);
        self
    }

    pub fn component(mut self, key: &str, template: Option<ComponentTemplate>) -> Self {
        self.components.insert(key.to_string(), template);
        self
    }

    pub fn link(mut self, from: &str, to: &str) -> Self {
        self.links.push((from.to_string(), to.to_string()));
        self
    }

    pub fn weights(mut self, keys: &[&str]) -> Self {
        self.weights = keys.iter().map(|k| k.to_string()).collect();
        self
    }
}

/// Read-only view of a cell's argument record during link resolution
///
/// Link arguments read through to the link's value when it is known.
#[derive(Debug, Clone, Copy)]
pub struct ArgView<'a> {
    record: &'a ArgRecord,
    links: &'a [Link],
}

impl<'a> ArgView<'a> {
    pub fn new(record: &'a ArgRecord, links: &'a [Link]) -> Self {
        Self { record, links }
    }

    /// Value of an argument; null and unresolved links read as `None`
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.record.get(key)? {
            CellArg::Value(Value::Null) => None,
            CellArg::Value(value) => Some(value.clone()),
            CellArg::Link(id) => self.links.get(id.index())?.value().cloned(),
        }
    }

    /// Literal (non-link, non-null) value of an argument
    pub fn get_literal(&self, key: &str) -> Option<&'a Value> {
        self.record
            .get(key)
            .and_then(CellArg::as_value)
            .filter(|v| !v.is_null())
    }

    pub fn record(&self) -> &'a ArgRecord {
        self.record
    }
}

/// Inputs to `init_params`
pub struct ParamInit<'a> {
    pub cell: &'a str,
    pub attrs: &'a Kwargs,
    pub rng: &'a mut StdRng,
    pub weight_scale: f32,
    pub orthogonal: bool,
}

impl ParamInit<'_> {
    pub fn norm_weight(&mut self, dim_in: usize, dim_out: usize) -> ArrayD<f32> {
        norm_weight(self.rng, dim_in, dim_out, self.weight_scale, self.orthogonal)
    }

    pub fn normal(&mut self, shape: &[usize]) -> ArrayD<f32> {
        normal_array(self.rng, shape, self.weight_scale)
    }
}

/// Result of a cost computation
#[derive(Debug, Clone, Default)]
pub struct CostOutput {
    pub cost: f32,
    /// Parameter name -> replacement value, for running-statistics parameters
    pub updates: IndexMap<String, ArrayD<f32>>,
}

/// Inputs to unrolled sampling
#[derive(Debug, Clone)]
pub struct SampleRequest {
    /// Random variables, `(steps, batch, dim)`
    pub epsilon: ArrayD<f32>,
    pub x0: Option<ArrayD<f32>>,
    pub h0: Option<ArrayD<f32>>,
    pub context: Option<ArrayD<f32>>,
}

impl SampleRequest {
    pub fn new(epsilon: ArrayD<f32>) -> Self {
        Self {
            epsilon,
            x0: None,
            h0: None,
            context: None,
        }
    }
}

/// Behavior of a cell variant
pub trait CellClass: Send + Sync + fmt::Debug {
    fn spec(&self) -> &ClassSpec;

    fn tag(&self) -> &str {
        &self.spec().tag
    }

    /// Validate attributes and derive computed ones after options are applied
    fn init_attributes(&self, _attrs: &mut Kwargs) -> ModelResult<()> {
        Ok(())
    }

    /// Component templates for a cell with these attributes
    fn components(&self, _attrs: &Kwargs) -> ModelResult<IndexMap<String, Option<ComponentTemplate>>> {
        Ok(self.spec().components.clone())
    }

    fn init_params(&self, _init: &mut ParamInit<'_>) -> ModelResult<ParamSet> {
        Ok(ParamSet::new())
    }

    /// Dimension a link port offers, if known from the current arguments
    fn set_link_value(&self, key: &str, args: &ArgView<'_>) -> ModelResult<Option<Value>> {
        let arg = self
            .spec()
            .dim_map
            .get(key)
            .ok_or_else(|| ModelError::UnsupportedKey {
                owner: self.tag().to_string(),
                key: key.to_string(),
            })?;
        Ok(args.get(arg))
    }

    /// Distribution tag a link port offers, if any
    fn set_link_distribution(&self, key: &str, args: &ArgView<'_>) -> ModelResult<Option<String>> {
        Ok(self
            .spec()
            .dist_map
            .get(key)
            .and_then(|arg| args.get_literal(arg))
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    /// Fill in defaulted call inputs
    fn init_args(&self, _cell: &Cell, inputs: Vec<ArrayD<f32>>) -> ModelResult<Vec<ArrayD<f32>>> {
        Ok(inputs)
    }

    /// Forward computation; the base cell passes its inputs through
    fn feed(
        &self,
        _cell: &Cell,
        _ctx: &BuildContext,
        inputs: &[ArrayD<f32>],
        _params: &[ArrayD<f32>],
    ) -> ModelResult<Outputs> {
        Ok(inputs
            .iter()
            .enumerate()
            .map(|(i, x)| (format!("X_{}", i), x.clone()))
            .collect())
    }

    fn cost(&self, _cell: &Cell, _ctx: &BuildContext, _data: &Outputs) -> ModelResult<CostOutput> {
        Err(ModelError::UnsupportedOperation {
            cell_type: self.tag().to_string(),
            operation: "cost".to_string(),
        })
    }

    fn sample(&self, _cell: &Cell, _ctx: &BuildContext, _request: &SampleRequest) -> ModelResult<Outputs> {
        Err(ModelError::UnsupportedOperation {
            cell_type: self.tag().to_string(),
            operation: "sampling".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LinkId;
    use serde_json::json;

    #[derive(Debug)]
    struct Probe {
        spec: ClassSpec,
    }

    impl CellClass for Probe {
        fn spec(&self) -> &ClassSpec {
            &self.spec
        }
    }

    fn probe() -> Probe {
        Probe {
            spec: ClassSpec::new("Probe")
                .required(&["dim_in"])
                .dim("input", "dim_in")
                .dim("output", "dim_out")
                .dist("output", "kind"),
        }
    }

    #[test]
    fn test_default_link_value_reads_dim_map() {
        let mut record = ArgRecord::new();
        record.insert("dim_in".to_string(), CellArg::Value(json!(5)));
        record.insert("dim_out".to_string(), CellArg::Value(Value::Null));
        record.insert("kind".to_string(), CellArg::Value(json!("gaussian")));
        let view = ArgView::new(&record, &[]);

        let class = probe();
        assert_eq!(class.set_link_value("input", &view).unwrap(), Some(json!(5)));
        assert_eq!(class.set_link_value("output", &view).unwrap(), None);
        assert!(matches!(
            class.set_link_value("hidden", &view),
            Err(ModelError::UnsupportedKey { .. })
        ));
        assert_eq!(
            class.set_link_distribution("output", &view).unwrap(),
            Some("gaussian".to_string())
        );
        assert_eq!(class.set_link_distribution("input", &view).unwrap(), None);
    }

    #[test]
    fn test_view_reads_through_links() {
        let mut link = Link::declare("a.output", "b.input");
        link.set_value(json!(9));
        let mut record = ArgRecord::new();
        record.insert("dim_in".to_string(), CellArg::Link(LinkId(0)));
        let links = vec![link];
        let view = ArgView::new(&record, &links);
        assert_eq!(view.get("dim_in"), Some(json!(9)));
        assert_eq!(view.get_literal("dim_in"), None);
    }

    #[test]
    fn test_base_options_include_weight_noise() {
        let spec = ClassSpec::new("Cell");
        assert_eq!(spec.options.get("weight_noise"), Some(&json!(0)));
        assert_eq!(DistributionKey::CellType.arg_name(), "cell_type");
    }
}
