// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Built cells.

A [`Cell`] is a constructed, registered instance of a [`CellClass`]. It
owns its attributes, the handles of its own parameters and the names of
its component cells; components live in the same [`BuildContext`] and are
reached through it.

Construction order:
1. required arguments and options are applied, then `init_attributes`
2. per-cell generators are derived from the session generator
3. components are declared, linked and built
4. `init_params` runs and every entry is bound to a shared handle
5. the cell is registered
*/

pub mod class;
pub mod components;
pub mod params;

pub use class::{ArgView, CellClass, ClassSpec, CostOutput, DistributionKey, ParamInit, SampleRequest};
pub use components::{ComponentSlot, ComponentTemplate, TemplateArg};
pub use params::{ParamEntry, ParamRef, ParamSet, SharedParam};

use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::ArrayD;
use parking_lot::{Mutex, MutexGuard};
use rand::rngs::StdRng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::attrs::KwargsExt;
use crate::context::BuildContext;
use crate::rng::normal_array;
use crate::types::{Kwargs, ModelError, ModelResult, Outputs};

/// Parameter span of one component cell inside the owner's flat list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentParams {
    /// Local key (`"RU"`, or `"layer_1"` for a replica)
    pub key: String,
    /// Full name of the component cell
    pub cell: String,
    pub count: usize,
}

#[derive(Debug)]
pub struct Cell {
    name: String,
    cell_type: String,
    class: Arc<dyn CellClass>,
    attrs: Kwargs,
    components: IndexMap<String, ComponentSlot>,
    /// Forwarded argument -> component key holding it
    passed: IndexMap<String, String>,
    layout: Vec<ComponentParams>,
    param_keys: Vec<String>,
    params: Vec<SharedParam>,
    n_component_params: usize,
    noise_rng: Mutex<StdRng>,
}

struct Prepared {
    components: IndexMap<String, ComponentSlot>,
    passed: IndexMap<String, String>,
}

impl Cell {
    /// Construct a cell from resolved keyword arguments and register it
    pub(crate) fn construct(
        ctx: &mut BuildContext,
        class: Arc<dyn CellClass>,
        name: &str,
        mut kwargs: Kwargs,
    ) -> ModelResult<()> {
        let cell_type = match kwargs.shift_remove("cell_type") {
            Some(Value::String(tag)) => tag,
            _ => class.tag().to_string(),
        };
        kwargs.shift_remove("name");

        let spec = class.spec();
        let mut attrs = Kwargs::new();
        for key in &spec.required {
            match kwargs.shift_remove(key) {
                Some(value) if !value.is_null() => {
                    attrs.insert(key.clone(), value);
                }
                _ => {
                    return Err(ModelError::MissingRequiredArgument {
                        cell: name.to_string(),
                        cell_type: cell_type.clone(),
                        key: key.clone(),
                    })
                }
            }
        }
        for (key, default) in &spec.options {
            let value = kwargs
                .shift_remove(key)
                .filter(|v| !v.is_null())
                .unwrap_or_else(|| default.clone());
            attrs.insert(key.clone(), value);
        }
        class.init_attributes(&mut attrs)?;

        let mut init_rng = ctx.derive_rng();
        let noise_rng = ctx.derive_rng();

        let prepared = set_components(ctx, class.as_ref(), name, &attrs, &mut kwargs)?;
        if !kwargs.is_empty() {
            warn!(
                target: "cortex-models",
                "Cell {} ({}) ignored arguments {:?}",
                name,
                cell_type,
                kwargs.keys().collect::<Vec<_>>()
            );
        }

        let (weight_scale, orthogonal) = (ctx.config().weight_scale, ctx.config().orthogonal_init);
        let param_set = class.init_params(&mut ParamInit {
            cell: name,
            attrs: &attrs,
            rng: &mut init_rng,
            weight_scale,
            orthogonal,
        })?;

        let mut layout = Vec::new();
        for (key, slot) in &prepared.components {
            let names = slot.cell_names();
            for (i, full) in names.iter().enumerate() {
                let local = match slot {
                    ComponentSlot::Group(_) => format!("{}_{}", key, i),
                    _ => key.clone(),
                };
                let count = ctx.cell(full)?.total_params();
                layout.push(ComponentParams {
                    key: local,
                    cell: full.clone(),
                    count,
                });
            }
        }
        let n_component_params = layout.iter().map(|c| c.count).sum();

        let mut param_keys = Vec::with_capacity(param_set.count());
        let mut params = Vec::with_capacity(param_set.count());
        for (key, value) in param_set.flatten() {
            let handle = ctx.register_param(&format!("{}.{}", name, key), value);
            param_keys.push(key);
            params.push(handle);
        }

        debug!(
            target: "cortex-models",
            "Built cell {} ({}): {} own params, {} component params",
            name,
            cell_type,
            params.len(),
            n_component_params
        );

        for (key, handle) in param_keys.iter().zip(&params) {
            debug!(target: "cortex-models", "  {}.{}: {:?}", name, key, handle.shape());
        }

        ctx.insert_cell(Cell {
            name: name.to_string(),
            cell_type,
            class,
            attrs,
            components: prepared.components,
            passed: prepared.passed,
            layout,
            param_keys,
            params,
            n_component_params,
            noise_rng: Mutex::new(noise_rng),
        });
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cell_type(&self) -> &str {
        &self.cell_type
    }

    pub fn class(&self) -> &Arc<dyn CellClass> {
        &self.class
    }

    pub fn attrs(&self) -> &Kwargs {
        &self.attrs
    }

    pub fn components(&self) -> &IndexMap<String, ComponentSlot> {
        &self.components
    }

    pub fn layout(&self) -> &[ComponentParams] {
        &self.layout
    }

    pub fn n_params(&self) -> usize {
        self.params.len()
    }

    pub fn n_component_params(&self) -> usize {
        self.n_component_params
    }

    pub fn total_params(&self) -> usize {
        self.params.len() + self.n_component_params
    }

    /// Handles of this cell's own parameters
    pub fn own_params(&self) -> &[SharedParam] {
        &self.params
    }

    /// Generator for dropout and sampling noise
    pub fn noise_rng(&self) -> MutexGuard<'_, StdRng> {
        self.noise_rng.lock()
    }

    /// Attribute value, forwarded to the component that received it when not held locally
    pub fn attr(&self, ctx: &BuildContext, key: &str) -> ModelResult<Value> {
        if let Some(value) = self.attrs.get(key) {
            return Ok(value.clone());
        }
        if let Some(component) = self.passed.get(key) {
            if let Some(slot) = self.components.get(component) {
                if let Some(first) = slot.cell_names().first() {
                    return ctx.cell(first)?.attr(ctx, key);
                }
            }
        }
        Err(ModelError::ReferenceNotFound(format!(
            "attribute `{}` of cell {}",
            key, self.name
        )))
    }

    /// Identifying arguments plus `cell_type`
    pub fn get_args(&self, ctx: &BuildContext) -> Kwargs {
        let mut args = Kwargs::new();
        args.insert("cell_type".to_string(), Value::from(self.cell_type.as_str()));
        for key in &self.class.spec().args {
            if let Ok(value) = self.attr(ctx, key) {
                args.insert(key.clone(), value);
            }
        }
        args
    }

    /// Component cell by key (or replica key `"<key>_<i>"`)
    pub fn component<'a>(&self, ctx: &'a BuildContext, key: &str) -> ModelResult<&'a Cell> {
        let full = match self.components.get(key) {
            Some(ComponentSlot::Single(full)) => Some(full),
            _ => self.layout.iter().find(|c| c.key == key).map(|c| &c.cell),
        };
        let full = full.ok_or_else(|| ModelError::ComponentNotFound {
            cell: self.name.clone(),
            key: key.to_string(),
        })?;
        ctx.cell(full)
    }

    /// Whether a component key is declared with a template
    pub fn has_component(&self, key: &str) -> bool {
        matches!(
            self.components.get(key),
            Some(ComponentSlot::Single(_)) | Some(ComponentSlot::Group(_))
        )
    }

    /// Every descendant cell, depth-first in declaration order
    pub fn get_components<'a>(&self, ctx: &'a BuildContext) -> ModelResult<Vec<&'a Cell>> {
        let mut out = Vec::new();
        for entry in &self.layout {
            let component = ctx.cell(&entry.cell)?;
            out.push(component);
            out.extend(component.get_components(ctx)?);
        }
        Ok(out)
    }

    /// Own parameters first, then each component's, in declaration order
    ///
    /// With noise on and a positive `weight_noise`, parameters whose key
    /// matches one of the class weights are returned as perturbed copies.
    pub fn get_params(&self, ctx: &BuildContext) -> ModelResult<Vec<ParamRef>> {
        let weight_noise = self
            .attrs
            .get_set("weight_noise")
            .and_then(Value::as_f64)
            .unwrap_or(0.0) as f32;
        let perturb = ctx.noise().is_on() && weight_noise > 0.0;
        let weights = &self.class.spec().weights;

        let mut out = Vec::with_capacity(self.total_params());
        for (key, handle) in self.param_keys.iter().zip(&self.params) {
            if perturb && weights.iter().any(|w| key.contains(w.as_str())) {
                let value = handle.get();
                let noise = normal_array(&mut *self.noise_rng.lock(), value.shape(), weight_noise);
                out.push(ParamRef::Perturbed {
                    source: handle.clone(),
                    value: value + noise,
                });
            } else {
                out.push(ParamRef::Shared(handle.clone()));
            }
        }
        for component in &self.layout {
            out.extend(ctx.cell(&component.cell)?.get_params(ctx)?);
        }
        Ok(out)
    }

    /// Numeric values of `get_params`
    pub fn param_values(&self, ctx: &BuildContext) -> ModelResult<Vec<ArrayD<f32>>> {
        Ok(self.get_params(ctx)?.iter().map(ParamRef::value).collect())
    }

    /// Slice of a flat parameter list belonging to this cell (`None`) or one component
    pub fn select_params<'p, T>(&self, key: Option<&str>, params: &'p [T]) -> ModelResult<&'p [T]> {
        let (start, len) = match key {
            None => (0, self.params.len()),
            Some(key) => {
                let mut start = self.params.len();
                let mut found = None;
                for component in &self.layout {
                    if component.key == key {
                        found = Some((start, component.count));
                        break;
                    }
                    start += component.count;
                }
                found.ok_or_else(|| ModelError::ComponentNotFound {
                    cell: self.name.clone(),
                    key: key.to_string(),
                })?
            }
        };
        params.get(start..start + len).ok_or_else(|| {
            ModelError::shape(
                format!("select_params on {}", self.name),
                format!("need {} parameters, got {}", start + len, params.len()),
            )
        })
    }

    /// Parameter name -> shape for this cell and its components
    pub fn profile_params(&self, ctx: &BuildContext) -> ModelResult<IndexMap<String, Vec<usize>>> {
        Ok(self
            .get_params(ctx)?
            .iter()
            .map(|p| (p.name().to_string(), p.source().shape()))
            .collect())
    }

    /// Run the forward computation with the current parameters
    pub fn call(&self, ctx: &BuildContext, inputs: Vec<ArrayD<f32>>) -> ModelResult<Outputs> {
        let params = self.param_values(ctx)?;
        let inputs = self.class.init_args(self, inputs)?;
        self.class.feed(self, ctx, &inputs, &params)
    }

    /// Forward computation with explicit parameter values (as selected by an owner)
    pub fn feed(&self, ctx: &BuildContext, inputs: &[ArrayD<f32>], params: &[ArrayD<f32>]) -> ModelResult<Outputs> {
        self.class.feed(self, ctx, inputs, params)
    }

    pub fn cost(&self, ctx: &BuildContext, data: &Outputs) -> ModelResult<CostOutput> {
        self.class.cost(self, ctx, data)
    }

    pub fn sample(&self, ctx: &BuildContext, request: &SampleRequest) -> ModelResult<Outputs> {
        self.class.sample(self, ctx, request)
    }
}

/// Declare, link and build the components of `owner`
///
/// Consumes component override maps and forwarded arguments from `kwargs`.
fn set_components(
    ctx: &mut BuildContext,
    class: &dyn CellClass,
    owner: &str,
    attrs: &Kwargs,
    kwargs: &mut Kwargs,
) -> ModelResult<Prepared> {
    let templates = class.components(attrs)?;
    let mut components = IndexMap::new();
    let mut passed = IndexMap::new();

    for (key, template) in templates {
        let Some(mut template) = template else {
            components.insert(key, ComponentSlot::Empty);
            continue;
        };

        match kwargs.shift_remove(&key) {
            Some(Value::Object(overrides)) => template.apply_overrides(&overrides),
            Some(Value::Null) | None => {}
            Some(other) => return Err(ModelError::type_mismatch(&key, "component override object", &other)),
        }

        let type_value = template
            .cell_type
            .as_ref()
            .ok_or_else(|| ModelError::MissingRequiredArgument {
                cell: format!("{}.{}", owner, key),
                cell_type: "component".to_string(),
                key: "cell_type".to_string(),
            })?
            .resolve(owner, attrs)?;
        let cell_type = type_value
            .as_str()
            .ok_or_else(|| ModelError::type_mismatch("cell_type", "string", &type_value))?
            .to_string();
        let component_class = ctx.resolve_class(&cell_type)?;

        let mut args = Kwargs::new();
        for (arg, value) in &template.args {
            args.insert(arg.clone(), value.resolve(owner, attrs)?);
        }
        for (arg, value) in &template.forced {
            args.insert(arg.clone(), value.clone());
        }
        let forwarded = template
            .passed
            .iter()
            .chain(component_class.spec().args.iter());
        for arg in forwarded {
            if let Some(value) = kwargs.shift_remove(arg) {
                args.insert(arg.clone(), value);
                passed.insert(arg.clone(), key.clone());
            } else {
                passed.entry(arg.clone()).or_insert_with(|| key.clone());
            }
        }

        let mut names = Vec::new();
        for local in template.instance_names(&key) {
            names.push(ctx.prepare_cell(&cell_type, Some(owner), Some(&local), args.clone())?);
        }
        let slot = match (template.replicas, names.pop()) {
            (None, Some(full)) => ComponentSlot::Single(full),
            (_, last) => {
                names.extend(last);
                ComponentSlot::Group(names)
            }
        };
        components.insert(key, slot);
    }

    for (from, to) in &class.spec().links {
        ctx.add_link(&format!("{}.{}", owner, from), &format!("{}.{}", owner, to))?;
    }

    for slot in components.values() {
        for full in slot.cell_names() {
            ctx.build(Some(full))?;
        }
    }

    Ok(Prepared { components, passed })
}
