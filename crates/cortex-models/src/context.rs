// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Build context.

The [`BuildContext`] is the registry for one model-building session. It
holds the cell and dataset classes, the argument records of declared
cells, the links between them, the built cells and the shared trainable
parameters. Cells are declared with [`BuildContext::prepare_cell`],
connected with [`BuildContext::add_link`] and constructed lazily with
[`BuildContext::build`], at which point every linked argument is replaced
by the value its link resolved to.

## Example

```rust
use cortex_models::{BuildContext, DatasetInfo, Kwargs};
use serde_json::json;

let mut ctx = BuildContext::new();
ctx.add_dataset("data", DatasetInfo::new().with_dim("input", json!(784)));

let mut kwargs = Kwargs::new();
kwargs.insert("dim_out".to_string(), json!(10));
let mlp = ctx.prepare_cell("MLP", None, Some("classifier"), kwargs).unwrap();
ctx.add_link("data.input", "classifier.input").unwrap();
ctx.build(None).unwrap();

assert_eq!(ctx.cell(&mlp).unwrap().attrs()["dim_in"], json!(784));
```
*/

use std::sync::Arc;

use cortex_config::BuildConfig;
use indexmap::IndexMap;
use ndarray::ArrayD;
use rand::rngs::StdRng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cell::{Cell, CellClass, SharedParam};
use crate::datasets::{DatasetClass, DatasetInfo};
use crate::link::Link;
use crate::noise::NoiseSwitch;
use crate::registry::{ClassRegistry, DatasetRegistry};
use crate::rng::{derive, seeded};
use crate::types::{ArgRecord, CellArg, Kwargs, LinkId, ModelError, ModelResult};

#[derive(Debug)]
pub struct BuildContext {
    config: BuildConfig,
    classes: ClassRegistry,
    dataset_classes: DatasetRegistry,
    cells: IndexMap<String, Cell>,
    cell_args: IndexMap<String, ArgRecord>,
    links: Vec<Link>,
    tparams: IndexMap<String, SharedParam>,
    datasets: IndexMap<String, DatasetInfo>,
    noise: NoiseSwitch,
    rng: StdRng,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildContext {
    /// Context with default configuration and the built-in classes
    pub fn new() -> Self {
        Self::with_config(&BuildConfig::default())
    }

    pub fn with_config(config: &BuildConfig) -> Self {
        info!(
            target: "cortex-models",
            "Creating build context (seed={}, noise={})",
            config.seed, config.noise
        );
        Self {
            config: config.clone(),
            classes: ClassRegistry::with_builtin(),
            dataset_classes: DatasetRegistry::default(),
            cells: IndexMap::new(),
            cell_args: IndexMap::new(),
            links: Vec::new(),
            tparams: IndexMap::new(),
            datasets: IndexMap::new(),
            noise: NoiseSwitch::new(config.noise),
            rng: seeded(config.seed),
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    // ======================================================================
    // Classes
    // ======================================================================

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub fn add_cell_class(&mut self, tag: impl Into<String>, class: Arc<dyn CellClass>) -> ModelResult<()> {
        self.classes.register(tag, class)
    }

    pub fn add_dataset_class(&mut self, tag: impl Into<String>, class: Arc<dyn DatasetClass>) {
        self.dataset_classes.register(tag, class)
    }

    pub fn resolve_class(&self, tag: &str) -> ModelResult<Arc<dyn CellClass>> {
        self.classes.resolve(tag)
    }

    // ======================================================================
    // Datasets
    // ======================================================================

    pub fn datasets(&self) -> &IndexMap<String, DatasetInfo> {
        &self.datasets
    }

    pub fn add_dataset(&mut self, name: impl Into<String>, info: DatasetInfo) {
        let name = name.into();
        if self.datasets.insert(name.clone(), info).is_some() {
            warn!(target: "cortex-models", "Dataset `{}` replaced", name);
        } else {
            debug!(target: "cortex-models", "Added dataset `{}`", name);
        }
    }

    /// Describe a dataset with a registered dataset class and add it
    pub fn make_data(&mut self, dataset_type: &str, name: &str, kwargs: Kwargs) -> ModelResult<()> {
        let class = self.dataset_classes.resolve(dataset_type)?;
        let info = class.describe(name, &kwargs)?;
        self.add_dataset(name, info);
        Ok(())
    }

    // ======================================================================
    // Declaration
    // ======================================================================

    /// Declare a cell (or reconcile an existing declaration) and return its full name
    ///
    /// Naming: `"<type>_cell"` with neither name nor owner, `"<owner>.<type>"`
    /// with only an owner, `"<owner>.<name>"` with both, `name` alone otherwise.
    pub fn prepare_cell(
        &mut self,
        cell_type: &str,
        requestor: Option<&str>,
        name: Option<&str>,
        mut kwargs: Kwargs,
    ) -> ModelResult<String> {
        let name = match (name, requestor) {
            (None, None) => format!("{}_cell", cell_type),
            (None, Some(owner)) => format!("{}.{}", owner, cell_type),
            (Some(name), Some(owner)) => format!("{}.{}", owner, name),
            (Some(name), None) => name.to_string(),
        };
        self.resolve_class(cell_type)?;

        kwargs.shift_remove("name");
        kwargs.insert("cell_type".to_string(), Value::from(cell_type));
        self.match_args(&name, kwargs)?;
        debug!(target: "cortex-models", "Prepared cell {} ({})", name, cell_type);
        Ok(name)
    }

    /// Reconcile incoming arguments with a cell's record
    ///
    /// Built cells accept only keys they already have, with equal values.
    /// Unbuilt cells gain new keys and fill null ones; a pending link
    /// accepts a literal equal to its resolved value.
    pub fn match_args(&mut self, name: &str, kwargs: Kwargs) -> ModelResult<()> {
        let mismatch = |key: &str, existing: String, requested: &Value| ModelError::ArgumentMismatch {
            cell: name.to_string(),
            key: key.to_string(),
            existing,
            requested: requested.to_string(),
        };

        if self.cells.contains_key(name) {
            let record = self.cell_args.get(name);
            for (key, value) in &kwargs {
                let existing = record.and_then(|r| r.get(key)).ok_or_else(|| ModelError::UnknownArgument {
                    cell: name.to_string(),
                    key: key.clone(),
                })?;
                let current = match existing {
                    CellArg::Value(v) => Some(v.clone()),
                    CellArg::Link(id) => self
                        .links
                        .get(id.index())
                        .and_then(|link| link.query(name, key).ok()),
                };
                if value.is_null() || current.as_ref() == Some(value) {
                    continue;
                }
                let shown = current.as_ref().map(Value::to_string).unwrap_or_else(|| "unset".to_string());
                return Err(mismatch(key, shown, value));
            }
            return Ok(());
        }

        let links = &self.links;
        let record = self.cell_args.entry(name.to_string()).or_default();
        for (key, value) in kwargs {
            match record.get(&key) {
                None | Some(CellArg::Value(Value::Null)) => {
                    record.insert(key, CellArg::Value(value));
                }
                Some(CellArg::Value(existing)) => {
                    if !value.is_null() && existing != &value {
                        return Err(mismatch(&key, existing.to_string(), &value));
                    }
                }
                Some(CellArg::Link(id)) => {
                    if value.is_null() {
                        continue;
                    }
                    let link = &links[id.index()];
                    if link.query(name, &key).ok().as_ref() == Some(&value) {
                        record.insert(key, CellArg::Value(value));
                    } else {
                        return Err(mismatch(&key, format!("linked by {}", link.name()), &value));
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve and store a link, back-filling unset arguments of its cell endpoints
    ///
    /// An argument that already holds a value or an earlier link is kept.
    /// Records of built cells are frozen and never back-filled.
    pub fn add_link(&mut self, source: &str, target: &str) -> ModelResult<LinkId> {
        let link = Link::new(source, target, self)?;
        let id = LinkId(self.links.len());

        for (cell, node) in link.nodes() {
            if self.cells.contains_key(cell) {
                continue;
            }
            let record = self
                .cell_args
                .get_mut(cell)
                .ok_or_else(|| ModelError::ReferenceNotFound(format!("cell `{}`", cell)))?;
            if record.get(&node.dim_key).map_or(true, CellArg::is_unset) {
                record.insert(node.dim_key.clone(), CellArg::Link(id));
            }
            if let Some(dist_key) = &node.dist_key {
                let arg = dist_key.arg_name();
                if record.get(arg).map_or(true, CellArg::is_unset) {
                    record.insert(arg.to_string(), CellArg::Link(id));
                }
            }
        }

        debug!(target: "cortex-models", "Added link {}", link.name());
        self.links.push(link);
        Ok(id)
    }

    // ======================================================================
    // Building
    // ======================================================================

    /// Build one declared cell (no-op if built) or every unbuilt cell in declaration order
    pub fn build(&mut self, name: Option<&str>) -> ModelResult<()> {
        match name {
            Some(name) if self.cells.contains_key(name) => {
                debug!(target: "cortex-models", "Cell {} already built", name);
                Ok(())
            }
            Some(name) => self.build_cell(name),
            None => {
                let pending: Vec<String> = self
                    .cell_args
                    .keys()
                    .filter(|name| !self.cells.contains_key(*name))
                    .cloned()
                    .collect();
                for name in pending {
                    if !self.cells.contains_key(&name) {
                        self.build_cell(&name)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Construct a declared cell, replacing linked arguments by their resolved values
    ///
    /// The record is rewritten to plain values before construction starts.
    /// If construction fails after the cell's components were built, those
    /// components stay registered.
    pub fn build_cell(&mut self, name: &str) -> ModelResult<()> {
        let record = self.cell_record(name)?;
        let mut kwargs = Kwargs::new();
        for (key, arg) in record {
            let value = match arg {
                CellArg::Value(value) => value.clone(),
                CellArg::Link(id) => self
                    .links
                    .get(id.index())
                    .ok_or_else(|| ModelError::ReferenceNotFound(format!("link #{}", id.index())))?
                    .query(name, key)?,
            };
            kwargs.insert(key.clone(), value);
        }

        let cell_type = kwargs
            .get("cell_type")
            .and_then(Value::as_str)
            .ok_or_else(|| ModelError::MissingRequiredArgument {
                cell: name.to_string(),
                cell_type: "unknown".to_string(),
                key: "cell_type".to_string(),
            })?
            .to_string();
        let class = self.resolve_class(&cell_type)?;

        if let Some(record) = self.cell_args.get_mut(name) {
            for (key, value) in &kwargs {
                record.insert(key.clone(), CellArg::Value(value.clone()));
            }
        }

        info!(target: "cortex-models", "Building cell {} ({})", name, cell_type);
        Cell::construct(self, class, name, kwargs)
    }

    /// Register a built cell; an existing cell of the same name is replaced
    pub(crate) fn insert_cell(&mut self, cell: Cell) {
        let name = cell.name().to_string();
        if !self.cell_args.contains_key(&name) {
            let mut record = ArgRecord::new();
            record.insert(
                "cell_type".to_string(),
                CellArg::Value(Value::from(cell.cell_type())),
            );
            for (key, value) in cell.attrs() {
                record.insert(key.clone(), CellArg::Value(value.clone()));
            }
            self.cell_args.insert(name.clone(), record);
        }
        if self.cells.insert(name.clone(), cell).is_some() {
            warn!(target: "cortex-models", "Cell `{}` already registered; overwriting", name);
        }
    }

    /// Remove a built cell and its argument record; shared parameters stay registered
    pub fn remove_cell(&mut self, name: &str) -> ModelResult<Cell> {
        let cell = self
            .cells
            .shift_remove(name)
            .ok_or_else(|| ModelError::ReferenceNotFound(format!("cell `{}`", name)))?;
        self.cell_args.shift_remove(name);
        debug!(target: "cortex-models", "Removed cell {}", name);
        Ok(cell)
    }

    /// Forget every cell, record, link, parameter and dataset; re-seed the generator
    pub fn reset(&mut self) {
        self.cells.clear();
        self.cell_args.clear();
        self.links.clear();
        self.tparams.clear();
        self.datasets.clear();
        self.rng = seeded(self.config.seed);
        info!(target: "cortex-models", "Build context reset");
    }

    pub(crate) fn derive_rng(&mut self) -> StdRng {
        derive(&mut self.rng)
    }

    // ======================================================================
    // Parameters
    // ======================================================================

    /// Handle for `name`, created with `value` on first use
    pub fn register_param(&mut self, name: &str, value: ArrayD<f32>) -> SharedParam {
        if let Some(existing) = self.tparams.get(name) {
            debug!(target: "cortex-models", "Reusing shared parameter {}", name);
            return existing.clone();
        }
        let handle = SharedParam::new(name, value);
        self.tparams.insert(name.to_string(), handle.clone());
        handle
    }

    pub fn tparams(&self) -> &IndexMap<String, SharedParam> {
        &self.tparams
    }

    pub fn tparam(&self, name: &str) -> Option<&SharedParam> {
        self.tparams.get(name)
    }

    /// Write parameter updates produced by a cost computation
    pub fn apply_updates(&self, updates: &IndexMap<String, ArrayD<f32>>) -> ModelResult<()> {
        for (name, value) in updates {
            let handle = self
                .tparams
                .get(name)
                .ok_or_else(|| ModelError::ReferenceNotFound(format!("parameter `{}`", name)))?;
            handle.set(value.clone());
        }
        Ok(())
    }

    // ======================================================================
    // Queries
    // ======================================================================

    pub fn noise(&self) -> NoiseSwitch {
        self.noise
    }

    pub fn noise_mut(&mut self) -> &mut NoiseSwitch {
        &mut self.noise
    }

    pub fn cells(&self) -> &IndexMap<String, Cell> {
        &self.cells
    }

    pub fn cell(&self, name: &str) -> ModelResult<&Cell> {
        self.cells
            .get(name)
            .ok_or_else(|| ModelError::ReferenceNotFound(format!("cell `{}`", name)))
    }

    pub fn get_cell(&self, name: &str) -> Option<&Cell> {
        self.cells.get(name)
    }

    pub fn is_built(&self, name: &str) -> bool {
        self.cells.contains_key(name)
    }

    pub fn cell_args(&self) -> &IndexMap<String, ArgRecord> {
        &self.cell_args
    }

    pub fn cell_record(&self, name: &str) -> ModelResult<&ArgRecord> {
        self.cell_args
            .get(name)
            .ok_or_else(|| ModelError::ReferenceNotFound(format!("cell `{}` has not been declared", name)))
    }

    /// Type tag of a declared or built cell
    pub fn cell_type_of(&self, name: &str) -> Option<String> {
        self.cell_args
            .get(name)
            .and_then(|r| r.get("cell_type"))
            .and_then(CellArg::as_value)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.cells.get(name).map(|c| c.cell_type().to_string()))
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kwargs(pairs: &[(&str, Value)]) -> Kwargs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_prepare_cell_naming() {
        let mut ctx = BuildContext::new();
        assert_eq!(ctx.prepare_cell("MLP", None, None, Kwargs::new()).unwrap(), "MLP_cell");
        assert_eq!(ctx.prepare_cell("MLP", None, Some("enc"), Kwargs::new()).unwrap(), "enc");
        assert_eq!(
            ctx.prepare_cell("MLP", Some("rnn"), None, Kwargs::new()).unwrap(),
            "rnn.MLP"
        );
        assert_eq!(
            ctx.prepare_cell("MLP", Some("rnn"), Some("input_net"), Kwargs::new()).unwrap(),
            "rnn.input_net"
        );
        assert!(matches!(
            ctx.prepare_cell("Nope", None, None, Kwargs::new()),
            Err(ModelError::UnknownCellType { .. })
        ));
    }

    #[test]
    fn test_match_args_unbuilt_merges_and_rejects_conflicts() {
        let mut ctx = BuildContext::new();
        ctx.prepare_cell("MLP", None, Some("m"), kwargs(&[("dim_in", json!(4)), ("dim_h", Value::Null)]))
            .unwrap();
        ctx.match_args("m", kwargs(&[("dim_h", json!(8)), ("dim_out", json!(2))]))
            .unwrap();
        ctx.match_args("m", kwargs(&[("dim_in", json!(4))])).unwrap();

        let record = ctx.cell_record("m").unwrap();
        assert_eq!(record["dim_h"], CellArg::Value(json!(8)));
        assert_eq!(record["dim_out"], CellArg::Value(json!(2)));

        assert!(matches!(
            ctx.match_args("m", kwargs(&[("dim_in", json!(5))])),
            Err(ModelError::ArgumentMismatch { .. })
        ));
    }

    #[test]
    fn test_match_args_built_is_strict() {
        let mut ctx = BuildContext::new();
        ctx.prepare_cell("MLP", None, Some("m"), kwargs(&[("dim_in", json!(4)), ("dim_out", json!(2))]))
            .unwrap();
        ctx.build(Some("m")).unwrap();

        ctx.match_args("m", kwargs(&[("dim_in", json!(4))])).unwrap();
        assert!(matches!(
            ctx.match_args("m", kwargs(&[("dim_in", json!(3))])),
            Err(ModelError::ArgumentMismatch { .. })
        ));
        assert!(matches!(
            ctx.match_args("m", kwargs(&[("colour", json!("red"))])),
            Err(ModelError::UnknownArgument { .. })
        ));
    }

    #[test]
    fn test_pending_link_accepts_equal_literal() {
        let mut ctx = BuildContext::new();
        ctx.add_dataset("data", DatasetInfo::new().with_dim("input", json!(6)));
        ctx.prepare_cell("MLP", None, Some("m"), kwargs(&[("dim_out", json!(1))]))
            .unwrap();
        let id = ctx.add_link("data.input", "m.input").unwrap();
        assert_eq!(ctx.cell_record("m").unwrap()["dim_in"], CellArg::Link(id));

        ctx.match_args("m", kwargs(&[("dim_in", json!(6))])).unwrap();
        assert_eq!(ctx.cell_record("m").unwrap()["dim_in"], CellArg::Value(json!(6)));
        assert!(ctx.match_args("m", kwargs(&[("dim_in", json!(7))])).is_err());
    }

    #[test]
    fn test_linked_distribution_accepts_equal_literal() {
        let mut ctx = BuildContext::new();
        ctx.add_dataset(
            "D",
            DatasetInfo::new()
                .with_dim("input", json!(5))
                .with_distribution("input", "binomial"),
        );
        ctx.prepare_cell("DistributionMLP", None, Some("d"), kwargs(&[("dim_in", json!(3))]))
            .unwrap();
        let id = ctx.add_link("D.input", "d.P").unwrap();
        assert_eq!(ctx.cell_record("d").unwrap()["distribution_type"], CellArg::Link(id));

        ctx.match_args("d", kwargs(&[("distribution_type", json!("binomial"))]))
            .unwrap();
        assert_eq!(
            ctx.cell_record("d").unwrap()["distribution_type"],
            CellArg::Value(json!("binomial"))
        );
        assert!(matches!(
            ctx.match_args("d", kwargs(&[("dim_out", json!(6))])),
            Err(ModelError::ArgumentMismatch { .. })
        ));
        ctx.match_args("d", kwargs(&[("dim_out", json!(5))])).unwrap();
    }

    #[test]
    fn test_link_leaves_built_record_untouched() {
        let mut ctx = BuildContext::new();
        ctx.prepare_cell("DistributionMLP", None, Some("d"), kwargs(&[("dim_in", json!(3)), ("dim_out", json!(4))]))
            .unwrap();
        ctx.build(Some("d")).unwrap();
        let before = ctx.cell_record("d").unwrap().clone();

        ctx.prepare_cell("MLP", None, Some("m"), kwargs(&[("dim_out", json!(2))]))
            .unwrap();
        let id = ctx.add_link("d.P", "m.input").unwrap();

        assert_eq!(ctx.cell_record("d").unwrap(), &before);
        assert!(!before.contains_key("distribution_type"));
        assert_eq!(ctx.cell_record("m").unwrap()["dim_in"], CellArg::Link(id));
        assert!(matches!(
            ctx.match_args("d", kwargs(&[("distribution_type", json!("binomial"))])),
            Err(ModelError::UnknownArgument { .. })
        ));

        ctx.build(Some("m")).unwrap();
        assert_eq!(ctx.cell("m").unwrap().attrs()["dim_in"], json!(4));
    }

    #[test]
    fn test_build_named_twice_is_noop() {
        let mut ctx = BuildContext::new();
        ctx.prepare_cell("MLP", None, Some("a"), kwargs(&[("dim_in", json!(2)), ("dim_out", json!(2))]))
            .unwrap();
        ctx.prepare_cell("MLP", None, Some("b"), kwargs(&[("dim_in", json!(2)), ("dim_out", json!(2))]))
            .unwrap();
        ctx.build(Some("a")).unwrap();
        ctx.build(Some("a")).unwrap();
        assert!(ctx.is_built("a"));
        assert!(!ctx.is_built("b"));
    }

    #[test]
    fn test_remove_and_reset() {
        let mut ctx = BuildContext::new();
        ctx.prepare_cell("MLP", None, Some("a"), kwargs(&[("dim_in", json!(2)), ("dim_out", json!(2))]))
            .unwrap();
        ctx.build(None).unwrap();
        assert!(!ctx.tparams().is_empty());

        ctx.remove_cell("a").unwrap();
        assert!(!ctx.is_built("a"));
        assert!(ctx.cell_record("a").is_err());
        assert!(matches!(ctx.remove_cell("a"), Err(ModelError::ReferenceNotFound(_))));

        ctx.add_dataset("d", DatasetInfo::new());
        ctx.reset();
        assert!(ctx.cells().is_empty());
        assert!(ctx.cell_args().is_empty());
        assert!(ctx.links().is_empty());
        assert!(ctx.tparams().is_empty());
        assert!(ctx.datasets().is_empty());
    }

    #[test]
    fn test_make_data_unknown_type() {
        let mut ctx = BuildContext::new();
        assert!(matches!(
            ctx.make_data("MNIST", "mnist", Kwargs::new()),
            Err(ModelError::UnknownDatasetType { .. })
        ));
        ctx.make_data("Declared", "toy", kwargs(&[("dims", json!({"input": 3}))]))
            .unwrap();
        assert_eq!(ctx.datasets()["toy"].dims["input"], json!(3));
    }

    #[test]
    fn test_apply_updates_writes_through_handles() {
        let mut ctx = BuildContext::new();
        let handle = ctx.register_param("avg.m", ArrayD::zeros(vec![2]));
        let mut updates = IndexMap::new();
        updates.insert("avg.m".to_string(), ArrayD::ones(vec![2]));
        ctx.apply_updates(&updates).unwrap();
        assert_eq!(handle.get().sum(), 2.0);

        updates.insert("missing".to_string(), ArrayD::ones(vec![1]));
        assert!(ctx.apply_updates(&updates).is_err());
    }
}
