// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Built-in cell classes.

| Tag | Class |
|-----|-------|
| `Cell` | [`BaseCell`] (identity) |
| `MLP` | [`Mlp`] |
| `DistributionMLP` | [`DistributionMlp`] |
| `Averager` | [`Averager`] |
| `RNNInitializer` | [`RnnInitializer`] |
| `RecurrentUnit` | [`RecurrentUnit`] |
| `RNN` | [`Rnn`] |
| `GenRNN` | [`GenRnn`] |
| `GenRNNwithContext` | [`GenRnn::with_context`] |
| `CNN2D` | [`Cnn2d`] |
*/

pub mod averager;
pub mod cnn2d;
pub mod mlp;
pub mod rnn;

pub use averager::Averager;
pub use cnn2d::Cnn2d;
pub use mlp::{DistributionMlp, Mlp};
pub use rnn::{GenRnn, RecurrentUnit, Rnn, RnnInitializer};

use std::sync::Arc;

use ndarray::ArrayD;

use crate::cell::{Cell, CellClass, ClassSpec};
use crate::context::BuildContext;
use crate::types::{ModelError, ModelResult, Outputs};

/// The `Cell` base class: no parameters, passes inputs through
#[derive(Debug)]
pub struct BaseCell {
    spec: ClassSpec,
}

impl Default for BaseCell {
    fn default() -> Self {
        Self {
            spec: ClassSpec::new("Cell"),
        }
    }
}

impl CellClass for BaseCell {
    fn spec(&self) -> &ClassSpec {
        &self.spec
    }
}

pub fn builtin_classes() -> Vec<Arc<dyn CellClass>> {
    vec![
        Arc::new(BaseCell::default()),
        Arc::new(Mlp::new()),
        Arc::new(DistributionMlp::new()),
        Arc::new(Averager::new()),
        Arc::new(RnnInitializer::new()),
        Arc::new(RecurrentUnit::new()),
        Arc::new(Rnn::new()),
        Arc::new(GenRnn::new()),
        Arc::new(GenRnn::with_context()),
        Arc::new(Cnn2d::new()),
    ]
}

/// Named output of a forward pass
pub(crate) fn output<'a>(outs: &'a Outputs, key: &str, cell: &str) -> ModelResult<&'a ArrayD<f32>> {
    outs.get(key).ok_or_else(|| {
        ModelError::ReferenceNotFound(format!("output `{}` of cell {}", key, cell))
    })
}

/// Positional call input
pub(crate) fn input<'a>(inputs: &'a [ArrayD<f32>], index: usize, cell: &Cell) -> ModelResult<&'a ArrayD<f32>> {
    inputs.get(index).ok_or_else(|| {
        ModelError::shape(
            format!("{} ({})", cell.name(), cell.cell_type()),
            format!("expected input #{}, got {} inputs", index, inputs.len()),
        )
    })
}

/// Run a component's forward pass with its slice of the owner's parameters
pub(crate) fn feed_component(
    cell: &Cell,
    ctx: &BuildContext,
    key: &str,
    inputs: &[ArrayD<f32>],
    params: &[ArrayD<f32>],
) -> ModelResult<Outputs> {
    let component = cell.component(ctx, key)?;
    let selected = cell.select_params(Some(key), params)?;
    component.feed(ctx, inputs, selected)
}

/// Copy `from` into `outs` with keys prefixed `"<prefix>.<key>"`
pub(crate) fn merge_prefixed(outs: &mut Outputs, prefix: &str, from: &Outputs) {
    for (key, value) in from {
        outs.insert(format!("{}.{}", prefix, key), value.clone());
    }
}
