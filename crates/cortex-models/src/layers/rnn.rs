// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Recurrent cells.

Inputs are time-major: sequences are `(time, batch, dim)` and masks
`(time, batch)`. An [`Rnn`] is a composite of an initializer (maps the
first input to the initial hidden state), an input network and a
recurrence unit. [`GenRnn`] adds a distribution head and predicts the
next step of its own input; the context variant adds a conditioning
network whose output is added to the recurrence input at every step.
*/

use indexmap::IndexMap;
use ndarray::{stack, Array2, ArrayD, ArrayView2, Axis, Ix2, Slice};
use serde_json::json;

use super::averager::Averager;
use super::mlp::distribution_of;
use super::{feed_component, input, merge_prefixed, output};
use crate::attrs::KwargsExt;
use crate::cell::{
    Cell, CellClass, ClassSpec, ComponentTemplate, CostOutput, DistributionKey, ParamInit, ParamSet,
    SampleRequest,
};
use crate::context::BuildContext;
use crate::ops::{as_matrix, dropout, squared_error, Activation};
use crate::types::{Kwargs, ModelError, ModelResult, Outputs};

// ============================================================================
// RNNInitializer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Initialization {
    Mlp,
    Averager,
    Zeros,
}

impl Initialization {
    fn from_attrs(attrs: &Kwargs) -> ModelResult<Self> {
        match attrs.get_opt_str("initialization")? {
            None | Some("MLP") => Ok(Initialization::Mlp),
            Some("Averager") => Ok(Initialization::Averager),
            Some("None") | Some("none") | Some("zeros") => Ok(Initialization::Zeros),
            Some(other) => Err(ModelError::InvalidArgument {
                owner: "RNNInitializer".to_string(),
                reason: format!("unknown initialization `{}`", other),
            }),
        }
    }
}

/// Maps the first input of a sequence to an initial hidden state
#[derive(Debug)]
pub struct RnnInitializer {
    spec: ClassSpec,
}

impl Default for RnnInitializer {
    fn default() -> Self {
        Self::new()
    }
}

impl RnnInitializer {
    pub fn new() -> Self {
        let spec = ClassSpec::new("RNNInitializer")
            .required(&["dim_in", "dim_out"])
            .options(&[("initialization", json!("MLP")), ("weight_noise", json!(0))])
            .args(&["initialization"])
            .dim("input", "dim_in")
            .dim("output", "dim_out");
        Self { spec }
    }
}

impl CellClass for RnnInitializer {
    fn spec(&self) -> &ClassSpec {
        &self.spec
    }

    fn init_attributes(&self, attrs: &mut Kwargs) -> ModelResult<()> {
        Initialization::from_attrs(attrs).map(|_| ())
    }

    fn components(&self, attrs: &Kwargs) -> ModelResult<IndexMap<String, Option<ComponentTemplate>>> {
        let template = match Initialization::from_attrs(attrs)? {
            Initialization::Mlp => Some(
                ComponentTemplate::new("MLP")
                    .owner_arg("dim_in", "dim_in")
                    .owner_arg("dim_out", "dim_out")
                    .owner_arg("dim_h", "dim_in")
                    .passed(&["dim_h", "dim_hs", "n_layers", "h_act", "dropout"])
                    .force("out_act", json!("tanh")),
            ),
            Initialization::Averager => Some(ComponentTemplate::new("Averager").owner_arg("shape", "dim_out")),
            Initialization::Zeros => None,
        };
        let mut components = IndexMap::new();
        components.insert("initializer".to_string(), template);
        Ok(components)
    }

    fn feed(
        &self,
        cell: &Cell,
        ctx: &BuildContext,
        inputs: &[ArrayD<f32>],
        params: &[ArrayD<f32>],
    ) -> ModelResult<Outputs> {
        let x = input(inputs, 0, cell)?;
        let mut outs = Outputs::new();
        let y = match Initialization::from_attrs(cell.attrs())? {
            Initialization::Mlp => {
                let init_outs = feed_component(cell, ctx, "initializer", &[x.clone()], params)?;
                merge_prefixed(&mut outs, "initializer", &init_outs);
                output(&init_outs, "Y", cell.name())?.clone()
            }
            Initialization::Averager => {
                let init_outs = feed_component(cell, ctx, "initializer", &[x.clone()], params)?;
                output(&init_outs, "output", cell.name())?.clone()
            }
            Initialization::Zeros => {
                let mut shape = x.shape().to_vec();
                let dim_out = cell.attrs().get_usize("dim_out")?;
                match shape.last_mut() {
                    Some(last) => *last = dim_out,
                    None => shape.push(dim_out),
                }
                ArrayD::zeros(shape)
            }
        };
        outs.insert("output".to_string(), y);
        Ok(outs)
    }

    /// `data` holds the input sequence `X` and the hidden states `H`
    fn cost(&self, cell: &Cell, ctx: &BuildContext, data: &Outputs) -> ModelResult<CostOutput> {
        let x = output(data, "X", cell.name())?;
        let h = output(data, "H", cell.name())?;
        match Initialization::from_attrs(cell.attrs())? {
            Initialization::Mlp => {
                let params = cell.param_values(ctx)?;
                let outs = feed_component(cell, ctx, "initializer", &[x.clone()], &params)?;
                let y = output(&outs, "Y", cell.name())?;
                let steps = h.shape().first().copied().unwrap_or(0);
                if steps < 2 {
                    return Err(ModelError::shape(cell.name(), "initializer cost needs at least two steps"));
                }
                let h_prev = h.slice_axis(Axis(0), Slice::from(..-1)).to_owned();
                let y_next = y.slice_axis(Axis(0), Slice::from(1..)).to_owned();
                Ok(CostOutput {
                    cost: squared_error(&h_prev, &y_next)?,
                    updates: Default::default(),
                })
            }
            Initialization::Averager => {
                let averager = cell.component(ctx, "initializer")?;
                let handle = averager
                    .own_params()
                    .first()
                    .ok_or_else(|| ModelError::shape(averager.name(), "missing running mean"))?;
                let updated = Averager::updated_average(averager, h, &handle.get())?;
                let mut cost = CostOutput::default();
                cost.updates.insert(handle.name().to_string(), updated);
                Ok(cost)
            }
            Initialization::Zeros => Ok(CostOutput::default()),
        }
    }
}

// ============================================================================
// RecurrentUnit
// ============================================================================

/// Simple tanh recurrence `h_t = tanh(h_{t-1} W + y_t)`, gated by the mask
#[derive(Debug)]
pub struct RecurrentUnit {
    spec: ClassSpec,
}

impl Default for RecurrentUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl RecurrentUnit {
    pub fn new() -> Self {
        let spec = ClassSpec::new("RecurrentUnit")
            .required(&["dim_h"])
            .args(&["dim_h"])
            .dim("input", "dim_h")
            .dim("output", "dim_h")
            .weights(&["W"]);
        Self { spec }
    }

    /// One step; masked-out rows keep their previous state
    pub fn step(
        w: &ArrayView2<'_, f32>,
        y: &Array2<f32>,
        h_prev: &Array2<f32>,
        mask: &Array2<f32>,
    ) -> (Array2<f32>, Array2<f32>) {
        let preact = h_prev.dot(w) + y;
        let h_new = preact.mapv(f32::tanh);
        let h = mask * &h_new + &(&(1.0 - mask) * h_prev);
        (preact, h)
    }
}

fn as_owned_matrix(a: &ArrayD<f32>, context: &str) -> ModelResult<Array2<f32>> {
    Ok(as_matrix(a, context)?.to_owned())
}

impl CellClass for RecurrentUnit {
    fn spec(&self) -> &ClassSpec {
        &self.spec
    }

    fn init_params(&self, init: &mut ParamInit<'_>) -> ModelResult<ParamSet> {
        let dim_h = init.attrs.get_usize("dim_h")?;
        let mut params = ParamSet::new();
        params.insert("W", init.norm_weight(dim_h, dim_h));
        Ok(params)
    }

    /// Inputs: `Y (T, B, H)`, `M (T, B)`, `H0 (B, H)`
    fn feed(
        &self,
        cell: &Cell,
        _ctx: &BuildContext,
        inputs: &[ArrayD<f32>],
        params: &[ArrayD<f32>],
    ) -> ModelResult<Outputs> {
        let name = cell.name();
        let y = input(inputs, 0, cell)?;
        let m = input(inputs, 1, cell)?;
        let h0 = as_owned_matrix(input(inputs, 2, cell)?, name)?;
        let w = params
            .first()
            .ok_or_else(|| ModelError::shape(name, "missing recurrent weights"))?;
        let w = as_matrix(w, name)?;

        if y.ndim() != 3 || m.ndim() != 2 {
            return Err(ModelError::shape(
                name,
                format!("expected (T, B, H) inputs and (T, B) mask, got {:?} and {:?}", y.shape(), m.shape()),
            ));
        }
        let (steps, batch, dim) = (y.shape()[0], y.shape()[1], y.shape()[2]);
        if m.shape() != [steps, batch] || h0.dim() != (batch, dim) || w.dim() != (dim, dim) {
            return Err(ModelError::shape(
                name,
                format!(
                    "inputs {:?}, mask {:?}, initial state {:?} and weights {:?} disagree",
                    y.shape(),
                    m.shape(),
                    h0.dim(),
                    w.dim()
                ),
            ));
        }

        let mut hs = ArrayD::<f32>::zeros(vec![steps, batch, dim]);
        let mut preacts = ArrayD::<f32>::zeros(vec![steps, batch, dim]);
        let mut h = h0;
        for t in 0..steps {
            let y_t = as_owned_matrix(&y.index_axis(Axis(0), t).to_owned(), name)?;
            let mask = m
                .index_axis(Axis(0), t)
                .to_owned()
                .insert_axis(Axis(1))
                .into_dimensionality::<Ix2>()
                .map_err(|e| ModelError::shape(name, e.to_string()))?;
            let (preact, h_next) = Self::step(&w, &y_t, &h, &mask);
            hs.index_axis_mut(Axis(0), t).assign(&h_next);
            preacts.index_axis_mut(Axis(0), t).assign(&preact);
            h = h_next;
        }

        let mut outs = Outputs::new();
        outs.insert("H".to_string(), hs);
        outs.insert("H_preact".to_string(), preacts);
        outs.insert("output".to_string(), h.into_dyn());
        Ok(outs)
    }
}

// ============================================================================
// RNN family
// ============================================================================

fn rnn_spec(tag: &str) -> ClassSpec {
    ClassSpec::new(tag)
        .options(&[("dropout", json!(false)), ("recurrence_type", json!("RecurrentUnit"))])
        .args(&["dim_in", "dim_h"])
        .dim("input", "dim_in")
        .dim("output", "dim_h")
        .component(
            "initializer",
            Some(ComponentTemplate::new("RNNInitializer").passed(&["initialization"])),
        )
        .component(
            "RU",
            Some(ComponentTemplate::typed_by("recurrence_type").passed(&["weight_noise", "dim_h"])),
        )
        .component(
            "input_net",
            Some(
                ComponentTemplate::new("MLP")
                    .passed(&["dim_in"])
                    .force("out_act", json!("identity")),
            ),
        )
        .link("input_net.output", "RU.input")
        .link("initializer.input", "input_net.input")
        .link("initializer.output", "RU.input")
}

/// Append a ones mask when only the sequence is given
fn with_default_mask(inputs: Vec<ArrayD<f32>>, mask_index: usize, cell: &Cell) -> ModelResult<Vec<ArrayD<f32>>> {
    let mut inputs = inputs;
    let x = input(&inputs, 0, cell)?;
    if x.ndim() != 3 {
        return Err(ModelError::shape(
            cell.name(),
            format!("expected a (T, B, D) sequence, got {:?}", x.shape()),
        ));
    }
    if inputs.len() <= mask_index {
        let mask = ArrayD::ones(vec![x.shape()[0], x.shape()[1]]);
        inputs.push(mask);
    }
    Ok(inputs)
}

/// Shared forward pass; `context` is the conditioning input of the context variant
fn rnn_feed(
    cell: &Cell,
    ctx: &BuildContext,
    x: &ArrayD<f32>,
    m: &ArrayD<f32>,
    context: Option<&ArrayD<f32>>,
    params: &[ArrayD<f32>],
) -> ModelResult<Outputs> {
    let mut outs = Outputs::new();
    let steps = x.shape().first().copied().unwrap_or(0);
    if steps == 0 {
        return Err(ModelError::shape(cell.name(), "empty sequence"));
    }

    let x0 = x.index_axis(Axis(0), 0).to_owned();
    let init_outs = feed_component(cell, ctx, "initializer", &[x0], params)?;
    let h0 = output(&init_outs, "output", cell.name())?.clone();
    merge_prefixed(&mut outs, "initializer", &init_outs);

    let input_outs = feed_component(cell, ctx, "input_net", &[x.clone()], params)?;
    let mut y = output(&input_outs, "output", cell.name())?.clone();
    merge_prefixed(&mut outs, "input_net", &input_outs);

    if let Some(c) = context {
        let context_outs = feed_component(cell, ctx, "context_net", &[c.clone()], params)?;
        let c_y = output(&context_outs, "output", cell.name())?;
        add_context(&mut y, c_y, cell.name())?;
        merge_prefixed(&mut outs, "context_net", &context_outs);
    }

    let ru_outs = feed_component(cell, ctx, "RU", &[y.clone(), m.clone(), h0.clone()], params)?;
    let h_seq = output(&ru_outs, "H", cell.name())?.clone();
    let mut last = h_seq.index_axis(Axis(0), steps - 1).to_owned();

    let rate = cell.attrs().get_f32("dropout").unwrap_or(0.0);
    if ctx.noise().is_on() && rate > 0.0 {
        last = dropout(&last, Activation::Tanh, rate, &mut *cell.noise_rng())?;
    }

    outs.insert("input_Y".to_string(), y);
    outs.insert("H0".to_string(), h0);
    if let Some(pre) = ru_outs.get("H_preact") {
        outs.insert("H_preact".to_string(), pre.clone());
    }
    outs.insert("H".to_string(), h_seq);
    outs.insert("output".to_string(), last);
    Ok(outs)
}

/// `y += c`, broadcasting a `(B, H)` context over time
fn add_context(y: &mut ArrayD<f32>, c: &ArrayD<f32>, name: &str) -> ModelResult<()> {
    if c.broadcast(y.raw_dim()).is_none() {
        return Err(ModelError::shape(
            name,
            format!("context {:?} does not broadcast to {:?}", c.shape(), y.shape()),
        ));
    }
    *y += c;
    Ok(())
}

/// Recurrent network over an input sequence
#[derive(Debug)]
pub struct Rnn {
    spec: ClassSpec,
}

impl Default for Rnn {
    fn default() -> Self {
        Self::new()
    }
}

impl Rnn {
    pub fn new() -> Self {
        Self { spec: rnn_spec("RNN") }
    }
}

impl CellClass for Rnn {
    fn spec(&self) -> &ClassSpec {
        &self.spec
    }

    fn init_args(&self, cell: &Cell, inputs: Vec<ArrayD<f32>>) -> ModelResult<Vec<ArrayD<f32>>> {
        with_default_mask(inputs, 1, cell)
    }

    fn feed(
        &self,
        cell: &Cell,
        ctx: &BuildContext,
        inputs: &[ArrayD<f32>],
        params: &[ArrayD<f32>],
    ) -> ModelResult<Outputs> {
        let x = input(inputs, 0, cell)?;
        let m = input(inputs, 1, cell)?;
        rnn_feed(cell, ctx, x, m, None, params)
    }
}

/// Generative RNN predicting the distribution of its next input
#[derive(Debug)]
pub struct GenRnn {
    spec: ClassSpec,
    with_context: bool,
}

impl Default for GenRnn {
    fn default() -> Self {
        Self::new()
    }
}

impl GenRnn {
    fn gen_spec(tag: &str) -> ClassSpec {
        let mut spec = rnn_spec(tag)
            .required(&["distribution_type"])
            .dim("input", "dim_in")
            .dim("output", "dim_in")
            .dim("P", "dim_in")
            .dim("samples", "dim_in")
            .dist("P", "distribution_type")
            .dist("samples", "distribution_type")
            .distribution(DistributionKey::Argument("distribution_type".to_string()))
            .component(
                "output_net",
                Some(ComponentTemplate::new("DistributionMLP").owner_arg("distribution_type", "distribution_type")),
            )
            .link("output_net.samples", "input_net.input")
            .link("output_net.input", "RU.output");
        spec.args.push("distribution_type".to_string());
        spec
    }

    pub fn new() -> Self {
        Self {
            spec: Self::gen_spec("GenRNN"),
            with_context: false,
        }
    }

    /// `GenRNNwithContext`: adds a `context_net` MLP over a `(B, c_dim)` conditioning input
    pub fn with_context() -> Self {
        let mut spec = Self::gen_spec("GenRNNwithContext")
            .required(&["distribution_type", "c_dim"])
            .component(
                "context_net",
                Some(
                    ComponentTemplate::new("MLP")
                        .owner_arg("dim_in", "c_dim")
                        .force("out_act", json!("identity")),
                ),
            )
            .link("context_net.output", "RU.input");
        spec.args.push("c_dim".to_string());
        Self {
            spec,
            with_context: true,
        }
    }

    /// Draw sampling noise for `steps` steps of a `batch`-wide chain
    pub fn random_variables(cell: &Cell, ctx: &BuildContext, steps: usize, batch: usize) -> ModelResult<ArrayD<f32>> {
        let output_net = cell.component(ctx, "output_net")?;
        let distribution = distribution_of(output_net)?;
        let dim = output_net.attrs().get_usize("dim_out")?;
        Ok(distribution.generate_random_variables(&mut *cell.noise_rng(), &[steps, batch, dim]))
    }
}

impl CellClass for GenRnn {
    fn spec(&self) -> &ClassSpec {
        &self.spec
    }

    /// `(X, M)` or, with context, `(X, C, M)`; `M` defaults to ones
    fn init_args(&self, cell: &Cell, inputs: Vec<ArrayD<f32>>) -> ModelResult<Vec<ArrayD<f32>>> {
        if self.with_context {
            input(&inputs, 1, cell)?;
            with_default_mask(inputs, 2, cell)
        } else {
            with_default_mask(inputs, 1, cell)
        }
    }

    fn feed(
        &self,
        cell: &Cell,
        ctx: &BuildContext,
        inputs: &[ArrayD<f32>],
        params: &[ArrayD<f32>],
    ) -> ModelResult<Outputs> {
        let x = input(inputs, 0, cell)?;
        let (context, m) = if self.with_context {
            (Some(input(inputs, 1, cell)?), input(inputs, 2, cell)?)
        } else {
            (None, input(inputs, 1, cell)?)
        };
        let mut outs = rnn_feed(cell, ctx, x, m, context, params)?;
        let h = output(&outs, "H", cell.name())?.clone();
        let out_outs = feed_component(cell, ctx, "output_net", &[h], params)?;
        let p = output(&out_outs, "P", cell.name())?.clone();
        merge_prefixed(&mut outs, "output_net", &out_outs);
        outs.insert("P".to_string(), p);
        Ok(outs)
    }

    /// Negative log-likelihood of `X[1:]` under `P[:-1]`, summed over time and
    /// averaged over the batch; `P` is computed from `X` when absent
    fn cost(&self, cell: &Cell, ctx: &BuildContext, data: &Outputs) -> ModelResult<CostOutput> {
        let x = output(data, "X", cell.name())?;
        let p = match data.get("P") {
            Some(p) => p.clone(),
            None => {
                let mut inputs = vec![x.clone()];
                if self.with_context {
                    inputs.push(output(data, "C", cell.name())?.clone());
                }
                if let Some(m) = data.get("M") {
                    inputs.push(m.clone());
                }
                let outs = cell.call(ctx, inputs)?;
                output(&outs, "P", cell.name())?.clone()
            }
        };
        let steps = x.shape().first().copied().unwrap_or(0);
        if steps < 2 {
            return Err(ModelError::shape(cell.name(), "cost needs at least two steps"));
        }

        let distribution = distribution_of(cell.component(ctx, "output_net")?)?;
        let x_next = x.slice_axis(Axis(0), Slice::from(1..)).to_owned();
        let p_prev = p.slice_axis(Axis(0), Slice::from(..-1)).to_owned();
        let nll = distribution.neg_log_prob(&x_next, &p_prev)?;
        let cost = nll.sum_axis(Axis(0)).mean().unwrap_or(0.0);
        Ok(CostOutput {
            cost,
            updates: Default::default(),
        })
    }

    /// Unrolled sampling: each step feeds the previous sample back as input
    ///
    /// Returns stacked `samples`, `P` and `H`, each `(steps, batch, ...)`.
    fn sample(&self, cell: &Cell, ctx: &BuildContext, request: &SampleRequest) -> ModelResult<Outputs> {
        let name = cell.name();
        let epsilon = &request.epsilon;
        if epsilon.ndim() != 3 {
            return Err(ModelError::shape(
                name,
                format!("sampling noise must be (steps, batch, dim), got {:?}", epsilon.shape()),
            ));
        }
        let (steps, batch, dim) = (epsilon.shape()[0], epsilon.shape()[1], epsilon.shape()[2]);
        let params = cell.param_values(ctx)?;
        let distribution = distribution_of(cell.component(ctx, "output_net")?)?;

        let mut x = match &request.x0 {
            Some(x0) => x0.clone(),
            None => distribution.simple_sample(&mut *cell.noise_rng(), batch, dim, 0.5),
        };
        let mut h = match &request.h0 {
            Some(h0) => h0.clone(),
            None => {
                let outs = feed_component(cell, ctx, "initializer", &[x.clone()], &params)?;
                output(&outs, "output", name)?.clone()
            }
        };
        let context = if self.with_context {
            let c = request.context.as_ref().ok_or_else(|| {
                ModelError::ReferenceNotFound(format!("context input for sampling {}", name))
            })?;
            let outs = feed_component(cell, ctx, "context_net", &[c.clone()], &params)?;
            Some(output(&outs, "output", name)?.clone())
        } else {
            None
        };

        let ones = ArrayD::<f32>::ones(vec![1, batch]);
        let (mut samples, mut probs, mut states) = (Vec::new(), Vec::new(), Vec::new());
        for t in 0..steps {
            let in_outs = feed_component(cell, ctx, "input_net", &[x.clone()], &params)?;
            let mut y = output(&in_outs, "output", name)?.clone();
            if let Some(c) = &context {
                add_context(&mut y, c, name)?;
            }
            let y_seq = y.insert_axis(Axis(0));
            let ru_outs = feed_component(cell, ctx, "RU", &[y_seq, ones.clone(), h.clone()], &params)?;
            h = output(&ru_outs, "output", name)?.clone();

            let out_outs = feed_component(cell, ctx, "output_net", &[h.clone()], &params)?;
            let p = output(&out_outs, "P", name)?.clone();
            x = distribution.sample(&epsilon.index_axis(Axis(0), t).to_owned(), &p)?;

            samples.push(x.clone());
            probs.push(p);
            states.push(h.clone());
        }

        let stack_all = |arrays: &[ArrayD<f32>]| -> ModelResult<ArrayD<f32>> {
            let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
            stack(Axis(0), &views).map_err(|e| ModelError::shape(name, e.to_string()))
        };
        let mut outs = Outputs::new();
        if steps > 0 {
            outs.insert("samples".to_string(), stack_all(&samples)?);
            outs.insert("P".to_string(), stack_all(&probs)?);
            outs.insert("H".to_string(), stack_all(&states)?);
        }
        Ok(outs)
    }
}
