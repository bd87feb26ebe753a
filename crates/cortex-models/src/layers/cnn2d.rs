// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Two-dimensional convolutional cell
//!
//! Each layer is a valid cross-correlation, a non-overlapping max pool
//! (trailing rows and columns that do not fill a window are dropped), a
//! per-filter bias and the hidden activation. The last layer is flattened
//! into `output`, whose width is the cell's `dim_out`.

use ndarray::{s, Array4, ArrayD, ArrayView4, Axis, Ix4};
use serde_json::{json, Value};

use super::input;
use crate::attrs::{value_as_shape, value_as_usize, value_as_usize_list, KwargsExt};
use crate::cell::{ArgView, Cell, CellClass, ClassSpec, ParamInit, ParamSet};
use crate::context::BuildContext;
use crate::ops::{batch_normalization, dropout, Activation};
use crate::types::{Kwargs, ModelError, ModelResult, Outputs};

const BN_EPSILON: f32 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConvLayer {
    filters: usize,
    filter: (usize, usize),
    pool: (usize, usize),
}

/// Input shape plus per-layer filter and pool geometry
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConvGeometry {
    input: (usize, usize, usize),
    layers: Vec<ConvLayer>,
}

fn invalid(reason: impl Into<String>) -> ModelError {
    ModelError::InvalidArgument {
        owner: "CNN2D".to_string(),
        reason: reason.into(),
    }
}

/// An integer (square) or a `[rows, cols]` pair
fn value_as_pair(key: &str, value: &Value) -> ModelResult<(usize, usize)> {
    match value_as_shape(key, value)?.as_slice() {
        [n] => Ok((*n, *n)),
        [r, c] => Ok((*r, *c)),
        other => Err(invalid(format!("`{}` entries must be 1 or 2 integers, got {:?}", key, other))),
    }
}

fn value_as_pairs(key: &str, value: &Value) -> ModelResult<Vec<(usize, usize)>> {
    match value {
        Value::Array(items) => items.iter().map(|v| value_as_pair(key, v)).collect(),
        other => Err(ModelError::type_mismatch(key, "list of shapes", other)),
    }
}

impl ConvGeometry {
    fn from_values(
        input_shape: &Value,
        n_filters: &Value,
        filter_shapes: &Value,
        pool_sizes: &Value,
    ) -> ModelResult<Self> {
        let input = match value_as_shape("input_shape", input_shape)?.as_slice() {
            [h, w] => (1, *h, *w),
            [c, h, w] => (*c, *h, *w),
            other => return Err(invalid(format!("input_shape must be [H, W] or [C, H, W], got {:?}", other))),
        };
        let n_filters = match n_filters {
            Value::Array(_) => value_as_usize_list("n_filters", n_filters)?,
            other => vec![value_as_usize("n_filters", other)?],
        };
        let filters = value_as_pairs("filter_shapes", filter_shapes)?;
        let pools = value_as_pairs("pool_sizes", pool_sizes)?;
        if n_filters.len() != filters.len() || n_filters.len() != pools.len() {
            return Err(invalid(format!(
                "{} filter counts, {} filter shapes and {} pool sizes",
                n_filters.len(),
                filters.len(),
                pools.len()
            )));
        }
        if n_filters.is_empty() {
            return Err(invalid("at least one layer is needed"));
        }
        let layers = n_filters
            .into_iter()
            .zip(filters)
            .zip(pools)
            .map(|((filters, filter), pool)| ConvLayer { filters, filter, pool })
            .collect();
        Ok(Self { input, layers })
    }

    fn from_attrs(attrs: &Kwargs) -> ModelResult<Self> {
        let get = |key: &str| {
            attrs
                .get_set(key)
                .ok_or_else(|| ModelError::ReferenceNotFound(format!("argument `{}`", key)))
        };
        Self::from_values(
            get("input_shape")?,
            get("n_filters")?,
            get("filter_shapes")?,
            get("pool_sizes")?,
        )
    }

    /// `(channels, rows, cols)` after each layer
    fn output_shapes(&self) -> ModelResult<Vec<(usize, usize, usize)>> {
        let mut shapes = Vec::with_capacity(self.layers.len());
        let (_, mut h, mut w) = self.input;
        for (l, layer) in self.layers.iter().enumerate() {
            let (fh, fw) = layer.filter;
            let (ph, pw) = layer.pool;
            if layer.filters == 0 || fh == 0 || fw == 0 || ph == 0 || pw == 0 {
                return Err(invalid(format!("layer {} has a zero-sized filter or pool", l)));
            }
            if fh > h || fw > w {
                return Err(invalid(format!(
                    "layer {} filter {:?} does not fit input {}x{}",
                    l, layer.filter, h, w
                )));
            }
            h = (h - fh + 1) / ph;
            w = (w - fw + 1) / pw;
            if h == 0 || w == 0 {
                return Err(invalid(format!("layer {} pools its output away", l)));
            }
            shapes.push((layer.filters, h, w));
        }
        Ok(shapes)
    }

    fn dim_out(&self) -> ModelResult<usize> {
        let shapes = self.output_shapes()?;
        Ok(shapes.last().map(|(c, h, w)| c * h * w).unwrap_or(0))
    }
}

/// Convolutional feature extractor over image batches
#[derive(Debug)]
pub struct Cnn2d {
    spec: ClassSpec,
}

impl Default for Cnn2d {
    fn default() -> Self {
        Self::new()
    }
}

impl Cnn2d {
    pub fn new() -> Self {
        let spec = ClassSpec::new("CNN2D")
            .required(&["input_shape", "n_filters", "filter_shapes", "pool_sizes"])
            .options(&[
                ("dim_out", Value::Null),
                ("h_act", json!("sigmoid")),
                ("dropout", json!(false)),
                ("weight_noise", json!(0)),
                ("batch_normalization", json!(false)),
            ])
            .args(&["input_shape", "n_filters", "filter_shapes", "pool_sizes", "h_act", "dim_out"])
            .dim("input", "input_shape")
            .dim("output", "dim_out")
            .weights(&["W"]);
        Self { spec }
    }
}

/// Valid cross-correlation of `x (B, C, H, W)` with `w (F, C, fh, fw)`
fn correlate(x: &ArrayView4<'_, f32>, w: &ArrayView4<'_, f32>, context: &str) -> ModelResult<Array4<f32>> {
    let (batch, channels, h, wd) = x.dim();
    let (filters, w_channels, fh, fw) = w.dim();
    if channels != w_channels || fh > h || fw > wd {
        return Err(ModelError::shape(
            context,
            format!("input {:?} does not match filters {:?}", x.dim(), w.dim()),
        ));
    }
    let patch = channels * fh * fw;
    let kernel = w
        .to_shape((filters, patch))
        .map_err(|e| ModelError::shape(context, e.to_string()))?;
    let (oh, ow) = (h - fh + 1, wd - fw + 1);
    let mut out = Array4::<f32>::zeros((batch, filters, oh, ow));
    for oy in 0..oh {
        for ox in 0..ow {
            let window = x.slice(s![.., .., oy..oy + fh, ox..ox + fw]);
            let window = window
                .to_shape((batch, patch))
                .map_err(|e| ModelError::shape(context, e.to_string()))?;
            out.slice_mut(s![.., .., oy, ox]).assign(&window.dot(&kernel.t()));
        }
    }
    Ok(out)
}

/// Non-overlapping max pool over the two trailing axes
fn max_pool(x: &Array4<f32>, (ph, pw): (usize, usize)) -> Array4<f32> {
    let (batch, channels, h, w) = x.dim();
    let (oh, ow) = (h / ph, w / pw);
    let mut out = Array4::<f32>::zeros((batch, channels, oh, ow));
    for oy in 0..oh {
        for ox in 0..ow {
            let window = x.slice(s![.., .., oy * ph..(oy + 1) * ph, ox * pw..(ox + 1) * pw]);
            let pooled = window
                .map_axis(Axis(3), |v| v.fold(f32::NEG_INFINITY, |a, &b| a.max(b)))
                .map_axis(Axis(2), |v| v.fold(f32::NEG_INFINITY, |a, &b| a.max(b)));
            out.slice_mut(s![.., .., oy, ox]).assign(&pooled);
        }
    }
    out
}

/// Batch-normalize each channel over batch and spatial axes
fn normalize_channels(x: Array4<f32>, context: &str) -> ModelResult<Array4<f32>> {
    let channels_last = x.permuted_axes([0, 2, 3, 1]).as_standard_layout().into_owned().into_dyn();
    batch_normalization(&channels_last, BN_EPSILON)?
        .into_dimensionality::<Ix4>()
        .map(|a| a.permuted_axes([0, 3, 1, 2]).as_standard_layout().into_owned())
        .map_err(|e| ModelError::shape(context, e.to_string()))
}

impl CellClass for Cnn2d {
    fn spec(&self) -> &ClassSpec {
        &self.spec
    }

    fn init_attributes(&self, attrs: &mut Kwargs) -> ModelResult<()> {
        Activation::resolve(attrs.get_opt_str("h_act")?)?;
        let dim_out = ConvGeometry::from_attrs(attrs)?.dim_out()?;
        match attrs.get_opt_usize("dim_out")? {
            Some(declared) if declared != dim_out => Err(invalid(format!(
                "dim_out = {} but the layers produce {}",
                declared, dim_out
            ))),
            _ => {
                attrs.insert("dim_out".to_string(), json!(dim_out));
                Ok(())
            }
        }
    }

    fn init_params(&self, init: &mut ParamInit<'_>) -> ModelResult<ParamSet> {
        let geometry = ConvGeometry::from_attrs(init.attrs)?;
        let mut channels = geometry.input.0;
        let mut weights = Vec::with_capacity(geometry.layers.len());
        let mut biases = Vec::with_capacity(geometry.layers.len());
        for layer in &geometry.layers {
            let (fh, fw) = layer.filter;
            weights.push(init.normal(&[layer.filters, channels, fh, fw]));
            biases.push(ArrayD::zeros(vec![layer.filters]));
            channels = layer.filters;
        }
        let mut params = ParamSet::new();
        params.insert_group("W", weights);
        params.insert_group("b", biases);
        Ok(params)
    }

    /// `output` is computed from the layer geometry once every layer argument is known
    fn set_link_value(&self, key: &str, args: &ArgView<'_>) -> ModelResult<Option<Value>> {
        match key {
            "input" => Ok(args.get("input_shape")),
            "output" => {
                if let Some(dim_out) = args.get("dim_out") {
                    return Ok(Some(dim_out));
                }
                let values = (
                    args.get("input_shape"),
                    args.get("n_filters"),
                    args.get("filter_shapes"),
                    args.get("pool_sizes"),
                );
                match values {
                    (Some(input_shape), Some(n_filters), Some(filter_shapes), Some(pool_sizes)) => {
                        let geometry =
                            ConvGeometry::from_values(&input_shape, &n_filters, &filter_shapes, &pool_sizes)?;
                        Ok(Some(json!(geometry.dim_out()?)))
                    }
                    _ => Ok(None),
                }
            }
            other => Err(ModelError::UnsupportedKey {
                owner: self.tag().to_string(),
                key: other.to_string(),
            }),
        }
    }

    /// Input: `(B, C, H, W)`, `(B, H, W)` for one channel, or flattened `(B, C*H*W)`
    fn feed(
        &self,
        cell: &Cell,
        ctx: &BuildContext,
        inputs: &[ArrayD<f32>],
        params: &[ArrayD<f32>],
    ) -> ModelResult<Outputs> {
        let name = cell.name();
        let attrs = cell.attrs();
        let geometry = ConvGeometry::from_attrs(attrs)?;
        let n = geometry.layers.len();
        if params.len() < 2 * n {
            return Err(ModelError::shape(
                name,
                format!("expected {} parameters, got {}", 2 * n, params.len()),
            ));
        }
        let h_act = Activation::resolve(attrs.get_opt_str("h_act")?)?;
        let rate = attrs.get_f32("dropout").unwrap_or(0.0);
        let normalize = attrs.get_bool("batch_normalization").unwrap_or(false);
        let noisy = ctx.noise().is_on() && rate > 0.0;

        let x = input(inputs, 0, cell)?;
        let batch = x.shape().first().copied().unwrap_or(0);
        let (c, h, w) = geometry.input;
        let mut x = x
            .to_shape((batch, c, h, w))
            .map_err(|e| ModelError::shape(name, format!("input {:?}: {}", x.shape(), e)))?
            .into_owned();

        let mut outs = Outputs::new();
        for (l, layer) in geometry.layers.iter().enumerate() {
            let weights = params[l]
                .view()
                .into_dimensionality::<Ix4>()
                .map_err(|e| ModelError::shape(name, e.to_string()))?;
            let bias = params[n + l]
                .view()
                .into_shape_with_order((1, layer.filters, 1, 1))
                .map_err(|e| ModelError::shape(name, e.to_string()))?;

            let conv = correlate(&x.view(), &weights, name)?;
            let mut z = &max_pool(&conv, layer.pool) + &bias;
            if normalize {
                z = normalize_channels(z, name)?;
            }
            let mut hidden = h_act.apply(&z.clone().into_dyn());
            if noisy {
                hidden = dropout(&hidden, h_act, rate, &mut *cell.noise_rng())?;
            }
            outs.insert(format!("Z_{}", l), z.into_dyn());
            outs.insert(format!("H_{}", l), hidden.clone());
            x = hidden
                .into_dimensionality::<Ix4>()
                .map_err(|e| ModelError::shape(name, e.to_string()))?;
        }

        let width = x.len() / batch.max(1);
        let flat = x
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(vec![batch, width])
            .map_err(|e| ModelError::shape(name, e.to_string()))?;
        outs.insert("output".to_string(), flat);
        Ok(outs)
    }
}
