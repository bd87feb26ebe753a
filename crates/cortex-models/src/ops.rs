// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Numeric building blocks for forward computations.

All tensors are `ArrayD<f32>`; dense layers operate on the last axis so
batch-major `(batch, dim)` and time-major `(time, batch, dim)` inputs share
one code path.
*/

use ndarray::{ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix2};
use rand::Rng;

use crate::rng::bernoulli_mask;
use crate::types::{ModelError, ModelResult};

/// Elementwise nonlinearities addressable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Identity,
    Sigmoid,
    Tanh,
    Relu,
    Softplus,
    Softmax,
}

impl Activation {
    /// Resolve a nonlinearity name; `None` and `"identity"`/`"linear"` are the identity
    pub fn resolve(name: Option<&str>) -> ModelResult<Self> {
        match name {
            None | Some("identity") | Some("linear") => Ok(Activation::Identity),
            Some("sigmoid") => Ok(Activation::Sigmoid),
            Some("tanh") => Ok(Activation::Tanh),
            Some("relu") => Ok(Activation::Relu),
            Some("softplus") => Ok(Activation::Softplus),
            Some("softmax") => Ok(Activation::Softmax),
            Some(other) => Err(ModelError::InvalidArgument {
                owner: "activation".to_string(),
                reason: format!("unknown nonlinearity `{}`", other),
            }),
        }
    }

    pub fn apply(&self, x: &ArrayD<f32>) -> ArrayD<f32> {
        match self {
            Activation::Identity => x.clone(),
            Activation::Sigmoid => x.mapv(sigmoid),
            Activation::Tanh => x.mapv(f32::tanh),
            Activation::Relu => x.mapv(|v| v.max(0.0)),
            Activation::Softplus => x.mapv(|v| (1.0 + v.exp()).ln()),
            Activation::Softmax => softmax(x),
        }
    }
}

pub fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Softmax over the last axis
pub fn softmax(x: &ArrayD<f32>) -> ArrayD<f32> {
    let mut out = x.clone();
    if out.ndim() == 0 {
        return out.mapv(|_| 1.0);
    }
    let last = Axis(out.ndim() - 1);
    for mut lane in out.lanes_mut(last) {
        let max = lane.fold(f32::NEG_INFINITY, |m, v| m.max(*v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
    out
}

pub(crate) fn as_matrix<'a>(a: &'a ArrayD<f32>, context: &str) -> ModelResult<ArrayView2<'a, f32>> {
    a.view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| ModelError::shape(context, format!("expected a matrix, got shape {:?}", a.shape())))
}

pub(crate) fn as_vector<'a>(a: &'a ArrayD<f32>, context: &str) -> ModelResult<ArrayView1<'a, f32>> {
    a.view()
        .into_dimensionality::<Ix1>()
        .map_err(|_| ModelError::shape(context, format!("expected a vector, got shape {:?}", a.shape())))
}

/// `x @ w + b` applied over the last axis of `x`
pub fn dense(x: &ArrayD<f32>, w: &ArrayD<f32>, b: &ArrayD<f32>, context: &str) -> ModelResult<ArrayD<f32>> {
    let w = as_matrix(w, context)?;
    let b = as_vector(b, context)?;
    let (dim_in, dim_out) = w.dim();

    let shape = x.shape().to_vec();
    let last = *shape
        .last()
        .ok_or_else(|| ModelError::shape(context, "input must have at least one axis"))?;
    if last != dim_in {
        return Err(ModelError::shape(
            context,
            format!("input last axis is {}, weights expect {}", last, dim_in),
        ));
    }
    if b.len() != dim_out {
        return Err(ModelError::shape(
            context,
            format!("bias has {} entries, weights produce {}", b.len(), dim_out),
        ));
    }

    let rows = if dim_in == 0 { 0 } else { x.len() / dim_in };
    let flat = x
        .to_shape((rows, dim_in))
        .map_err(|e| ModelError::shape(context, e.to_string()))?;
    let mut out = flat.dot(&w);
    out += &b;

    let mut out_shape = shape;
    if let Some(last) = out_shape.last_mut() {
        *last = dim_out;
    }
    out.into_shape_with_order(out_shape)
        .map_err(|e| ModelError::shape(context, e.to_string()))
}

/// Inverted dropout for a post-activation tensor
///
/// Only nonlinearities with a known output range are supported.
pub fn dropout(
    x: &ArrayD<f32>,
    activation: Activation,
    rate: f32,
    rng: &mut impl Rng,
) -> ModelResult<ArrayD<f32>> {
    if rate <= 0.0 {
        return Ok(x.clone());
    }
    if rate >= 1.0 {
        return Err(ModelError::InvalidArgument {
            owner: "dropout".to_string(),
            reason: format!("rate must be below 1, got {}", rate),
        });
    }
    let keep = 1.0 - rate;
    let mask = bernoulli_mask(rng, x.shape(), keep);
    match activation {
        Activation::Tanh => {
            let unit = (x + 1.0) * 0.5;
            Ok((&unit * &mask) * (2.0 / keep) - 1.0)
        }
        Activation::Sigmoid | Activation::Softplus | Activation::Relu => Ok((x * &mask) / keep),
        other => Err(ModelError::InvalidArgument {
            owner: "dropout".to_string(),
            reason: format!("dropout is not defined for {:?}", other),
        }),
    }
}

/// Normalize each feature over all leading axes
pub fn batch_normalization(x: &ArrayD<f32>, epsilon: f32) -> ModelResult<ArrayD<f32>> {
    let shape = x.shape().to_vec();
    let dim = *shape
        .last()
        .ok_or_else(|| ModelError::shape("batch_normalization", "input must have at least one axis"))?;
    if dim == 0 || x.is_empty() {
        return Ok(x.clone());
    }
    let flat = x
        .to_shape((x.len() / dim, dim))
        .map_err(|e| ModelError::shape("batch_normalization", e.to_string()))?;
    let mean = flat.mean_axis(Axis(0)).unwrap_or_else(|| ndarray::Array1::zeros(dim));
    let var = flat.var_axis(Axis(0), 0.0);
    let std = var.mapv(|v| (v + epsilon).sqrt());
    let normalized = (&flat - &mean) / &std;
    normalized
        .into_shape_with_order(shape)
        .map_err(|e| ModelError::shape("batch_normalization", e.to_string()))
}

/// Sum of squared differences over the last axis, averaged over the rest
pub fn squared_error(a: &ArrayD<f32>, b: &ArrayD<f32>) -> ModelResult<f32> {
    if a.shape() != b.shape() {
        return Err(ModelError::shape(
            "squared_error",
            format!("{:?} vs {:?}", a.shape(), b.shape()),
        ));
    }
    if a.is_empty() {
        return Ok(0.0);
    }
    let dim = a.shape().last().copied().unwrap_or(1).max(1);
    let total: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
    Ok(total / (a.len() / dim) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_dense_batch_and_time_major() {
        let w = array![[1.0f32, 0.0, 1.0], [0.0, 1.0, 1.0]].into_dyn();
        let b = array![0.5f32, 0.0, -1.0].into_dyn();

        let x2 = array![[1.0f32, 2.0]].into_dyn();
        let y2 = dense(&x2, &w, &b, "test").unwrap();
        assert_eq!(y2.shape(), &[1, 3]);
        assert_eq!(y2.as_slice().unwrap(), &[1.5, 2.0, 2.0]);

        let x3 = ArrayD::<f32>::ones(vec![4, 2, 2]);
        let y3 = dense(&x3, &w, &b, "test").unwrap();
        assert_eq!(y3.shape(), &[4, 2, 3]);
    }

    #[test]
    fn test_dense_rejects_wrong_width() {
        let w = Array2::<f32>::zeros((3, 2)).into_dyn();
        let b = ArrayD::<f32>::zeros(vec![2]);
        let x = ArrayD::<f32>::zeros(vec![5, 4]);
        assert!(matches!(
            dense(&x, &w, &b, "test"),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let x = array![[1.0f32, 2.0, 3.0], [0.0, 0.0, 0.0]].into_dyn();
        let y = softmax(&x);
        for row in y.lanes(Axis(1)) {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_dropout_rejects_identity() {
        let mut rng = crate::rng::seeded(3);
        let x = ArrayD::<f32>::ones(vec![2, 2]);
        assert!(dropout(&x, Activation::Identity, 0.5, &mut rng).is_err());
        assert_eq!(dropout(&x, Activation::Identity, 0.0, &mut rng).unwrap(), x);
    }

    #[test]
    fn test_unknown_activation() {
        assert!(Activation::resolve(Some("swish")).is_err());
        assert_eq!(Activation::resolve(None).unwrap(), Activation::Identity);
    }
}
