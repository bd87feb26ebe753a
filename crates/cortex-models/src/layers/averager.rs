// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Running-average cell

use ndarray::{ArrayD, Axis, IxDyn};
use serde_json::json;

use super::input;
use crate::attrs::KwargsExt;
use crate::cell::{Cell, CellClass, ClassSpec, ParamInit, ParamSet};
use crate::context::BuildContext;
use crate::types::{ModelError, ModelResult, Outputs};

/// Holds a running mean `m` of its inputs and outputs it for every example
#[derive(Debug)]
pub struct Averager {
    spec: ClassSpec,
}

impl Default for Averager {
    fn default() -> Self {
        Self::new()
    }
}

impl Averager {
    pub fn new() -> Self {
        let spec = ClassSpec::new("Averager")
            .required(&["shape"])
            .options(&[("rate", json!(0.1)), ("weight_noise", json!(0))])
            .args(&["shape"]);
        Self { spec }
    }

    /// `(1 - rate) * m + rate * mean(x)`, averaging `x` over its leading axes
    pub fn updated_average(cell: &Cell, x: &ArrayD<f32>, m: &ArrayD<f32>) -> ModelResult<ArrayD<f32>> {
        let rate = cell.attrs().get_f32("rate")?;
        let width = m.len();
        if width == 0 || x.len() % width != 0 || x.shape().last() != m.shape().last() {
            return Err(ModelError::shape(
                cell.name(),
                format!("cannot average {:?} into {:?}", x.shape(), m.shape()),
            ));
        }
        let flat = x
            .to_shape((x.len() / width, width))
            .map_err(|e| ModelError::shape(cell.name(), e.to_string()))?;
        let mean = flat
            .mean_axis(Axis(0))
            .ok_or_else(|| ModelError::shape(cell.name(), "cannot average an empty batch"))?
            .into_shape_with_order(m.shape().to_vec())
            .map_err(|e| ModelError::shape(cell.name(), e.to_string()))?;
        Ok(m * (1.0 - rate) + &(mean * rate))
    }
}

impl CellClass for Averager {
    fn spec(&self) -> &ClassSpec {
        &self.spec
    }

    fn init_params(&self, init: &mut ParamInit<'_>) -> ModelResult<ParamSet> {
        let shape = init.attrs.get_shape("shape")?;
        let mut params = ParamSet::new();
        params.insert("m", ArrayD::zeros(IxDyn(&shape)));
        Ok(params)
    }

    fn feed(
        &self,
        cell: &Cell,
        _ctx: &BuildContext,
        inputs: &[ArrayD<f32>],
        params: &[ArrayD<f32>],
    ) -> ModelResult<Outputs> {
        let m = params
            .first()
            .ok_or_else(|| ModelError::shape(cell.name(), "missing running mean"))?;
        let x = input(inputs, 0, cell)?;

        let mut shape: Vec<usize> = x.shape().iter().take(x.ndim().saturating_sub(1)).copied().collect();
        shape.extend_from_slice(m.shape());
        let y = m
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| {
                ModelError::shape(cell.name(), format!("cannot broadcast {:?} to {:?}", m.shape(), shape))
            })?
            .to_owned();

        let mut outs = Outputs::new();
        outs.insert("output".to_string(), y);
        Ok(outs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Kwargs;

    #[test]
    fn test_average_moves_toward_batch_mean() {
        let mut ctx = BuildContext::new();
        let mut kwargs = Kwargs::new();
        kwargs.insert("shape".to_string(), json!([2]));
        kwargs.insert("rate".to_string(), json!(0.5));
        ctx.prepare_cell("Averager", None, Some("avg"), kwargs).unwrap();
        ctx.build(None).unwrap();
        let cell = ctx.cell("avg").unwrap();

        let x = ArrayD::from_shape_vec(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let m = ArrayD::zeros(vec![2]);
        let updated = Averager::updated_average(cell, &x, &m).unwrap();
        assert_eq!(updated.as_slice().unwrap(), &[1.0, 1.5]);

        let bad = ArrayD::zeros(vec![2, 3]);
        assert!(Averager::updated_average(cell, &bad, &m).is_err());

        let outs = cell.call(&ctx, vec![ArrayD::zeros(vec![5, 2])]).unwrap();
        assert_eq!(outs["output"].shape(), &[5, 2]);
    }
}
