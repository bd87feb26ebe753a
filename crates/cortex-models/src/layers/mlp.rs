// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Feed-forward cells: the multilayer perceptron and its distribution head

use ndarray::ArrayD;
use serde_json::{json, Value};

use super::{feed_component, input, merge_prefixed, output};
use crate::attrs::KwargsExt;
use crate::cell::{Cell, CellClass, ClassSpec, ComponentTemplate, DistributionKey, ParamInit, ParamSet};
use crate::context::BuildContext;
use crate::distributions::Distribution;
use crate::ops::{batch_normalization, dense, dropout, Activation};
use crate::types::{Kwargs, ModelError, ModelResult, Outputs};

const BN_EPSILON: f32 = 1e-5;

/// Multilayer perceptron
///
/// Hidden widths come from `dim_hs`, or from `dim_h` repeated for
/// `n_layers - 1` hidden layers (`n_layers` defaults to 2 when `dim_h` is set).
/// With neither, the cell is a single affine map.
#[derive(Debug)]
pub struct Mlp {
    spec: ClassSpec,
}

impl Default for Mlp {
    fn default() -> Self {
        Self::new()
    }
}

impl Mlp {
    pub fn new() -> Self {
        let spec = ClassSpec::new("MLP")
            .required(&["dim_in", "dim_out"])
            .options(&[
                ("dim_h", Value::Null),
                ("dim_hs", Value::Null),
                ("n_layers", Value::Null),
                ("h_act", json!("sigmoid")),
                ("out_act", json!("identity")),
                ("dropout", json!(false)),
                ("weight_noise", json!(0)),
                ("batch_normalization", json!(false)),
            ])
            .args(&["dim_in", "dim_h", "dim_hs", "n_layers", "dim_out", "h_act", "out_act"])
            .dim("input", "dim_in")
            .dim("output", "dim_out")
            .weights(&["W"]);
        Self { spec }
    }

    /// Widths from `dim_in` through the hidden layers to `dim_out`
    pub fn layer_dims(attrs: &Kwargs) -> ModelResult<Vec<usize>> {
        let dim_in = attrs.get_usize("dim_in")?;
        let dim_out = attrs.get_usize("dim_out")?;
        let n_layers = attrs.get_opt_usize("n_layers")?;

        let hidden = match (attrs.get_opt_usize_list("dim_hs")?, attrs.get_opt_usize("dim_h")?) {
            (Some(dim_hs), _) => {
                if let Some(n) = n_layers {
                    if n != dim_hs.len() + 1 {
                        return Err(ModelError::InvalidArgument {
                            owner: "MLP".to_string(),
                            reason: format!(
                                "n_layers = {} disagrees with {} hidden widths",
                                n,
                                dim_hs.len()
                            ),
                        });
                    }
                }
                dim_hs
            }
            (None, Some(dim_h)) => {
                let n = n_layers.unwrap_or(2);
                if n == 0 {
                    return Err(ModelError::InvalidArgument {
                        owner: "MLP".to_string(),
                        reason: "n_layers must be at least 1".to_string(),
                    });
                }
                vec![dim_h; n - 1]
            }
            (None, None) => match n_layers {
                None | Some(1) => Vec::new(),
                Some(n) => {
                    return Err(ModelError::InvalidArgument {
                        owner: "MLP".to_string(),
                        reason: format!("n_layers = {} needs dim_h or dim_hs", n),
                    })
                }
            },
        };

        let mut dims = Vec::with_capacity(hidden.len() + 2);
        dims.push(dim_in);
        dims.extend(hidden);
        dims.push(dim_out);
        Ok(dims)
    }
}

impl CellClass for Mlp {
    fn spec(&self) -> &ClassSpec {
        &self.spec
    }

    fn init_attributes(&self, attrs: &mut Kwargs) -> ModelResult<()> {
        Activation::resolve(attrs.get_opt_str("h_act")?)?;
        Activation::resolve(attrs.get_opt_str("out_act")?)?;
        Self::layer_dims(attrs)?;
        Ok(())
    }

    fn init_params(&self, init: &mut ParamInit<'_>) -> ModelResult<ParamSet> {
        let dims = Self::layer_dims(init.attrs)?;
        let mut weights = Vec::with_capacity(dims.len() - 1);
        let mut biases = Vec::with_capacity(dims.len() - 1);
        for pair in dims.windows(2) {
            weights.push(init.norm_weight(pair[0], pair[1]));
            biases.push(ArrayD::zeros(vec![pair[1]]));
        }
        let mut params = ParamSet::new();
        params.insert_group("W", weights);
        params.insert_group("b", biases);
        Ok(params)
    }

    fn feed(
        &self,
        cell: &Cell,
        ctx: &BuildContext,
        inputs: &[ArrayD<f32>],
        params: &[ArrayD<f32>],
    ) -> ModelResult<Outputs> {
        let attrs = cell.attrs();
        let n = Self::layer_dims(attrs)?.len() - 1;
        if params.len() < 2 * n {
            return Err(ModelError::shape(
                cell.name(),
                format!("expected {} parameters, got {}", 2 * n, params.len()),
            ));
        }
        let h_act = Activation::resolve(attrs.get_opt_str("h_act")?)?;
        let out_act = Activation::resolve(attrs.get_opt_str("out_act")?)?;
        let rate = attrs.get_f32("dropout").unwrap_or(0.0);
        let normalize = attrs.get_bool("batch_normalization").unwrap_or(false);
        let noisy = ctx.noise().is_on() && rate > 0.0;

        let mut x = input(inputs, 0, cell)?.clone();
        let mut outs = Outputs::new();
        for i in 0..n {
            if normalize {
                x = batch_normalization(&x, BN_EPSILON)?;
            }
            let z = dense(&x, &params[i], &params[n + i], cell.name())?;
            if i + 1 < n {
                let mut h = h_act.apply(&z);
                if noisy {
                    h = dropout(&h, h_act, rate, &mut *cell.noise_rng())?;
                }
                outs.insert(format!("Z_{}", i), z);
                outs.insert(format!("H_{}", i), h.clone());
                x = h;
            } else {
                let y = out_act.apply(&z);
                outs.insert(format!("Z_{}", i), z);
                outs.insert("Y".to_string(), y.clone());
                outs.insert("output".to_string(), y);
            }
        }
        Ok(outs)
    }
}

/// MLP producing the parameters of an output distribution
///
/// The inner `mlp` component is `distribution.scale()` times wider than
/// `dim_out`; its output is mapped to distribution parameters `P`.
#[derive(Debug)]
pub struct DistributionMlp {
    spec: ClassSpec,
}

impl Default for DistributionMlp {
    fn default() -> Self {
        Self::new()
    }
}

impl DistributionMlp {
    pub fn new() -> Self {
        let mlp = ComponentTemplate::new("MLP")
            .owner_arg("dim_in", "dim_in")
            .owner_arg("dim_out", "mlp_dim_out")
            .passed(&["dim_h", "dim_hs", "n_layers", "h_act", "dropout"])
            .force("out_act", json!("identity"));
        let spec = ClassSpec::new("DistributionMLP")
            .required(&["dim_in", "dim_out"])
            .options(&[("distribution_type", json!("binomial")), ("weight_noise", json!(0))])
            .args(&["dim_in", "dim_out", "distribution_type"])
            .dim("input", "dim_in")
            .dim("output", "dim_out")
            .dim("P", "dim_out")
            .dim("samples", "dim_out")
            .dist("P", "distribution_type")
            .dist("samples", "distribution_type")
            .distribution(DistributionKey::Argument("distribution_type".to_string()))
            .component("mlp", Some(mlp));
        Self { spec }
    }
}

/// Output distribution of a built cell carrying `distribution_type`
pub fn distribution_of(cell: &Cell) -> ModelResult<Distribution> {
    Distribution::from_tag(cell.attrs().get_str("distribution_type")?)
}

impl CellClass for DistributionMlp {
    fn spec(&self) -> &ClassSpec {
        &self.spec
    }

    fn init_attributes(&self, attrs: &mut Kwargs) -> ModelResult<()> {
        let distribution = Distribution::from_tag(attrs.get_str("distribution_type")?)?;
        let dim_out = attrs.get_usize("dim_out")?;
        attrs.insert(
            "mlp_dim_out".to_string(),
            json!(dim_out * distribution.scale()),
        );
        Ok(())
    }

    fn feed(
        &self,
        cell: &Cell,
        ctx: &BuildContext,
        inputs: &[ArrayD<f32>],
        params: &[ArrayD<f32>],
    ) -> ModelResult<Outputs> {
        let distribution = distribution_of(cell)?;
        let mlp_outs = feed_component(cell, ctx, "mlp", &inputs[..1.min(inputs.len())], params)?;
        let z = output(&mlp_outs, "output", cell.name())?;
        let p = distribution.activate(z);

        let mut outs = Outputs::new();
        merge_prefixed(&mut outs, "mlp", &mlp_outs);
        outs.insert("Z".to_string(), z.clone());
        outs.insert("P".to_string(), p.clone());
        outs.insert("output".to_string(), p);
        Ok(outs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, Value)]) -> Kwargs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_layer_dims_variants() {
        let base = [("dim_in", json!(4)), ("dim_out", json!(2))];
        assert_eq!(Mlp::layer_dims(&attrs(&base)).unwrap(), vec![4, 2]);

        let mut with_h = base.to_vec();
        with_h.push(("dim_h", json!(8)));
        assert_eq!(Mlp::layer_dims(&attrs(&with_h)).unwrap(), vec![4, 8, 2]);
        with_h.push(("n_layers", json!(3)));
        assert_eq!(Mlp::layer_dims(&attrs(&with_h)).unwrap(), vec![4, 8, 8, 2]);

        let mut with_hs = base.to_vec();
        with_hs.push(("dim_hs", json!([16, 5])));
        assert_eq!(Mlp::layer_dims(&attrs(&with_hs)).unwrap(), vec![4, 16, 5, 2]);
    }

    #[test]
    fn test_layer_dims_rejects_inconsistent_depth() {
        let bad = attrs(&[
            ("dim_in", json!(4)),
            ("dim_out", json!(2)),
            ("dim_hs", json!([3])),
            ("n_layers", json!(5)),
        ]);
        assert!(matches!(
            Mlp::layer_dims(&bad),
            Err(ModelError::InvalidArgument { .. })
        ));
        let no_width = attrs(&[("dim_in", json!(4)), ("dim_out", json!(2)), ("n_layers", json!(3))]);
        assert!(Mlp::layer_dims(&no_width).is_err());
    }

    #[test]
    fn test_distribution_head_widens_inner_mlp() {
        let class = DistributionMlp::new();
        let mut gaussian = attrs(&[
            ("dim_in", json!(3)),
            ("dim_out", json!(5)),
            ("distribution_type", json!("gaussian")),
        ]);
        class.init_attributes(&mut gaussian).unwrap();
        assert_eq!(gaussian["mlp_dim_out"], json!(10));
    }
}
