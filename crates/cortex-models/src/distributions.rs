// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Output distributions for generative cells.

A distribution maps an unconstrained pre-activation to its parameters,
scores data under those parameters and draws samples from pre-generated
random variables so sampling stays reproducible.
*/

use ndarray::{ArrayD, ArrayViewD, Axis, Slice};
use rand::Rng;

use crate::ops::sigmoid;
use crate::rng::{normal_array, uniform_array};
use crate::types::{ModelError, ModelResult};

const LOG_2PI: f32 = 1.837_877_1;
const PROB_EPSILON: f32 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    Binomial,
    Gaussian,
}

impl Distribution {
    pub fn from_tag(tag: &str) -> ModelResult<Self> {
        match tag {
            "binomial" | "bernoulli" => Ok(Distribution::Binomial),
            "gaussian" | "normal" => Ok(Distribution::Gaussian),
            other => Err(ModelError::InvalidArgument {
                owner: "distribution".to_string(),
                reason: format!("unsupported distribution `{}`", other),
            }),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Distribution::Binomial => "binomial",
            Distribution::Gaussian => "gaussian",
        }
    }

    /// Parameter width per data dimension
    pub fn scale(&self) -> usize {
        match self {
            Distribution::Binomial => 1,
            Distribution::Gaussian => 2,
        }
    }

    /// Map pre-activations to distribution parameters
    pub fn activate(&self, preact: &ArrayD<f32>) -> ArrayD<f32> {
        match self {
            Distribution::Binomial => preact.mapv(sigmoid),
            Distribution::Gaussian => preact.clone(),
        }
    }

    /// Gaussian parameters split into `(mu, log_sigma)` along the last axis
    fn split<'a>(&self, p: &'a ArrayD<f32>) -> ModelResult<(ArrayViewD<'a, f32>, ArrayViewD<'a, f32>)> {
        let last = p
            .ndim()
            .checked_sub(1)
            .ok_or_else(|| ModelError::shape("gaussian", "parameters must have at least one axis"))?;
        let width = p.shape()[last];
        if width % 2 != 0 {
            return Err(ModelError::shape(
                "gaussian",
                format!("parameter width {} is not even", width),
            ));
        }
        let half = width / 2;
        let mu = p.slice_axis(Axis(last), Slice::from(..half));
        let log_sigma = p.slice_axis(Axis(last), Slice::from(half..));
        Ok((mu, log_sigma))
    }

    /// Negative log-likelihood summed over the last axis
    pub fn neg_log_prob(&self, x: &ArrayD<f32>, p: &ArrayD<f32>) -> ModelResult<ArrayD<f32>> {
        let last = x
            .ndim()
            .checked_sub(1)
            .ok_or_else(|| ModelError::shape(self.tag(), "data must have at least one axis"))?;
        let per_dim = match self {
            Distribution::Binomial => {
                if x.shape() != p.shape() {
                    return Err(ModelError::shape(
                        "binomial",
                        format!("data {:?} vs parameters {:?}", x.shape(), p.shape()),
                    ));
                }
                let p = p.mapv(|v| v.clamp(PROB_EPSILON, 1.0 - PROB_EPSILON));
                let mut out = x.clone();
                ndarray::Zip::from(&mut out).and(&p).for_each(|xv, pv| {
                    *xv = -(*xv * pv.ln() + (1.0 - *xv) * (1.0 - pv).ln());
                });
                out
            }
            Distribution::Gaussian => {
                let (mu, log_sigma) = self.split(p)?;
                if mu.shape() != x.shape() {
                    return Err(ModelError::shape(
                        "gaussian",
                        format!("data {:?} vs means {:?}", x.shape(), mu.shape()),
                    ));
                }
                let mut out = x.clone();
                ndarray::Zip::from(&mut out)
                    .and(&mu)
                    .and(&log_sigma)
                    .for_each(|xv, m, ls| {
                        let z = (*xv - m) * (-ls).exp();
                        *xv = 0.5 * (z * z + LOG_2PI) + ls;
                    });
                out
            }
        };
        Ok(per_dim.sum_axis(Axis(last)))
    }

    /// Draw random variables for `shape` (data dimension last)
    pub fn generate_random_variables(&self, rng: &mut impl Rng, shape: &[usize]) -> ArrayD<f32> {
        match self {
            Distribution::Binomial => uniform_array(rng, shape),
            Distribution::Gaussian => normal_array(rng, shape, 1.0),
        }
    }

    /// Sample from parameters `p` using pre-drawn random variables
    pub fn sample(&self, epsilon: &ArrayD<f32>, p: &ArrayD<f32>) -> ModelResult<ArrayD<f32>> {
        match self {
            Distribution::Binomial => {
                if epsilon.shape() != p.shape() {
                    return Err(ModelError::shape(
                        "binomial sample",
                        format!("noise {:?} vs parameters {:?}", epsilon.shape(), p.shape()),
                    ));
                }
                let mut out = p.clone();
                ndarray::Zip::from(&mut out)
                    .and(epsilon)
                    .for_each(|pv, e| *pv = if *e <= *pv { 1.0 } else { 0.0 });
                Ok(out)
            }
            Distribution::Gaussian => {
                let (mu, log_sigma) = self.split(p)?;
                if epsilon.shape() != mu.shape() {
                    return Err(ModelError::shape(
                        "gaussian sample",
                        format!("noise {:?} vs means {:?}", epsilon.shape(), mu.shape()),
                    ));
                }
                Ok(&mu + &(log_sigma.mapv(f32::exp) * epsilon))
            }
        }
    }

    /// Expected value under parameters `p`
    pub fn center(&self, p: &ArrayD<f32>) -> ModelResult<ArrayD<f32>> {
        match self {
            Distribution::Binomial => Ok(p.clone()),
            Distribution::Gaussian => Ok(self.split(p)?.0.to_owned()),
        }
    }

    /// Initial sample for a `(batch, dim)` chain with every parameter at `p0`
    pub fn simple_sample(&self, rng: &mut impl Rng, batch: usize, dim: usize, p0: f32) -> ArrayD<f32> {
        match self {
            Distribution::Binomial => {
                let eps = uniform_array(rng, &[batch, dim]);
                eps.mapv(|e| if e <= p0 { 1.0 } else { 0.0 })
            }
            Distribution::Gaussian => {
                let mut out = normal_array(rng, &[batch, dim], 1.0);
                out.mapv_inplace(|v| v + p0);
                out
            }
        }
    }
}
