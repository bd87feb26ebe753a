// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Weight initialization.

Square matrices are initialized orthogonally (Gram-Schmidt over a normal
draw) when enabled; everything else is a scaled normal draw.
*/

use ndarray::{Array2, ArrayD};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::rng::normal_array;

const ORTHO_EPSILON: f32 = 1e-6;

/// `(dim_in, dim_out)` weight matrix
pub fn norm_weight(
    rng: &mut impl Rng,
    dim_in: usize,
    dim_out: usize,
    scale: f32,
    orthogonal: bool,
) -> ArrayD<f32> {
    if orthogonal && dim_in == dim_out && dim_in > 0 {
        ortho_weight(rng, dim_in).into_dyn()
    } else {
        normal_array(rng, &[dim_in, dim_out], scale)
    }
}

/// Random orthogonal `n x n` matrix
pub fn ortho_weight(rng: &mut impl Rng, n: usize) -> Array2<f32> {
    loop {
        let draw = Array2::<f32>::from_shape_simple_fn((n, n), || rng.sample(StandardNormal));
        let mut q = Array2::<f32>::zeros((n, n));
        let mut degenerate = false;

        for j in 0..n {
            let mut v = draw.column(j).to_owned();
            for k in 0..j {
                let basis = q.column(k);
                let projection = basis.dot(&v);
                v.scaled_add(-projection, &basis);
            }
            let norm = v.dot(&v).sqrt();
            if norm < ORTHO_EPSILON {
                degenerate = true;
                break;
            }
            q.column_mut(j).assign(&(v / norm));
        }

        if !degenerate {
            return q;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::seeded;

    #[test]
    fn test_ortho_weight_is_orthogonal() {
        let mut rng = seeded(11);
        let q = ortho_weight(&mut rng, 6);
        let identity = q.t().dot(&q);
        for i in 0..6 {
            for j in 0..6 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((identity[[i, j]] - expected).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_norm_weight_shapes() {
        let mut rng = seeded(11);
        assert_eq!(norm_weight(&mut rng, 3, 5, 0.01, true).shape(), &[3, 5]);
        assert_eq!(norm_weight(&mut rng, 4, 4, 0.01, false).shape(), &[4, 4]);
        let small = norm_weight(&mut rng, 10, 20, 0.01, true);
        assert!(small.iter().all(|v| v.abs() < 0.1));
    }
}
