//! Per-gene (weighted) least-squares fits of log-expression on a design matrix

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

use super::design::DesignMatrix;
use crate::error::{Result, VoomError};

/// Gene-wise linear model fits
#[derive(Debug, Clone)]
pub struct LinearModelFit {
    /// genes x coefficients
    pub coefficients: Array2<f64>,
    /// Residual standard deviation per gene (NaN with zero residual df)
    pub sigma: Array1<f64>,
    /// genes x samples, `coefficients * design'`
    pub fitted: Array2<f64>,
    pub df_residual: usize,
}

/// Fit every row of `y` (genes x samples) on `design`.
///
/// With `weights` (same shape as `y`) each gene is fit by weighted least
/// squares and sigma is the square root of the weighted residual sum of
/// squares over the residual degrees of freedom.
pub fn lm_fit(y: ArrayView2<f64>, design: &DesignMatrix, weights: Option<ArrayView2<f64>>) -> Result<LinearModelFit> {
    let (n_genes, n_samples) = y.dim();
    if design.n_samples() != n_samples {
        return Err(VoomError::DimensionMismatch {
            expected: format!("{} design rows", n_samples),
            got: format!("{} design rows", design.n_samples()),
        });
    }
    if let Some(w) = weights {
        if w.dim() != y.dim() {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{:?} weights", y.dim()),
                got: format!("{:?} weights", w.dim()),
            });
        }
    }

    let x = design.matrix();
    let n_coefs = design.n_coefs();
    let df_residual = design.residual_df();

    let per_gene: Vec<(Vec<f64>, f64, Vec<f64>)> = (0..n_genes)
        .into_par_iter()
        .map(|g| {
            let w_row = weights.as_ref().map(|w| w.row(g));
            fit_single_gene(x, y.row(g), w_row, df_residual)
        })
        .collect();

    let mut coefficients = Array2::zeros((n_genes, n_coefs));
    let mut sigma = Array1::zeros(n_genes);
    let mut fitted = Array2::zeros((n_genes, n_samples));
    for (g, (beta, s, fit)) in per_gene.into_iter().enumerate() {
        coefficients.row_mut(g).assign(&Array1::from(beta));
        sigma[g] = s;
        fitted.row_mut(g).assign(&Array1::from(fit));
    }

    Ok(LinearModelFit {
        coefficients,
        sigma,
        fitted,
        df_residual,
    })
}

fn fit_single_gene(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    w: Option<ArrayView1<f64>>,
    df_residual: usize,
) -> (Vec<f64>, f64, Vec<f64>) {
    let n_samples = x.nrows();
    let n_coefs = x.ncols();
    let weight = |i: usize| w.map_or(1.0, |w| w[i]);

    let mut xtwx = vec![0.0; n_coefs * n_coefs];
    let mut xtwy = vec![0.0; n_coefs];
    for i in 0..n_samples {
        let wi = weight(i);
        for j in 0..n_coefs {
            let xij = x[[i, j]];
            if xij == 0.0 {
                continue;
            }
            xtwy[j] += wi * xij * y[i];
            for k in 0..n_coefs {
                xtwx[j * n_coefs + k] += wi * xij * x[[i, k]];
            }
        }
    }

    let beta = solve_symmetric_system(&xtwx, &xtwy, n_coefs);

    let fitted: Vec<f64> = x
        .axis_iter(Axis(0))
        .map(|row| row.iter().zip(beta.iter()).map(|(a, b)| a * b).sum())
        .collect();

    let rss: f64 = (0..n_samples).map(|i| weight(i) * (y[i] - fitted[i]).powi(2)).sum();
    let sigma = if df_residual > 0 {
        (rss / df_residual as f64).sqrt()
    } else {
        f64::NAN
    };

    (beta, sigma, fitted)
}

/// Solve `a x = b` for symmetric positive definite `a` (row-major, n x n) by Cholesky
fn solve_symmetric_system(a: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut l = vec![0.0; n * n];

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                // empty design column: keep the factorization defined
                if sum <= 0.0 {
                    sum = 1e-12;
                }
                l[i * n + j] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }

    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }
    x
}
