//! PCA by singular value decomposition of the centered sample matrix

use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::config::PcaParams;
use crate::error::{Result, VoomError};

const SVD_EPS: f64 = 1e-14;
const SVD_MAX_ITER: usize = 10_000;

/// One principal component
#[derive(Debug, Clone)]
pub struct PrincipalComponent {
    /// Sample coordinates, `U * s`
    pub scores: Array1<f64>,
    /// Unit-length gene loadings (right singular vector)
    pub loadings: Array1<f64>,
    pub singular_value: f64,
    /// `s^2 / sum(s^2)`
    pub proportion_of_variance: f64,
}

/// Components in descending order of singular value
#[derive(Debug, Clone)]
pub struct PcaResult {
    pub sample_ids: Vec<String>,
    /// Genes that entered the decomposition
    pub gene_ids: Vec<String>,
    /// Per-gene means removed before the decomposition
    pub center: Array1<f64>,
    pub components: Vec<PrincipalComponent>,
}

impl PcaResult {
    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    pub fn proportions(&self) -> Vec<f64> {
        self.components.iter().map(|pc| pc.proportion_of_variance).collect()
    }

    /// Rebuild the centered matrix (genes x samples) from every component
    pub fn reconstruct(&self) -> Array2<f64> {
        let mut centered = Array2::zeros((self.gene_ids.len(), self.sample_ids.len()));
        for pc in &self.components {
            for (g, &l) in pc.loadings.iter().enumerate() {
                let mut row = centered.row_mut(g);
                row.scaled_add(l, &pc.scores);
            }
        }
        centered
    }
}

/// Project the samples (columns) of `matrix` (genes x samples) onto its
/// principal components.
pub fn pca(matrix: ArrayView2<f64>, gene_ids: &[String], sample_ids: &[String], params: &PcaParams) -> Result<PcaResult> {
    let (n_genes, n_samples) = matrix.dim();
    if gene_ids.len() != n_genes || sample_ids.len() != n_samples {
        return Err(VoomError::DimensionMismatch {
            expected: format!("{} genes x {} samples", n_genes, n_samples),
            got: format!("{} gene ids x {} sample ids", gene_ids.len(), sample_ids.len()),
        });
    }
    if n_samples < 2 {
        return Err(VoomError::InsufficientData {
            reason: format!("PCA needs at least 2 samples, got {}", n_samples),
        });
    }
    if n_genes == 0 {
        return Err(VoomError::insufficient("PCA input has no genes"));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(VoomError::InvalidInput {
            reason: "PCA input contains non-finite values".to_string(),
        });
    }

    let rows = match params.top_variable_genes {
        Some(top) if top < n_genes => most_variable_genes(matrix, top),
        _ => (0..n_genes).collect(),
    };
    let selected = matrix.select(Axis(0), &rows);
    let n_used = rows.len();

    let center = selected
        .mean_axis(Axis(1))
        .ok_or_else(|| VoomError::insufficient("PCA input has no samples"))?;

    // samples x genes, each gene centered
    let centered = DMatrix::from_fn(n_samples, n_used, |i, g| selected[[g, i]] - center[g]);
    let svd = centered
        .try_svd(true, true, SVD_EPS, SVD_MAX_ITER)
        .ok_or_else(|| VoomError::NumericalInstability {
            operation: "PCA".to_string(),
            details: "singular value decomposition did not converge".to_string(),
        })?;
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => {
            return Err(VoomError::NumericalInstability {
                operation: "PCA".to_string(),
                details: "singular vectors were not computed".to_string(),
            })
        }
    };
    let singular_values = svd.singular_values;

    let total: f64 = singular_values.iter().map(|s| s * s).sum();
    if !(total > 0.0) {
        return Err(VoomError::insufficient("PCA input has no variance after centering"));
    }

    let mut order: Vec<usize> = (0..singular_values.len()).collect();
    order.sort_by(|&a, &b| singular_values[b].total_cmp(&singular_values[a]));

    let components = order
        .into_iter()
        .map(|k| {
            let s = singular_values[k];
            let mut loadings = Array1::from_iter(v_t.row(k).iter().copied());
            let mut scores = Array1::from_iter(u.column(k).iter().map(|x| x * s));

            // largest-magnitude loading is positive
            let pivot = loadings
                .iter()
                .copied()
                .max_by(|a, b| a.abs().total_cmp(&b.abs()))
                .unwrap_or(0.0);
            if pivot < 0.0 {
                loadings.mapv_inplace(|l| -l);
                scores.mapv_inplace(|x| -x);
            }

            PrincipalComponent {
                scores,
                loadings,
                singular_value: s,
                proportion_of_variance: s * s / total,
            }
        })
        .collect::<Vec<_>>();

    log::info!(
        "PCA on {} genes x {} samples: PC1 {:.1}%, PC2 {:.1}%",
        n_used,
        n_samples,
        components.first().map_or(0.0, |pc| pc.proportion_of_variance * 100.0),
        components.get(1).map_or(0.0, |pc| pc.proportion_of_variance * 100.0)
    );

    Ok(PcaResult {
        sample_ids: sample_ids.to_vec(),
        gene_ids: rows.iter().map(|&g| gene_ids[g].clone()).collect(),
        center,
        components,
    })
}

/// Row indices of the `top` genes with the largest variance, in input order
fn most_variable_genes(matrix: ArrayView2<f64>, top: usize) -> Vec<usize> {
    let variances = matrix.var_axis(Axis(1), 1.0);
    let mut idx: Vec<usize> = (0..matrix.nrows()).collect();
    idx.sort_by(|&a, &b| variances[b].total_cmp(&variances[a]));
    idx.truncate(top);
    idx.sort_unstable();
    idx
}
