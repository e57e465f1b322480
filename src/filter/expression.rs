//! Library-size-aware expression filter
//!
//! A gene is kept when its CPM reaches the level of `min_count` reads in a
//! median-sized library in at least as many samples as the smallest condition
//! group, and its total count reaches `min_total_count`. The CPM threshold is
//! therefore calibrated to sequencing depth, and the sample requirement means a
//! gene expressed in only one group still passes.

use ndarray::ArrayView2;

use crate::config::FilterParams;
use crate::data::{ConditionAssignment, CountMatrix};
use crate::error::{Result, VoomError};
use crate::stats::median;

const TOL: f64 = 1e-14;

/// Genes retained by the expression filter.
///
/// Carries the library sizes the decision was calibrated with; they are not
/// recomputed from the retained rows, so filtering again keeps every gene.
#[derive(Debug, Clone)]
pub struct FilteredCountMatrix {
    counts: CountMatrix,
    library_sizes: Vec<f64>,
    retained: Vec<usize>,
    n_input_genes: usize,
}

impl FilteredCountMatrix {
    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn library_sizes(&self) -> &[f64] {
        &self.library_sizes
    }

    /// Row indices of the retained genes in the unfiltered matrix
    pub fn retained(&self) -> &[usize] {
        &self.retained
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    pub fn n_discarded(&self) -> usize {
        self.n_input_genes - self.retained.len()
    }
}

/// Filter the genes of `counts` using column sums as library sizes
pub fn filter_by_expression(
    counts: &CountMatrix,
    conditions: &ConditionAssignment,
    params: &FilterParams,
) -> Result<FilteredCountMatrix> {
    let library_sizes = counts.library_sizes();
    let all: Vec<usize> = (0..counts.n_genes()).collect();
    apply_filter(counts, library_sizes, &all, conditions, params)
}

/// Apply the filter again to an already filtered matrix, with its carried library sizes
pub fn refilter(
    filtered: &FilteredCountMatrix,
    conditions: &ConditionAssignment,
    params: &FilterParams,
) -> Result<FilteredCountMatrix> {
    let mut result = apply_filter(
        &filtered.counts,
        filtered.library_sizes.clone(),
        &filtered.retained,
        conditions,
        params,
    )?;
    result.n_input_genes = filtered.n_input_genes;
    Ok(result)
}

fn apply_filter(
    counts: &CountMatrix,
    library_sizes: Vec<f64>,
    original_rows: &[usize],
    conditions: &ConditionAssignment,
    params: &FilterParams,
) -> Result<FilteredCountMatrix> {
    if conditions.n_samples() != counts.n_samples() {
        return Err(VoomError::DimensionMismatch {
            expected: format!("{} condition labels", counts.n_samples()),
            got: format!("{} condition labels", conditions.n_samples()),
        });
    }

    let min_samples = required_samples(conditions.min_group_size(), params);
    let keep = expressed_genes(counts.counts(), &library_sizes, min_samples, params);

    let keep_idx: Vec<usize> = keep.iter().enumerate().filter(|(_, &k)| k).map(|(i, _)| i).collect();
    if keep_idx.is_empty() {
        return Err(VoomError::configuration(format!(
            "expression filter removed all {} genes",
            counts.n_genes()
        )));
    }

    log::info!(
        "Expression filter kept {} of {} genes (required samples: {:.2})",
        keep_idx.len(),
        counts.n_genes(),
        min_samples
    );

    Ok(FilteredCountMatrix {
        counts: counts.subset_genes(&keep_idx)?,
        library_sizes,
        retained: keep_idx.iter().map(|&i| original_rows[i]).collect(),
        n_input_genes: counts.n_genes(),
    })
}

/// Number of samples that must pass the CPM threshold
fn required_samples(min_group_size: usize, params: &FilterParams) -> f64 {
    let n = min_group_size as f64;
    if n > params.large_n {
        params.large_n + (n - params.large_n) * params.min_prop
    } else {
        n
    }
}

/// Per-gene keep decision
pub fn expressed_genes(
    counts: ArrayView2<f64>,
    library_sizes: &[f64],
    min_samples: f64,
    params: &FilterParams,
) -> Vec<bool> {
    let median_lib = median(library_sizes);
    let cpm_cutoff = params.min_count / median_lib * 1e6;
    log::debug!("CPM cutoff {:.4} (median library size {:.0})", cpm_cutoff, median_lib);

    counts
        .rows()
        .into_iter()
        .map(|row| {
            let above = row
                .iter()
                .zip(library_sizes.iter())
                .filter(|(&c, &lib)| lib > 0.0 && c / lib * 1e6 >= cpm_cutoff)
                .count() as f64;
            let total: f64 = row.sum();
            above >= min_samples - TOL && total >= params.min_total_count - TOL
        })
        .collect()
}
