//! Trimmed mean of M-values (TMM) normalization factors
//!
//! Each sample is compared against a reference sample. Genes with extreme
//! log-ratios (M) or extreme average abundance (A) are trimmed and the
//! remaining M-values are averaged with inverse-variance weights, so a
//! moderate fraction of differentially expressed genes does not drag the
//! scale factor. Factors are rescaled to a geometric mean of one.

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

use crate::config::TmmParams;
use crate::error::{Result, VoomError};
use crate::filter::FilteredCountMatrix;
use crate::stats::{mean, median, quantile, rank_average_ties};

/// Per-sample scale factors for a filtered count matrix
#[derive(Debug, Clone)]
pub struct NormalizationFactors {
    sample_ids: Vec<String>,
    factors: Array1<f64>,
    reference_sample: String,
    excluded: Vec<String>,
}

impl NormalizationFactors {
    /// Samples the factors belong to (excluded samples are not listed)
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn factors(&self) -> &Array1<f64> {
        &self.factors
    }

    pub fn reference_sample(&self) -> &str {
        &self.reference_sample
    }

    /// Samples left out because they had no counts after filtering
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// Add samples that an earlier pass excluded before these factors were estimated
    pub fn record_excluded(&mut self, earlier: Vec<String>) {
        let mut all = earlier;
        all.append(&mut self.excluded);
        self.excluded = all;
    }

    /// `library_size * factor` for each sample
    pub fn effective_library_sizes(&self, library_sizes: &[f64]) -> Result<Vec<f64>> {
        if library_sizes.len() != self.factors.len() {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} library sizes", self.factors.len()),
                got: format!("{} library sizes", library_sizes.len()),
            });
        }
        Ok(library_sizes.iter().zip(self.factors.iter()).map(|(l, f)| l * f).collect())
    }

    /// Geometric mean of the factors (1 up to rounding)
    pub fn geometric_mean(&self) -> f64 {
        mean(&self.factors.iter().map(|f| f.ln()).collect::<Vec<_>>()).exp()
    }
}

/// Estimate TMM factors for `filtered`.
///
/// Samples whose filtered counts sum to zero are excluded (and reported)
/// rather than normalized. The returned indices are the kept columns.
pub fn estimate_norm_factors(
    filtered: &FilteredCountMatrix,
    params: &TmmParams,
) -> Result<(NormalizationFactors, Vec<usize>)> {
    let counts = filtered.counts();
    let column_sums = counts.library_sizes();

    let mut kept = Vec::with_capacity(counts.n_samples());
    let mut excluded = Vec::new();
    for (j, &sum) in column_sums.iter().enumerate() {
        if sum > 0.0 && filtered.library_sizes()[j] > 0.0 {
            kept.push(j);
        } else {
            let id = counts.sample_ids()[j].clone();
            log::warn!("Sample '{}' has no counts after filtering; excluded from normalization", id);
            excluded.push(id);
        }
    }

    if kept.is_empty() {
        return Err(VoomError::configuration("every sample has zero counts after filtering"));
    }

    let kept_counts = counts.counts().select(Axis(1), &kept);
    let kept_libs: Vec<f64> = kept.iter().map(|&j| filtered.library_sizes()[j]).collect();
    let (factors, reference) = tmm_factors(kept_counts.view(), &kept_libs, params)?;

    let sample_ids: Vec<String> = kept.iter().map(|&j| counts.sample_ids()[j].clone()).collect();
    log::info!("TMM reference sample: {}", sample_ids[reference]);

    Ok((
        NormalizationFactors {
            reference_sample: sample_ids[reference].clone(),
            sample_ids,
            factors,
            excluded,
        },
        kept,
    ))
}

/// TMM factors for a count matrix whose library sizes are all positive.
///
/// Returns the factors (geometric mean 1) and the index of the reference sample.
pub fn tmm_factors(
    counts: ArrayView2<f64>,
    library_sizes: &[f64],
    params: &TmmParams,
) -> Result<(Array1<f64>, usize)> {
    let n_samples = counts.ncols();
    if n_samples == 0 || counts.nrows() == 0 {
        return Err(VoomError::InsufficientData {
            reason: "Count matrix is empty".to_string(),
        });
    }
    if library_sizes.len() != n_samples {
        return Err(VoomError::DimensionMismatch {
            expected: format!("{} library sizes", n_samples),
            got: format!("{} library sizes", library_sizes.len()),
        });
    }
    if library_sizes.iter().any(|&l| !(l > 0.0)) {
        return Err(VoomError::InvalidInput {
            reason: "TMM requires positive library sizes".to_string(),
        });
    }

    let reference = choose_reference(counts, library_sizes);
    let ref_col = counts.column(reference);
    let ref_lib = library_sizes[reference];

    let raw: Vec<f64> = (0..n_samples)
        .map(|j| trimmed_mean_factor(counts.column(j), ref_col, library_sizes[j], ref_lib, params))
        .collect();

    let log_mean = mean(&raw.iter().map(|f| f.ln()).collect::<Vec<_>>());
    let center = log_mean.exp();
    let factors = Array1::from_iter(raw.iter().map(|f| f / center));

    if factors.iter().any(|f| !f.is_finite() || *f <= 0.0) {
        return Err(VoomError::NumericalInstability {
            operation: "TMM normalization".to_string(),
            details: format!("non-positive factors {:?}", factors.to_vec()),
        });
    }

    Ok((factors, reference))
}

/// Sample whose upper quartile (of counts scaled by library size) is closest
/// to the mean upper quartile; for data with a vanishing upper quartile, the
/// sample with the largest sum of square-root counts.
fn choose_reference(counts: ArrayView2<f64>, library_sizes: &[f64]) -> usize {
    let f75: Vec<f64> = counts
        .columns()
        .into_iter()
        .zip(library_sizes)
        .map(|(col, &lib)| quantile(&col.iter().map(|c| c / lib).collect::<Vec<_>>(), 0.75))
        .collect();

    if median(&f75) < 1e-20 {
        return counts
            .columns()
            .into_iter()
            .map(|col| col.iter().map(|c| c.sqrt()).sum::<f64>())
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(j, _)| j)
            .unwrap_or(0);
    }

    let target = mean(&f75);
    f75.iter()
        .map(|f| (f - target).abs())
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(j, _)| j)
        .unwrap_or(0)
}

/// Unnormalized TMM factor of `obs` relative to `reference`
fn trimmed_mean_factor(
    obs: ArrayView1<f64>,
    reference: ArrayView1<f64>,
    lib_obs: f64,
    lib_ref: f64,
    params: &TmmParams,
) -> f64 {
    let mut m_values = Vec::new();
    let mut a_values = Vec::new();
    let mut variances = Vec::new();

    for (&o, &r) in obs.iter().zip(reference.iter()) {
        let p_obs = (o / lib_obs).log2();
        let p_ref = (r / lib_ref).log2();
        let m = p_obs - p_ref;
        let a = (p_obs + p_ref) / 2.0;
        if m.is_finite() && a.is_finite() && a > params.a_cutoff {
            m_values.push(m);
            a_values.push(a);
            variances.push((lib_obs - o) / lib_obs / o + (lib_ref - r) / lib_ref / r);
        }
    }

    if m_values.iter().all(|m| m.abs() < 1e-6) {
        return 1.0;
    }

    let n = m_values.len() as f64;
    let lo_m = (n * params.logratio_trim).floor() + 1.0;
    let hi_m = n + 1.0 - lo_m;
    let lo_a = (n * params.sum_trim).floor() + 1.0;
    let hi_a = n + 1.0 - lo_a;

    let m_ranks = rank_average_ties(&m_values);
    let a_ranks = rank_average_ties(&a_values);

    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..m_values.len() {
        let keep = m_ranks[i] >= lo_m && m_ranks[i] <= hi_m && a_ranks[i] >= lo_a && a_ranks[i] <= hi_a;
        if !keep {
            continue;
        }
        if params.do_weighting {
            num += m_values[i] / variances[i];
            den += 1.0 / variances[i];
        } else {
            num += m_values[i];
            den += 1.0;
        }
    }

    let log_factor = num / den;
    if log_factor.is_finite() {
        log_factor.exp2()
    } else {
        1.0
    }
}
