//! voom: log-CPM values with precision weights from a mean-variance trend
//!
//! Counts are moved to the log2-CPM scale, a linear model is fit per gene and
//! the square root of each gene's residual standard deviation is smoothed
//! against its average log-count with lowess. The trend, evaluated at each
//! fitted log-count, gives an inverse-variance weight per observation.
//! Low counts therefore receive small weights. The trend is refined by
//! refitting with the weights of the previous pass; the weighted fit only moves
//! the fitted values, the residual sd stays unweighted so every pass smooths
//! the same variance scale.

use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};

use super::lowess::{lowess, LowessFit};
use crate::config::VoomParams;
use crate::error::{Result, VoomError};
use crate::filter::FilteredCountMatrix;
use crate::glm::{lm_fit, DesignMatrix};
use crate::normalization::{log_cpm, NormalizationFactors};
use crate::stats::{mean, LinearInterpolator};

/// Robustness passes of the lowess smoother
const LOWESS_ITERATIONS: usize = 3;

/// sqrt(residual sd) as a function of average log2 count
#[derive(Debug, Clone)]
pub struct MeanVarianceTrend {
    pub curve: LowessFit,
    interpolator: LinearInterpolator,
}

impl MeanVarianceTrend {
    fn fit(sx: &[f64], sy: &[f64], span: f64) -> Result<Self> {
        let curve = lowess(sx, sy, span, LOWESS_ITERATIONS)?;
        let points: Vec<(f64, f64)> = curve.x.iter().copied().zip(curve.y.iter().copied()).collect();
        let interpolator = LinearInterpolator::new(&points).ok_or_else(|| VoomError::InsufficientData {
            reason: "mean-variance trend has no finite points".to_string(),
        })?;
        Ok(Self { curve, interpolator })
    }

    /// Trend value at average log2 count `x`
    pub fn eval(&self, x: f64) -> f64 {
        self.interpolator.eval(x)
    }
}

/// Variance-stabilized expression with precision weights
#[derive(Debug, Clone)]
pub struct VarianceStabilized {
    /// log2-CPM values (genes x samples)
    pub expression: Array2<f64>,
    /// Inverse-variance precision weights (genes x samples)
    pub weights: Array2<f64>,
    /// Fitted log2-CPM from the final pass (genes x samples)
    pub fitted: Array2<f64>,
    /// Group means from the final pass (genes x levels)
    pub coefficients: Array2<f64>,
    /// Unweighted residual standard deviation per gene around the final fit
    pub sigma: Array1<f64>,
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    pub coef_names: Vec<String>,
    /// Library size times normalization factor
    pub effective_library_sizes: Vec<f64>,
    /// Trend that produced `weights`
    pub trend: MeanVarianceTrend,
    pub iterations: usize,
}

impl VarianceStabilized {
    pub fn n_genes(&self) -> usize {
        self.expression.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.expression.ncols()
    }
}

/// Apply voom to filtered counts.
///
/// `filtered`, `factors` and `design` must describe the same samples in the
/// same order.
pub fn voom(
    filtered: &FilteredCountMatrix,
    factors: &NormalizationFactors,
    design: &DesignMatrix,
    params: &VoomParams,
) -> Result<VarianceStabilized> {
    params.validate()?;

    let counts = filtered.counts();
    if counts.sample_ids() != factors.sample_ids() || counts.sample_ids() != design.sample_ids() {
        return Err(VoomError::DimensionMismatch {
            expected: format!("samples {:?}", counts.sample_ids()),
            got: format!("factors {:?}, design {:?}", factors.sample_ids(), design.sample_ids()),
        });
    }
    if design.residual_df() == 0 {
        return Err(VoomError::InsufficientData {
            reason: format!(
                "{} samples leave no residual degrees of freedom for {} conditions",
                design.n_samples(),
                design.n_coefs()
            ),
        });
    }

    let lib_sizes = factors.effective_library_sizes(filtered.library_sizes())?;
    let expression = log_cpm(counts.counts(), &lib_sizes)?;

    // all-zero genes carry no information about the trend
    let informative: Vec<usize> = counts
        .gene_totals()
        .iter()
        .enumerate()
        .filter(|(_, t)| **t > 0.0)
        .map(|(g, _)| g)
        .collect();
    if informative.len() < params.min_trend_genes {
        return Err(VoomError::InsufficientData {
            reason: format!(
                "{} genes with counts; at least {} are needed to fit the mean-variance trend",
                informative.len(),
                params.min_trend_genes
            ),
        });
    }

    let amean: Vec<f64> = expression.axis_iter(Axis(0)).map(|row| row.mean().unwrap_or(f64::NAN)).collect();
    let log_lib: Vec<f64> = lib_sizes.iter().map(|l| (l + 1.0).log2()).collect();
    let x_shift = mean(&log_lib) - 1e6f64.log2();

    let mut weights: Option<Array2<f64>> = None;
    let mut last = None;

    for iteration in 1..=params.iterations {
        let fit = lm_fit(expression.view(), design, weights.as_ref().map(|w| w.view()))?;
        let sigma = residual_sd(expression.view(), fit.fitted.view(), fit.df_residual);

        let (sx, sy): (Vec<f64>, Vec<f64>) = informative
            .iter()
            .filter(|&&g| sigma[g].is_finite())
            .map(|&g| (amean[g] + x_shift, sigma[g].sqrt()))
            .unzip();
        if sx.len() < params.min_trend_genes {
            return Err(VoomError::InsufficientData {
                reason: format!("only {} genes have a finite residual variance", sx.len()),
            });
        }

        let trend = MeanVarianceTrend::fit(&sx, &sy, params.span)?;
        let w = precision_weights(fit.fitted.view(), &log_lib, &trend)?;

        log::debug!(
            "voom pass {}: trend over {} genes, weights in [{:.4}, {:.4}]",
            iteration,
            sx.len(),
            w.iter().copied().fold(f64::INFINITY, f64::min),
            w.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        );

        weights = Some(w);
        last = Some((fit, sigma, trend));
    }

    let (fit, sigma, trend) = last.ok_or_else(|| VoomError::InvalidInput {
        reason: "voom ran no iterations".to_string(),
    })?;
    let weights = weights.ok_or_else(|| VoomError::InvalidInput {
        reason: "voom produced no weights".to_string(),
    })?;

    Ok(VarianceStabilized {
        expression,
        weights,
        fitted: fit.fitted,
        coefficients: fit.coefficients,
        sigma,
        gene_ids: counts.gene_ids().to_vec(),
        sample_ids: counts.sample_ids().to_vec(),
        coef_names: design.column_names().to_vec(),
        effective_library_sizes: lib_sizes,
        trend,
        iterations: params.iterations,
    })
}

/// `sqrt(sum(r^2) / df)` per gene with unit weights, whatever the fit used
fn residual_sd(expression: ArrayView2<f64>, fitted: ArrayView2<f64>, df_residual: usize) -> Array1<f64> {
    let mut rss = Array1::<f64>::zeros(expression.nrows());
    Zip::from(expression.rows())
        .and(fitted.rows())
        .and(&mut rss)
        .for_each(|e, f, out| *out = e.iter().zip(f.iter()).map(|(a, b)| (a - b).powi(2)).sum());
    rss.mapv(|r| (r / df_residual as f64).sqrt())
}

/// `1 / trend(fitted log2 count)^4`, where the fitted log-count of an
/// observation is its fitted log-CPM moved back to the count scale
fn precision_weights(fitted: ArrayView2<f64>, log_lib: &[f64], trend: &MeanVarianceTrend) -> Result<Array2<f64>> {
    let log_million = 1e6f64.log2();
    let mut weights = fitted.to_owned();
    for (mut col, &ll) in weights.columns_mut().into_iter().zip(log_lib) {
        col.mapv_inplace(|f| {
            let fitted_log_count = f + ll - log_million;
            1.0 / trend.eval(fitted_log_count).powi(4)
        });
    }

    if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
        return Err(VoomError::NumericalInstability {
            operation: "voom precision weights".to_string(),
            details: "mean-variance trend reached zero".to_string(),
        });
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterParams, TmmParams};
    use crate::data::{ConditionAssignment, CountMatrix};
    use crate::filter::filter_by_expression;
    use crate::glm::create_design_matrix;
    use crate::normalization::estimate_norm_factors;

    /// Deterministic uniform draws in [-1, 1)
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> f64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        }
    }

    /// Poisson-like counts: genes 0..n/2 low (mean 40), the rest high (mean 2000)
    fn fixture(n_genes: usize, labels: &[&str]) -> (CountMatrix, ConditionAssignment) {
        let mut rng = Lcg(7);
        let n_samples = labels.len();
        let counts = Array2::from_shape_fn((n_genes, n_samples), |(g, _)| {
            let mu: f64 = if g < n_genes / 2 { 40.0 } else { 2000.0 };
            (mu + 2.0 * mu.sqrt() * rng.next()).round().max(0.0)
        });
        let samples: Vec<String> = (0..n_samples).map(|j| format!("s{}", j)).collect();
        let genes = (0..n_genes).map(|g| format!("g{}", g)).collect();
        (
            CountMatrix::new(counts, genes, samples.clone()).unwrap(),
            ConditionAssignment::new(samples, labels.iter().map(|s| s.to_string()).collect())
                .unwrap()
                .with_reference(labels[0])
                .unwrap(),
        )
    }

    fn run(n_genes: usize, labels: &[&str], params: &VoomParams) -> Result<VarianceStabilized> {
        let (counts, conditions) = fixture(n_genes, labels);
        let filtered = filter_by_expression(&counts, &conditions, &FilterParams::default())?;
        let (factors, _) = estimate_norm_factors(&filtered, &TmmParams::default())?;
        let design = create_design_matrix(&conditions)?;
        voom(&filtered, &factors, &design, params)
    }

    const SIX: [&str; 6] = ["KO_ctrl", "KO_ctrl", "KO_ctrl", "KO_severe", "KO_severe", "KO_severe"];

    #[test]
    fn test_weights_follow_mean_variance_trend() {
        let v = run(400, &SIX, &VoomParams::default()).unwrap();
        assert_eq!(v.expression.dim(), (400, 6));
        assert_eq!(v.weights.dim(), v.expression.dim());
        assert_eq!(v.iterations, 2);
        assert!(v.weights.iter().all(|w| w.is_finite() && *w > 0.0));

        let low = v.weights.rows().into_iter().take(200).map(|r| r.mean().unwrap()).sum::<f64>() / 200.0;
        let high = v.weights.rows().into_iter().skip(200).map(|r| r.mean().unwrap()).sum::<f64>() / 200.0;
        assert!(high > low, "high-count genes should be weighted more ({} vs {})", high, low);
    }

    fn group_means(v: &VarianceStabilized) -> (f64, f64) {
        let rows: Vec<f64> = v.weights.rows().into_iter().map(|r| r.mean().unwrap()).collect();
        let half = rows.len() / 2;
        (rows[..half].iter().sum::<f64>() / half as f64, rows[half..].iter().sum::<f64>() / half as f64)
    }

    #[test]
    fn test_refinement_keeps_trend_scale() {
        let one = run(400, &SIX, &VoomParams { iterations: 1, ..VoomParams::default() }).unwrap();
        let two = run(400, &SIX, &VoomParams::default()).unwrap();

        let (low1, high1) = group_means(&one);
        let (low2, high2) = group_means(&two);
        assert!(high1 > 10.0 * low1, "single pass: {} vs {}", high1, low1);
        assert!(high2 > 10.0 * low2, "refined: {} vs {}", high2, low2);

        // sigma is not pulled towards 1 by the weighted refit
        let low_sigma = two.sigma.iter().take(200).sum::<f64>() / 200.0;
        let high_sigma = two.sigma.iter().skip(200).sum::<f64>() / 200.0;
        assert!(low_sigma > 3.0 * high_sigma, "sigma {} vs {}", low_sigma, high_sigma);
        assert!(low_sigma < 0.5);
    }

    #[test]
    fn test_residual_sd_ignores_weights() {
        let e = ndarray::array![[1.0, 3.0, 10.0, 14.0]];
        let f = ndarray::array![[2.0, 2.0, 12.0, 12.0]];
        let sd = residual_sd(e.view(), f.view(), 2);
        assert!((sd[0] - 5.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_expression_is_log_cpm() {
        let v = run(100, &SIX, &VoomParams { iterations: 1, ..VoomParams::default() }).unwrap();
        let (counts, conditions) = fixture(100, &SIX);
        let filtered = filter_by_expression(&counts, &conditions, &FilterParams::default()).unwrap();
        let c = filtered.counts().counts()[[0, 0]];
        let expected = ((c + 0.5) / (v.effective_library_sizes[0] + 1.0) * 1e6).log2();
        assert!((v.expression[[0, 0]] - expected).abs() < 1e-10);
        assert_eq!(v.coef_names, vec!["KO_ctrl", "KO_severe"]);
    }

    #[test]
    fn test_too_few_genes() {
        let err = run(8, &SIX, &VoomParams::default()).unwrap_err();
        assert!(matches!(err, VoomError::InsufficientData { .. }));
    }

    #[test]
    fn test_no_residual_df() {
        let err = run(100, &["A_ctrl", "A_x"], &VoomParams::default()).unwrap_err();
        assert!(matches!(err, VoomError::InsufficientData { .. }));
    }
}
