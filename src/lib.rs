//! rust_voom: exploratory normalization and projection of bulk RNA-seq counts
//!
//! Each sub-experiment (for example the NKD2 knock-out `KO` and over-expression
//! `OE` arms) is taken through the same stages: subset by label prefix,
//! expression filter, TMM normalization factors, no-intercept design, voom
//! precision weights and PCA of the log-CPM values.
//!
//! # Example
//!
//! ```ignore
//! use rust_voom::prelude::*;
//!
//! let (counts, conditions) = read_bundle("counts.json")?;
//! let config = RunConfig::default();
//!
//! let results = run_pipeline(&counts, &conditions, &config)?;
//! write_outputs(&config, &counts, &conditions, &results)?;
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod filter;
pub mod glm;
pub mod io;
pub mod normalization;
pub mod projection;
pub mod stats;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ExperimentSpec, FilterParams, PcaParams, RunConfig, TmmParams, VoomParams};
    pub use crate::data::{subset_experiment, ConditionAssignment, CountMatrix, ExperimentData};
    pub use crate::error::{ErrorKind, Result, VoomError};
    pub use crate::filter::{filter_by_expression, FilteredCountMatrix};
    pub use crate::glm::{create_design_matrix, lm_fit, DesignMatrix};
    pub use crate::io::{read_bundle, read_count_table, ExperimentSummary};
    pub use crate::normalization::{estimate_norm_factors, NormalizationFactors};
    pub use crate::projection::{pca, PcaResult};
    pub use crate::transform::{voom, VarianceStabilized};
    pub use crate::{normalize_experiment, run_experiment, run_pipeline, write_outputs};
    pub use crate::{ExperimentResult, NormalizedExperiment};
}

use std::path::Path;

use prelude::*;

/// Output of the normalizer for one sub-experiment
#[derive(Debug, Clone)]
pub struct NormalizedExperiment {
    pub name: String,
    /// Samples entering normalization and their library sizes
    pub input_samples: Vec<String>,
    pub input_library_sizes: Vec<f64>,
    pub n_input_genes: usize,
    /// Filtered counts without the excluded samples
    pub filtered: FilteredCountMatrix,
    pub conditions: ConditionAssignment,
    pub factors: NormalizationFactors,
    pub design: DesignMatrix,
    /// Levels that lost every sample to exclusion
    pub dropped_levels: Vec<String>,
}

/// Filter, compute TMM factors and build the design for one sub-experiment.
///
/// Samples with no counts after filtering are dropped and the filter is run
/// again on the remaining samples, so the retained genes are calibrated to the
/// groups that are actually analyzed. Losing every sample of the reference
/// level is a configuration error; other emptied levels are dropped with a
/// warning.
pub fn normalize_experiment(data: &ExperimentData, config: &RunConfig) -> Result<NormalizedExperiment> {
    let input_samples = data.counts().sample_ids().to_vec();
    let input_library_sizes = data.counts().library_sizes();

    let mut current = data.clone();
    let mut excluded: Vec<String> = Vec::new();
    let (filtered, mut factors) = loop {
        let filtered = filter_by_expression(current.counts(), current.conditions(), &config.filter)?;
        let (factors, kept) = estimate_norm_factors(&filtered, &config.tmm)?;
        if kept.len() == current.n_samples() {
            break (filtered, factors);
        }

        excluded.extend_from_slice(factors.excluded());
        current = current.subset_samples(&kept)?;
        if let Some(reference) = data.conditions().reference() {
            if current.conditions().reference().is_none() {
                return Err(VoomError::configuration(format!(
                    "reference level '{}' has no samples left after excluding {:?}",
                    reference, excluded
                )));
            }
        }
        log::info!(
            "{}: filtering again on the {} remaining samples",
            data.name(),
            current.n_samples()
        );
    };
    factors.record_excluded(excluded);

    let conditions = current.conditions().clone();
    let remaining = conditions.levels();
    let dropped_levels: Vec<String> = data
        .conditions()
        .levels()
        .into_iter()
        .filter(|l| !remaining.contains(l))
        .collect();
    for level in &dropped_levels {
        log::warn!("{}: level '{}' has no samples left and is dropped", data.name(), level);
    }

    let design = create_design_matrix(&conditions)?;
    log::info!(
        "{}: design with {} samples and columns {:?}",
        data.name(),
        design.n_samples(),
        design.column_names()
    );

    Ok(NormalizedExperiment {
        name: data.name().to_string(),
        input_samples,
        input_library_sizes,
        n_input_genes: data.counts().n_genes(),
        filtered,
        conditions,
        factors,
        design,
        dropped_levels,
    })
}

/// Everything produced for one sub-experiment
#[derive(Debug, Clone)]
pub struct ExperimentResult {
    pub normalized: NormalizedExperiment,
    pub voom: VarianceStabilized,
    pub pca: PcaResult,
}

impl ExperimentResult {
    pub fn name(&self) -> &str {
        &self.normalized.name
    }

    pub fn summary(&self) -> ExperimentSummary {
        let n = &self.normalized;
        ExperimentSummary {
            name: n.name.clone(),
            n_samples: n.filtered.n_samples(),
            n_genes_input: n.n_input_genes,
            n_genes_retained: n.filtered.n_genes(),
            levels: n.design.column_names().to_vec(),
            reference_sample: n.factors.reference_sample().to_string(),
            excluded_samples: n.factors.excluded().to_vec(),
            dropped_levels: n.dropped_levels.clone(),
            voom_iterations: self.voom.iterations,
            variance_explained: self.pca.proportions(),
        }
    }
}

/// Normalize, stabilize and project one sub-experiment.
/// Failures carry the sub-experiment name.
pub fn run_experiment(data: &ExperimentData, config: &RunConfig) -> Result<ExperimentResult> {
    let stages = || -> Result<ExperimentResult> {
        let normalized = normalize_experiment(data, config)?;
        let voom = voom(&normalized.filtered, &normalized.factors, &normalized.design, &config.voom)?;
        let pca = pca(voom.expression.view(), &voom.gene_ids, &voom.sample_ids, &config.pca)?;
        Ok(ExperimentResult { normalized, voom, pca })
    };
    stages().map_err(|e| e.in_experiment(data.name()))
}

/// Run every configured sub-experiment in order
pub fn run_pipeline(
    counts: &CountMatrix,
    conditions: &ConditionAssignment,
    config: &RunConfig,
) -> Result<Vec<ExperimentResult>> {
    config.validate()?;
    log::info!(
        "Running {} sub-experiments on {} genes x {} samples",
        config.experiments.len(),
        counts.n_genes(),
        counts.n_samples()
    );

    config
        .experiments
        .iter()
        .map(|spec| {
            let data = subset_experiment(counts, conditions, spec).map_err(|e| e.in_experiment(&spec.name))?;
            run_experiment(&data, config)
        })
        .collect()
}

/// Per-experiment tables: PCA scores and variance, E, W and normalization factors
pub fn write_experiment_outputs(dir: &Path, result: &ExperimentResult) -> Result<()> {
    let name = result.name();
    let n = &result.normalized;
    crate::io::write_pca_scores(&dir.join(format!("{}_pca.tsv", name)), &result.pca, &n.conditions)?;
    crate::io::write_pca_variance(&dir.join(format!("{}_pca_variance.tsv", name)), &result.pca)?;
    crate::io::write_gene_matrix(
        &dir.join(format!("{}_expression.tsv", name)),
        &result.voom.gene_ids,
        &result.voom.sample_ids,
        result.voom.expression.view(),
    )?;
    crate::io::write_gene_matrix(
        &dir.join(format!("{}_weights.tsv", name)),
        &result.voom.gene_ids,
        &result.voom.sample_ids,
        result.voom.weights.view(),
    )?;
    crate::io::write_norm_factors(
        &dir.join(format!("{}_norm_factors.tsv", name)),
        &n.input_samples,
        &n.input_library_sizes,
        &n.factors,
    )?;
    Ok(())
}

/// Write the library sizes, every experiment's tables and the session info
pub fn write_outputs(
    config: &RunConfig,
    counts: &CountMatrix,
    conditions: &ConditionAssignment,
    results: &[ExperimentResult],
) -> Result<()> {
    let dir = config.output_dir.as_path();
    crate::io::prepare_output_dir(dir, config.clean_output)?;
    crate::io::write_library_sizes(&dir.join("library_sizes.tsv"), counts, conditions)?;
    for result in results {
        write_experiment_outputs(dir, result)?;
    }
    let summaries: Vec<ExperimentSummary> = results.iter().map(|r| r.summary()).collect();
    crate::io::write_session_info(&dir.join("session_info.txt"), config, &summaries)?;
    log::info!("Wrote results to {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::refilter;
    use ndarray::Array2;
    use tempfile::TempDir;

    /// Deterministic uniform draws in [-1, 1)
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> f64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        }
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    const LABELS: [&str; 12] = [
        "KO_ctrl", "KO_ctrl", "KO_ctrl", "KO_severe", "KO_severe", "KO_severe", "OE_ctrl", "OE_ctrl", "OE_ctrl",
        "OE_high", "OE_high", "OE_high",
    ];

    /// 300 genes with means from 30 to ~5000; the first 30 are 4x up in the
    /// non-control groups
    fn dataset(labels: &[&str]) -> (CountMatrix, ConditionAssignment) {
        let mut rng = Lcg(11);
        let n_genes = 300;
        let counts = Array2::from_shape_fn((n_genes, labels.len()), |(g, j)| {
            let base = 30.0 * (1.0 + g as f64 * 0.017).exp();
            let mu = if g < 30 && !labels[j].ends_with("ctrl") { base * 4.0 } else { base };
            (mu + 1.5 * mu.sqrt() * rng.next()).round().max(0.0)
        });
        let samples: Vec<String> = (0..labels.len()).map(|j| format!("S{}_L1", j)).collect();
        let genes = (0..n_genes).map(|g| format!("gene{}", g)).collect();
        (
            CountMatrix::new(counts, genes, samples.clone()).unwrap(),
            ConditionAssignment::new(samples, strings(labels)).unwrap(),
        )
    }

    #[test]
    fn test_full_pipeline() {
        let (counts, conditions) = dataset(&LABELS);
        let config = RunConfig::default();
        let results = run_pipeline(&counts, &conditions, &config).unwrap();

        assert_eq!(results.len(), 2);
        let ko = &results[0];
        assert_eq!(ko.name(), "KO");
        assert_eq!(ko.normalized.design.n_samples(), 6);
        assert_eq!(ko.normalized.design.column_names(), &["KO_ctrl", "KO_severe"]);
        assert!((ko.normalized.factors.geometric_mean() - 1.0).abs() < 1e-10);
        assert_eq!(ko.voom.expression.dim(), ko.voom.weights.dim());
        assert!(ko.voom.weights.iter().all(|w| w.is_finite() && *w > 0.0));

        let total: f64 = ko.pca.proportions().iter().sum();
        assert!((total - 1.0).abs() < 1e-10);
        // PC1 separates control from perturbed samples
        let pc1 = &ko.pca.components[0].scores;
        assert!(pc1.iter().take(3).all(|&x| x * pc1[3] < 0.0));
        assert!(pc1.iter().skip(3).all(|&x| x * pc1[3] > 0.0));

        let oe = &results[1];
        assert_eq!(oe.normalized.design.column_names(), &["OE_ctrl", "OE_high"]);
        assert_eq!(oe.voom.sample_ids, counts.sample_ids()[6..].to_vec());
    }

    #[test]
    fn test_unmatched_prefix_fails_before_normalization() {
        let (counts, conditions) = dataset(&LABELS);
        let config = RunConfig {
            experiments: vec![ExperimentSpec::with_control("DKO")],
            ..RunConfig::default()
        };
        let err = run_pipeline(&counts, &conditions, &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.experiment(), Some("DKO"));
    }

    #[test]
    fn test_zero_count_sample_is_excluded() {
        let mut labels = LABELS[..6].to_vec();
        labels.push("KO_mild");
        let (counts, conditions) = dataset(&labels);
        let mut raw = counts.counts().to_owned();
        raw.column_mut(6).fill(0.0);
        let counts = CountMatrix::new(raw, counts.gene_ids().to_vec(), counts.sample_ids().to_vec()).unwrap();

        let config = RunConfig {
            experiments: vec![ExperimentSpec::with_control("KO")],
            ..RunConfig::default()
        };
        let data = subset_experiment(&counts, &conditions, &config.experiments[0]).unwrap();
        let normalized = normalize_experiment(&data, &config).unwrap();

        assert_eq!(normalized.factors.excluded(), &["S6_L1"]);
        assert_eq!(normalized.dropped_levels, vec!["KO_mild"]);
        assert_eq!(normalized.filtered.n_samples(), 6);
        assert_eq!(normalized.design.column_names(), &["KO_ctrl", "KO_severe"]);
        assert_eq!(normalized.input_samples.len(), 7);
        assert!(run_experiment(&data, &config).is_ok());
    }

    #[test]
    fn test_filter_recalibrated_after_exclusion() {
        let mut labels = LABELS[..6].to_vec();
        labels.push("KO_mild");
        let (counts, conditions) = dataset(&labels);
        let mut raw = counts.counts().to_owned();
        raw.column_mut(6).fill(0.0);
        // expressed in S0 only: passes while KO_mild sets the group size to one
        raw.row_mut(0).fill(0.0);
        raw[[0, 0]] = 500.0;
        let counts = CountMatrix::new(raw, counts.gene_ids().to_vec(), counts.sample_ids().to_vec()).unwrap();

        let config = RunConfig {
            experiments: vec![ExperimentSpec::with_control("KO")],
            ..RunConfig::default()
        };
        let data = subset_experiment(&counts, &conditions, &config.experiments[0]).unwrap();
        let normalized = normalize_experiment(&data, &config).unwrap();

        assert_eq!(normalized.factors.excluded(), &["S6_L1"]);
        assert!(!normalized.filtered.retained().contains(&0));
        let again = refilter(&normalized.filtered, &normalized.conditions, &config.filter).unwrap();
        assert_eq!(again.retained(), normalized.filtered.retained());
        assert_eq!(normalized.input_samples.len(), 7);
        assert_eq!(normalized.input_library_sizes.len(), 7);
    }

    #[test]
    fn test_reference_losing_all_samples() {
        let labels = ["KO_ctrl", "KO_severe", "KO_severe", "KO_severe"];
        let (counts, conditions) = dataset(&labels);
        let mut raw = counts.counts().to_owned();
        raw.column_mut(0).fill(0.0);
        let counts = CountMatrix::new(raw, counts.gene_ids().to_vec(), counts.sample_ids().to_vec()).unwrap();

        let data = subset_experiment(&counts, &conditions, &ExperimentSpec::with_control("KO")).unwrap();
        let err = run_experiment(&data, &RunConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.experiment(), Some("KO"));
    }

    #[test]
    fn test_write_outputs() {
        let dir = TempDir::new().unwrap();
        let (counts, conditions) = dataset(&LABELS);
        let config = RunConfig {
            output_dir: dir.path().join("figures"),
            ..RunConfig::default()
        };
        let results = run_pipeline(&counts, &conditions, &config).unwrap();
        write_outputs(&config, &counts, &conditions, &results).unwrap();

        let out = &config.output_dir;
        for file in [
            "library_sizes.tsv",
            "session_info.txt",
            "KO_pca.tsv",
            "KO_pca_variance.tsv",
            "KO_expression.tsv",
            "KO_weights.tsv",
            "KO_norm_factors.tsv",
            "OE_pca.tsv",
        ] {
            assert!(out.join(file).is_file(), "missing {}", file);
        }
        let sizes = std::fs::read_to_string(out.join("library_sizes.tsv")).unwrap();
        assert_eq!(sizes.lines().count(), 13);
    }
}
