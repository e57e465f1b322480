//! Run configuration
//!
//! Every stage receives its parameters explicitly; nothing is read from
//! process-wide state.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoomError};

/// One sub-experiment: samples whose label starts with `prefix`, compared
/// against the `reference` level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub name: String,
    pub prefix: String,
    pub reference: String,
}

impl ExperimentSpec {
    /// `<prefix>` with the conventional `<prefix>_ctrl` reference
    pub fn with_control(prefix: &str) -> Self {
        Self {
            name: prefix.to_string(),
            prefix: prefix.to_string(),
            reference: format!("{}_ctrl", prefix),
        }
    }

    /// Parse `PREFIX` or `PREFIX=REFERENCE`
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        match spec.split_once('=') {
            Some((prefix, reference)) if !prefix.is_empty() && !reference.is_empty() => Ok(Self {
                name: prefix.to_string(),
                prefix: prefix.to_string(),
                reference: reference.to_string(),
            }),
            None if !spec.is_empty() => Ok(Self::with_control(spec)),
            _ => Err(VoomError::InvalidInput {
                reason: format!("Invalid experiment '{}'. Use: PREFIX or PREFIX=REFERENCE", spec),
            }),
        }
    }
}

/// Expression filter constants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterParams {
    /// Minimum count a gene needs in the smallest group's worth of samples
    pub min_count: f64,
    /// Minimum total count across all samples
    pub min_total_count: f64,
    /// Group size above which the required sample count grows more slowly
    pub large_n: f64,
    /// Fraction of samples beyond `large_n` that must pass
    pub min_prop: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            min_count: 10.0,
            min_total_count: 15.0,
            large_n: 10.0,
            min_prop: 0.7,
        }
    }
}

/// TMM normalization constants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmmParams {
    /// Fraction of M-values trimmed from each tail
    pub logratio_trim: f64,
    /// Fraction of A-values trimmed from each tail
    pub sum_trim: f64,
    /// Weight M-values by their inverse asymptotic variance
    pub do_weighting: bool,
    /// Genes with A-value at or below this are not used
    pub a_cutoff: f64,
}

impl Default for TmmParams {
    fn default() -> Self {
        Self {
            logratio_trim: 0.3,
            sum_trim: 0.05,
            do_weighting: true,
            a_cutoff: -1e10,
        }
    }
}

/// voom constants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoomParams {
    /// lowess span for the mean-variance trend
    pub span: f64,
    /// Trend refinement passes; the first pass is unweighted
    pub iterations: usize,
    /// Minimum genes needed to fit the trend
    pub min_trend_genes: usize,
}

impl Default for VoomParams {
    fn default() -> Self {
        Self {
            span: 0.5,
            iterations: 2,
            min_trend_genes: 10,
        }
    }
}

impl VoomParams {
    pub const MAX_ITERATIONS: usize = 5;

    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 || self.iterations > Self::MAX_ITERATIONS {
            return Err(VoomError::InvalidInput {
                reason: format!(
                    "voom iterations must be between 1 and {}, got {}",
                    Self::MAX_ITERATIONS,
                    self.iterations
                ),
            });
        }
        if !(self.span > 0.0 && self.span <= 1.0) {
            return Err(VoomError::InvalidInput {
                reason: format!("lowess span must be in (0, 1], got {}", self.span),
            });
        }
        Ok(())
    }
}

/// PCA options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PcaParams {
    /// Restrict the projection to the most variable genes
    pub top_variable_genes: Option<usize>,
}

/// Immutable configuration for one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Recorded in the session info; no stage draws random numbers
    pub seed: u64,
    pub output_dir: PathBuf,
    /// Remove the output directory's contents before writing
    pub clean_output: bool,
    pub experiments: Vec<ExperimentSpec>,
    pub filter: FilterParams,
    pub tmm: TmmParams,
    pub voom: VoomParams,
    pub pca: PcaParams,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            output_dir: PathBuf::from("figures"),
            clean_output: false,
            experiments: vec![ExperimentSpec::with_control("KO"), ExperimentSpec::with_control("OE")],
            filter: FilterParams::default(),
            tmm: TmmParams::default(),
            voom: VoomParams::default(),
            pca: PcaParams::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.experiments.is_empty() {
            return Err(VoomError::configuration("no sub-experiments configured"));
        }
        let mut names: Vec<&str> = self.experiments.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.experiments.len() {
            return Err(VoomError::configuration("sub-experiment names must be unique"));
        }
        if !(0.0..0.5).contains(&self.tmm.logratio_trim) || !(0.0..0.5).contains(&self.tmm.sum_trim) {
            return Err(VoomError::InvalidInput {
                reason: "TMM trim fractions must lie in [0, 0.5)".to_string(),
            });
        }
        self.voom.validate()
    }
}
