//! Command-line interface for rust_voom

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{ExperimentSpec, PcaParams, RunConfig, VoomParams};
use crate::error::{Result, VoomError};

#[derive(Parser)]
#[command(name = "rust_voom")]
#[command(version)]
#[command(about = "Filtering, TMM normalization, voom weights and PCA for bulk RNA-seq counts")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Where the counts and condition labels come from
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Path to a JSON count bundle
    #[arg(short, long, conflicts_with_all = ["counts", "samples"],
        long_help = "Path to a JSON count bundle.\n\
            Format: {\"genes\": [...], \"counts\": [[...]], \"group\": [...], \"files\": [...]}\n\
            with counts as genes x samples, group the raw condition label and files\n\
            the source path of each sample.")]
    pub bundle: Option<String>,

    /// Path to count matrix CSV/TSV file
    #[arg(short, long, requires = "samples",
        long_help = "Path to count matrix file.\n\
            Format: first column = gene IDs, remaining columns = raw counts per sample.\n\
            Supports both CSV (comma) and TSV (tab) delimiters (auto-detected).")]
    pub counts: Option<String>,

    /// Path to sample sheet with `file` and `group` columns
    #[arg(short, long, requires = "counts",
        long_help = "Path to sample sheet with a header and `file`, `group` columns.\n\
            Sample IDs are the first two `_`-separated tokens of each file's directory\n\
            and must match the count matrix columns.")]
    pub samples: Option<String>,
}

/// Options shared by every analysis subcommand
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Sub-experiment as PREFIX or PREFIX=REFERENCE (repeatable)
    #[arg(short, long, value_name = "PREFIX[=REFERENCE]",
        long_help = "Sub-experiment to analyze, as a label prefix with an optional reference level.\n\
            Without a reference, `<PREFIX>_ctrl` is used.\n\
            Can be specified multiple times: --experiment KO --experiment OE=OE_low\n\
            Default: KO and OE.")]
    pub experiment: Vec<String>,

    /// Output directory [default: figures]
    #[arg(short, long, default_value = "figures")]
    pub output: PathBuf,

    /// Remove existing output directory contents first
    #[arg(long)]
    pub clean: bool,

    /// voom trend refinement passes [default: 2]
    #[arg(long, default_value = "2",
        long_help = "Number of voom passes. The first fits ordinary least squares; each further\n\
            pass refits with the previous precision weights. Between 1 and 5.")]
    pub voom_iterations: usize,

    /// Restrict PCA to the N most variable genes
    #[arg(long, value_name = "N")]
    pub top_genes: Option<usize>,

    /// Seed recorded in the session info [default: 42]
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Number of threads (0 = auto) [default: 0]
    #[arg(short = 't', long, default_value = "0")]
    pub threads: usize,
}

impl PipelineArgs {
    /// Build the run configuration
    pub fn to_config(&self) -> Result<RunConfig> {
        let defaults = RunConfig::default();
        let experiments = if self.experiment.is_empty() {
            defaults.experiments
        } else {
            self.experiment
                .iter()
                .map(|e| ExperimentSpec::parse(e))
                .collect::<Result<Vec<_>>>()?
        };

        let config = RunConfig {
            seed: self.seed,
            output_dir: self.output.clone(),
            clean_output: self.clean,
            experiments,
            voom: VoomParams {
                iterations: self.voom_iterations,
                ..defaults.voom
            },
            pca: PcaParams {
                top_variable_genes: self.top_genes,
            },
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Configuration restricted to exactly one sub-experiment
    pub fn to_single_config(&self) -> Result<RunConfig> {
        if self.experiment.len() > 1 {
            return Err(VoomError::configuration(format!(
                "this command takes one --experiment, got {}",
                self.experiment.len()
            )));
        }
        let mut config = self.to_config()?;
        config.experiments.truncate(1);
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline for every sub-experiment
    #[command(
        about = "Run the full pipeline for every sub-experiment",
        long_about = "Run the full pipeline for every sub-experiment\n\n\
            Loads the counts, then for each sub-experiment: selects samples by label prefix,\n\
            filters low-expression genes, computes TMM normalization factors, builds a\n\
            no-intercept design, derives voom precision weights and projects the log-CPM\n\
            values onto principal components.\n\n\
            Writes library sizes, PCA scores and variance, log-CPM values, weights,\n\
            normalization factors and a session info file to the output directory.",
        after_long_help = "\
Examples:
  # KO and OE with their _ctrl references
  rust_voom run -b counts.json -o figures

  # Count table and sample sheet, custom reference
  rust_voom run -c counts.tsv -s samples.csv -e KO -e OE=OE_low --clean"
    )]
    Run {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Filter and compute TMM factors for one sub-experiment
    #[command(
        long_about = "Filter low-expression genes and compute TMM normalization factors.\n\n\
            Outputs `<NAME>_norm_factors.tsv` with each sample's library size and factor.",
        after_long_help = "\
Examples:
  rust_voom normalize -b counts.json -e KO
  rust_voom normalize -c counts.tsv -s samples.csv -e OE -o out"
    )]
    Normalize {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Project one sub-experiment onto principal components
    #[command(
        long_about = "Run one sub-experiment through voom and PCA.\n\n\
            Outputs `<NAME>_pca.tsv` (sample scores) and `<NAME>_pca_variance.tsv`.",
        after_long_help = "\
Examples:
  rust_voom pca -b counts.json -e KO
  rust_voom pca -b counts.json -e OE --top-genes 500"
    )]
    Pca {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}
