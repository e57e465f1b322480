//! rust_voom command-line interface

use clap::Parser;
use log::{info, LevelFilter};

use rust_voom::cli::{Cli, Commands, InputArgs, PipelineArgs};
use rust_voom::io::{
    prepare_output_dir, read_bundle, read_count_table, write_norm_factors, write_pca_scores, write_pca_variance,
};
use rust_voom::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = ["run", "normalize", "pca", "help"];
    let has_subcommand = first_positional.map_or(false, |a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("rust_voom {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Run { input, pipeline }) => run_all(&input, &pipeline),
        Some(Commands::Normalize { input, pipeline }) => run_normalize(&input, &pipeline),
        Some(Commands::Pca { input, pipeline }) => run_pca(&input, &pipeline),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("rust_voom v{}", VERSION);
    println!("Run `rust_voom -h` for usage or `rust_voom --help` for detailed information.");
}

fn print_short_help() {
    println!("rust_voom v{}", VERSION);
    println!();
    println!("Usage: rust_voom <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run the full pipeline for every sub-experiment");
    println!("  normalize  Filter and compute TMM factors for one sub-experiment");
    println!("  pca        Project one sub-experiment onto principal components");
    println!();
    println!("Run `rust_voom <COMMAND> --help` for command-specific options.");
}

fn print_long_help() {
    println!("rust_voom v{}", VERSION);
    println!("Exploratory normalization and projection of bulk RNA-seq counts");
    println!();
    println!("Usage: rust_voom <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run the full pipeline for every sub-experiment");
    println!("               - expression filter calibrated to library size");
    println!("               - TMM normalization factors");
    println!("               - voom precision weights from a lowess mean-variance trend");
    println!("               - PCA of log-CPM values");
    println!("  normalize  Filter and compute TMM factors for one sub-experiment");
    println!("  pca        Project one sub-experiment onto principal components");
    println!();
    println!("Input (one of):");
    println!("  -b, --bundle FILE                 JSON count bundle");
    println!("  -c, --counts FILE -s, --samples FILE");
    println!("                                    Count table and sample sheet");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -h               Print short help");
    println!("      --help       Print detailed help");
    println!("  -V, --version    Print version");
    println!();
    println!("Examples:");
    println!("  rust_voom run -b counts.json -o figures --clean");
    println!();
    println!("  rust_voom run -c counts.tsv -s samples.csv -e KO -e OE=OE_low");
    println!();
    println!("  rust_voom pca -b counts.json -e KO --top-genes 500");
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn configure_threads(threads: usize) {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new().num_threads(threads).build_global().ok();
    }
}

fn load_input(input: &InputArgs) -> Result<(CountMatrix, ConditionAssignment)> {
    match (&input.bundle, &input.counts, &input.samples) {
        (Some(bundle), _, _) => {
            info!("Loading count bundle from: {}", bundle);
            read_bundle(bundle)
        }
        (None, Some(counts), Some(samples)) => {
            info!("Loading count matrix from: {}", counts);
            info!("Loading sample sheet from: {}", samples);
            read_count_table(counts, samples)
        }
        _ => Err(VoomError::InvalidInput {
            reason: "provide --bundle, or --counts together with --samples".to_string(),
        }),
    }
}

fn run_all(input: &InputArgs, pipeline: &PipelineArgs) -> Result<()> {
    configure_threads(pipeline.threads);
    let config = pipeline.to_config()?;
    let (counts, conditions) = load_input(input)?;

    let results = run_pipeline(&counts, &conditions, &config)?;
    for result in &results {
        let summary = result.summary();
        info!(
            "{}: {} samples, {} of {} genes retained, PC1 {:.1}%",
            summary.name,
            summary.n_samples,
            summary.n_genes_retained,
            summary.n_genes_input,
            summary.variance_explained.first().copied().unwrap_or(0.0) * 100.0
        );
    }

    write_outputs(&config, &counts, &conditions, &results)?;
    Ok(())
}

fn single_experiment(
    input: &InputArgs,
    pipeline: &PipelineArgs,
) -> Result<(RunConfig, ExperimentData)> {
    configure_threads(pipeline.threads);
    let config = pipeline.to_single_config()?;
    let (counts, conditions) = load_input(input)?;

    let spec = &config.experiments[0];
    let data = subset_experiment(&counts, &conditions, spec).map_err(|e| e.in_experiment(&spec.name))?;
    Ok((config, data))
}

fn run_normalize(input: &InputArgs, pipeline: &PipelineArgs) -> Result<()> {
    let (config, data) = single_experiment(input, pipeline)?;
    let normalized = normalize_experiment(&data, &config).map_err(|e| e.in_experiment(data.name()))?;

    prepare_output_dir(&config.output_dir, config.clean_output)?;
    let path = config.output_dir.join(format!("{}_norm_factors.tsv", data.name()));
    write_norm_factors(
        &path,
        &normalized.input_samples,
        &normalized.input_library_sizes,
        &normalized.factors,
    )?;

    info!(
        "{}: reference sample {}, {} samples excluded",
        data.name(),
        normalized.factors.reference_sample(),
        normalized.factors.excluded().len()
    );
    info!("Normalization factors written to: {}", path.display());
    Ok(())
}

fn run_pca(input: &InputArgs, pipeline: &PipelineArgs) -> Result<()> {
    let (config, data) = single_experiment(input, pipeline)?;
    let result = run_experiment(&data, &config)?;

    prepare_output_dir(&config.output_dir, config.clean_output)?;
    let scores = config.output_dir.join(format!("{}_pca.tsv", data.name()));
    write_pca_scores(&scores, &result.pca, &result.normalized.conditions)?;
    write_pca_variance(
        &config.output_dir.join(format!("{}_pca_variance.tsv", data.name())),
        &result.pca,
    )?;

    for (k, pc) in result.pca.components.iter().take(2).enumerate() {
        info!("PC{}: {:.1}% of variance", k + 1, pc.proportion_of_variance * 100.0);
    }
    info!("PCA scores written to: {}", scores.display());
    Ok(())
}
