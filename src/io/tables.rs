//! Tab-separated output tables and the session-info dump

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::ArrayView2;
use serde::Serialize;

use crate::config::RunConfig;
use crate::data::{ConditionAssignment, CountMatrix};
use crate::error::{Result, VoomError};
use crate::normalization::NormalizationFactors;
use crate::projection::PcaResult;

const NA: &str = "NA";

/// Create `dir` if missing; with `clean`, remove what it holds first
pub fn prepare_output_dir(dir: &Path, clean: bool) -> Result<()> {
    if clean && dir.exists() {
        if !dir.is_dir() {
            return Err(VoomError::configuration(format!(
                "output path {} exists and is not a directory",
                dir.display()
            )));
        }
        log::info!("Clearing output directory {}", dir.display());
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Library size (column sum) per sample of the full matrix
pub fn write_library_sizes(path: &Path, counts: &CountMatrix, conditions: &ConditionAssignment) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "sample\tcondition\tlibrary_size")?;
    for (id, size) in counts.sample_ids().iter().zip(counts.library_sizes()) {
        writeln!(file, "{}\t{}\t{:.0}", id, conditions.label_of(id).unwrap_or(NA), size)?;
    }
    file.flush()?;
    Ok(())
}

/// Sample scores on every component
pub fn write_pca_scores(path: &Path, pca: &PcaResult, conditions: &ConditionAssignment) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write!(file, "sample\tcondition")?;
    for k in 1..=pca.n_components() {
        write!(file, "\tPC{}", k)?;
    }
    writeln!(file)?;

    for (i, id) in pca.sample_ids.iter().enumerate() {
        write!(file, "{}\t{}", id, conditions.label_of(id).unwrap_or(NA))?;
        for pc in &pca.components {
            write!(file, "\t{:.6}", pc.scores[i])?;
        }
        writeln!(file)?;
    }
    file.flush()?;
    Ok(())
}

pub fn write_pca_variance(path: &Path, pca: &PcaResult) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "component\tsingular_value\tproportion_of_variance")?;
    for (k, pc) in pca.components.iter().enumerate() {
        writeln!(
            file,
            "PC{}\t{:.6}\t{:.6}",
            k + 1,
            pc.singular_value,
            pc.proportion_of_variance
        )?;
    }
    file.flush()?;
    Ok(())
}

/// Genes x samples matrix with gene IDs in the first column
pub fn write_gene_matrix(path: &Path, gene_ids: &[String], sample_ids: &[String], values: ArrayView2<f64>) -> Result<()> {
    if values.dim() != (gene_ids.len(), sample_ids.len()) {
        return Err(VoomError::DimensionMismatch {
            expected: format!("{} x {}", gene_ids.len(), sample_ids.len()),
            got: format!("{:?}", values.dim()),
        });
    }
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "gene_id\t{}", sample_ids.join("\t"))?;
    for (gene, row) in gene_ids.iter().zip(values.rows()) {
        write!(file, "{}", gene)?;
        for v in row {
            write!(file, "\t{:.6}", v)?;
        }
        writeln!(file)?;
    }
    file.flush()?;
    Ok(())
}

/// Library sizes and TMM factors; excluded samples get `NA`
pub fn write_norm_factors(
    path: &Path,
    sample_ids: &[String],
    library_sizes: &[f64],
    factors: &NormalizationFactors,
) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "sample\tlibrary_size\tnorm_factor")?;
    for (id, size) in sample_ids.iter().zip(library_sizes) {
        match factors.sample_ids().iter().position(|s| s == id) {
            Some(j) => writeln!(file, "{}\t{:.0}\t{:.6}", id, size, factors.factors()[j])?,
            None => writeln!(file, "{}\t{:.0}\t{}", id, size, NA)?,
        }
    }
    file.flush()?;
    Ok(())
}

/// What one sub-experiment produced, for the session info
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentSummary {
    pub name: String,
    pub n_samples: usize,
    pub n_genes_input: usize,
    pub n_genes_retained: usize,
    pub levels: Vec<String>,
    pub reference_sample: String,
    pub excluded_samples: Vec<String>,
    pub dropped_levels: Vec<String>,
    pub voom_iterations: usize,
    pub variance_explained: Vec<f64>,
}

/// Crate version, build target, run configuration and per-experiment summaries
pub fn write_session_info(path: &Path, config: &RunConfig, summaries: &[ExperimentSummary]) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))?;
    writeln!(file, "target: {}-{}", std::env::consts::ARCH, std::env::consts::OS)?;
    writeln!(file)?;
    writeln!(file, "configuration:")?;
    writeln!(file, "{}", serde_json::to_string_pretty(config)?)?;
    writeln!(file)?;
    writeln!(file, "experiments:")?;
    writeln!(file, "{}", serde_json::to_string_pretty(summaries)?)?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PcaParams;
    use crate::projection::pca;
    use ndarray::array;
    use tempfile::TempDir;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prepare_output_dir_clean() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("figures");
        prepare_output_dir(&out, false).unwrap();
        fs::write(out.join("stale.tsv"), "x").unwrap();

        prepare_output_dir(&out, false).unwrap();
        assert!(out.join("stale.tsv").exists());
        prepare_output_dir(&out, true).unwrap();
        assert!(out.is_dir());
        assert!(!out.join("stale.tsv").exists());
    }

    #[test]
    fn test_write_pca_tables() {
        let dir = TempDir::new().unwrap();
        let m = array![[1.0, 2.0, 6.0], [3.0, 1.0, 0.0]];
        let samples = strings(&["a", "b", "c"]);
        let res = pca(m.view(), &strings(&["g1", "g2"]), &samples, &PcaParams::default()).unwrap();
        let conditions = ConditionAssignment::new(samples, strings(&["KO_ctrl", "KO_ctrl", "KO_severe"])).unwrap();

        let scores = dir.path().join("KO_pca.tsv");
        write_pca_scores(&scores, &res, &conditions).unwrap();
        let text = fs::read_to_string(&scores).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("sample\tcondition\tPC1"));
        assert_eq!(lines.len(), 4);
        assert!(lines[3].starts_with("c\tKO_severe\t"));

        let variance = dir.path().join("KO_pca_variance.tsv");
        write_pca_variance(&variance, &res).unwrap();
        let text = fs::read_to_string(&variance).unwrap();
        assert!(text.lines().nth(1).unwrap().starts_with("PC1\t"));
    }

    #[test]
    fn test_write_gene_matrix_shape_check() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.tsv");
        let values = array![[1.0, 2.0]];
        assert!(write_gene_matrix(&path, &strings(&["g"]), &strings(&["a"]), values.view()).is_err());
        write_gene_matrix(&path, &strings(&["g"]), &strings(&["a", "b"]), values.view()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "gene_id\ta\tb\ng\t1.000000\t2.000000\n");
    }

    #[test]
    fn test_session_info_contains_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session_info.txt");
        write_session_info(&path, &RunConfig::default(), &[]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(env!("CARGO_PKG_NAME")));
        assert!(text.contains("\"seed\": 42"));
        assert!(text.contains("\"prefix\": \"KO\""));
    }
}
