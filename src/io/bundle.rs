//! JSON count bundle: the merged count matrix with per-sample metadata

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::data::{normalize_label, sample_id_from_path, ConditionAssignment, CountMatrix};
use crate::error::{Result, VoomError};

/// On-disk layout; `counts` is genes x samples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountBundle {
    pub genes: Vec<String>,
    pub counts: Vec<Vec<f64>>,
    /// Raw condition label per sample
    pub group: Vec<String>,
    /// Source file path per sample
    pub files: Vec<String>,
}

impl CountBundle {
    /// Build the count matrix and condition assignment.
    ///
    /// Sample IDs come from `files` and labels are normalized.
    pub fn into_dataset(self) -> Result<(CountMatrix, ConditionAssignment)> {
        let n_samples = self.files.len();
        if self.group.len() != n_samples {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} group labels", n_samples),
                got: format!("{} group labels", self.group.len()),
            });
        }
        if self.counts.len() != self.genes.len() {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} count rows", self.genes.len()),
                got: format!("{} count rows", self.counts.len()),
            });
        }
        if let Some((g, row)) = self.counts.iter().enumerate().find(|(_, r)| r.len() != n_samples) {
            return Err(VoomError::InvalidCountMatrix {
                reason: format!("row {} ('{}') has {} values, expected {}", g, self.genes[g], row.len(), n_samples),
            });
        }

        let sample_ids: Vec<String> = self.files.iter().map(|f| sample_id_from_path(f)).collect();
        let labels: Vec<String> = self.group.iter().map(|g| normalize_label(g)).collect();

        let values: Vec<f64> = self.counts.into_iter().flatten().collect();
        let counts = Array2::from_shape_vec((self.genes.len(), n_samples), values).map_err(|e| {
            VoomError::InvalidCountMatrix {
                reason: e.to_string(),
            }
        })?;

        let counts = CountMatrix::new(counts, self.genes, sample_ids.clone())?;
        let conditions = ConditionAssignment::new(sample_ids, labels)?;
        Ok((counts, conditions))
    }
}

/// Read a JSON count bundle
pub fn read_bundle<P: AsRef<Path>>(path: P) -> Result<(CountMatrix, ConditionAssignment)> {
    let reader = BufReader::new(File::open(path)?);
    let bundle: CountBundle = serde_json::from_reader(reader)?;
    let (counts, conditions) = bundle.into_dataset()?;
    log::info!(
        "Loaded {} genes x {} samples from bundle",
        counts.n_genes(),
        counts.n_samples()
    );
    Ok((counts, conditions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_bundle() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "genes": ["NKD2", "GAPDH"],
                "counts": [[5, 0, 12], [900, 1100, 1000]],
                "group": ["KO-ctrl", "KO-severe", "OverExpr-ctrl"],
                "files": ["q/KO1_S1_L1/c.txt", "q/KO2_S2_L1/c.txt", "q/OE1_S3_L1/c.txt"]
            }}"#
        )
        .unwrap();

        let (counts, conditions) = read_bundle(file.path()).unwrap();
        assert_eq!(counts.n_genes(), 2);
        assert_eq!(counts.sample_ids(), &["KO1_S1", "KO2_S2", "OE1_S3"]);
        assert_eq!(conditions.labels(), &["KO_ctrl", "KO_severe", "OE_ctrl"]);
        assert_eq!(counts.counts()[[0, 2]], 12.0);
    }

    #[test]
    fn test_ragged_bundle() {
        let bundle = CountBundle {
            genes: vec!["g1".to_string()],
            counts: vec![vec![1.0]],
            group: vec!["A".to_string(), "B".to_string()],
            files: vec!["a_1/x".to_string(), "b_1/x".to_string()],
        };
        assert!(matches!(bundle.into_dataset(), Err(VoomError::InvalidCountMatrix { .. })));
    }

    #[test]
    fn test_malformed_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{\"genes\": [").unwrap();
        assert!(matches!(read_bundle(file.path()), Err(VoomError::JsonError(_))));
    }
}
