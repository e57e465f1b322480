//! Count matrix representation for RNA-seq data

use std::collections::{HashMap, HashSet};

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{Result, VoomError};

/// Deduplicate gene names by appending _1, _2, etc. to repeats
fn deduplicate_names(names: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for name in &names {
        *seen.entry(name.clone()).or_insert(0) += 1;
    }
    if !seen.values().any(|&c| c > 1) {
        return names;
    }

    seen.clear();
    let mut result = Vec::with_capacity(names.len());
    for name in names {
        let count = seen.entry(name.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            result.push(name);
        } else {
            let new_name = format!("{}_{}", name, *count - 1);
            log::warn!("Duplicate gene name '{}' renamed to '{}'", name, new_name);
            result.push(new_name);
        }
    }
    result
}

/// Read counts, rows are genes and columns are samples.
///
/// Immutable once constructed: every subsetting operation returns a new matrix.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new count matrix, validating shape and values
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }

        if sample_ids.len() != n_samples {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }

        let mut seen = HashSet::new();
        if let Some(dup) = sample_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(VoomError::InvalidCountMatrix {
                reason: format!("Duplicate sample ID '{}'", dup),
            });
        }

        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(VoomError::InvalidCountMatrix {
                reason: "Counts must be non-negative finite values".to_string(),
            });
        }

        if counts.iter().any(|&x| x != x.round()) {
            log::warn!("Some count values are not integers; read counts are expected to be whole numbers");
        }

        let gene_ids = deduplicate_names(gene_ids);

        Ok(Self {
            counts,
            gene_ids,
            sample_ids,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Column sums (library size per sample)
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(1)).map(|col| col.sum()).collect()
    }

    /// Row sums (total count per gene)
    pub fn gene_totals(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(0)).map(|row| row.sum()).collect()
    }

    /// Subset to specific samples, in the given order
    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        let new_counts = self.counts.select(Axis(1), sample_indices);
        let new_sample_ids = sample_indices.iter().map(|&i| self.sample_ids[i].clone()).collect();

        Self::new(new_counts, self.gene_ids.clone(), new_sample_ids)
    }

    /// Subset to specific genes, in the given order
    pub fn subset_genes(&self, gene_indices: &[usize]) -> Result<Self> {
        let new_counts = self.counts.select(Axis(0), gene_indices);
        let new_gene_ids = gene_indices.iter().map(|&i| self.gene_ids[i].clone()).collect();

        Self::new(new_counts, new_gene_ids, self.sample_ids.clone())
    }

    /// Reorder columns to match `sample_ids`; every ID must be present
    pub fn reorder_samples(&self, sample_ids: &[String]) -> Result<Self> {
        if sample_ids.len() != self.n_samples() {
            return Err(VoomError::configuration(format!(
                "count matrix has {} samples but {} sample IDs were requested",
                self.n_samples(),
                sample_ids.len()
            )));
        }
        let indices = sample_ids
            .iter()
            .map(|id| {
                self.sample_index(id).ok_or_else(|| {
                    VoomError::configuration(format!("sample '{}' not found in count matrix", id))
                })
            })
            .collect::<Result<Vec<usize>>>()?;
        self.subset_samples(&indices)
    }
}
