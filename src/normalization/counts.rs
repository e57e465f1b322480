//! Log counts-per-million

use ndarray::{Array2, ArrayView2};

use crate::error::{Result, VoomError};

fn check_lengths(n_samples: usize, library_sizes: &[f64]) -> Result<()> {
    if library_sizes.len() != n_samples {
        return Err(VoomError::InvalidInput {
            reason: format!(
                "Library size length ({}) doesn't match sample count ({})",
                library_sizes.len(),
                n_samples
            ),
        });
    }
    Ok(())
}

/// voom log-CPM: `log2((count + 0.5) / (library_size + 1) * 1e6)`.
///
/// The offsets keep zero counts finite and guarantee the value stays below the
/// log-CPM of one read.
pub fn log_cpm(counts: ArrayView2<f64>, library_sizes: &[f64]) -> Result<Array2<f64>> {
    check_lengths(counts.ncols(), library_sizes)?;

    let mut result = counts.to_owned();
    for (mut col, &lib) in result.columns_mut().into_iter().zip(library_sizes) {
        let denom = lib + 1.0;
        col.mapv_inplace(|c| ((c + 0.5) / denom * 1e6).log2());
    }
    Ok(result)
}
