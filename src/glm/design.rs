//! Design matrix creation for the per-gene linear models

use ndarray::{Array2, ArrayView2};

use crate::data::ConditionAssignment;
use crate::error::{Result, VoomError};

/// One-hot group-means design: one column per condition level and no
/// intercept, so every coefficient is the mean of its group.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    matrix: Array2<f64>,
    column_names: Vec<String>,
    sample_ids: Vec<String>,
}

impl DesignMatrix {
    /// samples x levels
    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    /// Level labels, reference first
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_coefs(&self) -> usize {
        self.matrix.ncols()
    }

    /// Residual degrees of freedom of an unweighted fit
    pub fn residual_df(&self) -> usize {
        self.n_samples().saturating_sub(self.n_coefs())
    }
}

/// Build the no-intercept design for `conditions`.
///
/// Columns follow `ConditionAssignment::levels` (reference first, then the
/// remaining levels in lexicographic order) and are named by the level labels.
pub fn create_design_matrix(conditions: &ConditionAssignment) -> Result<DesignMatrix> {
    let levels = conditions.levels();
    let n_samples = conditions.n_samples();

    if n_samples == 0 || levels.is_empty() {
        return Err(VoomError::InsufficientData {
            reason: "Design matrix has zero rows or columns".to_string(),
        });
    }

    let mut matrix = Array2::zeros((n_samples, levels.len()));
    for (i, label) in conditions.labels().iter().enumerate() {
        // every label is one of the levels by construction
        if let Some(j) = levels.iter().position(|l| l == label) {
            matrix[[i, j]] = 1.0;
        }
    }

    Ok(DesignMatrix {
        matrix,
        column_names: levels,
        sample_ids: conditions.sample_ids().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_intercept_one_hot() {
        let conditions = ConditionAssignment::new(
            strings(&["a", "b", "c", "d", "e", "f"]),
            strings(&["KO_severe", "KO_ctrl", "KO_shallow", "KO_ctrl", "KO_severe", "KO_shallow"]),
        )
        .unwrap()
        .with_reference("KO_ctrl")
        .unwrap();

        let design = create_design_matrix(&conditions).unwrap();
        assert_eq!(design.column_names(), &["KO_ctrl", "KO_severe", "KO_shallow"]);
        assert_eq!(design.n_samples(), 6);
        assert_eq!(design.residual_df(), 3);

        for row in design.matrix().rows() {
            assert_eq!(row.sum(), 1.0);
            assert!(row.iter().all(|&v| v == 0.0 || v == 1.0));
        }
        // no column is all ones, i.e. there is no intercept
        for col in design.matrix().columns() {
            assert!(col.iter().any(|&v| v == 0.0));
        }
        assert_eq!(design.matrix()[[1, 0]], 1.0);
        assert_eq!(design.matrix()[[0, 1]], 1.0);
    }

    #[test]
    fn test_non_ctrl_reference_ordering() {
        let conditions = ConditionAssignment::new(strings(&["a", "b"]), strings(&["OE_low", "OE_base"]))
            .unwrap()
            .with_reference("OE_low")
            .unwrap();
        let design = create_design_matrix(&conditions).unwrap();
        assert_eq!(design.column_names(), &["OE_low", "OE_base"]);
        assert_eq!(design.matrix()[[1, 1]], 1.0);
    }
}
