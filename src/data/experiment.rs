//! Count matrix paired with its condition labels, and the per-experiment subsetter

use super::{ConditionAssignment, CountMatrix};
use crate::config::ExperimentSpec;
use crate::error::{Result, VoomError};

/// Counts and labels whose sample order is guaranteed to agree
#[derive(Debug, Clone)]
pub struct ExperimentData {
    name: String,
    counts: CountMatrix,
    conditions: ConditionAssignment,
}

impl ExperimentData {
    pub fn new(name: &str, counts: CountMatrix, conditions: ConditionAssignment) -> Result<Self> {
        if counts.sample_ids() != conditions.sample_ids() {
            return Err(VoomError::configuration(format!(
                "count matrix samples {:?} do not match condition samples {:?}",
                counts.sample_ids(),
                conditions.sample_ids()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            counts,
            conditions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn conditions(&self) -> &ConditionAssignment {
        &self.conditions
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    /// Keep only the given samples
    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        Self::new(
            &self.name,
            self.counts.subset_samples(sample_indices)?,
            self.conditions.subset(sample_indices)?,
        )
    }
}

/// Select the samples of one sub-experiment and set its reference level.
///
/// Fails with a configuration error when no label starts with the prefix or
/// when the reference level is not among the matched labels.
pub fn subset_experiment(
    counts: &CountMatrix,
    conditions: &ConditionAssignment,
    spec: &ExperimentSpec,
) -> Result<ExperimentData> {
    let indices = conditions.samples_with_prefix(&spec.prefix);
    if indices.is_empty() {
        return Err(VoomError::configuration(format!(
            "no samples have a condition label starting with '{}'",
            spec.prefix
        )));
    }

    let labels = conditions.subset(&indices)?.with_reference(&spec.reference)?;
    let subset_counts = counts.subset_samples(&indices)?;

    log::info!(
        "{}: {} samples in {} conditions (reference: {})",
        spec.name,
        indices.len(),
        labels.levels().len(),
        spec.reference
    );

    ExperimentData::new(&spec.name, subset_counts, labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn full() -> (CountMatrix, ConditionAssignment) {
        let samples = strings(&["a", "b", "c", "d"]);
        let counts = CountMatrix::new(
            array![[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]],
            strings(&["g1", "g2"]),
            samples.clone(),
        )
        .unwrap();
        let conditions =
            ConditionAssignment::new(samples, strings(&["KO_ctrl", "OE_ctrl", "KO_severe", "OE_high"])).unwrap();
        (counts, conditions)
    }

    #[test]
    fn test_subset_by_prefix() {
        let (counts, conditions) = full();
        let ko = subset_experiment(&counts, &conditions, &ExperimentSpec::with_control("KO")).unwrap();
        assert_eq!(ko.counts().sample_ids(), &["a", "c"]);
        assert_eq!(ko.counts().counts().column(1).to_vec(), vec![3.0, 7.0]);
        assert_eq!(ko.conditions().reference(), Some("KO_ctrl"));
        assert_eq!(ko.name(), "KO");
    }

    #[test]
    fn test_unmatched_prefix_fails() {
        let (counts, conditions) = full();
        let err = subset_experiment(&counts, &conditions, &ExperimentSpec::with_control("WT")).unwrap_err();
        assert!(matches!(err, VoomError::Configuration { .. }));
    }

    #[test]
    fn test_absent_reference_fails() {
        let (counts, conditions) = full();
        let spec = ExperimentSpec::parse("OE=OE_empty").unwrap();
        let err = subset_experiment(&counts, &conditions, &spec).unwrap_err();
        assert!(matches!(err, VoomError::Configuration { .. }));
    }
}
