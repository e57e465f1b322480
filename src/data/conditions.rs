//! Sample-to-condition assignment

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoomError};

/// One categorical label per sample, with an optional reference level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionAssignment {
    sample_ids: Vec<String>,
    labels: Vec<String>,
    reference: Option<String>,
}

impl ConditionAssignment {
    pub fn new(sample_ids: Vec<String>, labels: Vec<String>) -> Result<Self> {
        if sample_ids.len() != labels.len() {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} labels", sample_ids.len()),
                got: format!("{} labels", labels.len()),
            });
        }
        if let Some(i) = labels.iter().position(|l| l.trim().is_empty()) {
            return Err(VoomError::InvalidInput {
                reason: format!("sample '{}' has an empty condition label", sample_ids[i]),
            });
        }
        Ok(Self {
            sample_ids,
            labels,
            reference: None,
        })
    }

    /// Return a copy with `level` as reference; the level must be present
    pub fn with_reference(&self, level: &str) -> Result<Self> {
        if !self.labels.iter().any(|l| l == level) {
            return Err(VoomError::configuration(format!(
                "reference level '{}' not found among levels {:?}",
                level,
                self.levels()
            )));
        }
        Ok(Self {
            reference: Some(level.to_string()),
            ..self.clone()
        })
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn label_of(&self, sample_id: &str) -> Option<&str> {
        self.sample_ids
            .iter()
            .position(|id| id == sample_id)
            .map(|i| self.labels[i].as_str())
    }

    /// Distinct levels: the reference first, then the rest in lexicographic order
    pub fn levels(&self) -> Vec<String> {
        let mut unique: Vec<String> = self.labels.clone();
        unique.sort();
        unique.dedup();
        if let Some(reference) = &self.reference {
            if let Some(pos) = unique.iter().position(|l| l == reference) {
                let r = unique.remove(pos);
                unique.insert(0, r);
            }
        }
        unique
    }

    /// Number of samples per level
    pub fn group_sizes(&self) -> BTreeMap<String, usize> {
        let mut sizes = BTreeMap::new();
        for label in &self.labels {
            *sizes.entry(label.clone()).or_insert(0) += 1;
        }
        sizes
    }

    /// Size of the smallest non-empty group
    pub fn min_group_size(&self) -> usize {
        self.group_sizes().values().copied().filter(|&n| n > 0).min().unwrap_or(0)
    }

    /// Indices of samples whose label starts with `prefix`
    pub fn samples_with_prefix(&self, prefix: &str) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.starts_with(prefix))
            .map(|(i, _)| i)
            .collect()
    }

    /// Subset to specific samples; the reference is kept only if still present
    pub fn subset(&self, sample_indices: &[usize]) -> Result<Self> {
        let sample_ids = sample_indices.iter().map(|&i| self.sample_ids[i].clone()).collect();
        let labels: Vec<String> = sample_indices.iter().map(|&i| self.labels[i].clone()).collect();
        let reference = self
            .reference
            .as_ref()
            .filter(|r| labels.iter().any(|l| l == *r))
            .cloned();
        let mut subset = Self::new(sample_ids, labels)?;
        subset.reference = reference;
        Ok(subset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn assignment() -> ConditionAssignment {
        ConditionAssignment::new(
            strings(&["s1", "s2", "s3", "s4", "s5"]),
            strings(&["KO_severe", "KO_ctrl", "KO_shallow", "OE_ctrl", "KO_ctrl"]),
        )
        .unwrap()
    }

    #[test]
    fn test_levels_with_reference_first() {
        let a = assignment();
        assert_eq!(a.levels(), strings(&["KO_ctrl", "KO_severe", "KO_shallow", "OE_ctrl"]));

        let a = a.with_reference("KO_shallow").unwrap();
        assert_eq!(a.levels(), strings(&["KO_shallow", "KO_ctrl", "KO_severe", "OE_ctrl"]));
    }

    #[test]
    fn test_missing_reference_is_configuration_error() {
        let err = assignment().with_reference("KO_ctr").unwrap_err();
        assert!(matches!(err, VoomError::Configuration { .. }));
    }

    #[test]
    fn test_prefix_and_group_sizes() {
        let a = assignment();
        assert_eq!(a.samples_with_prefix("KO"), vec![0, 1, 2, 4]);
        assert_eq!(a.group_sizes()["KO_ctrl"], 2);
        assert_eq!(a.min_group_size(), 1);
    }

    #[test]
    fn test_subset_drops_absent_reference() {
        let a = assignment().with_reference("OE_ctrl").unwrap();
        let ko = a.subset(&[0, 1]).unwrap();
        assert_eq!(ko.reference(), None);
        assert_eq!(ko.label_of("s2"), Some("KO_ctrl"));
    }
}
