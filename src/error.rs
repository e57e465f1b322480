//! Error types for rust_voom

use thiserror::Error;

/// Main error type for the normalization and projection pipeline
#[derive(Error, Debug)]
pub enum VoomError {
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Insufficient data: {reason}")]
    InsufficientData { reason: String },

    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Numerical instability in {operation}: {details}")]
    NumericalInstability { operation: String, details: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Sub-experiment '{experiment}' failed: {source}")]
    Experiment {
        experiment: String,
        #[source]
        source: Box<VoomError>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Coarse classification used when reporting a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    InsufficientData,
    InvalidInput,
    Numerical,
    Io,
}

impl VoomError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        VoomError::Configuration { reason: reason.into() }
    }

    pub(crate) fn insufficient(reason: impl Into<String>) -> Self {
        VoomError::InsufficientData { reason: reason.into() }
    }

    /// Attach the sub-experiment name to a stage failure
    pub fn in_experiment(self, experiment: &str) -> Self {
        match self {
            // already attributed
            e @ VoomError::Experiment { .. } => e,
            e => VoomError::Experiment {
                experiment: experiment.to_string(),
                source: Box::new(e),
            },
        }
    }

    /// Kind of the underlying failure, looking through `Experiment` wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            VoomError::Configuration { .. } => ErrorKind::Configuration,
            VoomError::InsufficientData { .. } => ErrorKind::InsufficientData,
            VoomError::InvalidCountMatrix { .. }
            | VoomError::DimensionMismatch { .. }
            | VoomError::InvalidInput { .. } => ErrorKind::InvalidInput,
            VoomError::NumericalInstability { .. } => ErrorKind::Numerical,
            VoomError::Experiment { source, .. } => source.kind(),
            VoomError::IoError(_) | VoomError::CsvError(_) | VoomError::JsonError(_) => ErrorKind::Io,
        }
    }

    /// Name of the sub-experiment the error was raised in, if known
    pub fn experiment(&self) -> Option<&str> {
        match self {
            VoomError::Experiment { experiment, .. } => Some(experiment),
            _ => None,
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, VoomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_experiment_wrapping_keeps_kind() {
        let err = VoomError::configuration("no samples").in_experiment("KO");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.experiment(), Some("KO"));
        assert!(err.to_string().contains("KO"));

        // Wrapping twice keeps the innermost attribution
        let rewrapped = err.in_experiment("OE");
        assert_eq!(rewrapped.experiment(), Some("KO"));
    }
}
