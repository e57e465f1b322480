//! Data structures for count-based expression analysis

mod conditions;
mod count_matrix;
mod experiment;
mod identifiers;

pub use conditions::ConditionAssignment;
pub use count_matrix::CountMatrix;
pub use experiment::{subset_experiment, ExperimentData};
pub use identifiers::{normalize_label, sample_id_from_path};
