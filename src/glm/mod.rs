//! Linear models for log-expression values

mod design;
mod fitting;

pub use design::{create_design_matrix, DesignMatrix};
pub use fitting::{lm_fit, LinearModelFit};
