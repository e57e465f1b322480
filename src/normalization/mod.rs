//! Normalization methods for RNA-seq count data

mod counts;
mod tmm;

pub use counts::log_cpm;
pub use tmm::{estimate_norm_factors, tmm_factors, NormalizationFactors};
