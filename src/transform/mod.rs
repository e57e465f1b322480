//! Variance stabilization of log-expression values
//!
//! voom precision weights from a lowess mean-variance trend, for projection
//! and other downstream analysis.

mod lowess;
mod voom;

pub use lowess::{lowess, LowessFit};
pub use voom::{voom, MeanVarianceTrend, VarianceStabilized};
