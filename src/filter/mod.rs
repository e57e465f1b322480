//! Low-expression gene filtering

mod expression;

pub use expression::{expressed_genes, filter_by_expression, refilter, FilteredCountMatrix};
