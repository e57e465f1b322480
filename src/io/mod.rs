//! Input/Output: count data readers and result table writers

mod bundle;
mod csv;
mod tables;

pub use self::csv::{read_count_matrix, read_count_table, read_sample_sheet};
pub use bundle::{read_bundle, CountBundle};
pub use tables::{
    prepare_output_dir, write_gene_matrix, write_library_sizes, write_norm_factors, write_pca_scores,
    write_pca_variance, write_session_info, ExperimentSummary,
};
