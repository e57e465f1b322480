//! Principal component projection of samples

mod pca;

pub use pca::{pca, PcaResult, PrincipalComponent};
