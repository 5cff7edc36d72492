//! Substitution-model data consumed by the likelihood kernel.
//!
//! Everything in here is immutable for the lifetime of a tree computation:
//! per-partition eigen-decompositions of the rate matrix, tip-vector lookup
//! tables, rate-heterogeneity tables, and the P-matrix builders that
//! exponentiate a branch length against them. The continuous parameters
//! themselves (exchangeabilities, frequencies, α) are owned and optimized by
//! an external collaborator; this crate only composes what the kernel reads.

pub mod numeric;
pub mod eigen;
pub mod rates;
pub mod tipvector;
pub mod pmatrix;
pub mod model;

pub use eigen::EigenDecomp;
pub use rates::RateModel;
pub use tipvector::TipTable;
pub use model::{EigenSet, PartitionModel};
