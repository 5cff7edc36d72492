//! The phylogenetic likelihood kernel.
//!
//! A tree-traversal engine over partitioned molecular alignments: it
//! maintains per-node conditional likelihood vectors (CLVs), recomputes the
//! minimal set of them for a query at a virtual-root branch, evaluates the
//! log-likelihood there, and reduces per-partition partials across worker
//! threads and ranks into a single deterministic total.
//!
//! The kernel is a pure compute component. Tree search, branch-length and
//! model-parameter optimisation, alignment parsing and I/O front ends are
//! external collaborators that drive it through [`LikelihoodEngine`].

pub mod topology;
pub mod traversal;
pub mod clv;
pub mod newview;
pub mod evaluate;
pub mod reduce;
pub mod engine;

pub use topology::Tree;
pub use traversal::{TipCase, Traversal, TraversalEntry, RootBranch};
pub use reduce::{Collective, LocalCollective};
pub use engine::LikelihoodEngine;
