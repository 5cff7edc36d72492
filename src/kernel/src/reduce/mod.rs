//! Deterministic reduction of per-partition partial log-likelihoods.
//!
//! Two levels: within a rank, every worker's partial vector is summed in
//! worker-id order, so a fixed partition-to-worker assignment always folds
//! in the same order; across ranks, a symmetric all-reduce leaves every
//! rank holding the globally summed per-partition vector. The kernel does
//! not own the inter-rank transport: it is a collaborator behind the
//! [`Collective`] trait, and a single-rank run plugs in [`LocalCollective`].

use anyhow::Result;

#[cfg(test)]
use mockall::automock;

/// The inter-rank collective the engine reduces through. Implementations
/// wrap whatever transport the deployment uses; the reduction must be a
/// sum, symmetric across ranks, and deterministic for a fixed rank count.
#[cfg_attr(test, automock)]
pub trait Collective {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Element-wise sum of `values` across all ranks; every rank ends up
    /// with the same totals.
    ///
    /// # Errors
    /// - transport failures. The engine treats any error as fatal and
    ///   aborts the computation.
    fn all_reduce_sum(&self, values: &mut [f64]) -> Result<()>;
}

/// The single-rank collective: the identity reduction.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCollective;

impl Collective for LocalCollective {
    fn rank(&self) -> usize { 0 }
    fn size(&self) -> usize { 1 }

    fn all_reduce_sum(&self, _values: &mut [f64]) -> Result<()> {
        Ok(())
    }
}

/// Intra-rank reduction: fold every worker's per-partition partials into
/// `totals`, in worker order. `partials` is indexed `[worker][partition]`.
pub fn reduce_workers(partials: &[Vec<f64>], totals: &mut [f64]) {
    totals.fill(0.0);
    for worker in partials {
        debug_assert_eq!(worker.len(), totals.len());
        for (total, &partial) in totals.iter_mut().zip(worker) {
            *total += partial;
        }
    }
}
