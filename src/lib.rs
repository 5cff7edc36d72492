//! phylik-rs: a partitioned phylogenetic likelihood kernel.
//!
//! The façade crate re-exports the pieces a distributed tree-inference
//! front end wires together: the binary alignment store, per-partition
//! substitution models, and the likelihood engine itself.

pub use alignment::{assignment, pomo, Assignment, AlignmentStore, BinaryAlignment, PartitionMeta, TipData};
pub use config::{DataType, KernelConfig, ProtModel, RateHet};
pub use kernel::{Collective, LikelihoodEngine, LocalCollective, Tree};
pub use logger::Logger;
pub use substmodel::{EigenDecomp, EigenSet, PartitionModel, RateModel};

use std::path::Path;

use anyhow::Result;
use located_error::*;
use log::info;

/// Load a binary alignment and assemble a single-rank engine over
/// `worker_count` threads, with the column-to-worker assignment balanced
/// at load time.
///
/// # Errors
/// - any load or shape failure; see [`AlignmentStore::load`] and
///   [`LikelihoodEngine::new`].
pub fn load_single_rank(
    alignment_path: &Path,
    tree: Tree,
    models: Vec<PartitionModel>,
    kernel_config: &KernelConfig,
    worker_count: usize,
) -> Result<LikelihoodEngine> {
    // the header is cheap to read twice: first for the partition widths,
    // then for the windows themselves
    let header_only = AlignmentStore::load(alignment_path, &[])
        .loc("While reading the alignment header")?;
    let widths: Vec<usize> = header_only.partitions.iter().map(PartitionMeta::full_width).collect();

    let assignments = assignment::balance(&widths, worker_count);
    let flat: Vec<Assignment> = assignments.iter().flatten().copied().collect();
    let store = AlignmentStore::load(alignment_path, &flat)
        .loc("While reading the assigned alignment windows")?;

    info!("Assembling a single-rank engine over {worker_count} workers");
    LikelihoodEngine::single_rank(tree, store, models, kernel_config, &assignments)
}
