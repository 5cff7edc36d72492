//! The likelihood engine: the caller-facing façade of the kernel.
//!
//! Owns the tree arena, the per-partition models, and one worker state per
//! thread. A call to [`LikelihoodEngine::evaluate`] builds a traversal
//! descriptor sequentially, executes it over every worker's partition
//! windows in parallel, folds the per-worker partial log-likelihoods in
//! worker order, and finishes with the inter-rank all-reduce.
//! [`LikelihoodEngine::newview`] runs the update half of the same pipeline.
//!
//! Work assignment of partition columns to workers is fixed at
//! construction and never changes: each worker owns the CLVs, scalers and
//! scratch of its windows, so the parallel region shares nothing mutable.

use ahash::AHashMap;
use log::{debug, info};
use rayon::prelude::*;

use alignment::{Assignment, AlignmentStore, PartitionMeta, TipData};
use anyhow::Result;
use config::{KernelConfig, RateHet};
use located_error::*;
use substmodel::PartitionModel;

use crate::clv::{ClvSlice, GapSidecar, Scratch, SliceData};
use crate::evaluate::{evaluate_slice, EvaluateOp};
use crate::newview::{newview_slice, NewviewOp};
use crate::reduce::{reduce_workers, Collective, LocalCollective};
use crate::topology::Tree;
use crate::traversal::{compute_traversal, RootBranch, Traversal, TraversalEntry};

mod error;
pub use error::EngineError;

/// One worker thread's private state: its partition windows and its
/// per-partition partial log-likelihoods.
#[derive(Debug)]
struct Worker {
    slices: Vec<SliceData>,
    partials: Vec<f64>,
}

impl Worker {
    fn run(
        &mut self,
        entries: &[TraversalEntry],
        root: Option<&RootBranch>,
        models: &[PartitionModel],
        execute: &[bool],
        n_tips: usize,
        per_partition_branch_lengths: bool,
        save_memory: bool,
        max_categories: usize,
    ) {
        for entry in entries {
            for slice in &mut self.slices {
                let partition = slice.partition;
                if !execute[partition] {
                    continue
                }
                let op = NewviewOp {
                    entry,
                    model: &models[partition],
                    n_tips,
                    branch_index: if per_partition_branch_lengths { partition } else { 0 },
                    save_memory,
                    max_categories,
                };
                newview_slice(&op, slice);
            }
        }

        if let Some(root) = root {
            self.partials.fill(0.0);
            for slice in &mut self.slices {
                let partition = slice.partition;
                if !execute[partition] {
                    continue
                }
                let op = EvaluateOp {
                    root,
                    model: &models[partition],
                    n_tips,
                    branch_index: if per_partition_branch_lengths { partition } else { 0 },
                };
                self.partials[partition] += evaluate_slice(&op, slice);
            }
        }
    }
}

/// The phylogenetic likelihood engine over one rank's share of a
/// partitioned alignment.
pub struct LikelihoodEngine<C: Collective = LocalCollective> {
    tree: Tree,
    partitions: Vec<PartitionMeta>,
    models: Vec<PartitionModel>,
    taxa_index: AHashMap<String, usize>,
    workers: Vec<Worker>,
    execute: Vec<bool>,
    partition_converged: Vec<bool>,
    per_partition_ll: Vec<f64>,
    likelihood: f64,
    per_partition_branch_lengths: bool,
    save_memory: bool,
    max_categories: usize,
    collective: C,
}

impl<C: Collective> LikelihoodEngine<C> {
    /// Assemble an engine from a loaded alignment store, the composed
    /// per-partition models, and the per-worker column assignment the
    /// store was loaded with (`assignments[worker]` lists that worker's
    /// windows; flattened, they must match `store.blocks` in order).
    ///
    /// # Errors
    /// - any shape inconsistency between tree, store, models, assignment
    ///   and configuration. All are fatal: the engine holds no partial
    ///   state worth recovering.
    pub fn new(
        tree: Tree,
        store: AlignmentStore,
        models: Vec<PartitionModel>,
        kernel_config: &KernelConfig,
        assignments: &[Vec<Assignment>],
        collective: C,
    ) -> Result<Self> {
        kernel_config.validate().loc("While validating kernel configuration")?;
        Self::check_shapes(&tree, &store, &models, kernel_config, assignments)
            .loc("While validating engine inputs")?;

        let n_tips = tree.n_tips();
        let n_inner = tree.n_inner();
        let partition_count = store.partitions.len();

        let taxa_index: AHashMap<String, usize> = store.taxa_names.iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), index))
            .collect();

        // ---- distribute the loaded blocks onto their workers
        let mut blocks = store.blocks.into_iter();
        let mut workers = Vec::with_capacity(assignments.len());
        let mut block_index = 0;
        for worker_assignments in assignments {
            let mut slices = Vec::with_capacity(worker_assignments.len());
            for assignment in worker_assignments {
                let block = blocks.next().ok_or(EngineError::BlockMismatch {
                    index: block_index,
                    expected_partition: assignment.partition,
                    expected_offset: assignment.offset,
                    expected_width: assignment.width,
                })?;
                if block.partition != assignment.partition
                    || block.offset != assignment.offset
                    || block.width != assignment.width
                {
                    return Err(EngineError::BlockMismatch {
                        index: block_index,
                        expected_partition: assignment.partition,
                        expected_offset: assignment.offset,
                        expected_width: assignment.width,
                    }).loc("While pairing alignment blocks with workers")
                }
                block_index += 1;

                let meta = &store.partitions[block.partition];
                let model = &models[block.partition];
                let states = model.states();
                let r_count = model.rates.clv_rate_count();
                let span = states * r_count;
                let categories = model.rates.category_count();
                let blocks_needed = if model.rates.mode() == RateHet::Cat {
                    // one extra P-matrix slot for the unit-rate gap column
                    kernel_config.max_rate_categories + 1
                } else {
                    categories
                };

                let gap = if kernel_config.save_memory {
                    let undetermined = meta.data_type.undetermined_code()
                        .expect("memory saving is limited to byte-coded partitions");
                    Some(GapSidecar::new(&block.tips, undetermined, block.width, n_tips, n_inner, span))
                } else {
                    None
                };

                // tip CLVs arrive as raw observation probabilities; fold
                // them into the eigen projection the kernel computes in,
                // exactly as tip-table rows are built for byte codes
                let tips = match block.tips {
                    TipData::Clvs(rows) => TipData::Clvs(
                        rows.into_iter()
                            .map(|row| project_clv_row(&row, model))
                            .collect(),
                    ),
                    bytes => bytes,
                };

                slices.push(SliceData {
                    partition: block.partition,
                    offset: block.offset,
                    width: block.width,
                    weights: block.weights,
                    tips,
                    site_categories: vec![0; block.width],
                    clv: ClvSlice::new(n_tips, n_inner),
                    scratch: Scratch::sized(
                        blocks_needed,
                        categories,
                        states,
                        meta.max_tip_states(),
                        span,
                    ),
                    gap,
                });
            }
            workers.push(Worker { slices, partials: vec![0.0; partition_count] });
        }

        info!("Engine assembled: {} tips, {} partitions, {} workers, rank {}/{}",
            n_tips, partition_count, workers.len(), collective.rank(), collective.size());

        Ok(Self {
            tree,
            partitions: store.partitions,
            models,
            taxa_index,
            workers,
            execute: vec![true; partition_count],
            partition_converged: vec![false; partition_count],
            per_partition_ll: vec![0.0; partition_count],
            likelihood: 0.0,
            per_partition_branch_lengths: kernel_config.per_partition_branch_lengths,
            save_memory: kernel_config.save_memory,
            max_categories: kernel_config.max_rate_categories,
            collective,
        })
    }

    fn check_shapes(
        tree: &Tree,
        store: &AlignmentStore,
        models: &[PartitionModel],
        kernel_config: &KernelConfig,
        assignments: &[Vec<Assignment>],
    ) -> Result<(), EngineError> {
        if tree.n_tips() != store.taxa_count {
            return Err(EngineError::TaxaMismatch { tree: tree.n_tips(), alignment: store.taxa_count })
        }
        if models.len() != store.partitions.len() {
            return Err(EngineError::ModelCount { models: models.len(), partitions: store.partitions.len() })
        }
        if assignments.is_empty() {
            return Err(EngineError::NoWorkers)
        }
        let branches_expected = if kernel_config.per_partition_branch_lengths {
            store.partitions.len()
        } else {
            1
        };
        if tree.branch_count() != branches_expected {
            return Err(EngineError::BranchCount { tree: tree.branch_count(), expected: branches_expected })
        }
        for (partition, (meta, model)) in store.partitions.iter().zip(models).enumerate() {
            if meta.data_type != model.data_type {
                return Err(EngineError::DataTypeMismatch {
                    partition, model: model.data_type, alignment: meta.data_type,
                })
            }
            if model.rates.mode() != kernel_config.rate_het {
                return Err(EngineError::RateModeMismatch {
                    partition, model: model.rates.mode(), config: kernel_config.rate_het,
                })
            }
            if model.rates.mode() == RateHet::Cat
                && model.rates.category_count() > kernel_config.max_rate_categories
            {
                return Err(EngineError::TooManyCategories {
                    partition,
                    categories: model.rates.category_count(),
                    max: kernel_config.max_rate_categories,
                })
            }
            kernel_config.validate_partition(meta.data_type, meta.prot_model)?;
        }
        Ok(())
    }

    /// Compute the global log-likelihood at the branch between nodes
    /// `branch.0` and `branch.1`, running the minimal (or, with
    /// `full_traversal`, the complete) CLV recomputation first.
    ///
    /// # Errors
    /// - [`EngineError::NotABranch`] when the two nodes are not adjacent;
    /// - traversal shape errors on a partially connected tree.
    pub fn evaluate(&mut self, branch: (usize, usize), full_traversal: bool) -> Result<f64> {
        let (p, q) = branch;
        let p_slot = self.tree.slot_between(p, q)
            .ok_or(EngineError::NotABranch(p, q))
            .loc("While resolving the virtual-root branch")?;
        let q_slot = self.tree.slot_back(p_slot).expect("slot_between returns linked slots");

        let mut traversal = Traversal {
            root: Some(RootBranch { p, q, z: self.tree.z(q_slot).to_vec() }),
            entries: Vec::new(),
        };

        for slot in [p_slot, q_slot] {
            let is_inner = !self.tree.is_tip(self.tree.slot_node(slot));
            if full_traversal {
                if is_inner {
                    compute_traversal(&mut self.tree, slot, false, &mut traversal.entries)
                        .loc("While building the full traversal")?;
                }
            } else if is_inner && !self.tree.slot_oriented(slot) {
                compute_traversal(&mut self.tree, slot, true, &mut traversal.entries)
                    .loc("While building the partial traversal")?;
            }
        }
        debug!("Evaluating at branch ({p}, {q}): {} descriptor entries", traversal.entries.len());

        self.run(&traversal);

        // ---- intra-rank fold, in worker order
        let partials: Vec<Vec<f64>> = self.workers.iter().map(|w| w.partials.clone()).collect();
        reduce_workers(&partials, &mut self.per_partition_ll);

        // ---- symmetric inter-rank reduction
        self.collective.all_reduce_sum(&mut self.per_partition_ll)
            .loc("While reducing per-partition log-likelihoods across ranks")?;

        for (partition, &value) in self.per_partition_ll.iter().enumerate() {
            assert!(value < 0.0,
                "partition {partition}: non-negative log-likelihood {value}");
        }
        self.likelihood = self.per_partition_ll.iter().sum();
        debug!("Log-likelihood: {}", self.likelihood);
        Ok(self.likelihood)
    }

    /// Bring the CLV behind `slot` up to date over every partition.
    ///
    /// # Errors
    /// - traversal shape errors on a partially connected tree.
    pub fn newview(&mut self, slot: usize) -> Result<()> {
        self.newview_with_mask(slot, false)
    }

    /// Like [`LikelihoodEngine::newview`], skipping partitions flagged as
    /// converged via [`LikelihoodEngine::set_partition_converged`].
    ///
    /// # Errors
    /// - traversal shape errors on a partially connected tree.
    pub fn newview_masked(&mut self, slot: usize) -> Result<()> {
        self.newview_with_mask(slot, true)
    }

    fn newview_with_mask(&mut self, slot: usize, masked: bool) -> Result<()> {
        if self.tree.is_tip(self.tree.slot_node(slot)) {
            return Ok(())
        }
        let mut traversal = Traversal::default();
        compute_traversal(&mut self.tree, slot, true, &mut traversal.entries)
            .loc("While building the newview traversal")?;

        if masked {
            for (execute, &converged) in self.execute.iter_mut().zip(&self.partition_converged) {
                *execute = !converged;
            }
        }
        if !traversal.entries.is_empty() {
            self.run(&traversal);
        }
        if masked {
            self.execute.fill(true);
        }
        Ok(())
    }

    /// The parallel region: every worker executes the descriptor over its
    /// own windows. Workers share nothing mutable; the traversal order
    /// within a window guarantees children are written before parents read
    /// them.
    fn run(&mut self, traversal: &Traversal) {
        let entries = &traversal.entries;
        let root = traversal.root.as_ref();
        let models = &self.models;
        let execute = &self.execute;
        let n_tips = self.tree.n_tips();
        let per_partition = self.per_partition_branch_lengths;
        let save_memory = self.save_memory;
        let max_categories = self.max_categories;

        self.workers.par_iter_mut().for_each(|worker| {
            worker.run(entries, root, models, execute, n_tips, per_partition, save_memory, max_categories);
        });
    }

    /// Per-partition log-likelihood of the last [`LikelihoodEngine::evaluate`].
    #[must_use]
    pub fn per_partition_ll(&self, partition: usize) -> f64 {
        self.per_partition_ll[partition]
    }

    /// Total log-likelihood of the last [`LikelihoodEngine::evaluate`].
    #[must_use]
    pub fn likelihood(&self) -> f64 {
        self.likelihood
    }

    /// Flag a partition as converged; masked updates skip it.
    pub fn set_partition_converged(&mut self, partition: usize, converged: bool) {
        self.partition_converged[partition] = converged;
    }

    /// Supply per-site rate category indices for a CAT partition, over the
    /// partition's full column range; each worker window takes its slice.
    ///
    /// # Errors
    /// - wrong length, an index outside the category table, or an unknown
    ///   partition.
    pub fn set_site_categories(&mut self, partition: usize, categories: &[usize]) -> Result<(), EngineError> {
        let count = self.partitions.len();
        let meta = self.partitions.get(partition)
            .ok_or(EngineError::PartitionRange { partition, count })?;
        if categories.len() != meta.full_width() {
            return Err(EngineError::SiteCategoryLength {
                partition, got: categories.len(), expected: meta.full_width(),
            })
        }
        let table = self.models[partition].rates.category_count();
        if let Some(&index) = categories.iter().find(|&&index| index >= table) {
            return Err(EngineError::SiteCategoryRange { partition, index, categories: table })
        }
        for worker in &mut self.workers {
            for slice in worker.slices.iter_mut().filter(|s| s.partition == partition) {
                slice.site_categories
                    .copy_from_slice(&categories[slice.offset..slice.offset + slice.width]);
            }
        }
        Ok(())
    }

    /// The tree arena, for the tree-search collaborator: connect branches,
    /// set lengths, invalidate orientations after rearrangements.
    #[must_use]
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    /// Node index of a taxon by name.
    #[must_use]
    pub fn taxon(&self, name: &str) -> Option<usize> {
        self.taxa_index.get(name).copied()
    }

    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Sum of a node's scaling counters across this rank's windows of a
    /// partition; exposed for invariant checks.
    #[must_use]
    pub fn scaler_sum(&self, node: usize, partition: usize) -> u64 {
        let mut total = 0u64;
        for worker in &self.workers {
            for slice in worker.slices.iter().filter(|s| s.partition == partition) {
                total += u64::from(slice.clv.scaler(node));
            }
        }
        total
    }

    /// Clone the CLV windows of an inner node over one partition, in worker
    /// order; exposed for invariant checks (idempotence, bit-exactness).
    #[must_use]
    pub fn clv_view(&self, node: usize, partition: usize) -> Vec<Vec<f64>> {
        let inner = node - self.tree.n_tips();
        let mut views = Vec::new();
        for worker in &self.workers {
            for slice in worker.slices.iter().filter(|s| s.partition == partition) {
                if let Some(clv) = slice.clv.raw(inner) {
                    views.push(clv.to_vec());
                }
            }
        }
        views
    }
}

/// `out[site·S + j] = Σ_l ev[l·S + j] · raw[site·S + l]`: the eigen
/// projection of a species' natural-basis tip likelihoods.
fn project_clv_row(raw: &[f64], model: &PartitionModel) -> Vec<f64> {
    let states = model.states();
    let ev = &model.eigen.single().ev;
    let mut out = vec![0.0; raw.len()];
    for (site, natural) in raw.chunks_exact(states).enumerate() {
        let projected = &mut out[site * states..(site + 1) * states];
        for (l, &x) in natural.iter().enumerate() {
            for (entry, &e) in projected.iter_mut().zip(&ev[l * states..(l + 1) * states]) {
                *entry += x * e;
            }
        }
    }
    out
}

impl LikelihoodEngine<LocalCollective> {
    /// Single-rank engine.
    ///
    /// # Errors
    /// - see [`LikelihoodEngine::new`].
    pub fn single_rank(
        tree: Tree,
        store: AlignmentStore,
        models: Vec<PartitionModel>,
        kernel_config: &KernelConfig,
        assignments: &[Vec<Assignment>],
    ) -> Result<Self> {
        Self::new(tree, store, models, kernel_config, assignments, LocalCollective)
    }
}
