//! The unrooted tree arena.
//!
//! Nodes are small integers: tips `0..n_tips`, inner nodes
//! `n_tips..2·n_tips - 2`. A tip owns a single directed *slot*; an inner
//! node owns a ring of three slots chained by `next`, one per incident
//! branch. `back` joins two slots across a branch, which carries one length
//! per partition (or a single shared length).
//!
//! The orientation flag lives on slots: a set flag on slot s means "the CLV
//! of s's node summarises the subtree away from `s.back`". At most one slot
//! per ring carries the flag. The traversal engine is the only kernel-side
//! writer; the tree-search collaborator invalidates flags when it rearranges
//! topology.
//!
//! Branch lengths are stored in their exponential transformation: the
//! variable z relates to elapsed time as `ln z = -t`, so z near 1 is a short
//! branch. The P-matrix builders floor z before taking the logarithm.

use log::trace;

mod error;
pub use error::TopologyError;

#[derive(Debug, Clone)]
struct Slot {
    node: usize,
    next: usize,
    back: Option<usize>,
    oriented: bool,
    z: Vec<f64>,
}

/// Fixed-shape arena for an unrooted binary tree over `n_tips` taxa.
#[derive(Debug, Clone)]
pub struct Tree {
    slots: Vec<Slot>,
    n_tips: usize,
    branch_count: usize,
}

impl Tree {
    /// An unconnected arena: every slot exists, no branch is linked yet.
    /// `branch_count` is 1 for a shared branch length, or the number of
    /// partitions under per-partition branch lengths.
    ///
    /// # Errors
    /// - [`TopologyError::TooFewTips`] below two tips.
    pub fn new(n_tips: usize, branch_count: usize) -> Result<Self, TopologyError> {
        if n_tips < 2 {
            return Err(TopologyError::TooFewTips(n_tips))
        }
        let n_inner = n_tips.saturating_sub(2);
        let mut slots = Vec::with_capacity(n_tips + 3 * n_inner);

        for tip in 0..n_tips {
            slots.push(Slot { node: tip, next: tip, back: None, oriented: false, z: vec![0.0; branch_count] });
        }
        for inner in 0..n_inner {
            let node = n_tips + inner;
            let base = n_tips + 3 * inner;
            for k in 0..3 {
                slots.push(Slot {
                    node,
                    next: base + (k + 1) % 3,
                    back: None,
                    oriented: false,
                    z: vec![0.0; branch_count],
                });
            }
        }
        Ok(Self { slots, n_tips, branch_count })
    }

    #[must_use] pub fn n_tips(&self) -> usize { self.n_tips }
    #[must_use] pub fn n_inner(&self) -> usize { self.n_tips.saturating_sub(2) }
    #[must_use] pub fn n_nodes(&self) -> usize { self.n_tips + self.n_inner() }
    #[must_use] pub fn branch_count(&self) -> usize { self.branch_count }

    #[must_use]
    pub fn is_tip(&self, node: usize) -> bool {
        node < self.n_tips
    }

    /// The single slot of a tip.
    #[must_use]
    pub fn tip_slot(&self, tip: usize) -> usize {
        debug_assert!(tip < self.n_tips);
        tip
    }

    /// The three ring slots of an inner node.
    #[must_use]
    pub fn inner_slots(&self, node: usize) -> [usize; 3] {
        debug_assert!(!self.is_tip(node));
        let base = self.n_tips + 3 * (node - self.n_tips);
        [base, base + 1, base + 2]
    }

    #[must_use]
    pub fn slot_node(&self, slot: usize) -> usize {
        self.slots[slot].node
    }

    #[must_use]
    pub fn slot_next(&self, slot: usize) -> usize {
        self.slots[slot].next
    }

    #[must_use]
    pub fn slot_back(&self, slot: usize) -> Option<usize> {
        self.slots[slot].back
    }

    /// Branch lengths on the edge behind `slot` (mirrored on both ends).
    #[must_use]
    pub fn z(&self, slot: usize) -> &[f64] {
        &self.slots[slot].z
    }

    /// Join two slots with a branch of lengths `z`.
    ///
    /// # Errors
    /// - when either slot is already connected, or `z` has the wrong arity.
    pub fn connect(&mut self, a: usize, b: usize, z: &[f64]) -> Result<(), TopologyError> {
        self.check_slot(a)?;
        self.check_slot(b)?;
        if z.len() != self.branch_count {
            return Err(TopologyError::BranchDim { expected: self.branch_count, got: z.len() })
        }
        if self.slots[a].back.is_some() {
            return Err(TopologyError::AlreadyConnected(a))
        }
        if self.slots[b].back.is_some() {
            return Err(TopologyError::AlreadyConnected(b))
        }
        self.slots[a].back = Some(b);
        self.slots[b].back = Some(a);
        self.slots[a].z.copy_from_slice(z);
        self.slots[b].z.copy_from_slice(z);
        trace!("Connected slot {a} (node {}) to slot {b} (node {})",
            self.slots[a].node, self.slots[b].node);
        Ok(())
    }

    /// Join two nodes, picking the first free slot on each side.
    ///
    /// # Errors
    /// - when a node has no unconnected slot, or `z` has the wrong arity.
    pub fn connect_nodes(&mut self, a: usize, b: usize, z: &[f64]) -> Result<(), TopologyError> {
        let slot_a = self.free_slot(a)?;
        let slot_b = self.free_slot(b)?;
        self.connect(slot_a, slot_b, z)
    }

    /// Overwrite the lengths of the branch behind `slot`, on both ends.
    ///
    /// # Errors
    /// - when `slot` is unconnected or `z` has the wrong arity.
    pub fn set_branch(&mut self, slot: usize, z: &[f64]) -> Result<(), TopologyError> {
        self.check_slot(slot)?;
        if z.len() != self.branch_count {
            return Err(TopologyError::BranchDim { expected: self.branch_count, got: z.len() })
        }
        let Some(back) = self.slots[slot].back else {
            return Err(TopologyError::Unconnected(slot))
        };
        self.slots[slot].z.copy_from_slice(z);
        self.slots[back].z.copy_from_slice(z);
        Ok(())
    }

    /// The slot of `p` whose branch leads to `q`, if the two are adjacent.
    #[must_use]
    pub fn slot_between(&self, p: usize, q: usize) -> Option<usize> {
        let candidates: Vec<usize> = if self.is_tip(p) {
            vec![p]
        } else {
            self.inner_slots(p).to_vec()
        };
        candidates.into_iter().find(|&slot| {
            self.slots[slot].back.is_some_and(|back| self.slots[back].node == q)
        })
    }

    /// Is the CLV behind `slot` current for the direction away from its
    /// back branch? Tips are always current.
    #[must_use]
    pub fn slot_oriented(&self, slot: usize) -> bool {
        let s = &self.slots[slot];
        self.is_tip(s.node) || s.oriented
    }

    /// Move a node's orientation flag onto `slot`. No-op for tips.
    pub fn orient_toward(&mut self, slot: usize) {
        let node = self.slots[slot].node;
        if self.is_tip(node) {
            return
        }
        for ring_slot in self.inner_slots(node) {
            self.slots[ring_slot].oriented = ring_slot == slot;
        }
    }

    /// Drop a node's orientation entirely. The tree-search collaborator
    /// calls this after rearranging the topology around `node`.
    pub fn invalidate(&mut self, node: usize) {
        if self.is_tip(node) {
            return
        }
        for ring_slot in self.inner_slots(node) {
            self.slots[ring_slot].oriented = false;
        }
    }

    /// The two child slots seen from `slot`: the backs of its ring
    /// successors. `None` for tips or unconnected rings.
    #[must_use]
    pub fn children(&self, slot: usize) -> Option<(usize, usize)> {
        if self.is_tip(self.slots[slot].node) {
            return None
        }
        let next1 = self.slots[slot].next;
        let next2 = self.slots[next1].next;
        Some((self.slots[next1].back?, self.slots[next2].back?))
    }

    fn free_slot(&self, node: usize) -> Result<usize, TopologyError> {
        if node >= self.n_nodes() {
            return Err(TopologyError::NodeRange { node, nodes: self.n_nodes() })
        }
        let candidates: Vec<usize> = if self.is_tip(node) {
            vec![node]
        } else {
            self.inner_slots(node).to_vec()
        };
        candidates.into_iter()
            .find(|&slot| self.slots[slot].back.is_none())
            .ok_or(TopologyError::NoFreeSlot(node))
    }

    fn check_slot(&self, slot: usize) -> Result<(), TopologyError> {
        if slot >= self.slots.len() {
            return Err(TopologyError::SlotRange { slot, slots: self.slots.len() })
        }
        Ok(())
    }
}
