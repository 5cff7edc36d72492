//! Traversal descriptors.
//!
//! A descriptor linearises the set of inner nodes whose conditional
//! likelihood vectors must be recomputed to answer a query at a given slot:
//! executing its entries in order guarantees every child CLV is written
//! before its consumer reads it. Under a partial traversal the recursion
//! stops at slots whose orientation flag is already set; a full traversal
//! re-enumerates everything below the starting slot.

use log::trace;

use crate::topology::Tree;

mod error;
pub use error::TraversalError;

/// Structural classification of a descriptor entry by its children.
/// CLV-bearing tips (polymorphism-aware partitions) are promoted to their
/// `..Clv` execution flavor per partition when the entry runs; the
/// topology alone cannot tell the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipCase {
    TipTip,
    TipInner,
    InnerInner,
}

/// One CLV recomputation: update node `p` from its children `q` and `r`
/// across branches `qz` and `rz` (one length per partition, or one shared).
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalEntry {
    pub p: usize,
    pub q: usize,
    pub r: usize,
    pub tip_case: TipCase,
    pub qz: Vec<f64>,
    pub rz: Vec<f64>,
}

/// The virtual-root branch of an evaluation: endpoints and branch lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct RootBranch {
    pub p: usize,
    pub q: usize,
    pub z: Vec<f64>,
}

/// A full query descriptor: the optional root operation plus the ordered
/// CLV updates feeding it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Traversal {
    pub root: Option<RootBranch>,
    pub entries: Vec<TraversalEntry>,
}

/// Enumerate, bottom-up, the CLV updates needed so that the CLV behind
/// `slot` is current. With `partial` set, subtrees whose facing slots are
/// already oriented are pruned; otherwise every inner node below `slot` is
/// emitted. Emission order preserves the dependency order.
///
/// Orientation flags are moved onto the updated slots as entries are
/// emitted; executing the descriptor is what makes the flags true.
///
/// # Errors
/// - [`TraversalError::UnlinkedSlot`] when the recursion crosses an
///   unconnected branch: the collaborator handed over a partial tree.
pub fn compute_traversal(
    tree: &mut Tree,
    slot: usize,
    partial: bool,
    entries: &mut Vec<TraversalEntry>,
) -> Result<(), TraversalError> {
    if tree.is_tip(tree.slot_node(slot)) {
        return Ok(())
    }

    let next1 = tree.slot_next(slot);
    let next2 = tree.slot_next(next1);
    let mut q_slot = tree.slot_back(next1).ok_or(TraversalError::UnlinkedSlot(next1))?;
    let mut r_slot = tree.slot_back(next2).ok_or(TraversalError::UnlinkedSlot(next2))?;

    let q_is_tip = tree.is_tip(tree.slot_node(q_slot));
    let r_is_tip = tree.is_tip(tree.slot_node(r_slot));

    let tip_case = if q_is_tip && r_is_tip {
        TipCase::TipTip
    } else if q_is_tip || r_is_tip {
        // canonicalise: q carries the tip
        if r_is_tip {
            std::mem::swap(&mut q_slot, &mut r_slot);
        }
        if !tree.slot_oriented(r_slot) || !partial {
            compute_traversal(tree, r_slot, partial, entries)?;
        }
        ensure_oriented(tree, r_slot)?;
        TipCase::TipInner
    } else {
        if !tree.slot_oriented(q_slot) || !partial {
            compute_traversal(tree, q_slot, partial, entries)?;
        }
        if !tree.slot_oriented(r_slot) || !partial {
            compute_traversal(tree, r_slot, partial, entries)?;
        }
        ensure_oriented(tree, q_slot)?;
        ensure_oriented(tree, r_slot)?;
        TipCase::InnerInner
    };

    tree.orient_toward(slot);

    let entry = TraversalEntry {
        p: tree.slot_node(slot),
        q: tree.slot_node(q_slot),
        r: tree.slot_node(r_slot),
        tip_case,
        qz: tree.z(q_slot).to_vec(),
        rz: tree.z(r_slot).to_vec(),
    };
    trace!("Descriptor entry: p={} q={} r={} ({:?})", entry.p, entry.q, entry.r, entry.tip_case);
    entries.push(entry);
    Ok(())
}

fn ensure_oriented(tree: &Tree, slot: usize) -> Result<(), TraversalError> {
    if tree.slot_oriented(slot) {
        Ok(())
    } else {
        Err(TraversalError::Disoriented { slot, node: tree.slot_node(slot) })
    }
}
