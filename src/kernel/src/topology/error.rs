use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TopologyError {
    #[error("A tree needs at least two tips, got {0}")]
    TooFewTips(usize),

    #[error("Branch carries {got} lengths, the tree stores {expected} per branch")]
    BranchDim { expected: usize, got: usize },

    #[error("Slot {0} is already connected")]
    AlreadyConnected(usize),

    #[error("Slot {0} has no branch behind it")]
    Unconnected(usize),

    #[error("Node {0} has no free slot left")]
    NoFreeSlot(usize),

    #[error("Slot {slot} is out of range for {slots} slots")]
    SlotRange { slot: usize, slots: usize },

    #[error("Node {node} is out of range for {nodes} nodes")]
    NodeRange { node: usize, nodes: usize },
}
