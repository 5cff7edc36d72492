use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TraversalError {
    #[error("Slot {0} has no back branch: the tree is not fully connected")]
    UnlinkedSlot(usize),

    #[error("Traversal reached slot {slot} of node {node}, which should be oriented but is not")]
    Disoriented { slot: usize, node: usize },
}
