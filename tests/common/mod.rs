//! Shared builders for the end-to-end kernel scenarios.

use phylik::{
    assignment, Assignment, AlignmentStore, BinaryAlignment, DataType, EigenDecomp, PartitionMeta,
    TipData, Tree,
};

pub const A: u8 = 1;
pub const C: u8 = 2;
pub const G: u8 = 4;
pub const T: u8 = 8;
pub const N: u8 = 15;

/// Branch variable of an elapsed time t.
pub fn zvar(t: f64) -> f64 {
    (-t).exp()
}

/// A single-partition DNA alignment over the given per-taxon byte rows.
pub fn dna_alignment(taxa: &[&str], columns: Vec<Vec<u8>>, weights: Vec<i32>) -> BinaryAlignment {
    let width = columns[0].len();
    BinaryAlignment {
        taxa_names: taxa.iter().map(ToString::to_string).collect(),
        weights,
        partitions: vec![(
            PartitionMeta::new("dna", DataType::Dna, 0, width),
            TipData::Bytes(columns),
        )],
    }
}

/// Encode, balance over `workers`, decode the assigned windows.
pub fn in_memory_store(
    alignment: &BinaryAlignment,
    workers: usize,
) -> (AlignmentStore, Vec<Vec<Assignment>>) {
    let widths: Vec<usize> = alignment.partitions.iter().map(|(m, _)| m.full_width()).collect();
    let assignments = assignment::balance(&widths, workers);
    let flat: Vec<Assignment> = assignments.iter().flatten().copied().collect();
    let mut buf = Vec::new();
    alignment.encode(&mut buf).unwrap();
    (AlignmentStore::decode(&buf, &flat).unwrap(), assignments)
}

/// `π_a · P_ab(t)` under any reversible model, from the decomposition.
pub fn joint_prob(eigen: &EigenDecomp, a: usize, b: usize, t: f64) -> f64 {
    (0..eigen.states())
        .map(|j| eigen.ev_row(a)[j] * eigen.ev_row(b)[j] * (-eigen.eign[j] * t).exp())
        .sum()
}

/// The quartet ((0,1)4,(2,3)5) with the given pendant and internal times.
pub fn quartet(pendants: [f64; 4], internal: f64) -> Tree {
    let mut tree = Tree::new(4, 1).unwrap();
    tree.connect_nodes(0, 4, &[zvar(pendants[0])]).unwrap();
    tree.connect_nodes(1, 4, &[zvar(pendants[1])]).unwrap();
    tree.connect_nodes(2, 5, &[zvar(pendants[2])]).unwrap();
    tree.connect_nodes(3, 5, &[zvar(pendants[3])]).unwrap();
    tree.connect_nodes(4, 5, &[zvar(internal)]).unwrap();
    tree
}
