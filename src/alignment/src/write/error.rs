use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("Failed to create binary alignment {0}")]
    CreateFile(PathBuf, #[source] std::io::Error),

    #[error("I/O error while writing binary alignment")]
    Io(#[from] std::io::Error),

    #[error("Partitions must tile the pattern range: partition '{name}' starts at {lower}, expected {expected}")]
    NonContiguous { name: String, lower: usize, expected: usize },

    #[error("Partition '{name}' covers [{lower}, {upper}): an empty column range")]
    EmptyPartition { name: String, lower: usize, upper: usize },

    #[error("Partition '{name}' carries {rows} tip rows for {taxa} taxa")]
    RowCountMismatch { name: String, rows: usize, taxa: usize },

    #[error("Partition '{name}' tip row {row} holds {len} values, expected {expected}")]
    RowLengthMismatch { name: String, row: usize, len: usize, expected: usize },

    #[error("Partition '{name}' stores {got} frequencies for {states} states")]
    FrequencyCount { name: String, got: usize, states: usize },

    #[error("Weight vector holds {got} entries for {patterns} patterns")]
    WeightCount { got: usize, patterns: usize },

    #[error("Partition '{name}' is byte-coded but carries tip likelihood vectors (or vice versa)")]
    TipDataKind { name: String },
}
