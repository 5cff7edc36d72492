use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Failed to open binary alignment {0}")]
    OpenFile(PathBuf, #[source] std::io::Error),

    #[error("Failed to memory-map binary alignment {0}")]
    Mmap(PathBuf, #[source] std::io::Error),

    #[error(
        "The alignment was produced on a host with {file}-byte addresses, \
        while this host uses {host}-byte addresses. \
        Re-run the parser on the hardware this engine runs on."
    )]
    WordSize { file: u32, host: u32 },

    #[error("Binary alignment version {file} does not match this reader's version {expected}. \
        Either the parser or this engine is outdated.")]
    Version { file: u32, expected: u32 },

    #[error("Bad magic number {found} (expected {expected}): this is not a binary alignment")]
    Magic { found: u32, expected: u32 },

    #[error("Unexpected end of file: needed {needed} bytes at position {at}, file holds {len}")]
    Truncated { at: usize, needed: usize, len: usize },

    #[error("Name at position {0} is not valid UTF-8")]
    BadName(usize, #[source] std::string::FromUtf8Error),

    #[error("Partition '{name}' declares {found} states, its data type implies {expected}")]
    StateCount { name: String, found: i32, expected: usize },

    #[error("Partition '{name}' declares zero states")]
    EmptyStates { name: String },

    #[error("Tip byte {code} of taxon {taxon} at pattern {pattern} is outside the alphabet of partition '{name}'")]
    InvalidTipState { name: String, taxon: usize, pattern: usize, code: u8 },

    #[error("Assignment {assignment} exceeds partition {partition}'s column range of width {full_width}")]
    BadAssignment { assignment: String, partition: usize, full_width: usize },

    #[error("Assignment names partition {partition}, the alignment holds {count}")]
    UnknownPartition { partition: usize, count: usize },

    #[error("Invalid code in partition metadata")]
    BadCode(#[from] config::ConfigError),
}
