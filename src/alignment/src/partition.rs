use config::{DataType, ProtModel};

/// Immutable per-partition metadata, as stored in the binary alignment.
///
/// A partition is a contiguous range `[lower, upper)` of pattern columns
/// sharing a data type and substitution-model family. The `width` field of
/// the on-disk record is a parse-time artifact: it is written as zero and
/// recomputed from the per-worker assignment at load time.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionMeta {
    pub name: String,
    pub data_type: DataType,
    pub lower: usize,
    pub upper: usize,
    pub prot_model: ProtModel,
    /// Use the empirical model's frequencies instead of the stored ones.
    pub prot_freqs: bool,
    /// The rate matrix is not constrained to general time-reversibility.
    pub non_gtr: bool,
    /// Base frequencies are to be optimized by the model collaborator. The
    /// kernel records the flag; it never acts on it.
    pub optimize_freqs: bool,
    /// Stationary state frequencies, length = `states()`.
    pub frequencies: Vec<f64>,
}

impl PartitionMeta {
    /// A metadata record with uniform frequencies and default model flags.
    #[must_use]
    pub fn new(name: &str, data_type: DataType, lower: usize, upper: usize) -> Self {
        let states = data_type.states();
        Self {
            name: name.to_string(),
            data_type,
            lower,
            upper,
            prot_model: ProtModel::default(),
            prot_freqs: false,
            non_gtr: false,
            optimize_freqs: false,
            frequencies: vec![1.0 / states as f64; states],
        }
    }

    /// Number of model states S.
    #[must_use]
    pub fn states(&self) -> usize {
        self.data_type.states()
    }

    /// Length of the tip-vector lookup table for byte-coded partitions.
    #[must_use]
    pub fn max_tip_states(&self) -> usize {
        self.data_type.max_tip_states()
    }

    /// Full column span of the partition.
    #[must_use]
    pub fn full_width(&self) -> usize {
        self.upper - self.lower
    }
}

/// Tip observations of one partition, either over the full column range
/// (writer side) or over a worker's assigned window (reader side).
#[derive(Debug, Clone, PartialEq)]
pub enum TipData {
    /// One byte code per site, one row per taxon: `bytes[taxon][site]`.
    Bytes(Vec<Vec<u8>>),
    /// Precomputed tip likelihood vectors, one row per species:
    /// `clvs[species][site * states + state]`.
    Clvs(Vec<Vec<f64>>),
}

impl TipData {
    /// Number of taxon (or species) rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        match self {
            Self::Bytes(rows) => rows.len(),
            Self::Clvs(rows)  => rows.len(),
        }
    }
}
