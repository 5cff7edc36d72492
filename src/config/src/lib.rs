//! Configuration surface of the likelihood kernel.
//!
//! Everything here is immutable for the lifetime of a tree computation: the
//! per-partition data types and substitution model families, the
//! rate-heterogeneity mode, and the engine-wide flags. Front ends may
//! deserialize a [`KernelConfig`] from YAML; the binary alignment format
//! stores [`DataType`] and [`ProtModel`] as integer codes.

use std::fmt::{self, Display, Formatter};
use std::path::Path;

use serde::{Serialize, Deserialize};
use located_error::*;
use log::debug;
use anyhow::Result;

mod error;
pub use error::ConfigError;

/// Tip encoding and state count of a partition.
///
/// Byte-coded types store one (possibly ambiguous) observation per site and
/// taxon; the polymorphism-aware types carry precomputed per-species tip
/// likelihood vectors instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "BINARY")]   Binary,
    #[serde(rename = "DNA")]      Dna,
    #[serde(rename = "AA")]       Aa,
    #[serde(rename = "MULTI_32")] Multi32,
    #[serde(rename = "CODON_64")] Codon64,
    #[serde(rename = "POMO_16")]  Pomo16,
    #[serde(rename = "POMO_64")]  Pomo64,
}

impl DataType {
    /// Number of model states S.
    #[must_use]
    pub const fn states(self) -> usize {
        match self {
            Self::Binary            => 2,
            Self::Dna               => 4,
            Self::Aa                => 20,
            Self::Multi32           => 32,
            Self::Codon64 | Self::Pomo64 => 64,
            Self::Pomo16            => 16,
        }
    }

    /// Length of the tip-vector lookup table (largest tip code + 1).
    /// Zero for CLV-bearing partitions, which have no byte codes.
    #[must_use]
    pub const fn max_tip_states(self) -> usize {
        match self {
            Self::Binary  => 4,
            Self::Dna     => 16,
            Self::Aa      => 23,
            Self::Multi32 => 33,
            Self::Codon64 => 65,
            Self::Pomo16 | Self::Pomo64 => 0,
        }
    }

    /// Byte code of the fully undetermined (gap) observation.
    #[must_use]
    pub const fn undetermined_code(self) -> Option<u8> {
        match self {
            Self::Binary  => Some(3),
            Self::Dna     => Some(15),
            Self::Aa      => Some(22),
            Self::Multi32 => Some(32),
            Self::Codon64 => Some(64),
            Self::Pomo16 | Self::Pomo64 => None,
        }
    }

    /// Does a tip byte decode to a state (or ambiguity) of this alphabet?
    #[must_use]
    pub fn valid_tip_code(self, code: u8) -> bool {
        match self {
            Self::Binary  => (1..=3).contains(&code),
            Self::Dna     => (1..=15).contains(&code),
            Self::Aa      => code <= 22,
            Self::Multi32 => code <= 32,
            Self::Codon64 => code <= 64,
            Self::Pomo16 | Self::Pomo64 => false,
        }
    }

    /// True for partitions whose tips carry conditional likelihood vectors
    /// rather than byte codes.
    #[must_use]
    pub const fn is_pomo(self) -> bool {
        matches!(self, Self::Pomo16 | Self::Pomo64)
    }

    /// Integer tag used by the binary alignment format.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Binary  => 0,
            Self::Dna     => 1,
            Self::Aa      => 2,
            Self::Multi32 => 3,
            Self::Codon64 => 4,
            Self::Pomo16  => 5,
            Self::Pomo64  => 6,
        }
    }

    /// Inverse of [`DataType::code`].
    pub fn from_code(code: i32) -> Result<Self, ConfigError> {
        Ok(match code {
            0 => Self::Binary,
            1 => Self::Dna,
            2 => Self::Aa,
            3 => Self::Multi32,
            4 => Self::Codon64,
            5 => Self::Pomo16,
            6 => Self::Pomo64,
            c => return Err(ConfigError::UnknownDataType(c)),
        })
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let name = match self {
            Self::Binary  => "BINARY",
            Self::Dna     => "DNA",
            Self::Aa      => "AA",
            Self::Multi32 => "MULTI_32",
            Self::Codon64 => "CODON_64",
            Self::Pomo16  => "POMO_16",
            Self::Pomo64  => "POMO_64",
        };
        name.fmt(f)
    }
}

/// Rate-across-sites model. Selects the number of per-site rate categories
/// within the conditional likelihood vectors: 4 under GAMMA, 1 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RateHet {
    #[serde(rename = "CAT")]   Cat,
    #[default]
    #[serde(rename = "GAMMA")] Gamma,
    #[serde(rename = "PLAIN")] Plain,
}

impl RateHet {
    /// Number of rate categories interleaved within a CLV row. Per-site
    /// category models keep a single slot; the category is chosen per site.
    #[must_use]
    pub const fn discrete_rate_count(self) -> usize {
        match self {
            Self::Gamma => 4,
            Self::Cat | Self::Plain => 1,
        }
    }
}

impl Display for RateHet {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Cat   => "CAT".fmt(f),
            Self::Gamma => "GAMMA".fmt(f),
            Self::Plain => "PLAIN".fmt(f),
        }
    }
}

/// Which immutable amino-acid rate-matrix data a partition uses.
///
/// `Gtr` stands for a partition-specific general time-reversible matrix
/// composed by the caller; the empirical families select published tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProtModel {
    #[serde(rename = "JTT")]  Jtt,
    #[serde(rename = "WAG")]  Wag,
    #[default]
    #[serde(rename = "LG")]   Lg,
    #[serde(rename = "LG4M")] Lg4m,
    #[serde(rename = "LG4X")] Lg4x,
    #[serde(rename = "AUTO")] Auto,
    #[serde(rename = "GTR")]  Gtr,
}

impl ProtModel {
    /// The LG4 families carry four category-specific rate matrices.
    #[must_use]
    pub const fn is_lg4(self) -> bool {
        matches!(self, Self::Lg4m | Self::Lg4x)
    }

    /// Integer tag used by the binary alignment format.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Jtt  => 0,
            Self::Wag  => 1,
            Self::Lg   => 2,
            Self::Lg4m => 3,
            Self::Lg4x => 4,
            Self::Auto => 5,
            Self::Gtr  => 6,
        }
    }

    /// Inverse of [`ProtModel::code`].
    pub fn from_code(code: i32) -> Result<Self, ConfigError> {
        Ok(match code {
            0 => Self::Jtt,
            1 => Self::Wag,
            2 => Self::Lg,
            3 => Self::Lg4m,
            4 => Self::Lg4x,
            5 => Self::Auto,
            6 => Self::Gtr,
            c => return Err(ConfigError::UnknownProtModel(c)),
        })
    }
}

impl Display for ProtModel {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let name = match self {
            Self::Jtt  => "JTT",
            Self::Wag  => "WAG",
            Self::Lg   => "LG",
            Self::Lg4m => "LG4M",
            Self::Lg4x => "LG4X",
            Self::Auto => "AUTO",
            Self::Gtr  => "GTR",
        };
        name.fmt(f)
    }
}

/// Engine-wide configuration, immutable once the engine is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Rate-across-sites model shared by every partition.
    pub rate_het: RateHet,

    /// One branch length per partition instead of a single shared length.
    pub per_partition_branch_lengths: bool,

    /// Enable gap sidecars and compressed conditional likelihood vectors.
    pub save_memory: bool,

    /// Upper bound on per-site rate categories under CAT.
    pub max_rate_categories: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            rate_het: RateHet::default(),
            per_partition_branch_lengths: false,
            save_memory: false,
            max_rate_categories: 25,
        }
    }
}

impl KernelConfig {
    /// Deserialize a config from a YAML file.
    ///
    /// # Errors
    /// - when the file cannot be opened, or its contents fail to
    ///   deserialize into a valid [`KernelConfig`].
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_loc(|| format!("Failed to open config file {path:?}"))?;
        let config: Self = serde_yaml::from_reader(file)
            .with_loc(|| format!("Failed to deserialize config file {path:?}"))?;
        config.validate()?;
        debug!("Loaded kernel configuration from {path:?}: {config:?}");
        Ok(config)
    }

    /// Reject globally inconsistent settings.
    ///
    /// # Errors
    /// - [`ConfigError::NoRateCategories`] when `max_rate_categories` is 0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rate_categories == 0 {
            return Err(ConfigError::NoRateCategories)
        }
        Ok(())
    }

    /// Reject illegal (data type, protein model) combinations for a
    /// partition running under this configuration.
    ///
    /// # Errors
    /// - the LG4 families with memory saving or automatic model selection;
    /// - polymorphism-aware partitions with memory saving or CAT.
    pub fn validate_partition(&self, data_type: DataType, prot_model: ProtModel) -> Result<(), ConfigError> {
        if prot_model.is_lg4() && self.save_memory {
            return Err(ConfigError::Lg4SaveMemory)
        }
        if data_type.is_pomo() {
            if self.save_memory {
                return Err(ConfigError::PomoSaveMemory)
            }
            if self.rate_het == RateHet::Cat {
                return Err(ConfigError::PomoCat)
            }
        }
        Ok(())
    }
}
