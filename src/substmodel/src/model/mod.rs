//! Per-partition model composition.
//!
//! A [`PartitionModel`] bundles everything the kernel reads for one
//! partition: the eigen-decomposition (or four of them for the LG4
//! families), the tip-vector tables derived from it, and the rate
//! heterogeneity table. Composition validates the shape constraints the
//! kernel would otherwise have to assert in its hot path.

use config::{DataType, ProtModel};

use crate::eigen::EigenDecomp;
use crate::rates::RateModel;
use crate::tipvector::TipTable;

mod error;
pub use error::ModelError;

/// One eigen-decomposition, or four category-specific ones for LG4.
#[derive(Debug, Clone, PartialEq)]
pub enum EigenSet {
    Single(EigenDecomp),
    Lg4(Box<[EigenDecomp; 4]>),
}

impl EigenSet {
    /// State count shared by every decomposition in the set.
    #[must_use]
    pub fn states(&self) -> usize {
        match self {
            Self::Single(eigen) => eigen.states(),
            Self::Lg4(eigens)   => eigens[0].states(),
        }
    }

    /// The single decomposition of a non-LG4 partition.
    ///
    /// # Panics
    /// - when called on an LG4 set; the kernel dispatches on the variant
    ///   before reaching here.
    #[must_use]
    pub fn single(&self) -> &EigenDecomp {
        match self {
            Self::Single(eigen) => eigen,
            Self::Lg4(_) => panic!("LG4 partitions carry four decompositions"),
        }
    }
}

/// Immutable model data of one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionModel {
    pub data_type: DataType,
    pub eigen: EigenSet,
    /// One table per eigen-decomposition; empty for CLV-bearing tips.
    pub tip_tables: Vec<TipTable>,
    pub rates: RateModel,
}

impl PartitionModel {
    /// Compose a model, deriving the tip tables.
    ///
    /// # Errors
    /// - shape mismatches between the decomposition(s), data type and rate
    ///   table; an unresolved AUTO model; LG4 on non-AA data.
    pub fn new(
        data_type: DataType,
        prot_model: ProtModel,
        eigen: EigenSet,
        rates: RateModel,
    ) -> Result<Self, ModelError> {
        if prot_model == ProtModel::Auto {
            return Err(ModelError::AutoUnresolved)
        }
        if eigen.states() != data_type.states() {
            return Err(ModelError::StateMismatch {
                eigen: eigen.states(), data_type: data_type.states(),
            })
        }
        match &eigen {
            EigenSet::Lg4(_) => {
                if data_type != DataType::Aa {
                    return Err(ModelError::Lg4DataType { model: prot_model, data_type })
                }
                if rates.category_count() != 4 {
                    return Err(ModelError::Lg4RateCount(prot_model))
                }
                if rates.mode() == config::RateHet::Cat {
                    return Err(ModelError::Lg4PerSiteRates(prot_model))
                }
            }
            EigenSet::Single(_) if prot_model.is_lg4() => {
                return Err(ModelError::Lg4NeedsFourMatrices(prot_model))
            }
            EigenSet::Single(_) => {}
        }

        let tip_tables = if data_type.is_pomo() {
            Vec::new()
        } else {
            match &eigen {
                EigenSet::Single(decomp) => vec![TipTable::build(data_type, decomp)?],
                EigenSet::Lg4(decomps) => decomps.iter()
                    .map(|decomp| TipTable::build(data_type, decomp))
                    .collect::<Result<_, _>>()?,
            }
        };

        Ok(Self { data_type, eigen, tip_tables, rates })
    }

    /// Compose a general time-reversible model from frequencies and
    /// exchangeabilities.
    ///
    /// # Errors
    /// - see [`PartitionModel::new`] and [`EigenDecomp::from_gtr`].
    pub fn gtr(
        data_type: DataType,
        frequencies: &[f64],
        exchangeabilities: &[f64],
        rates: RateModel,
    ) -> Result<Self, ModelError> {
        let eigen = EigenDecomp::from_gtr(frequencies, exchangeabilities)?;
        Self::new(data_type, ProtModel::Gtr, EigenSet::Single(eigen), rates)
    }

    /// The Jukes-Cantor DNA model, mostly useful to exercise the kernel.
    ///
    /// # Errors
    /// - never in practice; the shape is correct by construction.
    pub fn jc69(rates: RateModel) -> Result<Self, ModelError> {
        Self::new(DataType::Dna, ProtModel::Gtr, EigenSet::Single(EigenDecomp::jc69()), rates)
    }

    /// The tip table of rate category `category` (LG4 tables differ per
    /// category; everything else shares table 0).
    #[must_use]
    pub fn tip_table(&self, category: usize) -> &TipTable {
        if self.tip_tables.len() == 1 {
            &self.tip_tables[0]
        } else {
            &self.tip_tables[category]
        }
    }

    #[must_use]
    pub fn states(&self) -> usize {
        self.data_type.states()
    }
}
