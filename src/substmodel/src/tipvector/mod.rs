//! Tip-vector lookup tables.
//!
//! A byte-coded tip observation indexes a per-partition table whose row is
//! the eigen-projection of the (possibly ambiguous) state indicator: the sum
//! of `ev` rows over every state the code is compatible with. Multiplying a
//! row by the P-matrix products of the kernel is then exactly the
//! propagation of an observed tip across its pendant branch.

use config::DataType;

use crate::eigen::EigenDecomp;

mod error;
pub use error::TipVectorError;

/// Lookup table from tip byte codes to state-probability rows of length S.
/// Row 0 is only meaningful for data types whose code 0 denotes a state.
#[derive(Debug, Clone, PartialEq)]
pub struct TipTable {
    states: usize,
    rows: Vec<f64>,
}

impl TipTable {
    /// Build the table for `data_type` over an eigen-decomposition.
    ///
    /// # Errors
    /// - [`TipVectorError::CodedClvTips`] for CLV-bearing data types, which
    ///   have no byte codes;
    /// - [`TipVectorError::StateMismatch`] when the decomposition's
    ///   dimension differs from the data type's.
    pub fn build(data_type: DataType, eigen: &EigenDecomp) -> Result<Self, TipVectorError> {
        if data_type.is_pomo() {
            return Err(TipVectorError::CodedClvTips(data_type))
        }
        let states = data_type.states();
        if eigen.states() != states {
            return Err(TipVectorError::StateMismatch {
                eigen: eigen.states(), data_type: states,
            })
        }

        let codes = data_type.max_tip_states();
        let mut rows = vec![0.0; codes * states];
        for code in 0..codes {
            let row = &mut rows[code * states..(code + 1) * states];
            for state in compatible_states(data_type, code as u8) {
                for (entry, &ev) in row.iter_mut().zip(eigen.ev_row(state)) {
                    *entry += ev;
                }
            }
        }
        Ok(Self { states, rows })
    }

    /// The state-probability row a tip byte denotes.
    #[must_use]
    pub fn row(&self, code: u8) -> &[f64] {
        &self.rows[code as usize * self.states..(code as usize + 1) * self.states]
    }

    #[must_use]
    pub fn states(&self) -> usize {
        self.states
    }
}

/// The model states a tip byte is compatible with. Invalid codes (caught at
/// alignment load time) yield an empty set and an all-zero table row.
fn compatible_states(data_type: DataType, code: u8) -> Vec<usize> {
    let states = data_type.states();
    match data_type {
        DataType::Binary | DataType::Dna => {
            (0..states).filter(|s| code & (1 << s) != 0).collect()
        }
        DataType::Aa => match code {
            0..=19 => vec![code as usize],
            20     => vec![2, 3],  // B: asparagine or aspartate
            21     => vec![5, 6],  // Z: glutamine or glutamate
            22     => (0..20).collect(),
            _      => vec![],
        },
        DataType::Multi32 | DataType::Codon64 => {
            if (code as usize) < states {
                vec![code as usize]
            } else if code as usize == states {
                (0..states).collect()
            } else {
                vec![]
            }
        }
        DataType::Pomo16 | DataType::Pomo64 => vec![],
    }
}
