use thiserror::Error;
use config::DataType;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PomoError {
    #[error("Data type {0} does not carry allele-frequency states")]
    NotPomo(DataType),

    #[error("Site {site} of species '{species}' requires more than two alleles, \
        which the allele-frequency model cannot express")]
    TooManyAlleles { species: String, site: usize },

    #[error("Individual {individual} carries invalid DNA code {code} at site {site}")]
    InvalidDnaCode { individual: usize, site: usize, code: u8 },

    #[error("Species '{0}' lists no individuals")]
    EmptySpecies(String),

    #[error("Species '{species}' references individual {individual}, the matrix holds {count} rows")]
    UnknownIndividual { species: String, individual: usize, count: usize },
}
