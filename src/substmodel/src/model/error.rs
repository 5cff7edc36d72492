use thiserror::Error;
use config::{DataType, ProtModel};

use crate::eigen::EigenError;
use crate::tipvector::TipVectorError;

#[derive(Error, Debug, PartialEq)]
pub enum ModelError {
    #[error("Eigen-decomposition spans {eigen} states, the partition's data type implies {data_type}")]
    StateMismatch { eigen: usize, data_type: usize },

    #[error("Protein model AUTO must be resolved to a concrete model before composition")]
    AutoUnresolved,

    #[error("The {0} family requires exactly four rate categories")]
    Lg4RateCount(ProtModel),

    #[error("The {0} family cannot run under per-site rate categories")]
    Lg4PerSiteRates(ProtModel),

    #[error("The {model} family only applies to amino-acid data, not {data_type}")]
    Lg4DataType { model: ProtModel, data_type: DataType },

    #[error("A single eigen-decomposition was supplied for the LG4 family {0}")]
    Lg4NeedsFourMatrices(ProtModel),

    #[error(transparent)]
    Eigen(#[from] EigenError),

    #[error(transparent)]
    TipVector(#[from] TipVectorError),
}
