use thiserror::Error;
use config::DataType;

#[derive(Error, Debug, PartialEq)]
pub enum TipVectorError {
    #[error("Data type {0} carries tip likelihood vectors, not byte codes")]
    CodedClvTips(DataType),

    #[error("Eigen-decomposition spans {eigen} states, the data type implies {data_type}")]
    StateMismatch { eigen: usize, data_type: usize },
}
