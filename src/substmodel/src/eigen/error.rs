use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum EigenError {
    #[error("Expected {expected} exchangeabilities for {states} states, got {got}")]
    ExchangeabilityCount { states: usize, expected: usize, got: usize },

    #[error("Expected {states} frequencies, got {got}")]
    FrequencyCount { states: usize, got: usize },

    #[error("State frequency {value} at index {index} is not a probability")]
    BadFrequency { index: usize, value: f64 },

    #[error("Rate matrix diagonalisation did not converge after {0} sweeps")]
    NoConvergence(usize),
}
