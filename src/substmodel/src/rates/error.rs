use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RateError {
    #[error("Γ shape parameter must be positive and finite, got {0}")]
    BadAlpha(f64),

    #[error("Category weights must be positive and sum to 1, got sum {sum}")]
    BadWeights { sum: f64 },

    #[error("A per-site rate model needs at least one category")]
    NoCategories,
}
