use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown data type code '{0}' in binary alignment")]
    UnknownDataType(i32),

    #[error("Unknown protein model code '{0}' in binary alignment")]
    UnknownProtModel(i32),

    #[error("LG4 protein models cannot run with memory saving enabled")]
    Lg4SaveMemory,

    #[error("Polymorphism-aware partitions cannot run with memory saving enabled")]
    PomoSaveMemory,

    #[error("Polymorphism-aware partitions require the GAMMA or PLAIN model of rate heterogeneity")]
    PomoCat,

    #[error("The maximum number of per-site rate categories must be strictly positive")]
    NoRateCategories,
}
