use thiserror::Error;
use config::{DataType, RateHet};

#[derive(Error, Debug, PartialEq)]
pub enum EngineError {
    #[error("The tree spans {tree} tips, the alignment stores {alignment} taxa")]
    TaxaMismatch { tree: usize, alignment: usize },

    #[error("{models} partition models supplied for {partitions} partitions")]
    ModelCount { models: usize, partitions: usize },

    #[error("Partition {partition}: model composed for {model}, alignment stores {alignment}")]
    DataTypeMismatch { partition: usize, model: DataType, alignment: DataType },

    #[error("Partition {partition}: rate model is {model}, the engine runs under {config}")]
    RateModeMismatch { partition: usize, model: RateHet, config: RateHet },

    #[error("Partition {partition}: {categories} rate categories exceed the configured maximum of {max}")]
    TooManyCategories { partition: usize, categories: usize, max: usize },

    #[error("Nodes {0} and {1} do not share a branch")]
    NotABranch(usize, usize),

    #[error("At least one worker thread is required")]
    NoWorkers,

    #[error("The tree stores {tree} lengths per branch; {expected} are required")]
    BranchCount { tree: usize, expected: usize },

    #[error("Alignment block {index} does not match its assignment \
        (partition {expected_partition} [{expected_offset}, +{expected_width}))")]
    BlockMismatch { index: usize, expected_partition: usize, expected_offset: usize, expected_width: usize },

    #[error("Partition {partition}: site category index {index} outside the {categories}-category table")]
    SiteCategoryRange { partition: usize, index: usize, categories: usize },

    #[error("Partition {partition}: {got} site categories supplied for {expected} columns")]
    SiteCategoryLength { partition: usize, got: usize, expected: usize },

    #[error("Partition {partition} is out of range for {count} partitions")]
    PartitionRange { partition: usize, count: usize },

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}
