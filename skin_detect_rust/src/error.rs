use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while validating and planning a prediction run.
///
/// Every variant is detected before the first worker process is launched.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("worker budget must be at least 1")]
    ZeroWorkers,

    #[error("invalid worker count {0}: use -1 for one worker per physical core")]
    InvalidWorkers(i64),

    #[error("no datasets selected")]
    NoDatasets,

    #[error("dataset selected more than once: {0}")]
    DuplicateDataset(String),

    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("selected datasets contain no items to predict")]
    EmptyWorkload,

    #[error("cannot read dataset {name}: {source}")]
    DatasetUnreadable {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type PlanResult<T> = std::result::Result<T, PlanError>;
