use std::path::PathBuf;

use thiserror::Error;

use crate::engine::events::Event;

/// Invalid construction arguments. Raised by `WorkflowBuilder::build()` or by
/// config loading, before any run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid device `{0}` (expected `cpu`, `cuda` or `cuda:<index>`)")]
    InvalidDevice(String),

    #[error("max_epochs must be at least 1")]
    ZeroEpochs,

    #[error("epoch_length is not configured and the data source does not declare a length")]
    UnknownEpochLength,

    #[error("batch_size must be at least 1")]
    ZeroBatchSize,

    #[error("metric names must not be empty")]
    EmptyMetricName,

    #[error("only one key metric may be registered (got `{existing}` and `{rejected}`)")]
    DuplicateKeyMetric { existing: String, rejected: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A failure that escaped the run loop. `run()` returns it after
/// `EXCEPTION_RAISED` has been fired.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("iteration {iteration} of epoch {epoch} failed: {source}")]
    Iteration {
        epoch: usize,
        /// 1-based index of the failing iteration within the run.
        iteration: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("{event} callback failed at epoch {epoch} (iteration {iteration}): {source}")]
    Callback {
        event: Event,
        epoch: usize,
        iteration: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl WorkflowError {
    /// The underlying error raised by the iteration body, metric or handler.
    pub fn cause(&self) -> &anyhow::Error {
        match self {
            WorkflowError::Iteration { source, .. } => source,
            WorkflowError::Callback { source, .. } => source,
        }
    }
}
