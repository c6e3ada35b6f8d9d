pub mod data;
pub mod engine;
pub mod handlers;
pub mod metrics;

// Convenience re-exports
pub use data::{DataSource, InMemoryDataSource, StreamSource};
pub use engine::{
    iteration_fn, with_prepare_batch, ConfigError, Device, Event, EventBus, Iteration, RunState,
    Workflow, WorkflowBuilder, WorkflowConfig, WorkflowError, WorkflowStatus,
};
pub use handlers::Handler;
pub use metrics::{Accuracy, LossType, MeanLoss, Metric, MetricValue, Prediction};
