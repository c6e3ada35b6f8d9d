pub(crate) mod best;
pub mod config;
pub mod error;
pub mod events;
pub mod iteration;
pub mod state;
pub mod workflow;

pub use config::{Device, WorkflowConfig};
pub use error::{ConfigError, WorkflowError};
pub use events::{Callback, Event, EventBus};
pub use iteration::{iteration_fn, split_samples, with_prepare_batch, Iteration, PreparedIteration};
pub use state::{FailureContext, RunState, RunSummary};
pub use workflow::{Workflow, WorkflowBuilder, WorkflowStatus};
