pub mod checkpoint;
pub mod early_stopping;
pub mod progress;
pub mod stats;
pub mod stop_flag;

pub use checkpoint::{Checkpoint, CheckpointSaver};
pub use early_stopping::EarlyStopping;
pub use progress::{EpochStats, ProgressHandler};
pub use stats::StatsHandler;
pub use stop_flag::StopFlagHandler;

use crate::engine::events::EventBus;

/// An external component that reacts to workflow events.
///
/// `attach` is called once, at workflow construction, in the order handlers
/// were given to the builder; it registers whatever callbacks the handler
/// needs. Callbacks read and mutate the run through the `RunState` they are
/// given, so the engine never depends on a handler's concrete type.
pub trait Handler<B, O> {
    fn attach(self: Box<Self>, bus: &mut EventBus<B, O>);
}
