use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::engine::events::{Event, EventBus};
use crate::handlers::Handler;

/// Terminates the run once `flag` is set from another thread.
///
/// The flag is checked at the start of every epoch and after every
/// iteration, so a stop takes effect at the next iteration boundary.
pub struct StopFlagHandler {
    flag: Arc<AtomicBool>,
}

impl StopFlagHandler {
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        StopFlagHandler { flag }
    }
}

impl<B: 'static, O: 'static> Handler<B, O> for StopFlagHandler {
    fn attach(self: Box<Self>, bus: &mut EventBus<B, O>) {
        for event in [Event::EpochStarted, Event::IterationCompleted] {
            let flag = Arc::clone(&self.flag);
            bus.register(event, move |state| {
                if flag.load(Ordering::Relaxed) && !state.should_terminate() {
                    info!(epoch = state.epoch(), iteration = state.iteration(), "stop flag set");
                    state.terminate();
                }
                Ok(())
            });
        }
    }
}
