use std::fmt;
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::engine::state::RunState;

/// Lifecycle points at which callbacks run, in the order a run reaches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    Started,
    EpochStarted,
    IterationStarted,
    IterationCompleted,
    EpochCompleted,
    Completed,
    ExceptionRaised,
}

impl Event {
    pub const ALL: [Event; 7] = [
        Event::Started,
        Event::EpochStarted,
        Event::IterationStarted,
        Event::IterationCompleted,
        Event::EpochCompleted,
        Event::Completed,
        Event::ExceptionRaised,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Event::Started => "STARTED",
            Event::EpochStarted => "EPOCH_STARTED",
            Event::IterationStarted => "ITERATION_STARTED",
            Event::IterationCompleted => "ITERATION_COMPLETED",
            Event::EpochCompleted => "EPOCH_COMPLETED",
            Event::Completed => "COMPLETED",
            Event::ExceptionRaised => "EXCEPTION_RAISED",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered reaction to an event. Receives the run state by mutable
/// reference; an `Err` stops dispatch and fails the run.
pub type Callback<B, O> = Box<dyn FnMut(&mut RunState<B, O>) -> anyhow::Result<()>>;

/// Ordered callback tables, one per event kind.
///
/// Callbacks for the same event run synchronously in registration order.
/// There is no de-duplication and no way to cancel a dispatch once it has
/// started.
pub struct EventBus<B, O> {
    tables: [Vec<Callback<B, O>>; 7],
}

impl<B, O> Default for EventBus<B, O> {
    fn default() -> Self {
        EventBus {
            tables: std::array::from_fn(|_| Vec::new()),
        }
    }
}

impl<B, O> EventBus<B, O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `callback` to the table for `event`.
    pub fn register<F>(&mut self, event: Event, callback: F)
    where
        F: FnMut(&mut RunState<B, O>) -> anyhow::Result<()> + 'static,
    {
        self.tables[event.index()].push(Box::new(callback));
    }

    /// Like `register`, but only fires on every `every`-th occurrence.
    ///
    /// Iteration events are filtered on `RunState::iteration()`, epoch events
    /// on `RunState::epoch()`; the once-per-run events are not filtered.
    pub fn register_every<F>(&mut self, event: Event, every: NonZeroUsize, mut callback: F)
    where
        B: 'static,
        O: 'static,
        F: FnMut(&mut RunState<B, O>) -> anyhow::Result<()> + 'static,
    {
        let every = every.get();
        self.register(event, move |state| {
            let counter = match event {
                Event::IterationStarted => state.iteration() + 1,
                Event::IterationCompleted => state.iteration(),
                Event::EpochStarted | Event::EpochCompleted => state.epoch(),
                _ => return callback(state),
            };
            if counter % every == 0 {
                callback(state)
            } else {
                Ok(())
            }
        });
    }

    /// Runs every callback registered for `event`, stopping at the first error.
    pub fn fire(&mut self, event: Event, state: &mut RunState<B, O>) -> anyhow::Result<()> {
        for callback in self.tables[event.index()].iter_mut() {
            callback(state)?;
        }
        Ok(())
    }

    /// Number of callbacks registered for `event`.
    pub fn len(&self, event: Event) -> usize {
        self.tables[event.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(Vec::is_empty)
    }
}
