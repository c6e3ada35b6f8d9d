use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::mpsc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::events::{Event, EventBus};
use crate::handlers::Handler;
use crate::metrics::MetricValue;

/// Per-epoch progress report sent by `ProgressHandler`.
///
/// Receivers (a UI thread, an SSE stream, a test) use this to drive live
/// charts and progress indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Total epochs requested for this run.
    pub total_epochs: usize,
    /// Iterations executed during this epoch.
    pub iterations: usize,
    /// Metrics computed at the end of this epoch.
    pub metrics: BTreeMap<String, MetricValue>,
    /// Best key metric so far; `None` when no key metric is configured.
    pub best_metric: Option<f64>,
    pub best_metric_epoch: Option<usize>,
    /// Wall-clock duration of this single epoch in milliseconds.
    pub elapsed_ms: u64,
}

/// Sends one `EpochStats` per completed epoch over a channel.
///
/// If the receiver has been dropped the run is terminated at the next
/// iteration boundary (clean shutdown on client disconnect).
pub struct ProgressHandler {
    tx: mpsc::Sender<EpochStats>,
}

impl ProgressHandler {
    pub fn new(tx: mpsc::Sender<EpochStats>) -> Self {
        ProgressHandler { tx }
    }

    /// Creates a handler together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::Receiver<EpochStats>) {
        let (tx, rx) = mpsc::channel();
        (ProgressHandler { tx }, rx)
    }
}

impl<B: 'static, O: 'static> Handler<B, O> for ProgressHandler {
    fn attach(self: Box<Self>, bus: &mut EventBus<B, O>) {
        // (start time, iteration counter) of the epoch in progress
        let epoch_start = Rc::new(Cell::new((Instant::now(), 0usize)));

        let marker = Rc::clone(&epoch_start);
        bus.register(Event::EpochStarted, move |state| {
            marker.set((Instant::now(), state.iteration()));
            Ok(())
        });

        let tx = self.tx;
        bus.register(Event::EpochCompleted, move |state| {
            let (started_at, first_iteration) = epoch_start.get();
            let keyed = state.key_metric_name().is_some();
            let stats = EpochStats {
                epoch: state.epoch(),
                total_epochs: state.max_epochs(),
                iterations: state.iteration() - first_iteration,
                metrics: state.metrics.clone(),
                best_metric: keyed.then_some(state.best_metric),
                best_metric_epoch: state.best_metric_epoch,
                elapsed_ms: started_at.elapsed().as_millis() as u64,
            };
            if tx.send(stats).is_err() {
                warn!(epoch = state.epoch(), "progress receiver dropped; terminating run");
                state.terminate();
            }
            Ok(())
        });
    }
}
