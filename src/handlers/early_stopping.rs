use std::cell::Cell;
use std::num::NonZeroUsize;
use std::rc::Rc;

use anyhow::anyhow;
use tracing::{debug, info};

use crate::engine::events::{Event, EventBus};
use crate::handlers::Handler;

/// Terminates the run when a metric stops improving.
///
/// After every epoch the watched metric (the key metric unless another name
/// is given) is compared with the best value seen by this handler. A value
/// counts as an improvement only if it exceeds the best by more than
/// `min_delta`; after `patience` epochs in a row without one the run is
/// terminated. The count starts over with every run.
pub struct EarlyStopping {
    patience: NonZeroUsize,
    min_delta: f64,
    metric: Option<String>,
}

impl EarlyStopping {
    pub fn new(patience: NonZeroUsize) -> Self {
        EarlyStopping {
            patience,
            min_delta: 0.0,
            metric: None,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta.abs();
        self
    }

    /// Watches `name` instead of the key metric.
    pub fn on_metric(mut self, name: impl Into<String>) -> Self {
        self.metric = Some(name.into());
        self
    }
}

impl<B: 'static, O: 'static> Handler<B, O> for EarlyStopping {
    fn attach(self: Box<Self>, bus: &mut EventBus<B, O>) {
        let EarlyStopping {
            patience,
            min_delta,
            metric,
        } = *self;
        // (best value seen, epochs since it was seen), per run
        let progress: Rc<Cell<(Option<f64>, usize)>> = Rc::new(Cell::new((None, 0)));

        let resetting = Rc::clone(&progress);
        bus.register(Event::Started, move |_| {
            resetting.set((None, 0));
            Ok(())
        });

        bus.register(Event::EpochCompleted, move |state| {
            let name = metric
                .as_deref()
                .or(state.key_metric_name())
                .ok_or_else(|| anyhow!("early stopping needs a key metric or an explicit metric name"))?;
            let value = state
                .metric(name)
                .ok_or_else(|| anyhow!("early stopping metric `{name}` has no scalar value"))?;

            let stale_epochs = match progress.get() {
                (Some(best), stale) if value <= best + min_delta => {
                    let stale = stale + 1;
                    progress.set((Some(best), stale));
                    debug!(metric = name, value, stale_epochs = stale, "no improvement");
                    stale
                }
                _ => {
                    progress.set((Some(value), 0));
                    0
                }
            };

            if stale_epochs >= patience.get() {
                info!(metric = name, epoch = state.epoch(), stale_epochs, "early stopping");
                state.terminate();
            }
            Ok(())
        });
    }
}
