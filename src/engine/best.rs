use tracing::info;

use crate::engine::events::{Event, EventBus};
use crate::engine::state::RunState;
use crate::metrics::MetricError;

/// Registers the best-metric bookkeeping on `EPOCH_COMPLETED`.
///
/// Must be attached after the metric registry so the key metric has already
/// been computed for the epoch when this callback reads it. Improvement is
/// strict: an equal value keeps the earlier epoch.
pub(crate) fn attach_best_metric_tracker<B: 'static, O: 'static>(bus: &mut EventBus<B, O>) {
    bus.register(Event::EpochCompleted, update_best_metric::<B, O>);
}

fn update_best_metric<B, O>(state: &mut RunState<B, O>) -> anyhow::Result<()> {
    let Some(name) = state.key_metric_name() else {
        return Ok(());
    };
    let value = state
        .metrics
        .get(name)
        .ok_or_else(|| MetricError::MissingKeyMetric(name.to_string()))?
        .as_scalar()
        .ok_or_else(|| MetricError::NonScalarKeyMetric(name.to_string()))?;

    if value > state.best_metric {
        info!(metric = name, value, epoch = state.epoch(), "got new best metric");
        state.best_metric = value;
        state.best_metric_epoch = Some(state.epoch());
    }
    Ok(())
}
