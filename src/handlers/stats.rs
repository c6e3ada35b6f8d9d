use std::num::NonZeroUsize;

use tracing::{error, info};

use crate::engine::events::{Event, EventBus};
use crate::handlers::Handler;
use crate::metrics::Prediction;

type OutputTransform<O> = Box<dyn Fn(&O) -> Option<f64>>;

/// Structured logging of run progress through `tracing`.
///
/// Logs run start and end, the epoch metrics and best-metric bookkeeping
/// after every epoch, any failure, and optionally a per-iteration loss
/// extracted from the output.
pub struct StatsHandler<O> {
    name: String,
    loss_every: NonZeroUsize,
    output_transform: Option<OutputTransform<O>>,
}

impl<O> StatsHandler<O> {
    pub fn new(name: impl Into<String>) -> Self {
        StatsHandler {
            name: name.into(),
            loss_every: NonZeroUsize::MIN,
            output_transform: None,
        }
    }

    /// Logs the value `transform` extracts from every output as the iteration
    /// loss.
    pub fn with_output_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&O) -> Option<f64> + 'static,
    {
        self.output_transform = Some(Box::new(transform));
        self
    }

    /// Only logs the iteration loss every `every` iterations.
    pub fn every(mut self, every: NonZeroUsize) -> Self {
        self.loss_every = every;
        self
    }
}

impl StatsHandler<Prediction> {
    /// Logs `Prediction::loss` as the iteration loss.
    pub fn with_prediction_loss(self) -> Self {
        self.with_output_transform(|prediction: &Prediction| prediction.loss)
    }
}

impl<B: 'static, O: 'static> Handler<B, O> for StatsHandler<O> {
    fn attach(self: Box<Self>, bus: &mut EventBus<B, O>) {
        let StatsHandler {
            name,
            loss_every,
            output_transform,
        } = *self;

        let started = name.clone();
        bus.register(Event::Started, move |state| {
            info!(
                workflow = %started,
                max_epochs = state.max_epochs(),
                epoch_length = state.epoch_length().unwrap_or_default(),
                "run started"
            );
            Ok(())
        });

        if let Some(transform) = output_transform {
            let iterating = name.clone();
            bus.register_every(Event::IterationCompleted, loss_every, move |state| {
                if let Some(loss) = state.output.as_ref().and_then(|output| transform(output)) {
                    info!(
                        workflow = %iterating,
                        epoch = state.epoch(),
                        iteration = state.iteration(),
                        loss,
                        "iteration completed"
                    );
                }
                Ok(())
            });
        }

        let epoch_name = name.clone();
        bus.register(Event::EpochCompleted, move |state| {
            for (metric, value) in &state.metrics {
                info!(
                    workflow = %epoch_name,
                    epoch = state.epoch(),
                    metric = %metric,
                    value = %value,
                    "epoch metric"
                );
            }
            if let Some(key) = state.key_metric_name() {
                info!(
                    workflow = %epoch_name,
                    key_metric = key,
                    best_metric = state.best_metric,
                    best_metric_epoch = ?state.best_metric_epoch,
                    "best so far"
                );
            }
            Ok(())
        });

        let completed = name.clone();
        bus.register(Event::Completed, move |state| {
            info!(
                workflow = %completed,
                epochs = state.epoch(),
                iterations = state.iteration(),
                terminated = state.terminated(),
                "run completed"
            );
            Ok(())
        });

        bus.register(Event::ExceptionRaised, move |state| {
            if let Some(failure) = &state.failure {
                error!(
                    workflow = %name,
                    epoch = failure.epoch,
                    iteration = failure.iteration,
                    message = %failure.message,
                    "run failed"
                );
            }
            Ok(())
        });
    }
}
