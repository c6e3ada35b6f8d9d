use std::num::NonZeroUsize;

use anyhow::anyhow;
use tracing::{debug, error, info, warn};

use crate::data::DataSource;
use crate::engine::best::attach_best_metric_tracker;
use crate::engine::config::WorkflowConfig;
use crate::engine::error::{ConfigError, WorkflowError};
use crate::engine::events::{Event, EventBus};
use crate::engine::iteration::Iteration;
use crate::engine::state::{FailureContext, RunState};
use crate::handlers::Handler;
use crate::metrics::{Metric, MetricRegistry};

/// Where a workflow is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    /// Built, never run.
    Created,
    Running,
    /// The last run went through every epoch, or stopped on a terminate request.
    Completed,
    /// The last run ended with an error.
    Failed,
}

/// The run engine shared by trainers, validators and evaluators.
///
/// Owns the run state, the event bus, the data source and the iteration
/// body. `run()` drives `max_epochs` epochs of up to `epoch_length`
/// iterations each and fires the lifecycle events around every boundary:
///
/// ```text
/// STARTED
///   EPOCH_STARTED
///     ITERATION_STARTED, ITERATION_COMPLETED   (per batch)
///   EPOCH_COMPLETED
/// COMPLETED                                    (EXCEPTION_RAISED on failure)
/// ```
pub struct Workflow<B, O> {
    state: RunState<B, O>,
    bus: EventBus<B, O>,
    data: Box<dyn DataSource<Batch = B>>,
    step: Box<dyn Iteration<B, O>>,
    configured_epoch_length: Option<usize>,
    status: WorkflowStatus,
}

impl<B: 'static, O: 'static> Workflow<B, O> {
    /// Starts building a workflow over `data`, running `step` on every batch.
    pub fn builder<D, I>(config: WorkflowConfig, data: D, step: I) -> WorkflowBuilder<B, O>
    where
        D: DataSource<Batch = B> + 'static,
        I: Iteration<B, O> + 'static,
    {
        WorkflowBuilder {
            config,
            data: Box::new(data),
            step: Box::new(step),
            metrics: MetricRegistry::new(),
            handlers: Vec::new(),
            error: None,
        }
    }

    pub fn state(&self) -> &RunState<B, O> {
        &self.state
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    /// Registers a callback directly. Must be called before `run()`.
    pub fn on<F>(&mut self, event: Event, callback: F)
    where
        F: FnMut(&mut RunState<B, O>) -> anyhow::Result<()> + 'static,
    {
        self.bus.register(event, callback);
    }

    /// Registers a callback that fires on every `every`-th iteration or epoch.
    pub fn on_every<F>(&mut self, event: Event, every: NonZeroUsize, callback: F)
    where
        F: FnMut(&mut RunState<B, O>) -> anyhow::Result<()> + 'static,
    {
        self.bus.register_every(event, every, callback);
    }

    /// Executes one full run.
    ///
    /// Counters, output, batch and metrics are reset first; the best-metric
    /// bookkeeping carries over from earlier runs. On failure,
    /// `EXCEPTION_RAISED` is fired with `RunState::failure` set before the
    /// error is returned.
    pub fn run(&mut self) -> Result<(), WorkflowError> {
        let epoch_length = self
            .configured_epoch_length
            .or_else(|| self.data.len())
            .unwrap_or_default();
        self.state.reset_for_run(epoch_length);
        self.status = WorkflowStatus::Running;
        info!(
            max_epochs = self.state.max_epochs(),
            epoch_length,
            device = %self.state.device(),
            "workflow started"
        );

        match self.drive(epoch_length) {
            Ok(()) => {
                self.status = WorkflowStatus::Completed;
                info!(
                    epochs = self.state.epoch(),
                    iterations = self.state.iteration(),
                    terminated = self.state.terminated(),
                    "workflow completed"
                );
                Ok(())
            }
            Err(err) => {
                self.report_failure(&err);
                self.status = WorkflowStatus::Failed;
                Err(err)
            }
        }
    }

    fn drive(&mut self, epoch_length: usize) -> Result<(), WorkflowError> {
        let Workflow {
            state,
            bus,
            data,
            step,
            ..
        } = self;

        fire(bus, state, Event::Started)?;

        while state.epoch() < state.max_epochs() && !state.should_terminate() {
            state.begin_epoch();
            debug!(epoch = state.epoch(), "epoch started");
            fire(bus, state, Event::EpochStarted)?;

            let mut batches = data.batches(state.epoch()).take(epoch_length);
            while !state.should_terminate() {
                let Some(batch) = batches.next() else {
                    break;
                };
                state.batch = Some(batch);
                fire(bus, state, Event::IterationStarted)?;

                let result = match state.batch.as_ref() {
                    Some(batch) => step.iterate(state, batch),
                    None => Err(anyhow!(
                        "RunState::batch was cleared by an ITERATION_STARTED callback; callbacks may replace the batch but must leave it set"
                    )),
                };
                let output = result.map_err(|source| WorkflowError::Iteration {
                    epoch: state.epoch(),
                    iteration: state.iteration() + 1,
                    source,
                })?;
                state.complete_iteration(output);
                fire(bus, state, Event::IterationCompleted)?;
            }

            if state.should_terminate() {
                break;
            }
            fire(bus, state, Event::EpochCompleted)?;
        }

        if state.should_terminate() {
            state.mark_terminated();
            info!(epoch = state.epoch(), iteration = state.iteration(), "workflow terminated early");
        }
        fire(bus, state, Event::Completed)
    }

    fn report_failure(&mut self, err: &WorkflowError) {
        let event = match err {
            WorkflowError::Callback { event, .. } => Some(*event),
            WorkflowError::Iteration { .. } => None,
        };
        error!(error = %err, "workflow failed");
        self.state.failure = Some(FailureContext {
            event,
            epoch: self.state.epoch(),
            iteration: self.state.iteration(),
            message: err.to_string(),
        });
        if let Err(hook_err) = self.bus.fire(Event::ExceptionRaised, &mut self.state) {
            error!(error = %hook_err, "EXCEPTION_RAISED callback failed");
        }
    }
}

fn fire<B, O>(
    bus: &mut EventBus<B, O>,
    state: &mut RunState<B, O>,
    event: Event,
) -> Result<(), WorkflowError> {
    bus.fire(event, state).map_err(|source| WorkflowError::Callback {
        event,
        epoch: state.epoch(),
        iteration: state.iteration(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects the optional parts of a workflow. All validation happens in
/// `build()`, before any run.
pub struct WorkflowBuilder<B, O> {
    config: WorkflowConfig,
    data: Box<dyn DataSource<Batch = B>>,
    step: Box<dyn Iteration<B, O>>,
    metrics: MetricRegistry<O>,
    handlers: Vec<Box<dyn Handler<B, O>>>,
    error: Option<ConfigError>,
}

impl<B: 'static, O: 'static> WorkflowBuilder<B, O> {
    /// Sets the metric used for best-epoch selection. Higher is better.
    pub fn key_metric<M>(mut self, name: impl Into<String>, metric: M) -> Self
    where
        M: Metric<O> + 'static,
    {
        if self.error.is_none() {
            self.error = self.metrics.set_key_metric(name, metric).err();
        }
        self
    }

    /// Adds a metric computed alongside the key metric. Reusing a name
    /// replaces the earlier metric.
    pub fn additional_metric<M>(mut self, name: impl Into<String>, metric: M) -> Self
    where
        M: Metric<O> + 'static,
    {
        if self.error.is_none() {
            self.error = self.metrics.add(name, metric).err();
        }
        self
    }

    /// Appends a handler. Handlers attach in the order they are added.
    pub fn handler<H>(mut self, handler: H) -> Self
    where
        H: Handler<B, O> + 'static,
    {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn handlers(mut self, handlers: impl IntoIterator<Item = Box<dyn Handler<B, O>>>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    /// Validates the configuration and wires metrics, the best-metric tracker
    /// and handlers onto a fresh event bus, in that order.
    pub fn build(self) -> Result<Workflow<B, O>, ConfigError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.config.validate()?;
        if self.config.epoch_length.is_none() && self.data.len().is_none() {
            return Err(ConfigError::UnknownEpochLength);
        }
        if self.config.amp {
            warn!("mixed precision is not supported by the workflow engine; the amp flag is ignored");
        }

        let key_metric_name = self.metrics.key_metric_name().map(str::to_owned);
        let state = RunState::new(&self.config, key_metric_name);
        let mut bus = EventBus::new();
        self.metrics.attach(&mut bus);
        attach_best_metric_tracker(&mut bus);
        for handler in self.handlers {
            handler.attach(&mut bus);
        }

        Ok(Workflow {
            state,
            bus,
            data: self.data,
            step: self.step,
            configured_epoch_length: self.config.epoch_length,
            status: WorkflowStatus::Created,
        })
    }
}
