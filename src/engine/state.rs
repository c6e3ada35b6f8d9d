use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::config::{Device, WorkflowConfig};
use crate::engine::events::Event;
use crate::metrics::MetricValue;

/// Where and why a run failed. Set just before `EXCEPTION_RAISED` fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Event whose callbacks failed, or `None` when the iteration body failed.
    pub event: Option<Event>,
    pub epoch: usize,
    /// Completed iterations when the failure happened.
    pub iteration: usize,
    pub message: String,
}

/// The single mutable record shared by the engine, its metrics and its
/// handlers.
///
/// Every callback receives `&mut RunState` for the duration of the call.
/// Fields fixed at construction (seed, device, amp, key metric name, epoch
/// bounds) and the loop counters are private and read through getters; the
/// per-iteration data and the metric bookkeeping are public.
pub struct RunState<B, O> {
    seed: u64,
    iteration: usize,
    epoch: usize,
    max_epochs: usize,
    epoch_length: Option<usize>,
    device: Device,
    amp: bool,
    key_metric_name: Option<String>,
    should_terminate: bool,
    terminated: bool,

    /// Result of the most recent iteration.
    pub output: Option<O>,
    /// Batch currently (or most recently) fed to the iteration body.
    ///
    /// `ITERATION_STARTED` callbacks may replace it (the iteration body sees
    /// the replacement) but must not take it: a missing batch fails the
    /// iteration.
    pub batch: Option<B>,
    /// Epoch-level metric results, overwritten every epoch.
    pub metrics: BTreeMap<String, MetricValue>,
    /// Best key metric value seen so far.
    pub best_metric: f64,
    /// Epoch at which `best_metric` was reached.
    pub best_metric_epoch: Option<usize>,
    /// Populated while `EXCEPTION_RAISED` callbacks run.
    pub failure: Option<FailureContext>,
}

impl<B, O> RunState<B, O> {
    pub(crate) fn new(config: &WorkflowConfig, key_metric_name: Option<String>) -> Self {
        RunState {
            seed: config.seed,
            iteration: 0,
            epoch: 0,
            max_epochs: config.max_epochs,
            epoch_length: config.epoch_length,
            device: config.device,
            amp: config.amp,
            key_metric_name,
            should_terminate: false,
            terminated: false,
            output: None,
            batch: None,
            metrics: BTreeMap::new(),
            best_metric: config.initial_best_metric,
            best_metric_epoch: None,
            failure: None,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Completed iterations in the current run, across all epochs.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Current epoch, 1-based; 0 before the first epoch starts.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn max_epochs(&self) -> usize {
        self.max_epochs
    }

    /// Iterations per epoch. Always `Some` once `STARTED` has fired.
    pub fn epoch_length(&self) -> Option<usize> {
        self.epoch_length
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Mixed-precision flag. Carried for iteration bodies; the engine ignores it.
    pub fn amp(&self) -> bool {
        self.amp
    }

    pub fn key_metric_name(&self) -> Option<&str> {
        self.key_metric_name.as_deref()
    }

    /// Scalar value of `name` in the current epoch's metrics.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(MetricValue::as_scalar)
    }

    /// Asks the engine to stop at the next iteration boundary. The epoch in
    /// progress does not fire `EPOCH_COMPLETED`; `COMPLETED` still fires.
    pub fn terminate(&mut self) {
        self.should_terminate = true;
    }

    pub fn should_terminate(&self) -> bool {
        self.should_terminate
    }

    /// Whether the last run stopped early on a terminate request.
    pub fn terminated(&self) -> bool {
        self.terminated
    }

    /// Serializable snapshot of the progress and metric bookkeeping.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            epoch: self.epoch,
            max_epochs: self.max_epochs,
            iteration: self.iteration,
            metrics: self.metrics.clone(),
            key_metric_name: self.key_metric_name.clone(),
            best_metric: self.best_metric,
            best_metric_epoch: self.best_metric_epoch,
        }
    }

    // -----------------------------------------------------------------------
    // Engine-side mutation
    // -----------------------------------------------------------------------

    pub(crate) fn reset_for_run(&mut self, epoch_length: usize) {
        self.iteration = 0;
        self.epoch = 0;
        self.epoch_length = Some(epoch_length);
        self.should_terminate = false;
        self.terminated = false;
        self.output = None;
        self.batch = None;
        self.metrics.clear();
        self.failure = None;
    }

    pub(crate) fn begin_epoch(&mut self) {
        self.epoch += 1;
    }

    pub(crate) fn complete_iteration(&mut self, output: O) {
        self.output = Some(output);
        self.iteration += 1;
    }

    pub(crate) fn mark_terminated(&mut self) {
        self.terminated = true;
    }
}

/// Plain-data view of a `RunState`, used by checkpoints and progress reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub epoch: usize,
    pub max_epochs: usize,
    pub iteration: usize,
    pub metrics: BTreeMap<String, MetricValue>,
    pub key_metric_name: Option<String>,
    pub best_metric: f64,
    pub best_metric_epoch: Option<usize>,
}
