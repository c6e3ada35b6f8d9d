use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Epoch-level result of a metric, stored in `RunState::metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    /// Structured results, e.g. one value per class.
    Vector(Vec<f64>),
}

impl MetricValue {
    /// The scalar value, or `None` for structured results.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(value) => Some(*value),
            MetricValue::Vector(_) => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Scalar(value)
    }
}

impl From<Vec<f64>> for MetricValue {
    fn from(values: Vec<f64>) -> Self {
        MetricValue::Vector(values)
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Scalar(value) => write!(f, "{value:.6}"),
            MetricValue::Vector(values) => {
                let parts: Vec<String> = values.iter().map(|v| format!("{v:.6}")).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Failures raised by metric computations and by the best-metric tracker.
#[derive(Debug, Error, PartialEq)]
pub enum MetricError {
    #[error("metric `{0}` must have at least one example before it can be computed")]
    NotComputable(String),

    #[error("key metric `{0}` was not computed this epoch")]
    MissingKeyMetric(String),

    #[error("key metric `{0}` is not a scalar")]
    NonScalarKeyMetric(String),

    #[error("output shape mismatch: {predicted} predictions vs {expected} targets")]
    ShapeMismatch { predicted: usize, expected: usize },
}

/// A named computation fed once per iteration and reduced once per epoch.
///
/// The registry calls `reset` on `EPOCH_STARTED`, `update` on
/// `ITERATION_COMPLETED` with the latest output, and `compute` on
/// `EPOCH_COMPLETED`.
pub trait Metric<O> {
    fn reset(&mut self);

    fn update(&mut self, output: &O) -> anyhow::Result<()>;

    fn compute(&self) -> anyhow::Result<MetricValue>;
}

impl<O, M: Metric<O> + ?Sized> Metric<O> for Box<M> {
    fn reset(&mut self) {
        (**self).reset()
    }

    fn update(&mut self, output: &O) -> anyhow::Result<()> {
        (**self).update(output)
    }

    fn compute(&self) -> anyhow::Result<MetricValue> {
        (**self).compute()
    }
}

// ---------------------------------------------------------------------------
// Outputs understood by the built-in metrics
// ---------------------------------------------------------------------------

/// An iteration output carrying predictions and their targets, one
/// `(predicted, expected)` pair per sample.
pub trait PairedOutput {
    fn pairs(&self) -> Vec<(&[f64], &[f64])>;
}

/// The usual output of a supervised iteration on one sample.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted: Vec<f64>,
    pub expected: Vec<f64>,
    /// Loss reported by the iteration body, if it computed one.
    #[serde(default)]
    pub loss: Option<f64>,
}

impl Prediction {
    pub fn new(predicted: Vec<f64>, expected: Vec<f64>) -> Self {
        Prediction { predicted, expected, loss: None }
    }

    pub fn with_loss(mut self, loss: f64) -> Self {
        self.loss = Some(loss);
        self
    }
}

impl PairedOutput for Prediction {
    fn pairs(&self) -> Vec<(&[f64], &[f64])> {
        vec![(self.predicted.as_slice(), self.expected.as_slice())]
    }
}

impl PairedOutput for (Vec<f64>, Vec<f64>) {
    fn pairs(&self) -> Vec<(&[f64], &[f64])> {
        vec![(self.0.as_slice(), self.1.as_slice())]
    }
}

/// A mini-batch of outputs.
impl<T: PairedOutput> PairedOutput for Vec<T> {
    fn pairs(&self) -> Vec<(&[f64], &[f64])> {
        self.iter().flat_map(|sample| sample.pairs()).collect()
    }
}

/// Rejects a sample whose prediction and target lengths differ or are empty.
pub(crate) fn check_shapes(predicted: &[f64], expected: &[f64]) -> Result<(), MetricError> {
    if predicted.len() != expected.len() || predicted.is_empty() {
        return Err(MetricError::ShapeMismatch {
            predicted: predicted.len(),
            expected: expected.len(),
        });
    }
    Ok(())
}
