use crate::metrics::metric::{check_shapes, Metric, MetricError, MetricValue, PairedOutput};

/// Fraction of samples classified correctly.
///
/// Multi-output samples match when the argmax of the prediction equals the
/// argmax of the target. Single-output samples are binary and are
/// thresholded at 0.5 on both sides.
#[derive(Debug, Clone, Default)]
pub struct Accuracy {
    correct: usize,
    total: usize,
}

impl Accuracy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<O: PairedOutput> Metric<O> for Accuracy {
    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }

    fn update(&mut self, output: &O) -> anyhow::Result<()> {
        for (predicted, expected) in output.pairs() {
            check_shapes(predicted, expected)?;
            let hit = if predicted.len() == 1 {
                (predicted[0] >= 0.5) == (expected[0] >= 0.5)
            } else {
                argmax(predicted) == argmax(expected)
            };
            self.correct += usize::from(hit);
            self.total += 1;
        }
        Ok(())
    }

    fn compute(&self) -> anyhow::Result<MetricValue> {
        if self.total == 0 {
            return Err(MetricError::NotComputable("accuracy".into()).into());
        }
        Ok(MetricValue::Scalar(self.correct as f64 / self.total as f64))
    }
}

/// Index of the maximum element in a slice.
fn argmax(v: &[f64]) -> usize {
    v.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}
