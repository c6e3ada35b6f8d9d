use crate::metrics::loss_type::LossType;
use crate::metrics::metric::{check_shapes, Metric, MetricError, MetricValue, PairedOutput};

/// Mean per-sample loss over an epoch.
///
/// Lower is better, so it is normally registered as an additional metric
/// rather than as the key metric.
#[derive(Debug, Clone)]
pub struct MeanLoss {
    loss: LossType,
    sum: f64,
    count: usize,
}

impl MeanLoss {
    pub fn new(loss: LossType) -> Self {
        MeanLoss { loss, sum: 0.0, count: 0 }
    }

    pub fn loss_type(&self) -> LossType {
        self.loss
    }
}

impl<O: PairedOutput> Metric<O> for MeanLoss {
    fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }

    fn update(&mut self, output: &O) -> anyhow::Result<()> {
        for (predicted, expected) in output.pairs() {
            check_shapes(predicted, expected)?;
            self.sum += self.loss.sample_loss(predicted, expected);
            self.count += 1;
        }
        Ok(())
    }

    fn compute(&self) -> anyhow::Result<MetricValue> {
        if self.count == 0 {
            return Err(MetricError::NotComputable("mean_loss".into()).into());
        }
        Ok(MetricValue::Scalar(self.sum / self.count as f64))
    }
}
