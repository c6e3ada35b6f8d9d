#![allow(dead_code)]

use ferrite_flow::{iteration_fn, Metric, MetricValue, RunState};

/// Reports a predefined value per epoch, ignoring the outputs.
pub struct ScriptedMetric {
    values: Vec<f64>,
    epoch: usize,
}

impl ScriptedMetric {
    pub fn new(values: &[f64]) -> Self {
        ScriptedMetric {
            values: values.to_vec(),
            epoch: 0,
        }
    }
}

impl<O> Metric<O> for ScriptedMetric {
    fn reset(&mut self) {
        self.epoch += 1;
    }

    fn update(&mut self, _output: &O) -> anyhow::Result<()> {
        Ok(())
    }

    fn compute(&self) -> anyhow::Result<MetricValue> {
        Ok(MetricValue::Scalar(self.values[self.epoch - 1]))
    }
}

/// An iteration body that echoes its batch.
pub fn identity() -> impl FnMut(&RunState<i32, i32>, &i32) -> anyhow::Result<i32> {
    iteration_fn(|_: &RunState<i32, i32>, batch: &i32| Ok(*batch))
}
