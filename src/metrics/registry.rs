use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Context;

use crate::engine::error::ConfigError;
use crate::engine::events::{Event, EventBus};
use crate::metrics::metric::Metric;

/// Named metrics waiting to be bound to a workflow.
///
/// Holds at most one key metric (used for best-epoch selection) plus any
/// number of additional metrics. Names are unique: adding a metric under a
/// name already present replaces the earlier metric in place, including the
/// key metric, while the key metric name itself stays the same.
pub struct MetricRegistry<O> {
    key_metric_name: Option<String>,
    metrics: Vec<(String, Box<dyn Metric<O>>)>,
}

impl<O> Default for MetricRegistry<O> {
    fn default() -> Self {
        MetricRegistry {
            key_metric_name: None,
            metrics: Vec::new(),
        }
    }
}

impl<O: 'static> MetricRegistry<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the key metric. Only one is allowed.
    pub fn set_key_metric<M>(&mut self, name: impl Into<String>, metric: M) -> Result<(), ConfigError>
    where
        M: Metric<O> + 'static,
    {
        let name = name.into();
        if let Some(existing) = &self.key_metric_name {
            return Err(ConfigError::DuplicateKeyMetric {
                existing: existing.clone(),
                rejected: name,
            });
        }
        self.insert(name.clone(), Box::new(metric))?;
        self.key_metric_name = Some(name);
        Ok(())
    }

    /// Registers an additional metric, replacing any metric with the same name.
    pub fn add<M>(&mut self, name: impl Into<String>, metric: M) -> Result<(), ConfigError>
    where
        M: Metric<O> + 'static,
    {
        self.insert(name.into(), Box::new(metric))
    }

    fn insert(&mut self, name: String, metric: Box<dyn Metric<O>>) -> Result<(), ConfigError> {
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyMetricName);
        }
        match self.metrics.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = metric,
            None => self.metrics.push((name, metric)),
        }
        Ok(())
    }

    pub fn key_metric_name(&self) -> Option<&str> {
        self.key_metric_name.as_deref()
    }

    /// Metric names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Binds every metric to `bus`: reset on `EPOCH_STARTED`, update with the
    /// latest output on `ITERATION_COMPLETED`, compute into
    /// `RunState::metrics` on `EPOCH_COMPLETED`.
    pub fn attach<B: 'static>(self, bus: &mut EventBus<B, O>) {
        for (name, metric) in self.metrics {
            let metric = Rc::new(RefCell::new(metric));

            let resetting = Rc::clone(&metric);
            bus.register(Event::EpochStarted, move |_| {
                resetting.borrow_mut().reset();
                Ok(())
            });

            let updating = Rc::clone(&metric);
            let update_name = name.clone();
            bus.register(Event::IterationCompleted, move |state| {
                if let Some(output) = state.output.as_ref() {
                    updating
                        .borrow_mut()
                        .update(output)
                        .with_context(|| format!("metric `{update_name}` failed to update"))?;
                }
                Ok(())
            });

            bus.register(Event::EpochCompleted, move |state| {
                let value = metric
                    .borrow()
                    .compute()
                    .with_context(|| format!("metric `{name}` failed to compute"))?;
                state.metrics.insert(name.clone(), value);
                Ok(())
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Accuracy, LossType, MeanLoss, Prediction};

    #[test]
    fn second_key_metric_is_rejected() {
        let mut registry: MetricRegistry<Prediction> = MetricRegistry::new();
        registry.set_key_metric("acc", Accuracy::new()).unwrap();
        let err = registry.set_key_metric("loss", MeanLoss::new(LossType::Mse)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DuplicateKeyMetric { ref existing, ref rejected }
                if existing == "acc" && rejected == "loss"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn colliding_additional_metric_replaces_in_place() {
        let mut registry: MetricRegistry<Prediction> = MetricRegistry::new();
        registry.set_key_metric("score", Accuracy::new()).unwrap();
        registry.add("loss", MeanLoss::new(LossType::Mse)).unwrap();
        registry.add("score", MeanLoss::new(LossType::Mae)).unwrap();

        assert_eq!(registry.key_metric_name(), Some("score"));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["score", "loss"]);
    }

    #[test]
    fn blank_names_are_rejected() {
        let mut registry: MetricRegistry<Prediction> = MetricRegistry::new();
        assert!(matches!(
            registry.add("  ", Accuracy::new()),
            Err(ConfigError::EmptyMetricName)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn attach_registers_three_callbacks_per_metric() {
        let mut registry: MetricRegistry<Prediction> = MetricRegistry::new();
        registry.set_key_metric("acc", Accuracy::new()).unwrap();
        registry.add("loss", MeanLoss::new(LossType::Mse)).unwrap();

        let mut bus: EventBus<(), Prediction> = EventBus::new();
        registry.attach(&mut bus);
        assert_eq!(bus.len(Event::EpochStarted), 2);
        assert_eq!(bus.len(Event::IterationCompleted), 2);
        assert_eq!(bus.len(Event::EpochCompleted), 2);
        assert_eq!(bus.len(Event::Started), 0);
    }
}
