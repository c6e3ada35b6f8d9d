use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::rc::Rc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use ferrite_flow::handlers::{EarlyStopping, ProgressHandler, StatsHandler};
use ferrite_flow::{
    iteration_fn, Accuracy, InMemoryDataSource, LossType, MeanLoss, Prediction, RunState, Workflow,
    WorkflowConfig,
};

type Batch = Vec<(Vec<f64>, Vec<f64>)>;

/// y = σ(w·x + b), fitted by mini-batch gradient descent on binary
/// cross-entropy. Just enough model to drive the engine end to end.
struct LogisticUnit {
    weights: Vec<f64>,
    bias: f64,
    learning_rate: f64,
}

impl LogisticUnit {
    fn new(inputs: usize, learning_rate: f64) -> Self {
        LogisticUnit { weights: vec![0.0; inputs], bias: 0.0, learning_rate }
    }

    fn predict(&self, input: &[f64]) -> f64 {
        let z: f64 = self.weights.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + self.bias;
        1.0 / (1.0 + (-z).exp())
    }

    fn evaluate(&self, batch: &Batch) -> Vec<Prediction> {
        batch
            .iter()
            .map(|(input, target)| Prediction::new(vec![self.predict(input)], target.clone()))
            .collect()
    }

    /// One gradient step on the batch; returns the pre-update predictions.
    fn train_step(&mut self, batch: &Batch) -> Vec<Prediction> {
        let predictions = self.evaluate(batch);
        let scale = self.learning_rate / batch.len() as f64;
        for ((input, _), prediction) in batch.iter().zip(&predictions) {
            // BCE through a sigmoid: ∂L/∂z = p − y
            let delta = prediction.predicted[0] - prediction.expected[0];
            for (w, x) in self.weights.iter_mut().zip(input) {
                *w -= scale * delta * x;
            }
            self.bias -= scale * delta;
        }
        predictions
    }
}

fn or_table() -> Batch {
    vec![
        (vec![0.0, 0.0], vec![0.0]),
        (vec![0.0, 1.0], vec![1.0]),
        (vec![1.0, 0.0], vec![1.0]),
        (vec![1.0, 1.0], vec![1.0]),
    ]
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => WorkflowConfig::load_json(&path).with_context(|| format!("loading {path}"))?,
        None => WorkflowConfig::new(300).with_seed(7),
    };

    let model = Rc::new(RefCell::new(LogisticUnit::new(2, 0.5)));
    let data = InMemoryDataSource::new(or_table(), 2)?.shuffled(config.seed);
    let training = Rc::clone(&model);
    let step = iteration_fn(move |_: &RunState<Batch, Vec<Prediction>>, batch: &Batch| {
        Ok(training.borrow_mut().train_step(batch))
    });
    let patience = NonZeroUsize::new(25).context("patience must be non-zero")?;
    let (progress, progress_rx) = ProgressHandler::channel();

    let mut trainer = Workflow::builder(config, data, step)
        .key_metric("accuracy", Accuracy::new())
        .additional_metric("bce", MeanLoss::new(LossType::BinaryCrossEntropy))
        .handler(StatsHandler::new("trainer"))
        .handler(EarlyStopping::new(patience).on_metric("accuracy"))
        .handler(progress)
        .build()?;
    trainer.run()?;

    let epochs_reported = progress_rx.try_iter().count();
    let state = trainer.state();
    println!(
        "trained {} epochs ({} reported), best accuracy {:.2} at epoch {:?}",
        state.epoch(),
        epochs_reported,
        state.best_metric,
        state.best_metric_epoch,
    );

    let evaluating = Rc::clone(&model);
    let eval_step = iteration_fn(move |_: &RunState<Batch, Vec<Prediction>>, batch: &Batch| {
        Ok(evaluating.borrow().evaluate(batch))
    });
    let mut evaluator = Workflow::builder(WorkflowConfig::evaluation(), vec![or_table()], eval_step)
        .key_metric("accuracy", Accuracy::new())
        .handler(StatsHandler::new("evaluator"))
        .build()?;
    evaluator.run()?;

    for (input, _) in or_table() {
        println!("Input: {:?} -> Output: {:.4}", input, model.borrow().predict(&input));
    }
    Ok(())
}
