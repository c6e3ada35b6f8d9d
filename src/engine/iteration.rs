use std::marker::PhantomData;

use crate::engine::state::RunState;

/// The processing logic of one iteration: a training step, a validation
/// forward pass, a GAN update, and so on.
///
/// This is the only capability a concrete workflow must supply. It receives
/// the run state (read-only) and the current batch, and returns the output
/// that the engine stores in `RunState::output`. The engine counts the
/// iteration only after `iterate` returns `Ok`.
pub trait Iteration<B, O> {
    fn iterate(&mut self, state: &RunState<B, O>, batch: &B) -> anyhow::Result<O>;
}

impl<B, O, F> Iteration<B, O> for F
where
    F: FnMut(&RunState<B, O>, &B) -> anyhow::Result<O>,
{
    fn iterate(&mut self, state: &RunState<B, O>, batch: &B) -> anyhow::Result<O> {
        self(state, batch)
    }
}

/// Pins a closure to the `Iteration` signature so its argument types are
/// inferred at the call site.
pub fn iteration_fn<B, O, F>(f: F) -> F
where
    F: FnMut(&RunState<B, O>, &B) -> anyhow::Result<O>,
{
    f
}

/// An iteration that first adapts the raw batch into the step's input.
///
/// Built with [`with_prepare_batch`].
pub struct PreparedIteration<P, S, T> {
    prepare: P,
    step: S,
    _input: PhantomData<fn() -> T>,
}

/// Composes a batch adapter with an iteration step. A failing adapter fails
/// the iteration like a failing step would.
pub fn with_prepare_batch<B, O, T, P, S>(prepare: P, step: S) -> PreparedIteration<P, S, T>
where
    P: Fn(&B) -> anyhow::Result<T>,
    S: FnMut(&RunState<B, O>, T) -> anyhow::Result<O>,
{
    PreparedIteration {
        prepare,
        step,
        _input: PhantomData,
    }
}

impl<B, O, T, P, S> Iteration<B, O> for PreparedIteration<P, S, T>
where
    P: Fn(&B) -> anyhow::Result<T>,
    S: FnMut(&RunState<B, O>, T) -> anyhow::Result<O>,
{
    fn iterate(&mut self, state: &RunState<B, O>, batch: &B) -> anyhow::Result<O> {
        let input = (self.prepare)(batch)?;
        (self.step)(state, input)
    }
}

/// Splits a batch of `(input, target)` samples into parallel input and
/// target lists.
#[allow(clippy::ptr_arg)]
pub fn split_samples(
    batch: &Vec<(Vec<f64>, Vec<f64>)>,
) -> anyhow::Result<(Vec<Vec<f64>>, Vec<Vec<f64>>)> {
    if batch.is_empty() {
        anyhow::bail!("received an empty batch");
    }
    Ok(batch.iter().cloned().unzip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::WorkflowConfig;

    #[test]
    fn closures_are_iterations() {
        let state: RunState<i32, i32> = RunState::new(&WorkflowConfig::new(1), None);
        let mut step = iteration_fn(|_: &RunState<i32, i32>, batch: &i32| Ok(batch * 2));
        assert_eq!(step.iterate(&state, &21).unwrap(), 42);
    }

    #[test]
    fn prepared_iteration_adapts_the_batch() {
        type Batch = Vec<(Vec<f64>, Vec<f64>)>;
        let state: RunState<Batch, usize> = RunState::new(&WorkflowConfig::new(1), None);
        let mut step = with_prepare_batch(
            split_samples,
            |_: &RunState<Batch, usize>, (inputs, targets): (Vec<Vec<f64>>, Vec<Vec<f64>>)| {
                assert_eq!(inputs.len(), targets.len());
                Ok(inputs.len())
            },
        );

        let batch = vec![(vec![0.0], vec![1.0]), (vec![1.0], vec![0.0])];
        assert_eq!(step.iterate(&state, &batch).unwrap(), 2);
        assert!(step.iterate(&state, &Vec::new()).is_err());
    }
}
