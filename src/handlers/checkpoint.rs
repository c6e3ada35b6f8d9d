use std::cell::Cell;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::events::{Event, EventBus};
use crate::engine::state::{RunState, RunSummary};
use crate::handlers::Handler;

type Snapshot<B, O> = Box<dyn Fn(&RunState<B, O>) -> anyhow::Result<serde_json::Value>>;

/// Contents of a checkpoint file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub summary: RunSummary,
    /// Whatever the snapshot function returned, e.g. serialized model weights.
    pub payload: serde_json::Value,
}

impl Checkpoint {
    /// Deserializes a checkpoint written by `CheckpointSaver`.
    pub fn load_json(path: impl AsRef<Path>) -> anyhow::Result<Checkpoint> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening checkpoint {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("parsing checkpoint {}", path.display()))
    }
}

/// Writes JSON checkpoints into a directory.
///
/// - on every epoch that improves the key metric: `<prefix>_best_epoch=<n>.json`,
///   keeping only the `n_saved` most recent (and therefore best) files. Epoch
///   numbers restart with every run, so a better epoch of a later run
///   overwrites the file of the same epoch number.
/// - on `COMPLETED`, if enabled: `<prefix>_final_iteration=<n>.json`
/// - on `EXCEPTION_RAISED`, if enabled: `<prefix>_failed_iteration=<n>.json`
///
/// The payload comes from a snapshot function; by default it is the run
/// summary itself. Persisting the model is the caller's business: capture
/// it in the snapshot closure.
pub struct CheckpointSaver<B, O> {
    dir: PathBuf,
    prefix: String,
    n_saved: NonZeroUsize,
    save_final: bool,
    save_on_failure: bool,
    snapshot: Snapshot<B, O>,
}

fn summary_snapshot<B, O>(state: &RunState<B, O>) -> anyhow::Result<serde_json::Value> {
    Ok(serde_json::to_value(state.summary())?)
}

impl<B: 'static, O: 'static> CheckpointSaver<B, O> {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        CheckpointSaver {
            dir: dir.into(),
            prefix: prefix.into(),
            n_saved: NonZeroUsize::MIN,
            save_final: false,
            save_on_failure: false,
            snapshot: Box::new(summary_snapshot::<B, O>),
        }
    }

    pub fn with_snapshot<F, T>(mut self, snapshot: F) -> Self
    where
        F: Fn(&RunState<B, O>) -> T + 'static,
        T: Serialize,
    {
        self.snapshot = Box::new(
            move |state: &RunState<B, O>| -> anyhow::Result<serde_json::Value> {
                Ok(serde_json::to_value(snapshot(state))?)
            },
        );
        self
    }

    pub fn n_saved(mut self, n_saved: NonZeroUsize) -> Self {
        self.n_saved = n_saved;
        self
    }

    pub fn save_final(mut self, enabled: bool) -> Self {
        self.save_final = enabled;
        self
    }

    pub fn save_on_failure(mut self, enabled: bool) -> Self {
        self.save_on_failure = enabled;
        self
    }
}

struct Writer<B, O> {
    dir: PathBuf,
    prefix: String,
    snapshot: Snapshot<B, O>,
}

impl<B, O> Writer<B, O> {
    fn write(&self, state: &RunState<B, O>, tag: &str) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating checkpoint dir {}", self.dir.display()))?;
        let path = self.dir.join(format!("{}_{}.json", self.prefix, tag));
        let checkpoint = Checkpoint {
            summary: state.summary(),
            payload: (self.snapshot)(state)?,
        };
        let file = std::fs::File::create(&path)
            .with_context(|| format!("creating checkpoint {}", path.display()))?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &checkpoint)
            .with_context(|| format!("writing checkpoint {}", path.display()))?;
        debug!(path = %path.display(), "checkpoint written");
        Ok(path)
    }
}

impl<B: 'static, O: 'static> Handler<B, O> for CheckpointSaver<B, O> {
    fn attach(self: Box<Self>, bus: &mut EventBus<B, O>) {
        let CheckpointSaver {
            dir,
            prefix,
            n_saved,
            save_final,
            save_on_failure,
            snapshot,
        } = *self;
        let writer = Rc::new(Writer {
            dir,
            prefix,
            snapshot,
        });

        // best_metric as it stood when the current epoch started
        let best_before = Rc::new(Cell::new(f64::NEG_INFINITY));
        let marker = Rc::clone(&best_before);
        bus.register(Event::EpochStarted, move |state| {
            marker.set(state.best_metric);
            Ok(())
        });

        let best_writer = Rc::clone(&writer);
        let mut saved: VecDeque<PathBuf> = VecDeque::new();
        bus.register(Event::EpochCompleted, move |state| {
            let improved = state.key_metric_name().is_some()
                && state.best_metric_epoch == Some(state.epoch())
                && state.best_metric > best_before.get();
            if !improved {
                return Ok(());
            }
            let path = best_writer.write(state, &format!("best_epoch={}", state.epoch()))?;
            info!(path = %path.display(), best_metric = state.best_metric, "saved best checkpoint");

            // A rerun can land on an epoch number that already has a file.
            saved.retain(|existing| *existing != path);
            saved.push_back(path);
            while saved.len() > n_saved.get() {
                if let Some(stale) = saved.pop_front() {
                    std::fs::remove_file(&stale)
                        .with_context(|| format!("removing checkpoint {}", stale.display()))?;
                }
            }
            Ok(())
        });

        if save_final {
            let final_writer = Rc::clone(&writer);
            bus.register(Event::Completed, move |state| {
                final_writer.write(state, &format!("final_iteration={}", state.iteration()))?;
                Ok(())
            });
        }

        if save_on_failure {
            bus.register(Event::ExceptionRaised, move |state| {
                writer.write(state, &format!("failed_iteration={}", state.iteration()))?;
                Ok(())
            });
        }
    }
}
