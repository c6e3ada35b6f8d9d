use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::bail;
use ferrite_flow::engine::EventBus;
use ferrite_flow::handlers::{
    Checkpoint, CheckpointSaver, EarlyStopping, ProgressHandler, StatsHandler, StopFlagHandler,
};
use ferrite_flow::{iteration_fn, Event, Handler, RunState, Workflow, WorkflowConfig};

mod common;
use common::{identity, ScriptedMetric};

/// Records `(tag, epoch, best_metric_epoch, key metric value)` at the end of
/// every epoch.
struct Tagger {
    tag: &'static str,
    log: Rc<RefCell<Vec<(&'static str, usize, Option<usize>, Option<f64>)>>>,
}

impl<B: 'static, O: 'static> Handler<B, O> for Tagger {
    fn attach(self: Box<Self>, bus: &mut EventBus<B, O>) {
        let Tagger { tag, log } = *self;
        bus.register(Event::EpochCompleted, move |state| {
            log.borrow_mut()
                .push((tag, state.epoch(), state.best_metric_epoch, state.metric("score")));
            Ok(())
        });
    }
}

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

#[test]
fn handlers_run_in_list_order_after_metrics_and_best_tracking() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let first: Box<dyn Handler<i32, i32>> = Box::new(Tagger {
        tag: "first",
        log: Rc::clone(&log),
    });
    let second: Box<dyn Handler<i32, i32>> = Box::new(Tagger {
        tag: "second",
        log: Rc::clone(&log),
    });

    let mut workflow = Workflow::builder(WorkflowConfig::new(2), vec![1], identity())
        .key_metric("score", ScriptedMetric::new(&[0.4, 0.2]))
        .handlers(vec![first, second])
        .build()
        .unwrap();
    workflow.run().unwrap();

    assert_eq!(
        *log.borrow(),
        vec![
            ("first", 1, Some(1), Some(0.4)),
            ("second", 1, Some(1), Some(0.4)),
            ("first", 2, Some(1), Some(0.2)),
            ("second", 2, Some(1), Some(0.2)),
        ]
    );
}

#[test]
fn progress_handler_reports_every_epoch() {
    let (progress, rx) = ProgressHandler::channel();
    let mut workflow = Workflow::builder(WorkflowConfig::new(3), vec![1, 2], identity())
        .key_metric("score", ScriptedMetric::new(&[0.1, 0.5, 0.3]))
        .handler(progress)
        .build()
        .unwrap();
    workflow.run().unwrap();

    let stats: Vec<_> = rx.try_iter().collect();
    assert_eq!(stats.len(), 3);
    for (index, report) in stats.iter().enumerate() {
        assert_eq!(report.epoch, index + 1);
        assert_eq!(report.total_epochs, 3);
        assert_eq!(report.iterations, 2);
    }
    assert_eq!(stats[0].best_metric, Some(0.1));
    assert_eq!(stats[2].best_metric, Some(0.5));
    assert_eq!(stats[2].best_metric_epoch, Some(2));
    assert_eq!(stats[2].metrics["score"].as_scalar(), Some(0.3));
}

#[test]
fn progress_without_key_metric_reports_no_best() {
    let (progress, rx) = ProgressHandler::channel();
    let mut workflow = Workflow::builder(WorkflowConfig::new(1), vec![1], identity())
        .handler(progress)
        .build()
        .unwrap();
    workflow.run().unwrap();

    let report = rx.recv().unwrap();
    assert_eq!(report.best_metric, None);
    assert!(report.metrics.is_empty());
}

#[test]
fn dropped_progress_receiver_terminates_the_run() {
    let (progress, rx) = ProgressHandler::channel();
    drop(rx);
    let mut workflow = Workflow::builder(WorkflowConfig::new(5), vec![1, 2], identity())
        .handler(progress)
        .build()
        .unwrap();
    workflow.run().unwrap();

    assert!(workflow.state().terminated());
    assert_eq!(workflow.state().epoch(), 1);
    assert_eq!(workflow.state().iteration(), 2);
}

#[test]
fn stop_flag_set_before_the_run_skips_all_iterations() {
    let flag = Arc::new(AtomicBool::new(true));
    let mut workflow = Workflow::builder(WorkflowConfig::new(3), vec![1, 2], identity())
        .handler(StopFlagHandler::new(Arc::clone(&flag)))
        .build()
        .unwrap();
    workflow.run().unwrap();

    assert!(workflow.state().terminated());
    assert_eq!(workflow.state().epoch(), 1);
    assert_eq!(workflow.state().iteration(), 0);
}

#[test]
fn stop_flag_takes_effect_at_the_next_iteration_boundary() {
    let flag = Arc::new(AtomicBool::new(false));
    let mut workflow = Workflow::builder(WorkflowConfig::new(3), vec![1, 2], identity())
        .handler(StopFlagHandler::new(Arc::clone(&flag)))
        .build()
        .unwrap();
    let setter = Arc::clone(&flag);
    workflow.on(Event::IterationStarted, move |state| {
        if state.iteration() == 2 {
            setter.store(true, Ordering::Relaxed);
        }
        Ok(())
    });
    workflow.run().unwrap();

    assert!(workflow.state().terminated());
    assert_eq!(workflow.state().epoch(), 2);
    assert_eq!(workflow.state().iteration(), 3);
}

#[test]
fn early_stopping_waits_for_patience_epochs() {
    let mut workflow = Workflow::builder(WorkflowConfig::new(10), vec![1], identity())
        .key_metric("score", ScriptedMetric::new(&[0.5, 0.6, 0.6, 0.55, 0.9]))
        .handler(EarlyStopping::new(nz(2)))
        .build()
        .unwrap();
    workflow.run().unwrap();

    let state = workflow.state();
    assert!(state.terminated());
    assert_eq!(state.epoch(), 4);
    assert_eq!(state.best_metric, 0.6);
}

#[test]
fn early_stopping_ignores_gains_below_min_delta() {
    let mut workflow = Workflow::builder(WorkflowConfig::new(10), vec![1], identity())
        .additional_metric("acc", ScriptedMetric::new(&[0.5, 0.55, 0.58, 0.9]))
        .handler(EarlyStopping::new(nz(2)).with_min_delta(0.1).on_metric("acc"))
        .build()
        .unwrap();
    workflow.run().unwrap();

    assert!(workflow.state().terminated());
    assert_eq!(workflow.state().epoch(), 3);
}

#[test]
fn early_stopping_without_a_metric_fails_the_run() {
    let mut workflow = Workflow::builder(WorkflowConfig::new(3), vec![1], identity())
        .handler(EarlyStopping::new(nz(1)))
        .build()
        .unwrap();
    assert!(workflow.run().is_err());
}

#[test]
fn checkpoint_saver_keeps_the_latest_best_files() {
    let dir = tempfile::tempdir().unwrap();
    let saver = CheckpointSaver::new(dir.path(), "run")
        .n_saved(nz(2))
        .save_final(true)
        .with_snapshot(|state: &RunState<i32, i32>| state.output);

    let mut workflow = Workflow::builder(WorkflowConfig::new(4), vec![3, 7], identity())
        .key_metric("score", ScriptedMetric::new(&[0.1, 0.3, 0.2, 0.4]))
        .handler(saver)
        .build()
        .unwrap();
    workflow.run().unwrap();

    let exists = |name: &str| dir.path().join(name).exists();
    assert!(!exists("run_best_epoch=1.json"));
    assert!(exists("run_best_epoch=2.json"));
    assert!(!exists("run_best_epoch=3.json"));
    assert!(exists("run_best_epoch=4.json"));
    assert!(exists("run_final_iteration=8.json"));

    let best = Checkpoint::load_json(dir.path().join("run_best_epoch=4.json")).unwrap();
    assert_eq!(best.summary.epoch, 4);
    assert_eq!(best.summary.best_metric, 0.4);
    assert_eq!(best.summary.best_metric_epoch, Some(4));
    assert_eq!(best.summary.key_metric_name.as_deref(), Some("score"));
    assert_eq!(best.payload, serde_json::json!(7));
}

#[test]
fn checkpoint_saver_writes_a_failure_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let step = iteration_fn(|state: &RunState<i32, i32>, batch: &i32| {
        if state.epoch() == 2 {
            bail!("diverged");
        }
        Ok(*batch)
    });
    let mut workflow = Workflow::builder(WorkflowConfig::new(3), vec![1, 2], step)
        .handler(CheckpointSaver::new(dir.path().join("ckpt"), "model").save_on_failure(true))
        .build()
        .unwrap();

    assert!(workflow.run().is_err());

    let path = dir.path().join("ckpt").join("model_failed_iteration=2.json");
    let checkpoint = Checkpoint::load_json(&path).unwrap();
    assert_eq!(checkpoint.summary.iteration, 2);
    assert_eq!(checkpoint.summary.epoch, 2);
    // The default snapshot is the run summary itself.
    assert_eq!(
        checkpoint.payload,
        serde_json::to_value(&checkpoint.summary).unwrap()
    );
}

#[test]
fn stats_handler_runs_alongside_other_handlers() {
    let mut workflow = Workflow::builder(WorkflowConfig::new(2), vec![1, 2, 3], identity())
        .key_metric("score", ScriptedMetric::new(&[0.2, 0.4]))
        .handler(
            StatsHandler::new("trainer")
                .with_output_transform(|output: &i32| Some(f64::from(*output)))
                .every(nz(2)),
        )
        .build()
        .unwrap();
    workflow.run().unwrap();
    assert_eq!(workflow.state().iteration(), 6);
    assert_eq!(workflow.state().best_metric_epoch, Some(2));
}

#[test]
fn checkpoint_saver_keeps_the_best_file_when_a_rerun_is_worse() {
    let dir = tempfile::tempdir().unwrap();
    let mut workflow = Workflow::builder(WorkflowConfig::new(1), vec![1], identity())
        .key_metric("score", ScriptedMetric::new(&[0.9, 0.1]))
        .handler(CheckpointSaver::new(dir.path(), "run"))
        .build()
        .unwrap();

    workflow.run().unwrap();
    workflow.run().unwrap();

    let best = Checkpoint::load_json(dir.path().join("run_best_epoch=1.json")).unwrap();
    assert_eq!(best.summary.metrics["score"].as_scalar(), Some(0.9));
    assert_eq!(best.summary.best_metric, 0.9);
}

#[test]
fn checkpoint_saver_overwrites_the_same_epoch_when_a_rerun_improves() {
    let dir = tempfile::tempdir().unwrap();
    let mut workflow = Workflow::builder(WorkflowConfig::new(1), vec![1], identity())
        .key_metric("score", ScriptedMetric::new(&[0.2, 0.6]))
        .handler(CheckpointSaver::new(dir.path(), "run"))
        .build()
        .unwrap();

    workflow.run().unwrap();
    workflow.run().unwrap();

    let best = Checkpoint::load_json(dir.path().join("run_best_epoch=1.json")).unwrap();
    assert_eq!(best.summary.best_metric, 0.6);
    let files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 1);
}

#[test]
fn early_stopping_patience_starts_over_on_every_run() {
    let mut workflow = Workflow::builder(WorkflowConfig::new(3), vec![1], identity())
        .key_metric("score", ScriptedMetric::new(&[0.5, 0.4, 0.4, 0.3, 0.3, 0.3]))
        .handler(EarlyStopping::new(nz(2)))
        .build()
        .unwrap();

    workflow.run().unwrap();
    assert!(workflow.state().terminated());
    assert_eq!(workflow.state().epoch(), 3);

    workflow.run().unwrap();
    assert!(workflow.state().terminated());
    assert_eq!(workflow.state().epoch(), 3);
}
