//! End-to-end orchestrator scenarios with mock collaborators.
//!
//! These tests verify that the orchestrator:
//! 1. Stops on the step budget, mid-epoch if necessary
//! 2. Saves checkpoints on the configured cadence and at run end
//! 3. Resumes after an interruption without repeating optimizer updates
//! 4. Exports EMA-merged weights from the primary process

use std::path::{Path, PathBuf};

use lar_checkpoint::{ComponentError, EMA, MODEL, OPTIMIZER, SCHEDULER, StatefulComponent};
use lar_config::{
    DatasetConfig, ExperimentConfig, MixedPrecision, RunConfig, TrainingConfig,
};
use lar_dist::{DistOptions, PreparedUnit, SingleProcess};
use lar_logging::LogRegistry;
use lar_train::{
    EpochContext, EpochRunner, ModelState, Orchestrator, TrainError, TrainerBundle,
};
use tempfile::tempdir;

/// Trainable state mock: a named vector serialized as JSON.
struct VecState {
    name: &'static str,
    values: Vec<f32>,
}

impl VecState {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            values: Vec::new(),
        }
    }
}

impl StatefulComponent for VecState {
    fn name(&self) -> &'static str {
        self.name
    }

    fn state_bytes(&self) -> Result<Vec<u8>, ComponentError> {
        serde_json::to_vec(&self.values).map_err(|e| ComponentError(e.to_string()))
    }

    fn load_state(&mut self, bytes: &[u8]) -> Result<(), ComponentError> {
        self.values = serde_json::from_slice(bytes).map_err(|e| ComponentError(e.to_string()))?;
        Ok(())
    }
}

impl ModelState for VecState {
    fn export_weights(&self, output_dir: &Path) -> Result<PathBuf, ComponentError> {
        let path = output_dir.join("model_final.st");
        let bytes = self.state_bytes()?;
        std::fs::write(&path, bytes).map_err(|e| ComponentError(e.to_string()))?;
        Ok(path)
    }
}

/// Step loop mock: one "optimizer update" bumps the model parameters to the
/// step index and the EMA shadow to ten times that.
struct StepLoop {
    executed: Vec<u64>,
    fail_at: Option<u64>,
}

impl StepLoop {
    fn new() -> Self {
        Self {
            executed: Vec::new(),
            fail_at: None,
        }
    }

    fn failing_at(step: u64) -> Self {
        Self {
            executed: Vec::new(),
            fail_at: Some(step),
        }
    }
}

impl EpochRunner for StepLoop {
    fn run_epoch(
        &mut self,
        bundle: &mut TrainerBundle<'_>,
        cx: &EpochContext<'_>,
    ) -> Result<u64, TrainError> {
        let mut step = cx.global_step;
        for _ in 0..cx.schedule.updates_per_epoch {
            if cx.schedule.complete(step) {
                break;
            }
            step += 1;
            self.executed.push(step);

            let params = serde_json::to_vec(&vec![step as f32]).unwrap();
            bundle.model.load_state(&params)?;
            if let Some(ema) = bundle.ema.as_mut() {
                let shadow = serde_json::to_vec(&vec![step as f32 * 10.0]).unwrap();
                ema.load_state(&shadow)?;
            }

            if cx.checkpointer.due(step) {
                cx.checkpointer.save(&bundle.snapshot()?, step)?;
            }
            if self.fail_at == Some(step) {
                return Err(TrainError::Collaborator(format!(
                    "injected failure at step {step}"
                )));
            }
        }
        Ok(step)
    }
}

fn config(output_dir: &Path, max_train_steps: u64, save_every_steps: u64, use_ema: bool) -> RunConfig {
    RunConfig {
        experiment: ExperimentConfig {
            name: "ar-latent-test".to_string(),
            output_dir: output_dir.to_path_buf(),
            logging_dir: None,
            max_train_examples: 1000,
            save_every_steps,
            log_every_steps: 50,
            checkpoints_kept: 2,
        },
        training: TrainingConfig {
            max_train_steps,
            gradient_accumulation_steps: 5,
            per_gpu_batch_size: 10,
            mixed_precision: MixedPrecision::No,
            enable_tf32: false,
            enable_wandb: false,
            seed: Some(42),
            use_ema,
        },
        dataset: DatasetConfig::default(),
    }
}

fn context(config: &RunConfig) -> SingleProcess {
    SingleProcess::new(DistOptions::from_run(config)).quiet()
}

#[test]
fn test_stops_mid_epoch_at_step_budget() {
    let dir = tempdir().unwrap();
    let config = config(&dir.path().join("run"), 3, 0, false);
    let ctx = context(&config);
    let registry = LogRegistry::new(0);
    let orchestrator = Orchestrator::new(&config, &ctx, &registry).unwrap();

    // 1000 examples / batch 10 / accumulation 5 -> 20 updates per epoch;
    // the budget of 3 stops inside the first epoch.
    assert_eq!(orchestrator.schedule().updates_per_epoch, 20);
    assert_eq!(orchestrator.schedule().num_epochs, 1);

    let mut model = VecState::new(MODEL);
    let mut optim = VecState::new(OPTIMIZER);
    let mut sched = VecState::new(SCHEDULER);
    let mut bundle = TrainerBundle {
        model: &mut model,
        optimizer: &mut optim,
        scheduler: &mut sched,
        ema: None,
    };
    let mut runner = StepLoop::new();

    let report = orchestrator.run(&mut bundle, &mut runner).unwrap();

    assert_eq!(report.global_step, 3);
    assert_eq!(report.epochs_run, 1);
    assert_eq!(runner.executed, vec![1, 2, 3]);
    assert!(report.resumed_from.is_none());
    assert!(report.final_checkpoint.ends_with("checkpoint-3"));
    assert!(report.final_checkpoint.is_dir());
    assert_eq!(
        report.exported_weights,
        Some(config.experiment.output_dir.join("model_final.st"))
    );
    assert_eq!(
        ctx.barriers_reached(),
        vec!["setup", "pre-train", "post-train", "checkpoint"]
    );
    assert_eq!(ctx.tracker_runs(), vec!["ar-latent-test"]);
    assert!(config.experiment.output_dir.join("config.yaml").is_file());
    assert!(config.experiment.output_dir.join("log0.txt").is_file());
}

#[test]
fn test_periodic_checkpoints_respect_retention() {
    let dir = tempdir().unwrap();
    let config = config(&dir.path().join("run"), 6, 2, false);
    let ctx = context(&config);
    let registry = LogRegistry::new(0);
    let orchestrator = Orchestrator::new(&config, &ctx, &registry).unwrap();

    let mut model = VecState::new(MODEL);
    let mut optim = VecState::new(OPTIMIZER);
    let mut sched = VecState::new(SCHEDULER);
    let mut bundle = TrainerBundle {
        model: &mut model,
        optimizer: &mut optim,
        scheduler: &mut sched,
        ema: None,
    };

    let report = orchestrator.run(&mut bundle, &mut StepLoop::new()).unwrap();
    assert_eq!(report.global_step, 6);

    // Saves landed at steps 2, 4 and 6; the cap of 2 keeps the newest two.
    let kept: Vec<u64> = orchestrator
        .checkpoint_store()
        .list()
        .unwrap()
        .into_iter()
        .map(|(step, _)| step)
        .collect();
    assert_eq!(kept, vec![4, 6]);
}

#[test]
fn test_export_merges_ema_shadow() {
    let dir = tempdir().unwrap();
    let config = config(&dir.path().join("run"), 2, 0, true);
    let ctx = context(&config);
    let registry = LogRegistry::new(0);
    let orchestrator = Orchestrator::new(&config, &ctx, &registry).unwrap();

    let mut model = VecState::new(MODEL);
    let mut optim = VecState::new(OPTIMIZER);
    let mut sched = VecState::new(SCHEDULER);
    let mut ema = VecState::new(EMA);
    let mut bundle = TrainerBundle {
        model: &mut model,
        optimizer: &mut optim,
        scheduler: &mut sched,
        ema: Some(&mut ema),
    };

    let report = orchestrator.run(&mut bundle, &mut StepLoop::new()).unwrap();

    let exported = report.exported_weights.unwrap();
    let weights: Vec<f32> =
        serde_json::from_slice(&std::fs::read(&exported).unwrap()).unwrap();
    // The shadow (10x the raw parameters) is what ships.
    assert_eq!(weights, vec![20.0]);
}

#[test]
fn test_ema_component_mismatch_is_rejected() {
    let dir = tempdir().unwrap();
    let config = config(&dir.path().join("run"), 2, 0, true);
    let ctx = context(&config);
    let registry = LogRegistry::new(0);
    let orchestrator = Orchestrator::new(&config, &ctx, &registry).unwrap();

    let mut model = VecState::new(MODEL);
    let mut optim = VecState::new(OPTIMIZER);
    let mut sched = VecState::new(SCHEDULER);
    let mut bundle = TrainerBundle {
        model: &mut model,
        optimizer: &mut optim,
        scheduler: &mut sched,
        ema: None,
    };

    let err = orchestrator
        .run(&mut bundle, &mut StepLoop::new())
        .unwrap_err();
    assert!(matches!(err, TrainError::Collaborator(_)));
}

#[test]
fn test_interrupt_and_resume_never_repeats_updates() {
    let dir = tempdir().unwrap();
    let output_dir = dir.path().join("run");

    // First process: checkpoint every step, die right after update 3.
    let config_first = config(&output_dir, 5, 1, false);
    {
        let ctx = context(&config_first);
        let registry = LogRegistry::new(0);
        let orchestrator = Orchestrator::new(&config_first, &ctx, &registry).unwrap();

        let mut model = VecState::new(MODEL);
        let mut optim = VecState::new(OPTIMIZER);
        let mut sched = VecState::new(SCHEDULER);
        let mut bundle = TrainerBundle {
            model: &mut model,
            optimizer: &mut optim,
            scheduler: &mut sched,
            ema: None,
        };
        let mut runner = StepLoop::failing_at(3);
        let err = orchestrator.run(&mut bundle, &mut runner).unwrap_err();
        assert!(matches!(err, TrainError::Collaborator(_)));
        assert_eq!(runner.executed, vec![1, 2, 3]);
    }

    // Fresh process with identical config: auto-resume picks up step 3.
    let config_second = config(&output_dir, 5, 1, false);
    let ctx = context(&config_second);
    let registry = LogRegistry::new(0);
    let orchestrator = Orchestrator::new(&config_second, &ctx, &registry).unwrap();

    let mut model = VecState::new(MODEL);
    let mut optim = VecState::new(OPTIMIZER);
    let mut sched = VecState::new(SCHEDULER);
    let mut bundle = TrainerBundle {
        model: &mut model,
        optimizer: &mut optim,
        scheduler: &mut sched,
        ema: None,
    };
    let mut runner = StepLoop::new();

    let report = orchestrator.run(&mut bundle, &mut runner).unwrap();

    assert_eq!(report.global_step, 5);
    // 3 / 20 updates-per-epoch -> the loop re-enters epoch 0 but the step
    // counter carries on from the checkpoint.
    assert_eq!(report.resumed_from, Some(output_dir.join("checkpoint-3")));
    assert_eq!(runner.executed, vec![4, 5]);
    assert_eq!(model.values, vec![5.0]);
}

#[test]
fn test_pretokenized_dataset_joins_prepare() {
    let dir = tempdir().unwrap();
    let mut config = config(&dir.path().join("run"), 1, 0, false);
    config.dataset.params.pretokenization = Some("latents-256".to_string());
    let ctx = context(&config);
    let registry = LogRegistry::new(0);
    let orchestrator = Orchestrator::new(&config, &ctx, &registry).unwrap();

    let mut model = VecState::new(MODEL);
    let mut optim = VecState::new(OPTIMIZER);
    let mut sched = VecState::new(SCHEDULER);
    let mut bundle = TrainerBundle {
        model: &mut model,
        optimizer: &mut optim,
        scheduler: &mut sched,
        ema: None,
    };
    orchestrator.run(&mut bundle, &mut StepLoop::new()).unwrap();

    let prepared = ctx.prepared_units();
    assert!(prepared.contains(&PreparedUnit::Dataloader));
    assert!(prepared.contains(&PreparedUnit::Model));
}
