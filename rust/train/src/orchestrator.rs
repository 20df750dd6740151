//! The training orchestrator: epoch loop, checkpoint cadence, final export.

use std::path::PathBuf;

use lar_checkpoint::{
    CheckpointStore, ResumeOptions, StateBundle, auto_resume,
};
use lar_config::RunConfig;
use lar_dist::{DistributedContext, PreparedUnit, device_seed};
use lar_logging::{LogLevel, LogRegistry, Logger, LoggerSpec};

use crate::{
    collaborators::{EpochContext, EpochRunner, TrainerBundle},
    error::TrainError,
    schedule::TrainSchedule,
};

/// Checkpoint trigger handed into the step loop.
///
/// The step loop decides *when* (its step counter crosses the cadence); the
/// orchestrator owns *how* (primary-only write, rendezvous, retention).
pub struct Checkpointer<'a> {
    store: &'a CheckpointStore,
    ctx: &'a dyn DistributedContext,
    seed: Option<u64>,
    every: u64,
}

impl Checkpointer<'_> {
    /// Whether a periodic save is due at `global_step`.
    #[must_use]
    pub fn due(&self, global_step: u64) -> bool {
        self.every > 0 && global_step > 0 && global_step % self.every == 0
    }

    /// Persist the bundle at `global_step`. Every process must call this at
    /// the same step; only the primary writes.
    pub fn save(&self, bundle: &StateBundle, global_step: u64) -> Result<PathBuf, TrainError> {
        Ok(self.store.save(self.ctx, bundle, global_step, self.seed)?)
    }
}

/// What a completed run produced.
#[derive(Debug)]
pub struct TrainReport {
    pub global_step: u64,
    pub epochs_run: usize,
    pub final_checkpoint: PathBuf,
    /// Final weights file; `None` on non-primary processes.
    pub exported_weights: Option<PathBuf>,
    /// Checkpoint this run resumed from, if any.
    pub resumed_from: Option<PathBuf>,
}

/// Drives one training run to its step budget.
pub struct Orchestrator<'a> {
    config: &'a RunConfig,
    ctx: &'a dyn DistributedContext,
    logger: Logger,
    store: CheckpointStore,
    schedule: TrainSchedule,
    seed: Option<u64>,
    resume: ResumeOptions,
}

impl<'a> Orchestrator<'a> {
    /// Set up the run: output directories, per-rank logger, primary-only
    /// config snapshot and tracker init, then the setup rendezvous.
    ///
    /// Primary-only side effects run before the rendezvous; a failing
    /// primary aborts every rank instead of leaving them blocked behind a
    /// barrier it will never reach.
    pub fn new(
        config: &'a RunConfig,
        ctx: &'a dyn DistributedContext,
        registry: &LogRegistry,
    ) -> Result<Self, TrainError> {
        config.validate()?;

        let output_dir = &config.experiment.output_dir;
        std::fs::create_dir_all(output_dir)
            .map_err(|e| TrainError::Io(output_dir.clone(), e))?;
        let logging_dir = config.experiment.logging_dir();
        std::fs::create_dir_all(&logging_dir)
            .map_err(|e| TrainError::Io(logging_dir.clone(), e))?;

        let logger = registry.get_logger(
            &LoggerSpec::new("ar-trainer")
                .level(LogLevel::Info)
                .multiprocess(ctx.num_processes() > 1)
                .output_file(registry.rank_log_file(output_dir)),
        )?;

        if ctx.is_main_process() {
            ctx.init_trackers(&config.experiment.name)?;
            let snapshot_path = output_dir.join("config.yaml");
            logger.info(format!("Saving config to {}", snapshot_path.display()));
            config.snapshot(&snapshot_path)?;
            logger.info(format!("Config:\n{}", config.to_yaml()?));
        }

        let seed = config
            .training
            .seed
            .map(|base| device_seed(base, ctx.process_index()));
        let schedule = TrainSchedule::derive(config, ctx.num_processes());
        let store = CheckpointStore::new(output_dir, config.experiment.checkpoints_kept);

        ctx.wait_for_everyone("setup")?;

        Ok(Self {
            config,
            ctx,
            logger,
            store,
            schedule,
            seed,
            resume: ResumeOptions::default(),
        })
    }

    /// Override resumption behavior (mandatory resume, non-strict loading).
    #[must_use]
    pub fn with_resume_options(mut self, resume: ResumeOptions) -> Self {
        self.resume = resume;
        self
    }

    #[must_use]
    pub fn schedule(&self) -> &TrainSchedule {
        &self.schedule
    }

    #[must_use]
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Per-device seed for collaborator construction.
    #[must_use]
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    #[must_use]
    pub fn checkpoint_store(&self) -> &CheckpointStore {
        &self.store
    }

    fn log_banner(&self) {
        let schedule = &self.schedule;
        self.logger.info("***** Running training *****");
        self.logger
            .info(format!("  Num training steps = {}", schedule.max_train_steps));
        self.logger.info(format!(
            "  Gradient Accumulation steps = {}",
            schedule.gradient_accumulation_steps
        ));
        self.logger.info(format!(
            "  Instantaneous batch size per gpu = {}",
            schedule.per_gpu_batch_size
        ));
        self.logger.info(format!(
            "  Total train batch size (w. parallel, distributed & accumulation) = {}",
            schedule.total_batch_size()
        ));
    }

    /// Run epochs until the step budget is met, then save and export.
    pub fn run(
        &self,
        bundle: &mut TrainerBundle<'_>,
        runner: &mut dyn EpochRunner,
    ) -> Result<TrainReport, TrainError> {
        let use_ema = self.config.training.use_ema;
        if use_ema != bundle.ema.is_some() {
            return Err(TrainError::Collaborator(if use_ema {
                "use_ema is enabled but no EMA component was supplied".to_string()
            } else {
                "an EMA component was supplied but use_ema is disabled".to_string()
            }));
        }

        let mut units = vec![
            PreparedUnit::Model,
            PreparedUnit::Optimizer,
            PreparedUnit::LrScheduler,
        ];
        if self.config.prepare_dataloader() {
            units.push(PreparedUnit::Dataloader);
        }
        self.ctx.prepare(&units)?;

        self.log_banner();

        let point = {
            let mut components = bundle.components_mut();
            auto_resume(
                &self.store,
                &self.logger,
                components.as_mut_slice(),
                use_ema,
                self.schedule.updates_per_epoch,
                self.resume,
            )?
        };
        let mut global_step = point.global_step;

        self.ctx.wait_for_everyone("pre-train")?;

        let checkpointer = Checkpointer {
            store: &self.store,
            ctx: self.ctx,
            seed: self.seed,
            every: self.config.experiment.save_every_steps,
        };

        let mut epochs_run = 0;
        for epoch in point.first_epoch..self.schedule.num_epochs {
            self.ctx.print(&format!(
                "Epoch {epoch}/{} started.",
                self.schedule.num_epochs - 1
            ));
            let cx = EpochContext {
                epoch,
                global_step,
                schedule: &self.schedule,
                logger: &self.logger,
                checkpointer: &checkpointer,
                log_every_steps: self.config.experiment.log_every_steps,
            };
            global_step = runner.run_epoch(bundle, &cx)?;
            epochs_run += 1;

            // The step budget, not the epoch estimate, decides termination.
            if self.schedule.complete(global_step) {
                self.ctx.print(&format!(
                    "Finishing training: Global step is >= Max train steps: {global_step} >= {}",
                    self.schedule.max_train_steps
                ));
                break;
            }
        }

        self.ctx.wait_for_everyone("post-train")?;

        let final_checkpoint = checkpointer.save(&bundle.snapshot()?, global_step)?;

        let mut exported_weights = None;
        if self.ctx.is_main_process() {
            if let Some(ema) = &bundle.ema {
                // The shadow parameters become the exported weights.
                let shadow = ema.state_bytes()?;
                bundle.model.load_state(&shadow)?;
            }
            let path = bundle
                .model
                .export_weights(&self.config.experiment.output_dir)?;
            self.logger
                .info(format!("Saved final model weights to {}", path.display()));
            exported_weights = Some(path);
        }

        self.ctx.end_training()?;

        Ok(TrainReport {
            global_step,
            epochs_run,
            final_checkpoint,
            exported_weights,
            resumed_from: point.resumed_from,
        })
    }
}
