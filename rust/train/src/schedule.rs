//! Step and epoch accounting.

use lar_config::RunConfig;

/// Derived bookkeeping quantities for the epoch loop.
///
/// These convert the optimizer-update budget into epoch iterations. They are
/// estimates for loop bounds and log lines only; termination is always the
/// `global_step >= max_train_steps` comparison, so rounding here can never
/// over- or under-train the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainSchedule {
    pub max_train_steps: u64,
    pub gradient_accumulation_steps: u64,
    pub per_gpu_batch_size: u64,
    /// Per-process batch size times process count.
    pub effective_batch_size: u64,
    pub batches_per_epoch: u64,
    /// Optimizer updates one epoch contributes.
    pub updates_per_epoch: u64,
    pub num_epochs: usize,
}

impl TrainSchedule {
    /// Derive the schedule from a validated configuration and the process
    /// count reported by the execution backend.
    #[must_use]
    pub fn derive(config: &RunConfig, num_processes: usize) -> Self {
        let per_gpu_batch_size = config.training.per_gpu_batch_size;
        let gradient_accumulation_steps = config.training.gradient_accumulation_steps;
        let max_train_steps = config.training.max_train_steps;

        let effective_batch_size = per_gpu_batch_size * num_processes.max(1) as u64;
        let batches_per_epoch = config
            .experiment
            .max_train_examples
            .div_ceil(effective_batch_size);
        let updates_per_epoch = batches_per_epoch.div_ceil(gradient_accumulation_steps);
        let num_epochs = max_train_steps.div_ceil(updates_per_epoch) as usize;

        Self {
            max_train_steps,
            gradient_accumulation_steps,
            per_gpu_batch_size,
            effective_batch_size,
            batches_per_epoch,
            updates_per_epoch,
            num_epochs,
        }
    }

    /// Batch size one optimizer update trains on, accumulation included.
    #[must_use]
    pub fn total_batch_size(&self) -> u64 {
        self.effective_batch_size * self.gradient_accumulation_steps
    }

    /// Whether the step budget has been met or exceeded.
    #[must_use]
    pub fn complete(&self, global_step: u64) -> bool {
        global_step >= self.max_train_steps
    }

    /// Epoch a run at `global_step` resumes into.
    #[must_use]
    pub fn epoch_for_step(&self, global_step: u64) -> usize {
        (global_step / self.updates_per_epoch.max(1)) as usize
    }
}

#[cfg(test)]
mod tests {
    use lar_config::{DatasetConfig, ExperimentConfig, RunConfig, TrainingConfig};

    use super::*;

    fn config(
        max_train_examples: u64,
        per_gpu_batch_size: u64,
        gradient_accumulation_steps: u64,
        max_train_steps: u64,
    ) -> RunConfig {
        RunConfig {
            experiment: ExperimentConfig {
                name: "schedule-test".to_string(),
                output_dir: "./out/schedule-test".into(),
                logging_dir: None,
                max_train_examples,
                save_every_steps: 0,
                log_every_steps: 50,
                checkpoints_kept: 3,
            },
            training: TrainingConfig {
                max_train_steps,
                gradient_accumulation_steps,
                per_gpu_batch_size,
                mixed_precision: lar_config::MixedPrecision::No,
                enable_tf32: false,
                enable_wandb: false,
                seed: None,
                use_ema: false,
            },
            dataset: DatasetConfig::default(),
        }
    }

    #[test]
    fn test_two_process_derivation() {
        let schedule = TrainSchedule::derive(&config(1000, 10, 5, 3), 2);
        assert_eq!(schedule.effective_batch_size, 20);
        assert_eq!(schedule.batches_per_epoch, 50);
        assert_eq!(schedule.updates_per_epoch, 10);
        assert_eq!(schedule.num_epochs, 1);
        assert_eq!(schedule.total_batch_size(), 100);
    }

    #[test]
    fn test_epoch_count_ceiling_property() {
        let cases = [
            (1000, 10, 5, 3, 2),
            (1000, 10, 1, 173, 4),
            (999, 7, 3, 5000, 8),
            (1, 1, 1, 1, 1),
            (100_000, 32, 2, 400_000, 8),
        ];
        for (examples, batch, accum, steps, procs) in cases {
            let schedule = TrainSchedule::derive(&config(examples, batch, accum, steps), procs);
            let epochs = schedule.num_epochs as u64;
            assert!(
                epochs * schedule.updates_per_epoch >= steps,
                "budget not covered for {examples}/{batch}/{accum}/{steps}/{procs}"
            );
            assert!(
                (epochs - 1) * schedule.updates_per_epoch < steps,
                "one epoch too many for {examples}/{batch}/{accum}/{steps}/{procs}"
            );
        }
    }

    #[test]
    fn test_completion_is_step_authoritative() {
        let schedule = TrainSchedule::derive(&config(1000, 10, 5, 3), 2);
        assert!(!schedule.complete(2));
        assert!(schedule.complete(3));
        assert!(schedule.complete(4));
    }

    #[test]
    fn test_epoch_for_step_floor_division() {
        let schedule = TrainSchedule::derive(&config(1000, 10, 5, 30), 2);
        assert_eq!(schedule.updates_per_epoch, 10);
        assert_eq!(schedule.epoch_for_step(0), 0);
        assert_eq!(schedule.epoch_for_step(3), 0);
        assert_eq!(schedule.epoch_for_step(10), 1);
        assert_eq!(schedule.epoch_for_step(25), 2);
    }
}
