//! The interface the trainer holds onto the data-parallel execution backend.
//!
//! One OS process per device, all running the same program. The backend owns
//! device placement and gradient synchronization; the trainer only needs
//! rank identity, rendezvous points, and tracker lifecycle.

use std::path::PathBuf;

use lar_config::{MixedPrecision, RunConfig};

/// Device a process trains on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
    Metal,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(index) => write!(f, "cuda:{index}"),
            Self::Metal => write!(f, "metal"),
        }
    }
}

/// Experiment tracker backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerKind {
    Tensorboard,
    Wandb,
}

impl std::fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tensorboard => write!(f, "tensorboard"),
            Self::Wandb => write!(f, "wandb"),
        }
    }
}

/// Construction-time hints for the execution backend.
#[derive(Debug, Clone)]
pub struct DistOptions {
    pub gradient_accumulation_steps: u64,
    pub mixed_precision: MixedPrecision,
    pub enable_tf32: bool,
    pub tracker: TrackerKind,
    /// Directory the tracker writes its event logs into.
    pub project_dir: PathBuf,
}

impl DistOptions {
    /// Backend options a run configuration asks for.
    #[must_use]
    pub fn from_run(config: &RunConfig) -> Self {
        Self {
            gradient_accumulation_steps: config.training.gradient_accumulation_steps,
            mixed_precision: config.training.mixed_precision,
            enable_tf32: config.training.enable_tf32,
            tracker: if config.training.enable_wandb {
                TrackerKind::Wandb
            } else {
                TrackerKind::Tensorboard
            },
            project_dir: config.experiment.logging_dir(),
        }
    }
}

/// Training units handed to the backend for placement and gradient sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparedUnit {
    Model,
    Optimizer,
    LrScheduler,
    /// Only included when batches come from a pre-tokenized cache; a
    /// distribution-aware dataloader shards itself.
    Dataloader,
}

/// Handle to the data-parallel execution backend.
pub trait DistributedContext {
    fn process_index(&self) -> usize;

    fn num_processes(&self) -> usize;

    /// The single process allowed to perform non-replicated side effects.
    fn is_main_process(&self) -> bool {
        self.process_index() == 0
    }

    /// Device this process trains on.
    fn device(&self) -> Device;

    /// Named rendezvous: every process must reach the same `point` before
    /// any process continues past it.
    fn wait_for_everyone(&self, point: &str) -> Result<(), DistError>;

    /// Register the units that participate in device placement and
    /// gradient synchronization.
    fn prepare(&self, units: &[PreparedUnit]) -> Result<(), DistError>;

    /// Start the experiment tracker. No-op on non-primary processes.
    fn init_trackers(&self, run_name: &str) -> Result<(), DistError>;

    /// Flush and close the tracker at run end.
    fn end_training(&self) -> Result<(), DistError>;

    /// Console line visible from the primary process only.
    fn print(&self, message: &str);
}

/// Per-device seed so each rank draws an independent stream.
#[must_use]
pub fn device_seed(base: u64, process_index: usize) -> u64 {
    base.wrapping_add(process_index as u64)
}

/// Errors raised by the execution backend.
#[derive(Debug, thiserror::Error)]
pub enum DistError {
    #[error("rendezvous {0} failed: {1}")]
    Barrier(String, String),
    #[error("tracker error: {0}")]
    Tracker(String),
    #[error("prepare failed: {0}")]
    Prepare(String),
}
