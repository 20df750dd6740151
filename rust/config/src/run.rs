//! Run configuration schema.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Mixed-precision policy handed to the execution backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MixedPrecision {
    /// Full fp32 training.
    #[default]
    No,
    Fp16,
    Bf16,
}

impl std::fmt::Display for MixedPrecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::No => write!(f, "no"),
            Self::Fp16 => write!(f, "fp16"),
            Self::Bf16 => write!(f, "bf16"),
        }
    }
}

/// Experiment identity, output locations, and bookkeeping intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Run name, used for tracker initialization.
    pub name: String,
    /// Root directory for all run artifacts.
    pub output_dir: PathBuf,
    /// Tracker log directory. Defaults to `<output_dir>/logs`.
    #[serde(default)]
    pub logging_dir: Option<PathBuf>,
    /// Number of training examples an epoch is accounted against.
    pub max_train_examples: u64,
    /// Save a checkpoint every this many optimizer updates (0 = only at run end).
    #[serde(default = "default_save_every_steps")]
    pub save_every_steps: u64,
    /// Emit step metrics every this many optimizer updates.
    #[serde(default = "default_log_every_steps")]
    pub log_every_steps: u64,
    /// How many checkpoints to retain; older ones are pruned.
    #[serde(default = "default_checkpoints_kept")]
    pub checkpoints_kept: usize,
}

impl ExperimentConfig {
    /// Tracker log directory, derived from `output_dir` when not set explicitly.
    #[must_use]
    pub fn logging_dir(&self) -> PathBuf {
        self.logging_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("logs"))
    }
}

/// Training hyperparameters the orchestrator reads.
///
/// Model/optimizer hyperparameters live with their factories; only the
/// quantities that drive step accounting and the execution backend are here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Total optimizer-update budget for the run.
    pub max_train_steps: u64,
    #[serde(default = "default_grad_accum")]
    pub gradient_accumulation_steps: u64,
    pub per_gpu_batch_size: u64,
    #[serde(default)]
    pub mixed_precision: MixedPrecision,
    /// Allow TF32 matmuls on Ampere-class devices.
    #[serde(default)]
    pub enable_tf32: bool,
    /// Log to wandb instead of tensorboard.
    #[serde(default)]
    pub enable_wandb: bool,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Track an exponential-moving-average shadow of the model parameters.
    #[serde(default)]
    pub use_ema: bool,
}

/// Dataset collaborator parameters the orchestrator inspects.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatasetParams {
    /// When set, batches come from a pre-tokenized latent cache and the
    /// dataloader must be handed to the execution backend for sharding.
    #[serde(default)]
    pub pretokenization: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatasetConfig {
    #[serde(default)]
    pub params: DatasetParams,
}

/// Immutable configuration tree for one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub experiment: ExperimentConfig,
    pub training: TrainingConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
}

fn default_save_every_steps() -> u64 {
    0
}
fn default_log_every_steps() -> u64 {
    50
}
fn default_checkpoints_kept() -> usize {
    3
}
fn default_grad_accum() -> u64 {
    1
}

impl RunConfig {
    /// Validate every field the training loop depends on.
    ///
    /// Runs at load time, before any process side effects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.experiment.name.trim().is_empty() {
            return Err(ConfigError::invalid("experiment.name", "must not be empty"));
        }
        if self.experiment.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid(
                "experiment.output_dir",
                "must not be empty",
            ));
        }
        if self.experiment.max_train_examples == 0 {
            return Err(ConfigError::invalid(
                "experiment.max_train_examples",
                "must be >= 1",
            ));
        }
        if self.training.max_train_steps == 0 {
            return Err(ConfigError::invalid(
                "training.max_train_steps",
                "must be >= 1",
            ));
        }
        if self.training.gradient_accumulation_steps == 0 {
            return Err(ConfigError::invalid(
                "training.gradient_accumulation_steps",
                "must be >= 1",
            ));
        }
        if self.training.per_gpu_batch_size == 0 {
            return Err(ConfigError::invalid(
                "training.per_gpu_batch_size",
                "must be >= 1",
            ));
        }
        Ok(())
    }

    /// Whether the dataloader joins `prepare` on the execution backend.
    #[must_use]
    pub fn prepare_dataloader(&self) -> bool {
        self.dataset
            .params
            .pretokenization
            .as_deref()
            .is_some_and(|p| !p.is_empty())
    }
}

/// Shared model-download cache, rooted at the `WORKSPACE` environment variable.
#[must_use]
pub fn hub_cache_dir() -> Option<PathBuf> {
    let workspace = std::env::var_os("WORKSPACE")?;
    if workspace.is_empty() {
        return None;
    }
    Some(Path::new(&workspace).join("models").join("hub"))
}
