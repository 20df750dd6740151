//! Trainer error type.

use std::path::PathBuf;

use lar_checkpoint::{CheckpointError, ComponentError};
use lar_config::ConfigError;
use lar_dist::DistError;
use lar_logging::LogError;

/// Errors that can abort a training run.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("distributed context error: {0}")]
    Dist(#[from] DistError),
    #[error("logging error: {0}")]
    Log(#[from] LogError),
    #[error("collaborator state error: {0}")]
    Component(#[from] ComponentError),
    #[error("io error at {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("collaborator failure: {0}")]
    Collaborator(String),
}
