#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Run configuration for the lar trainer.
//!
//! A typed, eagerly-validated configuration tree loaded once at startup and
//! read-only for the rest of the run.

mod load;
mod run;

pub use load::ConfigError;
pub use run::{
    DatasetConfig, DatasetParams, ExperimentConfig, MixedPrecision, RunConfig, TrainingConfig,
    hub_cache_dir,
};
