#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation
)]

//! Checkpoint persistence and auto-resume.
//!
//! Durable, atomically published snapshots of trainable state keyed by
//! global step, with retention pruning and a startup resolver that restores
//! the newest checkpoint into already-constructed collaborator objects.

mod bundle;
mod resume;
mod store;

pub use bundle::{
    ComponentError, EMA, ExpectedComponents, MODEL, OPTIMIZER, SCHEDULER, StateBundle,
    StatefulComponent,
};
pub use resume::{ResumeOptions, ResumePoint, auto_resume};
pub use store::{
    CheckpointError, CheckpointManifest, CheckpointRecord, CheckpointStore, FORMAT_VERSION,
};
