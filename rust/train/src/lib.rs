#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation
)]

//! Training orchestration for the latent-token autoregressive generator.
//!
//! Converts a global optimizer-update budget into epoch iterations,
//! delegates forward/backward/update work to an external step loop, and
//! owns checkpoint cadence, auto-resume, and the final weight export.

mod collaborators;
mod error;
mod orchestrator;
mod schedule;

pub use collaborators::{
    EpochContext, EpochRunner, FrozenTokenizer, ModelState, TrainerBundle, load_frozen_tokenizer,
};
pub use error::TrainError;
pub use orchestrator::{Checkpointer, Orchestrator, TrainReport};
pub use schedule::TrainSchedule;
