#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Multi-process-aware structured logging.
//!
//! Each process owns a [`LogRegistry`] keyed by its rank. Loggers write a
//! severity-marked console stream (primary rank only in multiprocess mode)
//! and a durable per-rank file stream.

mod logger;
mod registry;

pub use logger::{LogError, LogLevel, Logger};
pub use registry::{LogRegistry, LoggerSpec};
