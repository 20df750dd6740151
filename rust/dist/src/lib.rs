#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Narrow interface to the data-parallel execution backend.

mod context;
mod single;

pub use context::{
    Device, DistError, DistOptions, DistributedContext, PreparedUnit, TrackerKind, device_seed,
};
pub use single::SingleProcess;
