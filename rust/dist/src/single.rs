//! Single-process execution backend.
//!
//! Rank 0 of 1; rendezvous points are no-ops. Used for single-GPU runs and
//! by the trainer's tests. Barriers, prepared units, and tracker calls are
//! recorded so tests can assert the trainer reached them.

use std::sync::Mutex;

use crate::context::{Device, DistError, DistOptions, DistributedContext, PreparedUnit};

pub struct SingleProcess {
    options: DistOptions,
    device: Device,
    barriers: Mutex<Vec<String>>,
    prepared: Mutex<Vec<PreparedUnit>>,
    tracker_runs: Mutex<Vec<String>>,
    quiet: bool,
}

impl SingleProcess {
    #[must_use]
    pub fn new(options: DistOptions) -> Self {
        Self {
            options,
            device: Device::Cpu,
            barriers: Mutex::new(Vec::new()),
            prepared: Mutex::new(Vec::new()),
            tracker_runs: Mutex::new(Vec::new()),
            quiet: false,
        }
    }

    /// Place this process on `device`.
    #[must_use]
    pub fn on_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Suppress `print` output (for tests).
    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    #[must_use]
    pub fn options(&self) -> &DistOptions {
        &self.options
    }

    /// Rendezvous points reached so far, in order.
    #[must_use]
    pub fn barriers_reached(&self) -> Vec<String> {
        self.barriers.lock().expect("barrier log poisoned").clone()
    }

    /// Units registered through `prepare`, in order.
    #[must_use]
    pub fn prepared_units(&self) -> Vec<PreparedUnit> {
        self.prepared.lock().expect("prepare log poisoned").clone()
    }

    /// Run names the tracker was initialized with.
    #[must_use]
    pub fn tracker_runs(&self) -> Vec<String> {
        self.tracker_runs
            .lock()
            .expect("tracker log poisoned")
            .clone()
    }
}

impl DistributedContext for SingleProcess {
    fn process_index(&self) -> usize {
        0
    }

    fn num_processes(&self) -> usize {
        1
    }

    fn device(&self) -> Device {
        self.device
    }

    fn wait_for_everyone(&self, point: &str) -> Result<(), DistError> {
        self.barriers
            .lock()
            .expect("barrier log poisoned")
            .push(point.to_string());
        Ok(())
    }

    fn prepare(&self, units: &[PreparedUnit]) -> Result<(), DistError> {
        self.prepared
            .lock()
            .expect("prepare log poisoned")
            .extend_from_slice(units);
        Ok(())
    }

    fn init_trackers(&self, run_name: &str) -> Result<(), DistError> {
        std::fs::create_dir_all(&self.options.project_dir)
            .map_err(|e| DistError::Tracker(e.to_string()))?;
        self.tracker_runs
            .lock()
            .expect("tracker log poisoned")
            .push(run_name.to_string());
        Ok(())
    }

    fn end_training(&self) -> Result<(), DistError> {
        Ok(())
    }

    fn print(&self, message: &str) {
        if !self.quiet {
            println!("{message}");
        }
    }
}
