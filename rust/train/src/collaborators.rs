//! Interfaces to the external training collaborators.
//!
//! The model, optimizer, scheduler, dataloader, and tokenizer are built by
//! factories outside this crate; the orchestrator drives them through these
//! traits only.

use std::path::{Path, PathBuf};

use lar_checkpoint::{ComponentError, StateBundle, StatefulComponent};
use lar_logging::Logger;

use crate::{
    error::TrainError,
    orchestrator::Checkpointer,
    schedule::TrainSchedule,
};

/// The trained model: checkpointable state plus final weight export.
pub trait ModelState: StatefulComponent {
    /// Write the inference weights file into `output_dir` and return its
    /// path. Called on the primary process only, after EMA merge.
    fn export_weights(&self, output_dir: &Path) -> Result<PathBuf, ComponentError>;
}

/// The frozen latent tokenizer: weights are loaded once at startup and
/// never trained.
pub trait FrozenTokenizer {
    fn load_state_dict(&mut self, bytes: &[u8], strict: bool) -> Result<(), ComponentError>;
}

/// Read tokenizer weights from disk and load them strictly.
pub fn load_frozen_tokenizer(
    tokenizer: &mut dyn FrozenTokenizer,
    weights: &Path,
) -> Result<(), TrainError> {
    let bytes =
        std::fs::read(weights).map_err(|e| TrainError::Io(weights.to_path_buf(), e))?;
    tokenizer
        .load_state_dict(&bytes, true)
        .map_err(TrainError::from)
}

/// The mutable trainable state for one run, owned by the caller.
pub struct TrainerBundle<'a> {
    pub model: &'a mut dyn ModelState,
    pub optimizer: &'a mut dyn StatefulComponent,
    pub scheduler: &'a mut dyn StatefulComponent,
    /// Present exactly when the run is configured with `use_ema`.
    pub ema: Option<&'a mut dyn StatefulComponent>,
}

impl TrainerBundle<'_> {
    /// Serialize every component for checkpointing.
    pub fn snapshot(&self) -> Result<StateBundle, ComponentError> {
        let mut bundle = StateBundle::new();
        bundle.insert(self.model.name(), self.model.state_bytes()?);
        bundle.insert(self.optimizer.name(), self.optimizer.state_bytes()?);
        bundle.insert(self.scheduler.name(), self.scheduler.state_bytes()?);
        if let Some(ema) = &self.ema {
            bundle.insert(ema.name(), ema.state_bytes()?);
        }
        Ok(bundle)
    }

    pub(crate) fn components_mut(&mut self) -> Vec<&mut dyn StatefulComponent> {
        let mut components: Vec<&mut dyn StatefulComponent> =
            vec![&mut *self.model, &mut *self.optimizer, &mut *self.scheduler];
        if let Some(ema) = self.ema.as_mut() {
            components.push(&mut **ema);
        }
        components
    }
}

/// Everything the step loop needs from the orchestrator for one epoch.
pub struct EpochContext<'a> {
    pub epoch: usize,
    /// Optimizer updates completed before this epoch.
    pub global_step: u64,
    pub schedule: &'a TrainSchedule,
    pub logger: &'a Logger,
    pub checkpointer: &'a Checkpointer<'a>,
    /// Emit step metrics every this many updates.
    pub log_every_steps: u64,
}

/// The external step loop: forward/backward/update over one epoch of data.
///
/// Receives and returns the running global step; must increment it exactly
/// once per completed optimizer update. Errors propagate to the caller
/// unchanged; the orchestrator never retries.
pub trait EpochRunner {
    fn run_epoch(
        &mut self,
        bundle: &mut TrainerBundle<'_>,
        cx: &EpochContext<'_>,
    ) -> Result<u64, TrainError>;
}
