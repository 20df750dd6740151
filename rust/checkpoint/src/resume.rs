//! Auto-resume: decide at startup whether this is a fresh run or a
//! continuation, and restore state accordingly.

use std::path::PathBuf;

use lar_logging::Logger;

use crate::{
    bundle::{ExpectedComponents, StatefulComponent},
    store::{CheckpointError, CheckpointStore},
};

/// How resumption failures are handled.
#[derive(Debug, Clone, Copy)]
pub struct ResumeOptions {
    /// Fail instead of falling back to a fresh start when no checkpoint exists.
    pub mandatory: bool,
    /// Require the checkpoint's component set to match the run exactly.
    pub strict: bool,
}

impl Default for ResumeOptions {
    fn default() -> Self {
        Self {
            mandatory: false,
            strict: true,
        }
    }
}

/// Where the epoch loop starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub global_step: u64,
    pub first_epoch: usize,
    /// Checkpoint directory state was restored from, if any.
    pub resumed_from: Option<PathBuf>,
}

impl ResumePoint {
    fn fresh() -> Self {
        Self {
            global_step: 0,
            first_epoch: 0,
            resumed_from: None,
        }
    }
}

/// Inspect the store and restore the newest checkpoint into `components`.
///
/// With no checkpoint present this is a fresh start (unless resumption is
/// mandatory). A checkpoint that exists but cannot be restored is always
/// fatal: training progress must never be silently discarded.
///
/// Resumption is epoch-granular: the dataloader is not repositioned to the
/// exact micro-batch offset, only `first_epoch` is recomputed from the
/// restored step count.
pub fn auto_resume(
    store: &CheckpointStore,
    logger: &Logger,
    components: &mut [&mut dyn StatefulComponent],
    use_ema: bool,
    updates_per_epoch: u64,
    options: ResumeOptions,
) -> Result<ResumePoint, CheckpointError> {
    let Some((step, path)) = store.latest()? else {
        if options.mandatory {
            logger.error(format!(
                "resume required but no checkpoint found under {}",
                store.root().display()
            ));
            return Err(CheckpointError::Missing(store.root().to_path_buf()));
        }
        logger.info("No checkpoint found; starting from scratch");
        return Ok(ResumePoint::fresh());
    };

    let expected = ExpectedComponents::for_run(use_ema);
    let record = store.load(&path, &expected, options.strict)?;

    for component in components.iter_mut() {
        let name = component.name();
        match record.component(name) {
            Some(bytes) => {
                component
                    .load_state(bytes)
                    .map_err(|e| CheckpointError::Corrupt {
                        path: path.clone(),
                        reason: format!("restoring component {name}: {e}"),
                    })?;
            }
            None if expected.optional.contains(&name) => {
                logger.warning(format!(
                    "component {name} absent from checkpoint; initializing fresh"
                ));
            }
            None => {
                return Err(CheckpointError::Corrupt {
                    path: path.clone(),
                    reason: format!("component {name} absent from checkpoint"),
                });
            }
        }
    }

    let first_epoch = (step / updates_per_epoch.max(1)) as usize;
    logger.info(format!(
        "Resuming from {} (global step {step}, epoch {first_epoch})",
        path.display()
    ));

    Ok(ResumePoint {
        global_step: step,
        first_epoch,
        resumed_from: Some(path),
    })
}
