//! Durable, atomic persistence of training checkpoints.
//!
//! Checkpoints are directories named `checkpoint-{step}` under the run's
//! output directory. The primary process writes the full content into a
//! `.tmp` sibling and renames it into place, so readers only ever observe
//! complete checkpoints. A shared/exclusive lock on `.checkpoints.lock`
//! keeps pruning from removing a checkpoint that is currently being read.

use std::{
    collections::BTreeMap,
    fs::File,
    path::{Path, PathBuf},
};

use fs2::FileExt;
use lar_dist::{DistError, DistributedContext};
use serde::{Deserialize, Serialize};

use crate::bundle::{ExpectedComponents, StateBundle};

/// On-disk manifest format version.
pub const FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const CHECKPOINT_PREFIX: &str = "checkpoint-";
const TMP_SUFFIX: &str = ".tmp";
const LOCK_FILE: &str = ".checkpoints.lock";
const PAYLOAD_EXT: &str = "st";

/// Checkpoint metadata persisted next to the component payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub format_version: u32,
    /// Completed optimizer updates at save time.
    pub global_step: u64,
    /// Component payloads present in this checkpoint.
    pub components: Vec<String>,
    /// Process count the state was saved under.
    pub world_size: usize,
    pub seed: Option<u64>,
    pub created_at: String,
}

/// A fully loaded checkpoint.
#[derive(Debug)]
pub struct CheckpointRecord {
    pub manifest: CheckpointManifest,
    components: BTreeMap<String, Vec<u8>>,
    pub path: PathBuf,
}

impl CheckpointRecord {
    #[must_use]
    pub fn global_step(&self) -> u64 {
        self.manifest.global_step
    }

    #[must_use]
    pub fn component(&self, name: &str) -> Option<&[u8]> {
        self.components.get(name).map(Vec::as_slice)
    }
}

/// Versioned checkpoint directory manager.
pub struct CheckpointStore {
    root: PathBuf,
    /// Retention cap; 0 keeps everything.
    keep: usize,
}

fn dir_name(step: u64) -> String {
    format!("{CHECKPOINT_PREFIX}{step}")
}

fn parse_step(name: &str) -> Option<u64> {
    name.strip_prefix(CHECKPOINT_PREFIX)?.parse().ok()
}

/// Get current time as a local timestamp string.
fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

impl CheckpointStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            root: root.into(),
            keep,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a checkpoint for `step` lives in (whether or not it exists).
    #[must_use]
    pub fn path_for(&self, step: u64) -> PathBuf {
        self.root.join(dir_name(step))
    }

    fn lock_file(&self) -> Result<File, CheckpointError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| CheckpointError::Io(self.root.clone(), e))?;
        let path = self.root.join(LOCK_FILE);
        File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| CheckpointError::Io(path, e))
    }

    /// Persist `bundle` as the checkpoint for `step`.
    ///
    /// Safe to call from every process: only the primary writes, and every
    /// process rendezvouses afterwards so none continues before the
    /// checkpoint is durable. Returns the published path.
    pub fn save(
        &self,
        ctx: &dyn DistributedContext,
        bundle: &StateBundle,
        step: u64,
        seed: Option<u64>,
    ) -> Result<PathBuf, CheckpointError> {
        let final_dir = self.path_for(step);

        if ctx.is_main_process() {
            let tmp_dir = self.root.join(format!("{}{TMP_SUFFIX}", dir_name(step)));
            // A stale tmp dir is a leftover from an interrupted save at the
            // same step; replace it wholesale.
            if tmp_dir.exists() {
                std::fs::remove_dir_all(&tmp_dir)
                    .map_err(|e| CheckpointError::Io(tmp_dir.clone(), e))?;
            }
            std::fs::create_dir_all(&tmp_dir)
                .map_err(|e| CheckpointError::Io(tmp_dir.clone(), e))?;

            for (name, bytes) in bundle.iter() {
                let payload = tmp_dir.join(format!("{name}.{PAYLOAD_EXT}"));
                std::fs::write(&payload, bytes).map_err(|e| CheckpointError::Io(payload, e))?;
            }

            let manifest = CheckpointManifest {
                format_version: FORMAT_VERSION,
                global_step: step,
                components: bundle.names().iter().map(ToString::to_string).collect(),
                world_size: ctx.num_processes(),
                seed,
                created_at: now_timestamp(),
            };
            let manifest_path = tmp_dir.join(MANIFEST_FILE);
            let json = serde_json::to_vec_pretty(&manifest)
                .map_err(|e| CheckpointError::corrupt(&tmp_dir, e.to_string()))?;
            std::fs::write(&manifest_path, json)
                .map_err(|e| CheckpointError::Io(manifest_path, e))?;

            // Atomic publish. Everything is on disk before the rename, so a
            // crash leaves either the old checkpoint or the new one, never a
            // torn mix.
            {
                let lock = self.lock_file()?;
                lock.lock_exclusive()
                    .map_err(|e| CheckpointError::Io(self.root.clone(), e))?;
                if final_dir.exists() {
                    std::fs::remove_dir_all(&final_dir)
                        .map_err(|e| CheckpointError::Io(final_dir.clone(), e))?;
                }
                std::fs::rename(&tmp_dir, &final_dir)
                    .map_err(|e| CheckpointError::Io(final_dir.clone(), e))?;
                self.prune_locked()?;
                lock.unlock()
                    .map_err(|e| CheckpointError::Io(self.root.clone(), e))?;
            }
        }

        // No process may assume the checkpoint exists until the primary has
        // published it.
        ctx.wait_for_everyone("checkpoint")?;
        Ok(final_dir)
    }

    /// Load the checkpoint at `path`.
    ///
    /// Strict mode demands the component set matches `expected` exactly in
    /// both directions; non-strict tolerates absent optional components and
    /// ignores extras.
    pub fn load(
        &self,
        path: &Path,
        expected: &ExpectedComponents,
        strict: bool,
    ) -> Result<CheckpointRecord, CheckpointError> {
        if !path.is_dir() {
            return Err(CheckpointError::Missing(path.to_path_buf()));
        }

        let lock = self.lock_file()?;
        lock.lock_shared()
            .map_err(|e| CheckpointError::Io(self.root.clone(), e))?;
        let result = self.load_inner(path, expected, strict);
        lock.unlock()
            .map_err(|e| CheckpointError::Io(self.root.clone(), e))?;
        result
    }

    /// Read and validate the manifest only, without loading payloads.
    pub fn manifest(&self, path: &Path) -> Result<CheckpointManifest, CheckpointError> {
        if !path.is_dir() {
            return Err(CheckpointError::Missing(path.to_path_buf()));
        }
        let manifest_path = path.join(MANIFEST_FILE);
        let manifest_raw = std::fs::read_to_string(&manifest_path)
            .map_err(|e| CheckpointError::corrupt(path, format!("unreadable manifest: {e}")))?;
        let manifest: CheckpointManifest = serde_json::from_str(&manifest_raw)
            .map_err(|e| CheckpointError::corrupt(path, format!("malformed manifest: {e}")))?;

        if manifest.format_version != FORMAT_VERSION {
            return Err(CheckpointError::corrupt(
                path,
                format!(
                    "format version {} (supported: {FORMAT_VERSION})",
                    manifest.format_version
                ),
            ));
        }
        Ok(manifest)
    }

    fn load_inner(
        &self,
        path: &Path,
        expected: &ExpectedComponents,
        strict: bool,
    ) -> Result<CheckpointRecord, CheckpointError> {
        let manifest = self.manifest(path)?;

        let present = |name: &str| manifest.components.iter().any(|c| c == name);

        for name in &expected.required {
            if !present(name) {
                return Err(CheckpointError::corrupt(
                    path,
                    format!("missing required component {name}"),
                ));
            }
        }
        if strict {
            for name in &expected.optional {
                if !present(name) {
                    return Err(CheckpointError::corrupt(
                        path,
                        format!("missing component {name} (strict load)"),
                    ));
                }
            }
            for name in &manifest.components {
                if !expected.all().contains(&name.as_str()) {
                    return Err(CheckpointError::corrupt(
                        path,
                        format!("unexpected component {name} (strict load)"),
                    ));
                }
            }
        }

        let mut components = BTreeMap::new();
        for name in &manifest.components {
            let payload = path.join(format!("{name}.{PAYLOAD_EXT}"));
            let bytes = std::fs::read(&payload).map_err(|e| {
                CheckpointError::corrupt(path, format!("component {name} unreadable: {e}"))
            })?;
            components.insert(name.clone(), bytes);
        }

        Ok(CheckpointRecord {
            manifest,
            components,
            path: path.to_path_buf(),
        })
    }

    /// All published checkpoints, sorted by step ascending.
    pub fn list(&self) -> Result<Vec<(u64, PathBuf)>, CheckpointError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::Io(self.root.clone(), e)),
        };
        let mut checkpoints: Vec<(u64, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                parse_step(&name).map(|step| (step, e.path()))
            })
            .collect();
        checkpoints.sort_by_key(|(step, _)| *step);
        Ok(checkpoints)
    }

    /// The newest published checkpoint, if any.
    pub fn latest(&self) -> Result<Option<(u64, PathBuf)>, CheckpointError> {
        Ok(self.list()?.into_iter().next_back())
    }

    /// Apply the retention policy, removing oldest checkpoints beyond the cap.
    /// Returns the removed steps.
    pub fn prune(&self) -> Result<Vec<u64>, CheckpointError> {
        let lock = self.lock_file()?;
        lock.lock_exclusive()
            .map_err(|e| CheckpointError::Io(self.root.clone(), e))?;
        let removed = self.prune_locked();
        lock.unlock()
            .map_err(|e| CheckpointError::Io(self.root.clone(), e))?;
        removed
    }

    fn prune_locked(&self) -> Result<Vec<u64>, CheckpointError> {
        if self.keep == 0 {
            return Ok(Vec::new());
        }
        let checkpoints = self.list()?;
        let mut removed = Vec::new();
        if checkpoints.len() <= self.keep {
            return Ok(removed);
        }
        let excess = checkpoints.len() - self.keep;
        for (step, path) in checkpoints.into_iter().take(excess) {
            std::fs::remove_dir_all(&path).map_err(|e| CheckpointError::Io(path, e))?;
            removed.push(step);
        }
        Ok(removed)
    }
}

/// Errors that can occur around checkpoint persistence.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("no checkpoint found at {0}")]
    Missing(PathBuf),
    #[error("corrupt checkpoint at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("checkpoint io error at {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("rendezvous failed during checkpoint: {0}")]
    Sync(#[from] DistError),
}

impl CheckpointError {
    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}
