//! Process-local logger registry.
//!
//! One registry per process, constructed with that process's rank. Loggers
//! are cached by their full configuration so a repeated request returns the
//! existing handle instead of attaching handlers a second time.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Mutex,
};

use crate::logger::{LogError, LogLevel, Logger};

/// Full logger configuration; doubles as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoggerSpec {
    pub name: String,
    pub level: LogLevel,
    pub color: bool,
    /// Suppress console output on non-primary ranks.
    pub multiprocess: bool,
    pub output_file: Option<PathBuf>,
}

impl LoggerSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: LogLevel::Info,
            color: true,
            multiprocess: true,
            output_file: None,
        }
    }

    #[must_use]
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    #[must_use]
    pub fn multiprocess(mut self, multiprocess: bool) -> Self {
        self.multiprocess = multiprocess;
        self
    }

    #[must_use]
    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }
}

/// Keyed logger cache owned by the process.
pub struct LogRegistry {
    rank: usize,
    loggers: Mutex<HashMap<LoggerSpec, Logger>>,
}

impl LogRegistry {
    #[must_use]
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            loggers: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Per-rank log file path inside `output_dir` (`log0.txt`, `log1.txt`, ...).
    #[must_use]
    pub fn rank_log_file(&self, output_dir: &std::path::Path) -> PathBuf {
        output_dir.join(format!("log{}.txt", self.rank))
    }

    /// Get or create the logger for `spec`.
    ///
    /// Idempotent: a second call with an identical spec returns the same
    /// instance, so handlers are attached exactly once per key.
    pub fn get_logger(&self, spec: &LoggerSpec) -> Result<Logger, LogError> {
        let mut loggers = match self.loggers.lock() {
            Ok(loggers) => loggers,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = loggers.get(spec) {
            return Ok(existing.clone());
        }
        let suppress_console = spec.multiprocess && self.rank != 0;
        let logger = Logger::create(
            &spec.name,
            spec.level,
            spec.color,
            suppress_console,
            spec.output_file.as_ref(),
        )?;
        loggers.insert(spec.clone(), logger.clone());
        Ok(logger)
    }
}
