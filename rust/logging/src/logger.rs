//! Logger handles and their console/file handlers.

use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use colored::Colorize;

/// Log severity, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(LogError::UnknownLevel(other.to_string())),
        }
    }
}

pub(crate) struct LoggerInner {
    pub(crate) name: String,
    pub(crate) level: LogLevel,
    pub(crate) color: bool,
    /// Console lines are dropped on non-primary ranks when set; the file
    /// stream is unaffected.
    pub(crate) suppress_console: bool,
    pub(crate) file: Option<Mutex<BufWriter<File>>>,
}

/// A configured logger handle. Cheap to clone; clones share handlers.
#[derive(Clone)]
pub struct Logger(pub(crate) Arc<LoggerInner>);

fn timestamp() -> String {
    chrono::Local::now().format("%m/%d %H:%M:%S").to_string()
}

impl Logger {
    pub(crate) fn create(
        name: &str,
        level: LogLevel,
        color: bool,
        suppress_console: bool,
        output_file: Option<&PathBuf>,
    ) -> Result<Self, LogError> {
        let file = match output_file {
            Some(path) => {
                let handle = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| LogError::Io(path.display().to_string(), e))?;
                Some(Mutex::new(BufWriter::new(handle)))
            }
            None => None,
        };
        Ok(Self(Arc::new(LoggerInner {
            name: name.to_string(),
            level,
            color,
            suppress_console,
            file,
        })))
    }

    /// Whether two handles are the same configured instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of attached console handlers. Always exactly one.
    #[must_use]
    pub fn console_handlers(&self) -> usize {
        1
    }

    /// Number of attached file handlers.
    #[must_use]
    pub fn file_handlers(&self) -> usize {
        usize::from(self.0.file.is_some())
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message.as_ref());
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warning, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message.as_ref());
    }

    pub fn critical(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Critical, message.as_ref());
    }

    fn log(&self, level: LogLevel, message: &str) {
        if level < self.0.level {
            return;
        }
        let ts = timestamp();

        // File stream first: it is the durable audit trail.
        if let Some(file) = &self.0.file {
            let mut writer = match file.lock() {
                Ok(writer) => writer,
                Err(poisoned) => poisoned.into_inner(),
            };
            let _ = writeln!(writer, "[{ts}] {} {level}: {message}", self.0.name);
            let _ = writer.flush();
        }

        if self.0.suppress_console {
            return;
        }
        let line = if self.0.color {
            let prefix = format!("[{ts} {}]: ", self.0.name).green();
            match level {
                LogLevel::Warning => {
                    format!("{} {prefix}{message}", "WARNING".red().blink())
                }
                LogLevel::Error | LogLevel::Critical => {
                    format!("{} {prefix}{message}", "ERROR".red().blink().underline())
                }
                LogLevel::Debug | LogLevel::Info => format!("{prefix}{message}"),
            }
        } else {
            format!("[{ts}] {} {level}: {message}", self.0.name)
        };
        // Whole-line write through a held lock; concurrent handles cannot
        // interleave partial lines.
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let _ = writeln!(out, "{line}");
    }
}

/// Errors raised while configuring a logger.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to open log file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("unknown log level: {0}")]
    UnknownLevel(String),
}
