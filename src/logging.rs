//! Structured logging for probe runs.
//!
//! Every record carries the contest label so several probes writing to the same
//! sink stay distinguishable. Records go to an external callback when one is
//! configured and to a console printer otherwise.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Verbosity;

/// Convenience alias for external logging callbacks.
pub type LogCallback = Arc<dyn Fn(&ProbeLogRecord) + Send + Sync + 'static>;

/// Logging configuration shared by every probe component.
#[derive(Clone)]
pub struct LogConfig {
    pub verbose: Verbosity,
    pub external_logger: Option<LogCallback>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbose: Verbosity::Medium,
            external_logger: None,
        }
    }
}

impl LogConfig {
    pub fn new(verbose: Verbosity) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level.as_u8() <= level_ceiling(self.verbose)
    }
}

/// Log severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// Minimal keeps warnings so retries and capture fallbacks are never silent.
fn level_ceiling(verbose: Verbosity) -> u8 {
    match verbose {
        Verbosity::Minimal => LogLevel::Warn.as_u8(),
        Verbosity::Medium => LogLevel::Info.as_u8(),
        Verbosity::Detailed => LogLevel::Debug.as_u8(),
    }
}

/// Structured log entry shared with external callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeLogRecord {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub contest: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<Value>,
}

impl ProbeLogRecord {
    pub fn new(
        level: LogLevel,
        contest: impl Into<String>,
        message: impl Into<String>,
        auxiliary: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            contest: contest.into(),
            message: message.into(),
            auxiliary,
        }
    }

    /// Single-line rendering: `[timestamp] [LEVEL] [contest] message`.
    pub fn line(&self) -> String {
        let mut line = format!(
            "[{}] [{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level.label(),
            self.contest,
            self.message
        );
        if let Some(aux) = self.auxiliary.as_ref().filter(|aux| !aux.is_null()) {
            line.push(' ');
            line.push_str(&aux.to_string());
        }
        line
    }
}

/// Default console printer used when no external logger is configured.
pub fn default_log_handler(record: &ProbeLogRecord) {
    match record.level {
        LogLevel::Error | LogLevel::Warn => eprintln!("{}", record.line()),
        LogLevel::Info | LogLevel::Debug => println!("{}", record.line()),
    }
}

/// Forward records to the `log` facade, keeping the contest as the target.
pub fn log_crate_handler() -> LogCallback {
    Arc::new(|record: &ProbeLogRecord| {
        let level = match record.level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        };
        match record.auxiliary.as_ref().filter(|aux| !aux.is_null()) {
            Some(aux) => log::log!(level, "[{}] {} {}", record.contest, record.message, aux),
            None => log::log!(level, "[{}] {}", record.contest, record.message),
        }
    })
}

/// Append every record as a line to `path`, creating the file if needed.
pub fn file_log_sink(path: &Path) -> io::Result<LogCallback> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let file = Mutex::new(file);
    Ok(Arc::new(move |record: &ProbeLogRecord| {
        if let Ok(mut file) = file.lock() {
            let _ = writeln!(file, "{}", record.line());
        }
    }))
}

/// Combine several sinks into one callback.
pub fn fan_out(sinks: Vec<LogCallback>) -> LogCallback {
    Arc::new(move |record: &ProbeLogRecord| {
        for sink in &sinks {
            sink(record);
        }
    })
}

/// Logger tagging each record with a contest label.
pub struct ProbeLogger {
    config: LogConfig,
    default_handler: LogCallback,
}

impl fmt::Debug for ProbeLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeLogger")
            .field("verbosity", &self.config.verbose)
            .field("external_logger", &self.config.external_logger.is_some())
            .finish()
    }
}

impl Default for ProbeLogger {
    fn default() -> Self {
        Self::new(Verbosity::default())
    }
}

impl ProbeLogger {
    pub fn with_config(config: LogConfig) -> Self {
        Self {
            config,
            default_handler: Arc::new(default_log_handler),
        }
    }

    pub fn new(verbose: Verbosity) -> Self {
        Self::with_config(LogConfig::new(verbose))
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn set_verbose(&mut self, verbose: Verbosity) {
        self.config.verbose = verbose;
    }

    pub fn set_external_logger(&mut self, logger: Option<LogCallback>) {
        self.config.external_logger = logger;
    }

    pub fn log(
        &self,
        level: LogLevel,
        contest: &str,
        message: impl Into<String>,
        auxiliary: Option<Value>,
    ) {
        if !self.config.should_log(level) {
            return;
        }

        let record = ProbeLogRecord::new(level, contest, message, auxiliary);

        if let Some(callback) = &self.config.external_logger {
            callback(&record);
        } else {
            (self.default_handler)(&record);
        }
    }

    pub fn error(&self, contest: &str, message: impl Into<String>, auxiliary: Option<Value>) {
        self.log(LogLevel::Error, contest, message, auxiliary);
    }

    pub fn warn(&self, contest: &str, message: impl Into<String>, auxiliary: Option<Value>) {
        self.log(LogLevel::Warn, contest, message, auxiliary);
    }

    pub fn info(&self, contest: &str, message: impl Into<String>, auxiliary: Option<Value>) {
        self.log(LogLevel::Info, contest, message, auxiliary);
    }

    pub fn debug(&self, contest: &str, message: impl Into<String>, auxiliary: Option<Value>) {
        self.log(LogLevel::Debug, contest, message, auxiliary);
    }
}
