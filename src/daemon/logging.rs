//! Structured lifecycle logging for the audit collector
//!
//! Each event is one log line: a human message followed by a JSON payload.

use log::{error, info};
use serde_json::json;
use std::path::Path;

/// Log levels for collector operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Info,
}

#[derive(Debug, Clone)]
pub struct CollectorLogger {
    subsystem: String,
    category: String,
    level: LogLevel,
}

impl CollectorLogger {
    pub fn new(subsystem: impl Into<String>, category: impl Into<String>, level: LogLevel) -> Self {
        Self {
            subsystem: subsystem.into(),
            category: category.into(),
            level,
        }
    }

    pub fn log_startup(&self, config_path: Option<&Path>, socket_path: &Path, log_path: &Path, pid: u32) {
        let message = json!({
            "event": "collector_startup",
            "pid": pid,
            "config_path": config_path.map(|p| p.display().to_string()),
            "socket_path": socket_path.display().to_string(),
            "log_path": log_path.display().to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.log_structured(LogLevel::Info, "Collector started", &message);
    }

    pub fn log_shutdown(&self, reason: &str) {
        let message = json!({
            "event": "collector_shutdown",
            "reason": reason,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.log_structured(LogLevel::Info, "Collector shutting down", &message);
    }

    pub fn log_trim(&self, log_path: &Path, kept: usize) {
        let message = json!({
            "event": "access_log_trimmed",
            "log_path": log_path.display().to_string(),
            "kept_entries": kept,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.log_structured(LogLevel::Info, "Access log trimmed", &message);
    }

    pub fn log_error(&self, error_message: &str, context: Option<&str>) {
        let message = json!({
            "event": "error",
            "message": error_message,
            "context": context,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.log_structured(LogLevel::Error, error_message, &message);
    }

    fn log_structured(&self, level: LogLevel, message: &str, data: &serde_json::Value) {
        if !self.should_log(level) {
            return;
        }
        let full_message = format!("[{}/{}] {} | {}", self.subsystem, self.category, message, data);
        match level {
            LogLevel::Error => error!("{}", full_message),
            LogLevel::Info => info!("{}", full_message),
        }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        match (self.level, level) {
            (LogLevel::Error, LogLevel::Error) => true,
            (LogLevel::Info, LogLevel::Error | LogLevel::Info) => true,
            _ => false,
        }
    }
}
