use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Entries kept for `GET /api/logs`; older ones fall off the front.
pub const MAX_LOG_ENTRIES: usize = 200;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogEntry {
    pub time: String,
    pub level: String,
    pub source: String,
    pub message: String,
}

pub type SharedLogs = Arc<Mutex<Vec<LogEntry>>>;

pub fn new_log_buffer() -> SharedLogs {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn add_log_entry(logs: &Mutex<Vec<LogEntry>>, level: &str, source: &str, message: &str) -> LogEntry {
    let entry = LogEntry {
        time: Local::now().format("%H:%M:%S").to_string(),
        level: level.to_string(),
        source: source.to_string(),
        message: message.to_string(),
    };
    // A panic while holding the lock leaves the buffer usable.
    let mut logs = logs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    logs.push(entry.clone());
    if logs.len() > MAX_LOG_ENTRIES {
        let overflow = logs.len() - MAX_LOG_ENTRIES;
        logs.drain(..overflow);
    }
    entry
}

/// Record in the ring buffer and emit through tracing.
pub fn add_log(logs: &Mutex<Vec<LogEntry>>, level: &str, source: &str, message: &str) {
    match level {
        "ERROR" => tracing::error!(source = source, "{}", message),
        "WARN" => tracing::warn!(source = source, "{}", message),
        "DEBUG" => tracing::debug!(source = source, "{}", message),
        _ => tracing::info!(source = source, "{}", message),
    }
    add_log_entry(logs, level, source, message);
}

pub fn snapshot(logs: &Mutex<Vec<LogEntry>>) -> Vec<LogEntry> {
    logs.lock()
        .map(|entries| entries.clone())
        .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
}
