//! Append-only message log for display.
//!
//! Entries are never edited or removed while the process runs. Order across
//! producer threads is whatever order they took the lock in.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::constants::LOCAL_SENDER_LABEL;
use crate::time_utils;

/// One displayed line: `[timestamp] sender: text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// `%Y-%m-%d %H:%M:%S`
    pub timestamp: String,
    pub sender: String,
    pub text: String,
}

impl LogEntry {
    pub fn new(timestamp: impl Into<String>, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            sender: sender.into(),
            text: text.into(),
        }
    }

    /// Entry for a message this node sent, stamped now.
    pub fn local(text: impl Into<String>) -> Self {
        Self::new(time_utils::display(&time_utils::now()), LOCAL_SENDER_LABEL, text)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.timestamp, self.sender, self.text)
    }
}

#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn append(&self, entry: LogEntry) {
        self.lock().push(entry);
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        let entries = self.lock();
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
