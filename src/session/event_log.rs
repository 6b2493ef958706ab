use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use uuid::Uuid;

use crate::models::Side;
use crate::session::storage::{load_json, save_json, LocalStore, EVENT_LOG_KEY};

/// Display tag of a log line
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogColor {
    White,
    Black,
    Info,
    Warning,
}

impl From<Side> for LogColor {
    fn from(side: Side) -> Self {
        match side {
            Side::White => LogColor::White,
            Side::Black => LogColor::Black,
        }
    }
}

/// One human-readable game event
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: String,
    pub message: String,
    pub color: LogColor,
    pub timestamp: DateTime<Utc>,
}

/// Append-only, capacity-bounded log, written through to local storage
pub struct EventLog {
    entries: Vec<LogEntry>,
    capacity: usize,
    store: Rc<dyn LocalStore>,
}

impl EventLog {
    /// Hydrates the log from storage. Malformed data starts an empty log.
    pub fn load(store: Rc<dyn LocalStore>, capacity: usize) -> Self {
        let mut entries: Vec<LogEntry> = load_json(store.as_ref(), EVENT_LOG_KEY).unwrap_or_default();
        let capacity = capacity.max(1);
        if entries.len() > capacity {
            entries.drain(..entries.len() - capacity);
        }
        EventLog {
            entries,
            capacity,
            store,
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append(&mut self, message: impl AsRef<str>, color: LogColor) -> LogEntry {
        let timestamp = Utc::now();
        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            message: format!("[{}] {}", timestamp.format("%H:%M:%S"), message.as_ref()),
            color,
            timestamp,
        };
        self.entries.push(entry.clone());
        if self.entries.len() > self.capacity {
            let excess = self.entries.len() - self.capacity;
            self.entries.drain(..excess);
        }
        self.persist();
        entry
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = save_json(self.store.as_ref(), EVENT_LOG_KEY, &self.entries) {
            warn!("[LOG] Failed to persist event log: {}", e);
        }
    }
}
