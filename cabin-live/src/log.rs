//! Capped diagnostic log of every frame and notable session occurrence.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// Default number of entries retained.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// What produced a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogCategory {
    /// A frame written to the server.
    #[serde(rename = "client.send")]
    ClientSend,
    /// A message parsed from the server.
    #[serde(rename = "server.receive")]
    ServerReceive,
    /// Connect, disconnect and close.
    #[serde(rename = "lifecycle")]
    Lifecycle,
    /// Tool dispatch and results.
    #[serde(rename = "tool")]
    Tool,
    /// Microphone and speaker.
    #[serde(rename = "audio")]
    Audio,
    /// Errors and anything unexpected.
    #[serde(rename = "diagnostic")]
    Diagnostic,
}

impl LogCategory {
    /// Wire-style name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientSend => "client.send",
            Self::ServerReceive => "server.receive",
            Self::Lifecycle => "lifecycle",
            Self::Tool => "tool",
            Self::Audio => "audio",
            Self::Diagnostic => "diagnostic",
        }
    }
}

impl std::fmt::Display for LogCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingLogEntry {
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Source category.
    pub category: LogCategory,
    /// Structured payload.
    pub payload: Value,
}

/// Append-only ring buffer; the oldest entry is evicted when full.
///
/// Cloning yields another handle to the same buffer.
#[derive(Clone)]
pub struct StreamingLog {
    entries: Arc<Mutex<VecDeque<StreamingLogEntry>>>,
    capacity: usize,
}

impl StreamingLog {
    /// Create a log holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))), capacity }
    }

    /// Append an entry.
    pub fn push(&self, category: LogCategory, payload: Value) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(StreamingLogEntry { timestamp: Utc::now(), category, payload });
    }

    /// Copy of all retained entries, oldest first.
    pub fn entries(&self) -> Vec<StreamingLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Retained entries of one category, oldest first.
    pub fn entries_for(&self, category: LogCategory) -> Vec<StreamingLogEntry> {
        self.entries.lock().iter().filter(|e| e.category == category).cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for StreamingLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl std::fmt::Debug for StreamingLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingLog")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_oldest_entries_are_evicted() {
        let log = StreamingLog::new(3);
        for i in 0..5 {
            log.push(LogCategory::ClientSend, json!({ "seq": i }));
        }
        let seqs: Vec<i64> =
            log.entries().iter().map(|e| e.payload["seq"].as_i64().unwrap()).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let log = StreamingLog::new(0);
        log.push(LogCategory::Lifecycle, json!("a"));
        log.push(LogCategory::Lifecycle, json!("b"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].payload, json!("b"));
    }

    #[test]
    fn test_clones_share_storage_and_filter_by_category() {
        let log = StreamingLog::default();
        let handle = log.clone();
        handle.push(LogCategory::Tool, json!({ "name": "find_stations" }));
        log.push(LogCategory::Diagnostic, json!({ "error": "x" }));
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries_for(LogCategory::Tool).len(), 1);
        assert_eq!(log.capacity(), DEFAULT_LOG_CAPACITY);
        log.clear();
        assert!(handle.is_empty());
    }

    #[test]
    fn test_category_serializes_with_dotted_names() {
        assert_eq!(serde_json::to_value(LogCategory::ServerReceive).unwrap(), json!("server.receive"));
        assert_eq!(LogCategory::ClientSend.to_string(), "client.send");
    }
}
