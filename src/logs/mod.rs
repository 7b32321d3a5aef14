pub mod backend;
pub mod fetcher;
pub mod stream;

pub use backend::{HttpLogBackend, LogBackend, LogPage, PageRequest};
pub use fetcher::LogFetcher;
pub use stream::{StreamConfig, StreamCoordinator, StreamCursor, StreamHandles};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Represents a single log event retrieved from the log source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    /// Backend-assigned event time, milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Time the log source ingested the event, milliseconds since the Unix epoch
    pub ingestion_time: i64,
    pub message: String,
}

impl LogEvent {
    pub fn new(timestamp: i64, ingestion_time: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            ingestion_time,
            message: message.into(),
        }
    }

    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp)
    }

    /// ISO-8601 timestamp at second precision, falling back to the raw
    /// millisecond value when it is outside chrono's range.
    pub fn iso_timestamp(&self) -> String {
        match self.timestamp_utc() {
            Some(ts) => ts.to_rfc3339_opts(SecondsFormat::Secs, true),
            None => self.timestamp.to_string(),
        }
    }
}

/// Bounds and filter criteria for one fetch request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryWindow {
    pub log_group: String,
    /// Inclusive lower bound in epoch milliseconds; `None` means unbounded
    pub start_time: Option<i64>,
    /// Inclusive upper bound in epoch milliseconds; `None` means unbounded
    pub end_time: Option<i64>,
    /// Keep only the most recent `limit` events; 0 keeps everything
    pub limit: usize,
    pub filter_pattern: Option<String>,
    /// Restrict to these log streams; empty means every stream in the group
    pub log_stream_names: Vec<String>,
}

impl QueryWindow {
    pub fn new(log_group: impl Into<String>) -> Self {
        Self {
            log_group: log_group.into(),
            ..Self::default()
        }
    }

    pub fn with_range(mut self, start_time: Option<i64>, end_time: Option<i64>) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_filter(mut self, filter_pattern: Option<String>) -> Self {
        self.filter_pattern = filter_pattern;
        self
    }

    pub fn with_log_streams(mut self, log_stream_names: Vec<String>) -> Self {
        self.log_stream_names = log_stream_names;
        self
    }
}
