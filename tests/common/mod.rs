//! Shared helpers for the integration tests: an in-memory log source that
//! pages, filters and fails on demand.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tailscope::error::BackendError;
use tailscope::logs::{LogBackend, LogEvent, LogFetcher, LogPage, PageRequest};

pub struct InMemoryBackend {
    /// Events in arrival order; the backend never sorts them
    events: Mutex<Vec<LogEvent>>,
    page_size: usize,
    requests: Mutex<Vec<PageRequest>>,
    /// Requests numbered at or after this one fail
    fail_from: Mutex<Option<usize>>,
    delay: Option<Duration>,
}

impl InMemoryBackend {
    pub fn new(events: Vec<LogEvent>, page_size: usize) -> Self {
        Self {
            events: Mutex::new(events),
            page_size: page_size.max(1),
            requests: Mutex::new(Vec::new()),
            fail_from: Mutex::new(None),
            delay: None,
        }
    }

    /// Sleep before answering each request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_from_request(&self, request_number: usize) {
        *self.fail_from.lock().unwrap() = Some(request_number);
    }

    pub fn push(&self, event: LogEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn matches(request: &PageRequest, event: &LogEvent) -> bool {
        let after_start = request.start_time.map_or(true, |start| event.timestamp >= start);
        let before_end = request.end_time.map_or(true, |end| event.timestamp <= end);
        let matches_filter = request.filter_pattern.as_ref().map_or(true, |pattern| {
            event.message.to_lowercase().contains(&pattern.to_lowercase())
        });
        after_start && before_end && matches_filter
    }
}

#[async_trait]
impl LogBackend for InMemoryBackend {
    async fn request_page(&self, request: PageRequest) -> Result<LogPage, BackendError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let request_number = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };

        if let Some(fail_from) = *self.fail_from.lock().unwrap() {
            if request_number >= fail_from {
                return Err(BackendError::Unavailable(format!(
                    "scripted failure on request {}",
                    request_number
                )));
            }
        }

        let matching: Vec<LogEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| Self::matches(&request, event))
            .cloned()
            .collect();

        let offset = request
            .next_token
            .as_deref()
            .and_then(|token| token.parse::<usize>().ok())
            .unwrap_or(0)
            .min(matching.len());
        let end = (offset + self.page_size).min(matching.len());

        Ok(LogPage {
            events: matching[offset..end].to_vec(),
            next_token: (end < matching.len()).then(|| end.to_string()),
        })
    }
}

pub fn fetcher_for(backend: &Arc<InMemoryBackend>) -> LogFetcher {
    LogFetcher::new(backend.clone())
}

pub fn event(timestamp: i64, message: &str) -> LogEvent {
    LogEvent::new(timestamp, timestamp + 5, message)
}
