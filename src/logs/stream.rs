use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::BackendError;
use crate::logs::{LogEvent, LogFetcher, QueryWindow};

/// Settings for one tailing stream
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub log_group: String,
    /// Lower bound for the first poll; later polls start after the cursor
    pub start_time: Option<i64>,
    /// Fixed upper bound; `None` means "now" at each poll
    pub end_time: Option<i64>,
    /// Limit applied to the first poll only
    pub initial_limit: usize,
    pub filter_pattern: Option<String>,
    pub log_stream_names: Vec<String>,
    pub poll_interval: Duration,
    pub channel_capacity: usize,
}

impl StreamConfig {
    pub fn new(log_group: impl Into<String>) -> Self {
        Self {
            log_group: log_group.into(),
            start_time: None,
            end_time: None,
            initial_limit: 0,
            filter_pattern: None,
            log_stream_names: Vec::new(),
            poll_interval: Duration::from_secs(2),
            channel_capacity: 1024,
        }
    }
}

/// Latest timestamp already emitted by a stream. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamCursor {
    last_emitted_timestamp: Option<i64>,
}

impl StreamCursor {
    pub fn last_emitted_timestamp(&self) -> Option<i64> {
        self.last_emitted_timestamp
    }

    pub fn advance(&mut self, timestamp: i64) {
        match self.last_emitted_timestamp {
            Some(last) if last >= timestamp => {}
            _ => self.last_emitted_timestamp = Some(timestamp),
        }
    }

    /// Build the window for the next poll, or `None` when the range left to
    /// cover is empty.
    ///
    /// Once anything was emitted the window starts one millisecond past the
    /// cursor, so the covered region is never requested again.
    pub fn next_window(&self, config: &StreamConfig, now_millis: i64) -> Option<QueryWindow> {
        let (start_time, limit) = match self.last_emitted_timestamp {
            Some(last) => (Some(last.saturating_add(1)), 0),
            None => (config.start_time, config.initial_limit),
        };
        let end_time = config.end_time.unwrap_or(now_millis);
        if start_time.is_some_and(|start| start > end_time) {
            return None;
        }

        Some(
            QueryWindow::new(config.log_group.clone())
                .with_range(start_time, Some(end_time))
                .with_limit(limit)
                .with_filter(config.filter_pattern.clone())
                .with_log_streams(config.log_stream_names.clone()),
        )
    }
}

/// Receiving ends of a running stream.
///
/// Both channels close once the background task exits. The task exits after
/// sending one error, after cancellation, or when the event receiver is dropped.
pub struct StreamHandles {
    pub events: mpsc::Receiver<LogEvent>,
    pub errors: mpsc::Receiver<BackendError>,
    pub task: JoinHandle<()>,
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Polls the fetcher on a timer and forwards new events
#[derive(Clone)]
pub struct StreamCoordinator {
    fetcher: LogFetcher,
    config: StreamConfig,
    clock: Clock,
}

impl StreamCoordinator {
    pub fn new(fetcher: LogFetcher, config: StreamConfig) -> Self {
        Self {
            fetcher,
            config,
            clock: Arc::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Replace the wall clock used for the "now" upper bound
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Start tailing in the background and return immediately
    pub fn start(&self, cancellation_token: CancellationToken) -> StreamHandles {
        let capacity = self.config.channel_capacity.max(1);
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (errors_tx, errors_rx) = mpsc::channel(1);

        let coordinator = self.clone();
        let task = tokio::spawn(async move {
            coordinator.run(events_tx, errors_tx, cancellation_token).await;
        });

        StreamHandles {
            events: events_rx,
            errors: errors_rx,
            task,
        }
    }

    async fn run(
        self,
        events_tx: mpsc::Sender<LogEvent>,
        errors_tx: mpsc::Sender<BackendError>,
        token: CancellationToken,
    ) {
        info!(
            "STREAM_TASK: Tailing {} every {:?}",
            self.config.log_group, self.config.poll_interval
        );
        let mut cursor = StreamCursor::default();
        let mut cycles = 0u64;
        let mut emitted = 0u64;

        'poll: loop {
            cycles += 1;
            let window = match cursor.next_window(&self.config, (self.clock)()) {
                Some(window) => Some(window),
                // Nothing past the cursor can fall inside a fixed end time
                None if self.config.end_time.is_some() => {
                    info!("STREAM_TASK: Reached the end of the window, stopping");
                    break 'poll;
                }
                None => {
                    debug!("STREAM_TASK: Cursor is ahead of the clock, skipping cycle {}", cycles);
                    None
                }
            };

            if let Some(window) = window {
                debug!(
                    "STREAM_TASK: Cycle {} window start={:?} end={:?}",
                    cycles, window.start_time, window.end_time
                );

                let fetched = tokio::select! {
                    biased;
                    _ = token.cancelled() => break 'poll,
                    result = self.fetcher.fetch_window(&window) => result,
                };

                let events = match fetched {
                    Ok(events) => events,
                    Err(e) => {
                        error!("STREAM_TASK: Fetch failed on cycle {}, stopping: {}", cycles, e);
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => {}
                            _ = errors_tx.send(e) => {}
                        }
                        break 'poll;
                    }
                };

                for event in events {
                    let timestamp = event.timestamp;
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break 'poll,
                        sent = events_tx.send(event) => {
                            if sent.is_err() {
                                info!("STREAM_TASK: Event receiver dropped, stopping");
                                break 'poll;
                            }
                        }
                    }
                    cursor.advance(timestamp);
                    emitted += 1;
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break 'poll,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(
            "STREAM_TASK: Stopped after {} cycles, {} events emitted, cursor {:?}",
            cycles,
            emitted,
            cursor.last_emitted_timestamp()
        );
    }
}
