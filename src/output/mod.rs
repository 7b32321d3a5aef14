pub mod formatter;

use anyhow::{anyhow, Result};
use futures::StreamExt;
use std::io::{self, Write};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::logs::{LogEvent, LogFetcher, QueryWindow, StreamCoordinator, StreamHandles};

pub use formatter::{create_formatter, format_line, OutputFormatter};

/// Whether the reader on the other end is still there
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Open,
    Closed,
}

/// Write one formatted event. A closed pipe (e.g. `tailscope ... | head`)
/// ends output quietly instead of failing.
pub fn write_event<W: Write>(out: &mut W, formatter: &dyn OutputFormatter, event: &LogEvent) -> Result<WriteOutcome> {
    let formatted = formatter.format(event)?;
    match writeln!(out, "{}", formatted) {
        Ok(()) => Ok(WriteOutcome::Open),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            info!("Output pipe closed, stopping");
            Ok(WriteOutcome::Closed)
        }
        Err(e) => {
            error!("Failed to write to output: {:?}", e);
            Err(anyhow!("Failed to write to output: {}", e))
        }
    }
}

/// Fetch a window once and print it. Returns the number of events written.
pub async fn print_once<W: Write>(
    fetcher: &LogFetcher,
    window: &QueryWindow,
    formatter: &dyn OutputFormatter,
    out: &mut W,
) -> Result<usize> {
    let events = fetcher.fetch_window(window).await?;
    info!("Fetched {} events from {}", events.len(), window.log_group);

    let mut written = 0;
    for event in &events {
        if write_event(out, formatter, event)? == WriteOutcome::Closed {
            break;
        }
        written += 1;
    }

    if let Err(e) = out.flush() {
        if e.kind() != io::ErrorKind::BrokenPipe {
            return Err(anyhow!("Failed to flush output: {}", e));
        }
    }
    Ok(written)
}

/// Tail a log group until `token` is cancelled, the reader goes away, or the
/// stream reports an error. Returns the number of events written.
pub async fn follow<W: Write>(
    coordinator: &StreamCoordinator,
    token: CancellationToken,
    formatter: &dyn OutputFormatter,
    out: &mut W,
) -> Result<usize> {
    let StreamHandles { events, mut errors, task } = coordinator.start(token.clone());
    let mut events = ReceiverStream::new(events);
    let mut written = 0;
    let mut failure = None;
    let mut errors_open = true;

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    if write_event(out, formatter, &event)? == WriteOutcome::Closed {
                        token.cancel();
                        break;
                    }
                    written += 1;
                    // Flush per event so piped readers see lines as they arrive
                    if let Err(e) = out.flush() {
                        if e.kind() == io::ErrorKind::BrokenPipe {
                            token.cancel();
                            break;
                        }
                        return Err(anyhow!("Failed to flush output: {}", e));
                    }
                }
                None => break,
            },
            err = errors.recv(), if errors_open => match err {
                Some(err) => {
                    failure = Some(err);
                    break;
                }
                // Closed without an error: keep writing until events run out
                None => errors_open = false,
            },
        }
    }

    // An error sent just before the event channel closed
    if failure.is_none() && !token.is_cancelled() {
        failure = errors.try_recv().ok();
    }

    // Drain anything emitted before the failure was reported
    if failure.is_some() {
        while let Some(event) = events.next().await {
            if write_event(out, formatter, &event)? == WriteOutcome::Closed {
                break;
            }
            written += 1;
        }
    }

    drop(events);
    drop(errors);
    if let Err(e) = task.await {
        warn!("Stream task ended abnormally: {}", e);
    }

    match failure {
        Some(err) => Err(anyhow!(err).context("log stream failed")),
        None => Ok(written),
    }
}
