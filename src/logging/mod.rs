use anyhow::{anyhow, Result};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::MakeWriter;

/// Upper bound on log output held back while the terminal UI is up
const MAX_DEFERRED_BYTES: usize = 1 << 20;

/// Get the appropriate log level based on verbosity
pub fn get_log_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Name of the dev-mode log file for a given local timestamp
pub fn dev_log_file_name(timestamp: &chrono::DateTime<chrono::Local>) -> String {
    format!("tailscope_dev_{}.log", timestamp.format("%Y%m%d_%H%M%S"))
}

/// Log writer that holds output in memory until the terminal UI is gone
#[derive(Clone, Default)]
pub struct DeferredStderr {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl DeferredStderr {
    /// Write everything held so far to `out` and empty the buffer
    pub fn flush_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let pending = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *buffer)
        };
        out.write_all(&pending)?;
        out.flush()
    }
}

impl Write for DeferredStderr {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let room = MAX_DEFERRED_BYTES.saturating_sub(buffer.len());
        buffer.extend_from_slice(&data[..data.len().min(room)]);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for DeferredStderr {
    type Writer = DeferredStderr;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Keeps logging alive for the life of the process. Dropping it flushes the
/// dev log file and prints any held-back errors to stderr.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
    deferred: Option<DeferredStderr>,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if let Some(deferred) = &self.deferred {
            let _ = deferred.flush_to(&mut io::stderr());
        }
    }
}

/// Install the global tracing subscriber.
///
/// - Plain output: logs go to stderr at the verbosity level, keeping stdout
///   for log lines.
/// - Interactive without `--dev`: errors are held in memory and reach stderr
///   when the returned guard drops, after the terminal is restored.
/// - `--dev`: logs go to a timestamped file in the working directory.
pub fn init_tracing(verbosity: u8, interactive: bool, dev: bool) -> Result<LogGuard> {
    let log_level = get_log_level(verbosity);

    if dev {
        let log_file_path = dev_log_file_name(&chrono::Local::now());
        eprintln!("Development mode enabled. Logs will be written to: {}", log_file_path);

        let file_appender = tracing_appender::rolling::never("", &log_file_path);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Dev mode always captures at least info so the file is useful
        let level = std::cmp::max(log_level, Level::INFO);
        fmt()
            .with_max_level(level)
            .with_ansi(false)
            .with_writer(non_blocking)
            .try_init()
            .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
        return Ok(LogGuard {
            _file_guard: Some(guard),
            deferred: None,
        });
    }

    if interactive {
        let deferred = DeferredStderr::default();
        fmt()
            .with_max_level(Level::ERROR)
            .with_ansi(false)
            .with_writer(deferred.clone())
            .try_init()
            .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
        return Ok(LogGuard {
            _file_guard: None,
            deferred: Some(deferred),
        });
    }

    fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
    Ok(LogGuard {
        _file_guard: None,
        deferred: None,
    })
}

/// Cancel `token` on CTRL+C so streams shut down and channels close
pub fn setup_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            token.cancel();
        }
    });
}
