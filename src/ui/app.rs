use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, Stdout, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SessionFatalError;
use crate::filtering::QueryEngine;
use crate::logs::{LogFetcher, QueryWindow, StreamCoordinator, StreamHandles};
use crate::ui::display;
use crate::ui::session::{CloseReason, Command, Message, Session, SessionOptions};
use crate::ui::theme::Theme;

const MESSAGE_QUEUE_CAPACITY: usize = 1024;
const MAX_BATCH_SIZE: usize = 256;
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything the explorer needs, resolved from CLI args and config
pub struct InteractiveOptions {
    pub fetcher: LogFetcher,
    /// Window for the initial load when not following
    pub window: QueryWindow,
    /// Tail with this coordinator instead of loading once
    pub stream: Option<StreamCoordinator>,
    pub engine: Arc<QueryEngine>,
    pub session: SessionOptions,
    pub theme: Theme,
    pub tick_rate: Duration,
    pub shutdown: CancellationToken,
}

/// Restores the terminal even when the session exits with an error
struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalGuard {
    fn new() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(e) = execute!(stdout, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(e);
        }
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self { terminal })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Run the explorer until the user quits or the log source fails.
///
/// On a fatal error the terminal is restored and the buffered events are
/// printed to stdout before the error is returned.
pub async fn run_app(options: InteractiveOptions) -> Result<(), SessionFatalError> {
    info!("=== STARTING INTERACTIVE SESSION ===");
    let InteractiveOptions {
        fetcher,
        window,
        stream,
        engine,
        session: session_options,
        theme,
        tick_rate,
        shutdown,
    } = options;

    let mut session = Session::new(session_options);

    // Without follow the whole window is loaded before the screen switches
    if stream.is_none() {
        info!("SESSION: Loading {} once", window.log_group);
        let events = fetcher
            .fetch_window(&window)
            .await
            .map_err(SessionFatalError::LogSource)?;
        session.load_initial(events);
    }

    let mut guard = TerminalGuard::new()?;
    let size = guard.terminal.size()?;
    session.update(Message::Resize(size.width, size.height));

    let (tx, mut rx) = mpsc::channel::<Message>(MESSAGE_QUEUE_CAPACITY);

    let input_thread = spawn_input_reader(tx.clone(), shutdown.clone());
    let ticker = spawn_ticker(tx.clone(), shutdown.clone(), tick_rate);
    let forwarder = stream.map(|coordinator| {
        let handles = coordinator.start(shutdown.clone());
        spawn_stream_forwarder(handles, tx.clone(), shutdown.clone())
    });

    let loop_result = run_loop(&mut guard, &mut session, &mut rx, &tx, &engine, &shutdown, &theme).await;

    // Wake every background task and wait for the stream channels to close
    shutdown.cancel();
    drop(rx);
    if let Some(forwarder) = forwarder {
        if let Err(e) = forwarder.await {
            warn!("SESSION: Stream forwarder ended abnormally: {}", e);
        }
    }
    let _ = ticker.await;
    let _ = input_thread.await;

    drop(guard);
    info!("=== INTERACTIVE SESSION COMPLETED ===");

    loop_result?;
    match session.take_close_reason() {
        Some(CloseReason::Fatal(err)) => {
            print_buffer(&session);
            Err(err)
        }
        _ => Ok(()),
    }
}

async fn run_loop(
    guard: &mut TerminalGuard,
    session: &mut Session,
    rx: &mut mpsc::Receiver<Message>,
    tx: &mpsc::Sender<Message>,
    engine: &Arc<QueryEngine>,
    shutdown: &CancellationToken,
    theme: &Theme,
) -> Result<(), SessionFatalError> {
    guard.terminal.draw(|f| display::render(f, session, theme))?;

    while let Some(first) = rx.recv().await {
        let mut next = Some(first);
        let mut processed = 0;

        // Apply queued messages one by one, then redraw once
        while let Some(message) = next {
            if let Some(command) = session.update(message) {
                execute_command(command, tx, engine, shutdown);
            }
            if session.is_closed() {
                return Ok(());
            }
            processed += 1;
            next = if processed < MAX_BATCH_SIZE { rx.try_recv().ok() } else { None };
        }

        guard.terminal.draw(|f| display::render(f, session, theme))?;
    }

    Ok(())
}

fn execute_command(
    command: Command,
    tx: &mpsc::Sender<Message>,
    engine: &Arc<QueryEngine>,
    shutdown: &CancellationToken,
) {
    match command {
        Command::DispatchQuery { term, mode, corpus } => {
            let engine = Arc::clone(engine);
            let tx = tx.clone();
            let token = shutdown.clone();
            tokio::spawn(async move {
                let result = engine.run(term, mode, corpus).await;
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {}
                    _ = tx.send(Message::QueryFinished(result)) => {}
                }
            });
        }
        Command::Shutdown => {
            debug!("SESSION: Shutdown requested");
            shutdown.cancel();
        }
    }
}

/// Read terminal events on a blocking thread and post them to the queue
fn spawn_input_reader(tx: mpsc::Sender<Message>, token: CancellationToken) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !token.is_cancelled() {
            let message = match event::poll(INPUT_POLL_INTERVAL) {
                Ok(false) => continue,
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => Message::Key(key),
                    Ok(Event::Resize(width, height)) => Message::Resize(width, height),
                    Ok(_) => continue,
                    Err(e) => Message::TerminalError(e),
                },
                Err(e) => Message::TerminalError(e),
            };

            let fatal = matches!(message, Message::TerminalError(_));
            if tx.blocking_send(message).is_err() || fatal {
                break;
            }
        }
        debug!("INPUT_TASK: Stopped");
    })
}

fn spawn_ticker(tx: mpsc::Sender<Message>, token: CancellationToken, tick_rate: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_rate.max(Duration::from_millis(10)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    // A full queue just skips this frame
                    if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(Message::Tick) {
                        break;
                    }
                }
            }
        }
    })
}

/// Move stream output into the session queue until the stream ends or the
/// session shuts down, then wait for the stream task itself
fn spawn_stream_forwarder(
    handles: StreamHandles,
    tx: mpsc::Sender<Message>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let StreamHandles { mut events, mut errors, task } = handles;
        let mut forwarded = 0u64;
        let mut errors_open = true;

        loop {
            let message = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => Message::StreamEvent(event),
                    None => break,
                },
                err = errors.recv(), if errors_open => match err {
                    Some(err) => Message::StreamError(err),
                    None => {
                        errors_open = false;
                        continue;
                    }
                },
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                sent = tx.send(message) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
            forwarded += 1;
        }

        // Deliver an error that raced with the last events
        if !token.is_cancelled() {
            if let Ok(err) = errors.try_recv() {
                let _ = tx.send(Message::StreamError(err)).await;
            }
        }

        drop(events);
        drop(errors);
        if let Err(e) = task.await {
            warn!("STREAM_TASK: Ended abnormally: {}", e);
        }
        info!("SESSION: Stream forwarder stopped after {} messages", forwarded);
    })
}

fn print_buffer(session: &Session) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in session.view.formatted_lines() {
        if writeln!(out, "{}", line).is_err() {
            break;
        }
    }
    let _ = out.flush();
}
