use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{BackendError, QueryError, SessionFatalError};
use crate::filtering::{find_match, QueryMode, QueryResult};
use crate::logs::LogEvent;
use crate::ui::display::{log_viewport, LogView};
use crate::ui::input::QueryInput;
use crate::ui::keymap::Keymap;
use crate::ui::theme::Spinner;

pub const QUERY_PROMPT: &str = "Query: ";

/// Which pane receives key presses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    LogPane,
    QueryInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    QueryLoading,
}

/// Everything that can change the session, delivered one at a time
#[derive(Debug)]
pub enum Message {
    Key(KeyEvent),
    Resize(u16, u16),
    Tick,
    StreamEvent(LogEvent),
    StreamError(BackendError),
    QueryFinished(Result<QueryResult, QueryError>),
    TerminalError(std::io::Error),
}

/// Side effects the session asks its driver to perform
#[derive(Debug)]
pub enum Command {
    DispatchQuery {
        term: String,
        mode: QueryMode,
        corpus: Arc<Vec<LogEvent>>,
    },
    Shutdown,
}

/// Outcome of the last completed query, shown in the help line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    Matches { term: String, count: usize },
    NoMatches { term: String },
    Failed { term: String, error: String },
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStatus::Matches { term, count } => write!(f, "{} matches for \"{}\"", count, term),
            QueryStatus::NoMatches { term } => write!(f, "No matches for \"{}\"", term),
            QueryStatus::Failed { error, .. } => write!(f, "Query failed: {}", error),
        }
    }
}

#[derive(Debug)]
pub enum CloseReason {
    Quit,
    Fatal(SessionFatalError),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub keymap: Keymap,
    pub buffer_size: usize,
    pub query_mode: QueryMode,
}

/// State of the interactive explorer. Pure: no I/O happens here, the driver
/// feeds [`Message`]s in and executes the returned [`Command`]s.
#[derive(Debug)]
pub struct Session {
    focus: Focus,
    load: LoadState,
    keymap: Keymap,
    query_mode: QueryMode,
    pub input: QueryInput,
    pub view: LogView,
    /// Every event received so far, bounded by the buffer size
    corpus: VecDeque<LogEvent>,
    buffer_size: usize,
    active_term: Option<String>,
    spinner: Spinner,
    status: Option<QueryStatus>,
    closed: Option<CloseReason>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        let buffer_size = options.buffer_size.max(1);
        Self {
            focus: Focus::LogPane,
            load: LoadState::Idle,
            keymap: options.keymap,
            query_mode: options.query_mode,
            input: QueryInput::new(QUERY_PROMPT),
            view: LogView::new(buffer_size),
            corpus: VecDeque::new(),
            buffer_size,
            active_term: None,
            spinner: Spinner::default(),
            status: None,
            closed: None,
        }
    }

    pub fn focus(&self) -> Focus {
        self.focus
    }

    pub fn load_state(&self) -> LoadState {
        self.load
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    pub fn status(&self) -> Option<&QueryStatus> {
        self.status.as_ref()
    }

    pub fn spinner_frame(&self) -> &'static str {
        self.spinner.frame()
    }

    pub fn corpus_len(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.closed.as_ref()
    }

    pub fn take_close_reason(&mut self) -> Option<CloseReason> {
        self.closed.take()
    }

    /// Seed the buffer with events fetched before the session started
    pub fn load_initial(&mut self, events: Vec<LogEvent>) {
        info!("SESSION: Loading {} initial events", events.len());
        for event in events {
            self.append_event(event);
        }
    }

    pub fn update(&mut self, message: Message) -> Option<Command> {
        if self.closed.is_some() {
            debug!("SESSION: Ignoring {:?} after close", message);
            return None;
        }

        match message {
            Message::Key(key) => self.handle_key(key),
            Message::Resize(width, height) => {
                let (width, height) = log_viewport(ratatui::layout::Rect::new(0, 0, width, height));
                self.view.set_viewport(width, height);
                None
            }
            Message::Tick => {
                if self.load == LoadState::QueryLoading {
                    self.spinner.tick();
                }
                None
            }
            Message::StreamEvent(event) => {
                self.append_event(event);
                None
            }
            Message::StreamError(err) => {
                error!("SESSION: Log stream failed: {}", err);
                self.closed = Some(CloseReason::Fatal(SessionFatalError::LogSource(err)));
                Some(Command::Shutdown)
            }
            Message::QueryFinished(result) => {
                self.finish_query(result);
                None
            }
            Message::TerminalError(err) => {
                error!("SESSION: Terminal input failed: {}", err);
                self.closed = Some(CloseReason::Fatal(SessionFatalError::Terminal(err)));
                Some(Command::Shutdown)
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Option<Command> {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            info!("SESSION: Ctrl+C received, quitting");
            self.closed = Some(CloseReason::Quit);
            return Some(Command::Shutdown);
        }

        match self.focus {
            Focus::LogPane => self.handle_log_pane_key(key),
            Focus::QueryInput => self.handle_query_key(key),
        }
    }

    fn handle_log_pane_key(&mut self, key: KeyEvent) -> Option<Command> {
        let keymap = &self.keymap;
        if keymap.quit.matches(&key) {
            info!("SESSION: Quit requested");
            self.closed = Some(CloseReason::Quit);
            return Some(Command::Shutdown);
        }

        if keymap.switch_focus.matches(&key) {
            if self.load == LoadState::QueryLoading {
                debug!("SESSION: Focus switch ignored while a query is loading");
            } else {
                self.focus = Focus::QueryInput;
            }
        } else if keymap.scroll_up.matches(&key) {
            self.view.scroll_up(1);
        } else if keymap.scroll_down.matches(&key) {
            self.view.scroll_down(1);
        } else if keymap.page_up.matches(&key) {
            self.view.page_up();
        } else if keymap.page_down.matches(&key) {
            self.view.page_down();
        }
        None
    }

    fn handle_query_key(&mut self, key: KeyEvent) -> Option<Command> {
        if self.keymap.switch_focus.matches(&key) {
            self.focus = Focus::LogPane;
            return None;
        }

        if self.keymap.submit.matches(&key) {
            return Some(self.submit_query());
        }

        self.input.handle_key(key);
        None
    }

    fn submit_query(&mut self) -> Command {
        let term = self.input.submit();
        info!("SESSION: Submitting query {:?} ({:?})", term, self.query_mode);

        self.focus = Focus::LogPane;
        self.load = LoadState::QueryLoading;
        self.spinner = Spinner::random();
        self.status = None;

        let corpus = match self.query_mode {
            QueryMode::LocalBuffer => Arc::new(self.corpus.iter().cloned().collect()),
            QueryMode::Backend => Arc::new(Vec::new()),
        };

        Command::DispatchQuery {
            term,
            mode: self.query_mode,
            corpus,
        }
    }

    fn finish_query(&mut self, result: Result<QueryResult, QueryError>) {
        if self.load != LoadState::QueryLoading {
            warn!("SESSION: Dropping query result that arrived while idle");
            return;
        }

        self.load = LoadState::Idle;
        self.focus = Focus::LogPane;
        let term = self.input.value().to_string();

        match result {
            Ok(result) => {
                info!("SESSION: Query {:?} returned {} hits", result.term, result.hits.len());
                self.status = Some(if result.hits.is_empty() {
                    QueryStatus::NoMatches { term: result.term.clone() }
                } else {
                    QueryStatus::Matches {
                        term: result.term.clone(),
                        count: result.hits.len(),
                    }
                });
                self.active_term = (!result.term.is_empty()).then(|| result.term.clone());
                self.view.replace(result.hits);
            }
            Err(err) => {
                warn!("SESSION: Query {:?} failed: {}", term, err);
                self.status = Some(QueryStatus::Failed {
                    term,
                    error: err.to_string(),
                });
            }
        }
    }

    fn append_event(&mut self, event: LogEvent) {
        self.corpus.push_back(event.clone());
        while self.corpus.len() > self.buffer_size {
            self.corpus.pop_front();
        }

        // New arrivals only join a filtered view when they match it
        let highlight = match &self.active_term {
            Some(term) => match find_match(&event.message, term) {
                Some(range) => Some(range),
                None => return,
            },
            None => None,
        };
        self.view.push(event, highlight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtering::QueryHit;

    fn session() -> Session {
        Session::new(SessionOptions {
            keymap: Keymap::default(),
            buffer_size: 100,
            query_mode: QueryMode::LocalBuffer,
        })
    }

    fn key(code: KeyCode) -> Message {
        Message::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(session: &mut Session, text: &str) {
        for c in text.chars() {
            session.update(key(KeyCode::Char(c)));
        }
    }

    fn state(session: &Session) -> (Focus, LoadState) {
        (session.focus(), session.load_state())
    }

    #[test]
    fn test_switch_focus_toggles_when_idle() {
        let mut session = session();
        assert_eq!(state(&session), (Focus::LogPane, LoadState::Idle));

        session.update(key(KeyCode::Tab));
        assert_eq!(state(&session), (Focus::QueryInput, LoadState::Idle));

        session.update(key(KeyCode::Tab));
        assert_eq!(state(&session), (Focus::LogPane, LoadState::Idle));
    }

    #[test]
    fn test_switch_focus_ignored_while_loading() {
        let mut session = session();
        session.update(key(KeyCode::Tab));
        let command = session.update(key(KeyCode::Enter));
        assert!(matches!(command, Some(Command::DispatchQuery { .. })));
        assert_eq!(state(&session), (Focus::LogPane, LoadState::QueryLoading));

        session.update(key(KeyCode::Tab));
        assert_eq!(state(&session), (Focus::LogPane, LoadState::QueryLoading));
    }

    #[test]
    fn test_empty_query_runs_full_cycle() {
        let mut session = session();
        session.update(Message::StreamEvent(LogEvent::new(1, 0, "a")));
        session.update(Message::StreamEvent(LogEvent::new(2, 0, "b")));

        session.update(key(KeyCode::Tab));
        assert_eq!(state(&session), (Focus::QueryInput, LoadState::Idle));

        let command = session.update(key(KeyCode::Enter));
        match command {
            Some(Command::DispatchQuery { term, mode, corpus }) => {
                assert_eq!(term, "");
                assert_eq!(mode, QueryMode::LocalBuffer);
                assert_eq!(corpus.len(), 2);
            }
            other => panic!("expected a query dispatch, got {:?}", other),
        }
        assert_eq!(state(&session), (Focus::LogPane, LoadState::QueryLoading));

        let hits = vec![
            QueryHit { event: LogEvent::new(1, 0, "a"), highlight: None },
            QueryHit { event: LogEvent::new(2, 0, "b"), highlight: None },
        ];
        session.update(Message::QueryFinished(Ok(QueryResult { term: String::new(), hits })));
        assert_eq!(state(&session), (Focus::LogPane, LoadState::Idle));
        assert_eq!(session.view.len(), 2);
    }

    #[test]
    fn test_failed_query_keeps_buffer_and_reports() {
        let mut session = session();
        session.update(Message::StreamEvent(LogEvent::new(1, 0, "kept")));
        session.update(key(KeyCode::Tab));
        type_text(&mut session, "oops");
        session.update(key(KeyCode::Enter));

        session.update(Message::QueryFinished(Err(BackendError::Rejected {
            status: 400,
            message: "bad filter".into(),
        }
        .into())));

        assert_eq!(state(&session), (Focus::LogPane, LoadState::Idle));
        assert!(!session.is_closed());
        assert_eq!(session.view.len(), 1);
        match session.status() {
            Some(QueryStatus::Failed { term, error }) => {
                assert_eq!(term, "oops");
                assert!(error.contains("bad filter"));
            }
            other => panic!("expected failure status, got {:?}", other),
        }
    }

    #[test]
    fn test_local_worker_failure_is_not_zero_matches() {
        let mut session = session();
        session.update(Message::StreamEvent(LogEvent::new(1, 0, "kept")));
        session.update(key(KeyCode::Tab));
        type_text(&mut session, "kept");
        session.update(key(KeyCode::Enter));

        session.update(Message::QueryFinished(Err(QueryError::Worker("chunk 0 ended without a result".into()))));

        assert!(matches!(session.status(), Some(QueryStatus::Failed { .. })));
        assert_ne!(session.status(), Some(&QueryStatus::NoMatches { term: "kept".into() }));
        assert_eq!(session.view.len(), 1);
    }

    #[test]
    fn test_zero_matches_is_not_a_failure() {
        let mut session = session();
        session.update(key(KeyCode::Tab));
        type_text(&mut session, "zzz");
        session.update(key(KeyCode::Enter));
        session.update(Message::QueryFinished(Ok(QueryResult {
            term: "zzz".into(),
            hits: Vec::new(),
        })));

        assert_eq!(session.status(), Some(&QueryStatus::NoMatches { term: "zzz".into() }));
        assert_eq!(session.status().map(|s| s.to_string()), Some("No matches for \"zzz\"".into()));
        assert!(session.view.is_empty());
    }

    #[test]
    fn test_stream_error_closes_session() {
        let mut session = session();
        let command = session.update(Message::StreamError(BackendError::Unavailable("gone".into())));
        assert!(matches!(command, Some(Command::Shutdown)));
        assert!(matches!(
            session.close_reason(),
            Some(CloseReason::Fatal(SessionFatalError::LogSource(_)))
        ));

        // Closed sessions ignore further input
        assert!(session.update(key(KeyCode::Tab)).is_none());
        assert_eq!(session.focus(), Focus::LogPane);
    }

    #[test]
    fn test_quit_key_only_from_log_pane() {
        let mut session = session();
        session.update(key(KeyCode::Tab));
        assert!(session.update(key(KeyCode::Char('q'))).is_none());
        assert_eq!(session.input.value(), "q");

        session.update(key(KeyCode::Tab));
        assert!(matches!(session.update(key(KeyCode::Char('q'))), Some(Command::Shutdown)));
        assert!(matches!(session.close_reason(), Some(CloseReason::Quit)));
    }

    #[test]
    fn test_ctrl_c_quits_from_query_box() {
        let mut session = session();
        session.update(key(KeyCode::Tab));
        let command = session.update(Message::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(matches!(command, Some(Command::Shutdown)));
    }

    #[test]
    fn test_active_term_filters_new_arrivals() {
        let mut session = session();
        session.update(key(KeyCode::Tab));
        type_text(&mut session, "get");
        session.update(key(KeyCode::Enter));
        session.update(Message::QueryFinished(Ok(QueryResult {
            term: "get".into(),
            hits: vec![QueryHit { event: LogEvent::new(1, 0, "GET /"), highlight: Some(0..3) }],
        })));

        session.update(Message::StreamEvent(LogEvent::new(2, 0, "POST /")));
        session.update(Message::StreamEvent(LogEvent::new(3, 0, "get /health")));

        let messages: Vec<&str> = session.view.events().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["GET /", "get /health"]);
        assert_eq!(session.corpus_len(), 2);
    }

    #[test]
    fn test_spinner_only_advances_while_loading() {
        let mut session = session();
        let idle_frame = session.spinner_frame();
        session.update(Message::Tick);
        assert_eq!(session.spinner_frame(), idle_frame);
    }
}
