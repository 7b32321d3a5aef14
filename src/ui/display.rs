use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Padding, Paragraph},
    Frame,
};
use std::collections::VecDeque;
use std::ops::Range;
use unicode_width::UnicodeWidthChar;

use crate::filtering::QueryHit;
use crate::logs::LogEvent;
use crate::output::formatter::{format_line, LINE_SEPARATOR};
use crate::ui::session::{Focus, LoadState, QueryStatus, Session};
use crate::ui::theme::Theme;

const QUERY_BOX_HEIGHT: u16 = 3;
const HELP_LINE_HEIGHT: u16 = 1;
const LOG_PADDING: u16 = 2;

/// Columns `c` takes once drawn. Control characters are drawn as a single
/// space by `sanitize_for_terminal`; a newline ends the row instead.
fn display_width(c: char) -> usize {
    match c {
        '\n' => 0,
        c if c.is_control() => 1,
        c => c.width().unwrap_or(0),
    }
}

/// Split `text` into segments no wider than `width` terminal columns.
///
/// Concatenating the segments yields `text` again. A character wider than
/// the whole line gets a segment of its own, and a newline ends its segment.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_width = 0;

    for c in text.chars() {
        let char_width = display_width(c);
        if !current.is_empty() && current_width + char_width > width {
            lines.push(std::mem::take(&mut current));
            current_width = 0;
        }

        current.push(c);
        current_width += char_width;

        if c == '\n' {
            lines.push(std::mem::take(&mut current));
            current_width = 0;
        }
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Replace characters that would corrupt the terminal. Newlines that end a
/// wrapped segment are dropped since the segment is already its own row.
fn sanitize_for_terminal(segment: &str) -> String {
    segment
        .strip_suffix('\n')
        .unwrap_or(segment)
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Rectangles for the query box, the log pane and the help line
pub fn layout_for(area: Rect) -> [Rect; 3] {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(QUERY_BOX_HEIGHT),
            Constraint::Min(0),
            Constraint::Length(HELP_LINE_HEIGHT),
        ])
        .split(area);
    [chunks[0], chunks[1], chunks[2]]
}

/// Columns and rows available for log text inside the log pane
pub fn log_viewport(area: Rect) -> (usize, usize) {
    let pane = layout_for(area)[1];
    let width = pane.width.saturating_sub(2 + 2 * LOG_PADDING) as usize;
    let height = pane.height.saturating_sub(2) as usize;
    (width.max(1), height)
}

/// One event in the log pane, pre-wrapped to the current width
#[derive(Debug, Clone)]
struct DisplayEntry {
    event: LogEvent,
    /// Matched range in the message, in characters
    highlight: Option<Range<usize>>,
    lines: Vec<String>,
    /// Character offset of each wrapped line within the formatted line
    line_starts: Vec<usize>,
}

impl DisplayEntry {
    fn new(event: LogEvent, highlight: Option<Range<usize>>, width: usize) -> Self {
        let mut entry = Self {
            event,
            highlight,
            lines: Vec::new(),
            line_starts: Vec::new(),
        };
        entry.rewrap(width);
        entry
    }

    fn rewrap(&mut self, width: usize) {
        self.lines = wrap_text(&format_line(&self.event), width);
        self.line_starts.clear();
        let mut offset = 0;
        for line in &self.lines {
            self.line_starts.push(offset);
            offset += line.chars().count();
        }
    }

    /// Characters taken by the timestamp and separator
    fn prefix_len(&self) -> usize {
        self.event.iso_timestamp().chars().count() + LINE_SEPARATOR.chars().count()
    }
}

/// Scrollable, bounded list of wrapped log lines
#[derive(Debug, Clone)]
pub struct LogView {
    entries: VecDeque<DisplayEntry>,
    max_entries: usize,
    total_lines: usize,
    width: usize,
    height: usize,
    /// First visible row, counted in wrapped lines
    pub scroll_offset: usize,
    pub auto_scroll: bool,
}

impl LogView {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
            total_lines: 0,
            width: 80,
            height: 20,
            scroll_offset: 0,
            auto_scroll: true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_lines(&self) -> usize {
        self.total_lines
    }

    pub fn viewport(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn set_viewport(&mut self, width: usize, height: usize) {
        let width = width.max(1);
        if width != self.width {
            self.width = width;
            self.total_lines = 0;
            for entry in self.entries.iter_mut() {
                entry.rewrap(width);
                self.total_lines += entry.lines.len();
            }
        }
        self.height = height;
        self.clamp_scroll();
    }

    /// Append an event, evicting the oldest once the buffer is full
    pub fn push(&mut self, event: LogEvent, highlight: Option<Range<usize>>) {
        let entry = DisplayEntry::new(event, highlight, self.width);
        self.total_lines += entry.lines.len();
        self.entries.push_back(entry);

        while self.entries.len() > self.max_entries {
            if let Some(evicted) = self.entries.pop_front() {
                let removed = evicted.lines.len();
                self.total_lines -= removed;
                if !self.auto_scroll {
                    self.scroll_offset = self.scroll_offset.saturating_sub(removed);
                }
            }
        }

        if self.auto_scroll {
            self.scroll_to_bottom();
        }
    }

    /// Swap the whole buffer for a query result
    pub fn replace(&mut self, hits: Vec<QueryHit>) {
        self.entries.clear();
        self.total_lines = 0;
        self.scroll_offset = 0;

        let skip = hits.len().saturating_sub(self.max_entries);
        for hit in hits.into_iter().skip(skip) {
            let entry = DisplayEntry::new(hit.event, hit.highlight, self.width);
            self.total_lines += entry.lines.len();
            self.entries.push_back(entry);
        }

        if self.auto_scroll {
            self.scroll_to_bottom();
        }
    }

    fn max_scroll(&self) -> usize {
        self.total_lines.saturating_sub(self.height)
    }

    fn clamp_scroll(&mut self) {
        if self.auto_scroll {
            self.scroll_offset = self.max_scroll();
        } else {
            self.scroll_offset = self.scroll_offset.min(self.max_scroll());
        }
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
        self.auto_scroll = false;
    }

    pub fn scroll_down(&mut self, lines: usize) {
        let max_scroll = self.max_scroll();
        self.scroll_offset = (self.scroll_offset + lines).min(max_scroll);
        // Reaching the bottom resumes following
        self.auto_scroll = self.scroll_offset >= max_scroll;
    }

    pub fn page_up(&mut self) {
        self.scroll_up(self.height.max(1));
    }

    pub fn page_down(&mut self) {
        self.scroll_down(self.height.max(1));
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = self.max_scroll();
        self.auto_scroll = true;
    }

    /// Every event in the buffer formatted as a single line, oldest first
    pub fn formatted_lines(&self) -> Vec<String> {
        self.entries.iter().map(|entry| format_line(&entry.event)).collect()
    }

    /// Events currently held, oldest first
    pub fn events(&self) -> impl Iterator<Item = &LogEvent> {
        self.entries.iter().map(|entry| &entry.event)
    }

    /// Plain text of the rows inside the viewport
    pub fn visible_text(&self) -> Vec<String> {
        self.visible_rows()
            .map(|(_, segment, _)| sanitize_for_terminal(segment))
            .collect()
    }

    fn visible_rows(&self) -> impl Iterator<Item = (&DisplayEntry, &str, usize)> {
        self.entries
            .iter()
            .flat_map(|entry| {
                entry
                    .lines
                    .iter()
                    .zip(&entry.line_starts)
                    .map(move |(line, start)| (entry, line.as_str(), *start))
            })
            .skip(self.scroll_offset)
            .take(self.height)
    }

    fn styled_rows(&self, theme: &Theme) -> Vec<Line<'static>> {
        self.visible_rows()
            .map(|(entry, segment, start)| styled_segment(entry, segment, start, theme))
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SpanKind {
    Timestamp,
    Text,
    Highlight,
}

/// Style one wrapped row, splitting it where the timestamp ends and where
/// the highlighted match starts and stops
fn styled_segment(entry: &DisplayEntry, segment: &str, start: usize, theme: &Theme) -> Line<'static> {
    let prefix_len = entry.prefix_len();
    let highlight = entry
        .highlight
        .as_ref()
        .map(|range| (range.start + prefix_len)..(range.end + prefix_len));

    let kind_at = |position: usize| {
        if position < prefix_len {
            SpanKind::Timestamp
        } else if highlight.as_ref().is_some_and(|range| range.contains(&position)) {
            SpanKind::Highlight
        } else {
            SpanKind::Text
        }
    };

    let style_for = |kind: SpanKind| match kind {
        SpanKind::Timestamp => theme.timestamp,
        SpanKind::Text => theme.text,
        SpanKind::Highlight => theme.highlight,
    };

    let mut spans = Vec::new();
    let mut run = String::new();
    let mut run_kind = None;

    for (i, c) in sanitize_for_terminal(segment).chars().enumerate() {
        let kind = kind_at(start + i);
        if run_kind.is_some_and(|current| current != kind) {
            if let Some(current) = run_kind {
                spans.push(Span::styled(std::mem::take(&mut run), style_for(current)));
            }
        }
        run_kind = Some(kind);
        run.push(c);
    }
    if let Some(current) = run_kind {
        spans.push(Span::styled(run, style_for(current)));
    }

    Line::from(spans)
}

/// Draw the whole session: query box, log pane and help line
pub fn render(f: &mut Frame, session: &mut Session, theme: &Theme) {
    let area = f.size();
    let (width, height) = log_viewport(area);
    session.view.set_viewport(width, height);

    let [query_area, log_area, help_area] = layout_for(area);
    render_query_box(f, session, theme, query_area);
    render_logs(f, session, theme, log_area);
    render_help_line(f, session, theme, help_area);
}

fn render_query_box(f: &mut Frame, session: &Session, theme: &Theme, area: Rect) {
    let focused = session.focus() == Focus::QueryInput;
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(theme.border(focused));
    let inner = block.inner(area);

    let input = &session.input;
    let prompt_width = input.prompt.chars().map(|c| c.width().unwrap_or(0)).sum::<usize>();
    let available = (inner.width as usize).saturating_sub(prompt_width + 1);

    // Scroll the text horizontally so the cursor stays visible
    let chars: Vec<char> = input.value().chars().collect();
    let cursor = input.cursor().min(chars.len());
    let mut first = 0;
    while first < cursor
        && chars[first..cursor].iter().map(|c| c.width().unwrap_or(0)).sum::<usize>() > available
    {
        first += 1;
    }
    let visible: String = chars[first..].iter().collect();
    let cursor_offset: usize = chars[first..cursor].iter().map(|c| c.width().unwrap_or(0)).sum();

    let text_style = if focused { theme.text } else { theme.dim_text };
    let line = Line::from(vec![
        Span::styled(input.prompt.clone(), theme.dim_text.add_modifier(Modifier::BOLD)),
        Span::styled(visible, text_style),
    ]);
    f.render_widget(Paragraph::new(line).block(block), area);

    if focused {
        let x = inner.x + (prompt_width + cursor_offset).min(inner.width as usize) as u16;
        f.set_cursor(x, inner.y);
    }
}

fn render_logs(f: &mut Frame, session: &Session, theme: &Theme, area: Rect) {
    let focused = session.focus() == Focus::LogPane;
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(theme.border(focused))
        .padding(Padding::horizontal(LOG_PADDING));

    if session.load_state() == LoadState::QueryLoading {
        let line = Line::from(vec![
            Span::styled(format!("{} ", session.spinner_frame()), theme.timestamp),
            Span::styled("Loading query...", theme.text),
        ]);
        f.render_widget(Paragraph::new(line).block(block), area);
        return;
    }

    let rows = session.view.styled_rows(theme);
    f.render_widget(Paragraph::new(rows).block(block), area);
}

fn render_help_line(f: &mut Frame, session: &Session, theme: &Theme, area: Rect) {
    let mut spans = Vec::new();

    match session.status() {
        Some(QueryStatus::Failed { error, .. }) => {
            spans.push(Span::styled(format!("Query failed: {} ", error), theme.error));
            spans.push(Span::styled("• ", theme.dim_text));
        }
        Some(status) => {
            spans.push(Span::styled(format!("{} ", status), theme.status));
            spans.push(Span::styled("• ", theme.dim_text));
        }
        None => {}
    }

    let bindings = session.keymap().help_for(session.focus(), session.load_state());
    for (i, binding) in bindings.iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled(" • ", theme.dim_text));
        }
        spans.push(Span::styled(binding.label.clone(), theme.text.add_modifier(Modifier::BOLD)));
        spans.push(Span::styled(format!(" {}", binding.help), theme.dim_text));
    }

    f.render_widget(Paragraph::new(Line::from(spans)).style(Style::default()), area);
}
