use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::VecDeque;

const HISTORY_LIMIT: usize = 50;

/// Single-line text editor backing the query box
#[derive(Debug, Clone)]
pub struct QueryInput {
    pub prompt: String,
    text: String,
    /// Cursor position in characters
    cursor: usize,
    history: VecDeque<String>,
    history_index: Option<usize>,
}

impl QueryInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            text: String::new(),
            cursor: 0,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            history_index: None,
        }
    }

    pub fn value(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.text = value.into();
        self.cursor = self.text.chars().count();
    }

    /// Record the current text as submitted and return it. The text stays in the box.
    pub fn submit(&mut self) -> String {
        let value = self.text.clone();
        if !value.is_empty() && self.history.front() != Some(&value) {
            self.history.push_front(value.clone());
            if self.history.len() > HISTORY_LIMIT {
                self.history.pop_back();
            }
        }
        self.history_index = None;
        value
    }

    fn byte_offset(&self, char_index: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_index)
            .map(|(offset, _)| offset)
            .unwrap_or(self.text.len())
    }

    fn len_chars(&self) -> usize {
        self.text.chars().count()
    }

    /// Apply an editing key. Returns false when the key is not an editing key.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.text.clear();
                self.cursor = 0;
            }
            KeyCode::Char('a') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.cursor = 0;
            }
            KeyCode::Char('e') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.cursor = self.len_chars();
            }
            KeyCode::Char(_) if key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
                return false;
            }
            KeyCode::Char(c) => {
                let offset = self.byte_offset(self.cursor);
                self.text.insert(offset, c);
                self.cursor += 1;
            }
            KeyCode::Backspace => {
                if self.cursor > 0 {
                    let offset = self.byte_offset(self.cursor - 1);
                    self.text.remove(offset);
                    self.cursor -= 1;
                }
            }
            KeyCode::Delete => {
                if self.cursor < self.len_chars() {
                    let offset = self.byte_offset(self.cursor);
                    self.text.remove(offset);
                }
            }
            KeyCode::Left => {
                self.cursor = self.cursor.saturating_sub(1);
            }
            KeyCode::Right => {
                if self.cursor < self.len_chars() {
                    self.cursor += 1;
                }
            }
            KeyCode::Home => {
                self.cursor = 0;
            }
            KeyCode::End => {
                self.cursor = self.len_chars();
            }
            KeyCode::Up => self.navigate_history(true),
            KeyCode::Down => self.navigate_history(false),
            _ => return false,
        }
        true
    }

    fn navigate_history(&mut self, up: bool) {
        if self.history.is_empty() {
            return;
        }

        match self.history_index {
            None => {
                if up {
                    self.history_index = Some(0);
                    if let Some(item) = self.history.front().cloned() {
                        self.set_value(item);
                    }
                }
            }
            Some(index) => {
                if up && index + 1 < self.history.len() {
                    self.history_index = Some(index + 1);
                    if let Some(item) = self.history.get(index + 1).cloned() {
                        self.set_value(item);
                    }
                } else if !up && index > 0 {
                    self.history_index = Some(index - 1);
                    if let Some(item) = self.history.get(index - 1).cloned() {
                        self.set_value(item);
                    }
                } else if !up && index == 0 {
                    self.history_index = None;
                    self.set_value(String::new());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(input: &mut QueryInput, code: KeyCode) -> bool {
        input.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(input: &mut QueryInput, text: &str) {
        for c in text.chars() {
            press(input, KeyCode::Char(c));
        }
    }

    #[test]
    fn test_insert_and_cursor_motion() {
        let mut input = QueryInput::new("Query: ");
        type_text(&mut input, "helo");
        press(&mut input, KeyCode::Left);
        type_text(&mut input, "l");
        assert_eq!(input.value(), "hello");
        assert_eq!(input.cursor(), 4);

        press(&mut input, KeyCode::Home);
        press(&mut input, KeyCode::Delete);
        assert_eq!(input.value(), "ello");

        press(&mut input, KeyCode::End);
        press(&mut input, KeyCode::Backspace);
        assert_eq!(input.value(), "ell");
        assert_eq!(input.cursor(), 3);
    }

    #[test]
    fn test_multibyte_editing() {
        let mut input = QueryInput::new("");
        type_text(&mut input, "cafe");
        press(&mut input, KeyCode::Backspace);
        type_text(&mut input, "é ☕");
        press(&mut input, KeyCode::Left);
        press(&mut input, KeyCode::Backspace);
        assert_eq!(input.value(), "café☕");
    }

    #[test]
    fn test_ctrl_u_clears_and_other_ctrl_keys_are_not_editing() {
        let mut input = QueryInput::new("");
        type_text(&mut input, "abc");
        assert!(input.handle_key(KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL)));
        assert_eq!(input.value(), "");
        assert!(!input.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(!press(&mut input, KeyCode::Tab));
    }

    #[test]
    fn test_history_navigation() {
        let mut input = QueryInput::new("");
        input.set_value("first");
        input.submit();
        input.set_value("second");
        assert_eq!(input.submit(), "second");
        assert_eq!(input.value(), "second");

        input.set_value("");
        press(&mut input, KeyCode::Up);
        assert_eq!(input.value(), "second");
        press(&mut input, KeyCode::Up);
        assert_eq!(input.value(), "first");
        press(&mut input, KeyCode::Down);
        assert_eq!(input.value(), "second");
        press(&mut input, KeyCode::Down);
        assert_eq!(input.value(), "");
    }
}
