use anyhow::{anyhow, Result};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::config::KeymapConfig;
use crate::ui::session::{Focus, LoadState};

/// A key code plus the modifiers that must be held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChord {
    pub code: KeyCode,
    pub modifiers: KeyModifiers,
}

impl KeyChord {
    pub fn plain(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: KeyModifiers::NONE,
        }
    }

    pub fn matches(&self, key: &KeyEvent) -> bool {
        // Shift is implied by the character itself
        let relevant = KeyModifiers::CONTROL | KeyModifiers::ALT;
        self.code == key.code && (self.modifiers & relevant) == (key.modifiers & relevant)
    }
}

/// Parse a key name such as "tab", "enter", "q", "ctrl+r" or "pageup"
pub fn parse_key(name: &str) -> Result<KeyChord> {
    let mut modifiers = KeyModifiers::NONE;
    let mut rest = name.trim();

    loop {
        if let Some(stripped) = strip_prefix_ignore_case(rest, "ctrl+") {
            modifiers |= KeyModifiers::CONTROL;
            rest = stripped;
        } else if let Some(stripped) = strip_prefix_ignore_case(rest, "alt+") {
            modifiers |= KeyModifiers::ALT;
            rest = stripped;
        } else {
            break;
        }
    }

    let code = match rest.to_lowercase().as_str() {
        "tab" => KeyCode::Tab,
        "enter" | "return" => KeyCode::Enter,
        "esc" | "escape" => KeyCode::Esc,
        "space" => KeyCode::Char(' '),
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "pageup" => KeyCode::PageUp,
        "pagedown" => KeyCode::PageDown,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        _ => {
            let mut chars = rest.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyCode::Char(c),
                _ => return Err(anyhow!("Unknown key name: '{}'", name)),
            }
        }
    };

    Ok(KeyChord { code, modifiers })
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &text[prefix.len()..])
}

/// One action with every chord that triggers it
#[derive(Debug, Clone)]
pub struct KeyBinding {
    pub chords: Vec<KeyChord>,
    pub label: String,
    pub help: &'static str,
}

impl KeyBinding {
    fn new(primary: KeyChord, label: &str, help: &'static str) -> Self {
        Self {
            chords: vec![primary],
            label: label.to_string(),
            help,
        }
    }

    fn also(mut self, chord: KeyChord) -> Self {
        if !self.chords.contains(&chord) {
            self.chords.push(chord);
        }
        self
    }

    pub fn matches(&self, key: &KeyEvent) -> bool {
        self.chords.iter().any(|chord| chord.matches(key))
    }
}

/// Session keybindings, built once at startup and passed by reference
#[derive(Debug, Clone)]
pub struct Keymap {
    pub switch_focus: KeyBinding,
    pub submit: KeyBinding,
    pub quit: KeyBinding,
    pub scroll_up: KeyBinding,
    pub scroll_down: KeyBinding,
    pub page_up: KeyBinding,
    pub page_down: KeyBinding,
}

impl Keymap {
    pub fn from_config(config: &KeymapConfig) -> Result<Self> {
        Ok(Self {
            switch_focus: KeyBinding::new(parse_key(&config.switch_focus)?, &config.switch_focus, "switch focus"),
            submit: KeyBinding::new(parse_key(&config.submit)?, &config.submit, "run query"),
            quit: KeyBinding::new(parse_key(&config.quit)?, &config.quit, "quit"),
            scroll_up: KeyBinding::new(parse_key(&config.scroll_up)?, &config.scroll_up, "scroll up")
                .also(KeyChord::plain(KeyCode::Up)),
            scroll_down: KeyBinding::new(parse_key(&config.scroll_down)?, &config.scroll_down, "scroll down")
                .also(KeyChord::plain(KeyCode::Down)),
            page_up: KeyBinding::new(parse_key(&config.page_up)?, &config.page_up, "prev page")
                .also(KeyChord::plain(KeyCode::PageUp)),
            page_down: KeyBinding::new(parse_key(&config.page_down)?, &config.page_down, "next page")
                .also(KeyChord::plain(KeyCode::PageDown)),
        })
    }

    /// Bindings worth showing in the help line for the current state
    pub fn help_for(&self, focus: Focus, load: LoadState) -> Vec<&KeyBinding> {
        match (focus, load) {
            (Focus::QueryInput, _) => vec![&self.switch_focus, &self.submit],
            (Focus::LogPane, LoadState::QueryLoading) => vec![&self.quit],
            (Focus::LogPane, LoadState::Idle) => vec![
                &self.scroll_down,
                &self.scroll_up,
                &self.page_up,
                &self.page_down,
                &self.switch_focus,
                &self.quit,
            ],
        }
    }
}

impl Default for Keymap {
    fn default() -> Self {
        let char_key = |c| KeyChord::plain(KeyCode::Char(c));
        Self {
            switch_focus: KeyBinding::new(KeyChord::plain(KeyCode::Tab), "tab", "switch focus"),
            submit: KeyBinding::new(KeyChord::plain(KeyCode::Enter), "enter", "run query"),
            quit: KeyBinding::new(char_key('q'), "q", "quit"),
            scroll_up: KeyBinding::new(char_key('k'), "k", "scroll up").also(KeyChord::plain(KeyCode::Up)),
            scroll_down: KeyBinding::new(char_key('j'), "j", "scroll down").also(KeyChord::plain(KeyCode::Down)),
            page_up: KeyBinding::new(char_key('h'), "h", "prev page").also(KeyChord::plain(KeyCode::PageUp)),
            page_down: KeyBinding::new(char_key('l'), "l", "next page").also(KeyChord::plain(KeyCode::PageDown)),
        }
    }
}
