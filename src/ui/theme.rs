use ratatui::style::{Color, Modifier, Style};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorScheme {
    Dark,  // For dark terminal backgrounds
    Light, // For light terminal backgrounds
}

impl ColorScheme {
    /// Resolve a configured theme name; "auto" inspects the terminal
    pub fn from_name(name: &str) -> Self {
        match name {
            "dark" => ColorScheme::Dark,
            "light" => ColorScheme::Light,
            _ => Self::detect(),
        }
    }

    pub fn detect() -> Self {
        // Check for VS Code, which often uses light themes
        if std::env::var("TERM_PROGRAM").is_ok_and(|v| v.contains("vscode")) {
            return ColorScheme::Light;
        }

        // COLORFGBG is "fg;bg"; a high background index means a light terminal
        if let Ok(colorfgbg) = std::env::var("COLORFGBG") {
            if let Some(bg) = colorfgbg.split(';').nth(1) {
                if let Ok(bg_num) = bg.parse::<i32>() {
                    return if bg_num >= 7 { ColorScheme::Light } else { ColorScheme::Dark };
                }
            }
        }

        ColorScheme::Dark
    }
}

/// Styles used by the renderer. Built once per session.
#[derive(Debug, Clone)]
pub struct Theme {
    pub scheme: ColorScheme,
    pub focused_border: Style,
    pub blurred_border: Style,
    pub text: Style,
    pub dim_text: Style,
    pub timestamp: Style,
    pub highlight: Style,
    pub error: Style,
    pub status: Style,
}

impl Theme {
    pub fn new(scheme: ColorScheme) -> Self {
        let (text, dim, timestamp) = match scheme {
            ColorScheme::Dark => (Color::Rgb(240, 240, 240), Color::Indexed(240), Color::Indexed(110)),
            ColorScheme::Light => (Color::Rgb(30, 30, 30), Color::Indexed(245), Color::Indexed(25)),
        };

        Self {
            scheme,
            focused_border: Style::default().fg(Color::Indexed(62)),
            blurred_border: Style::default().fg(Color::Indexed(240)),
            text: Style::default().fg(text),
            dim_text: Style::default().fg(dim),
            timestamp: Style::default().fg(timestamp),
            highlight: Style::default()
                .fg(Color::Black)
                .bg(Color::Indexed(214))
                .add_modifier(Modifier::BOLD),
            error: Style::default().fg(Color::Indexed(196)).add_modifier(Modifier::BOLD),
            status: Style::default().fg(dim).add_modifier(Modifier::ITALIC),
        }
    }

    pub fn from_name(name: &str) -> Self {
        Self::new(ColorScheme::from_name(name))
    }

    pub fn border(&self, focused: bool) -> Style {
        if focused {
            self.focused_border
        } else {
            self.blurred_border
        }
    }
}

/// Frame sets for the loading indicator
const SPINNERS: &[&[&str]] = &[
    &["|", "/", "-", "\\"],
    &["⣾ ", "⣽ ", "⣻ ", "⢿ ", "⡿ ", "⣟ ", "⣯ ", "⣷ "],
    &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"],
    &["⢄", "⢂", "⢁", "⡁", "⡈", "⡐", "⡠"],
    &["█", "▓", "▒", "░"],
    &["∙∙∙", "●∙∙", "∙●∙", "∙∙●"],
    &["🌍", "🌎", "🌏"],
    &["🌑", "🌒", "🌓", "🌔", "🌕", "🌖", "🌗", "🌘"],
    &["🙈", "🙉", "🙊"],
];

#[derive(Debug, Clone)]
pub struct Spinner {
    frames: &'static [&'static str],
    index: usize,
}

impl Spinner {
    /// Pick a frame set at random
    pub fn random() -> Self {
        Self {
            frames: SPINNERS[fastrand::usize(..SPINNERS.len())],
            index: 0,
        }
    }

    pub fn tick(&mut self) {
        self.index = (self.index + 1) % self.frames.len();
    }

    pub fn frame(&self) -> &'static str {
        self.frames[self.index]
    }
}

impl Default for Spinner {
    fn default() -> Self {
        Self {
            frames: SPINNERS[0],
            index: 0,
        }
    }
}
