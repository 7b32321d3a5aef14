use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::filtering::QueryMode;

/// Largest page limit the log source accepts
pub const MAX_QUERY_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub stream: StreamSettings,
    pub query: QuerySettings,
    pub ui: UiConfig,
    pub keymap: KeymapConfig,
    pub backend: BackendConfig,
    /// Log group used when none is given on the command line
    pub log_group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub poll_interval_ms: u64,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// "backend" or "local"
    pub mode: String,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub buffer_size: usize, // Maximum events held by the session
    pub theme: String,      // UI theme (dark, light, auto)
    pub tick_rate_ms: u64,  // Spinner frame interval
}

/// Key names for each session action, e.g. "tab", "enter", "q", "ctrl+r"
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeymapConfig {
    pub switch_focus: String,
    pub submit: String,
    pub quit: String,
    pub scroll_up: String,
    pub scroll_down: String,
    pub page_up: String,
    pub page_down: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub endpoint: String,
    /// Pre-authenticated headers attached to every request
    pub headers: BTreeMap<String, String>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            channel_capacity: 1024,
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            mode: "backend".to_string(),
            limit: MAX_QUERY_LIMIT,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            buffer_size: 10_000,
            theme: "auto".to_string(),
            tick_rate_ms: 100,
        }
    }
}

impl Default for KeymapConfig {
    fn default() -> Self {
        Self {
            switch_focus: "tab".to_string(),
            submit: "enter".to_string(),
            quit: "q".to_string(),
            scroll_up: "k".to_string(),
            scroll_down: "j".to_string(),
            page_up: "h".to_string(),
            page_down: "l".to_string(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4566".to_string(),
            headers: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Get the configuration file path
    pub fn config_file_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "tailscope", "tailscope")
            .context("Unable to determine project directories")?;

        let config_dir = proj_dirs.config_dir();
        fs::create_dir_all(config_dir).context("Failed to create config directory")?;

        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    /// Load configuration from `path`; a missing or unparseable file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;

        match toml::from_str::<Config>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                eprintln!("⚠️  Warning: Failed to parse config file ({}). Using defaults.", e);
                Ok(Self::default())
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.stream.poll_interval_ms)
    }

    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(self.ui.tick_rate_ms)
    }

    pub fn query_mode(&self) -> QueryMode {
        match self.query.mode.as_str() {
            "local" => QueryMode::LocalBuffer,
            _ => QueryMode::Backend,
        }
    }

    /// Set any configuration value using dot notation
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "log_group" => {
                self.log_group = if value.is_empty() { None } else { Some(value.to_string()) };
            }
            "stream.poll_interval_ms" => {
                let interval = value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("Invalid poll interval: '{}'. Must be a positive integer (milliseconds)", value))?;
                if interval < 100 {
                    return Err(anyhow!("Poll interval must be at least 100ms (got: {})", interval));
                }
                self.stream.poll_interval_ms = interval;
            }
            "stream.channel_capacity" => {
                let capacity = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("Invalid channel capacity: '{}'. Must be a positive integer", value))?;
                if capacity == 0 {
                    return Err(anyhow!("Channel capacity must be at least 1"));
                }
                self.stream.channel_capacity = capacity;
            }
            "query.mode" => match value.to_lowercase().as_str() {
                "backend" | "local" => self.query.mode = value.to_lowercase(),
                _ => return Err(anyhow!("Invalid query mode: '{}'. Valid modes: backend, local", value)),
            },
            "query.limit" => {
                let limit = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("Invalid query limit: '{}'. Must be an integer", value))?;
                if limit == 0 || limit > MAX_QUERY_LIMIT {
                    return Err(anyhow!("Query limit must be between 1 and {} (got: {})", MAX_QUERY_LIMIT, limit));
                }
                self.query.limit = limit;
            }
            "ui.buffer_size" => {
                let size = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("Invalid buffer_size value: '{}'. Must be an integer.", value))?;
                if size == 0 {
                    return Err(anyhow!("Buffer size must be at least 1"));
                }
                self.ui.buffer_size = size;
            }
            "ui.theme" => match value.to_lowercase().as_str() {
                "dark" | "light" | "auto" => self.ui.theme = value.to_lowercase(),
                _ => return Err(anyhow!("Invalid theme: '{}'. Valid themes: dark, light, auto", value)),
            },
            "ui.tick_rate_ms" => {
                self.ui.tick_rate_ms = value
                    .parse::<u64>()
                    .ok()
                    .filter(|ms| *ms > 0)
                    .ok_or_else(|| anyhow!("Invalid tick rate: '{}'. Must be a positive integer", value))?;
            }
            "keymap.switch_focus" | "keymap.submit" | "keymap.quit" | "keymap.scroll_up"
            | "keymap.scroll_down" | "keymap.page_up" | "keymap.page_down" => {
                crate::ui::keymap::parse_key(value)?;
                let slot = match key {
                    "keymap.switch_focus" => &mut self.keymap.switch_focus,
                    "keymap.submit" => &mut self.keymap.submit,
                    "keymap.quit" => &mut self.keymap.quit,
                    "keymap.scroll_up" => &mut self.keymap.scroll_up,
                    "keymap.scroll_down" => &mut self.keymap.scroll_down,
                    "keymap.page_up" => &mut self.keymap.page_up,
                    _ => &mut self.keymap.page_down,
                };
                *slot = value.to_string();
            }
            "backend.endpoint" => {
                if !value.starts_with("http://") && !value.starts_with("https://") {
                    return Err(anyhow!("Invalid endpoint: '{}'. Must be a valid HTTP/HTTPS URL", value));
                }
                self.backend.endpoint = value.to_string();
            }
            _ => {
                if let Some(header) = key.strip_prefix("backend.headers.") {
                    if value.is_empty() {
                        self.backend.headers.remove(header);
                    } else {
                        self.backend.headers.insert(header.to_string(), value.to_string());
                    }
                } else {
                    return Err(anyhow!(
                        "Unknown configuration key: '{}'. Available keys: {}",
                        key,
                        self.get_all_keys().join(", ")
                    ));
                }
            }
        }

        Ok(())
    }

    /// Get all available configuration keys
    pub fn get_all_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = [
            "log_group",
            "stream.poll_interval_ms",
            "stream.channel_capacity",
            "query.mode",
            "query.limit",
            "ui.buffer_size",
            "ui.theme",
            "ui.tick_rate_ms",
            "keymap.switch_focus",
            "keymap.submit",
            "keymap.quit",
            "keymap.scroll_up",
            "keymap.scroll_down",
            "keymap.page_up",
            "keymap.page_down",
            "backend.endpoint",
        ]
        .iter()
        .map(|k| k.to_string())
        .collect();
        keys.extend(self.backend.headers.keys().map(|h| format!("backend.headers.{}", h)));
        keys
    }

    /// Get any configuration value using dot notation
    pub fn get_value(&self, key: &str) -> Result<String> {
        let value = match key {
            "log_group" => self.log_group.clone().unwrap_or_else(|| "<not-set>".to_string()),
            "stream.poll_interval_ms" => self.stream.poll_interval_ms.to_string(),
            "stream.channel_capacity" => self.stream.channel_capacity.to_string(),
            "query.mode" => self.query.mode.clone(),
            "query.limit" => self.query.limit.to_string(),
            "ui.buffer_size" => self.ui.buffer_size.to_string(),
            "ui.theme" => self.ui.theme.clone(),
            "ui.tick_rate_ms" => self.ui.tick_rate_ms.to_string(),
            "keymap.switch_focus" => self.keymap.switch_focus.clone(),
            "keymap.submit" => self.keymap.submit.clone(),
            "keymap.quit" => self.keymap.quit.clone(),
            "keymap.scroll_up" => self.keymap.scroll_up.clone(),
            "keymap.scroll_down" => self.keymap.scroll_down.clone(),
            "keymap.page_up" => self.keymap.page_up.clone(),
            "keymap.page_down" => self.keymap.page_down.clone(),
            "backend.endpoint" => self.backend.endpoint.clone(),
            _ => key
                .strip_prefix("backend.headers.")
                .and_then(|header| self.backend.headers.get(header))
                .cloned()
                .ok_or_else(|| anyhow!("Configuration key not found: {}", key))?,
        };
        Ok(value)
    }

    /// Display current configuration, one `key = value` per line
    pub fn display(&self) -> String {
        let keys = self.get_all_keys();
        let width = keys.iter().map(|k| k.len()).max().unwrap_or(0);

        let mut output = String::new();
        for key in keys {
            if let Ok(value) = self.get_value(&key) {
                output.push_str(&format!("{:<width$} = {}\n", key, value, width = width));
            }
        }
        if let Ok(path) = Self::config_file_path() {
            output.push_str(&format!("\nConfig file: {}\n", path.display()));
        }
        output
    }
}
