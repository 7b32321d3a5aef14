use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use crate::config::MAX_QUERY_LIMIT;

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Tail and explore log groups from the terminal",
    long_about = "tailscope fetches events from a log group over a time window, follows new events as they arrive,\n\
and offers an interactive explorer with case-insensitive search.\n\
---\n\
Examples:\n\
  tailscope --log-group /ecs/web --since 15m                  # Print the last 15 minutes\n\
  tailscope --log-group /ecs/web --follow                     # Keep printing new events\n\
  tailscope --log-group /ecs/web --follow --interactive       # Explore in the terminal UI\n\
  tailscope --log-group /ecs/web --task-id 4f2a --json        # JSON lines for one task\n\
---\n\
Configuration Examples:\n\
  tailscope config set backend.endpoint https://logs.example.com\n\
  tailscope config set query.mode local\n\
  tailscope config set keymap.quit ctrl+q\n\
  tailscope config get                                        # Show all settings\n\
  tailscope config get stream.poll_interval_ms"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log group to read (falls back to the configured log_group)
    #[arg(short = 'g', long = "log-group")]
    pub log_group: Option<String>,

    /// Only events newer than this duration (e.g., 30s, 5m, 2h, 1d)
    #[arg(long, conflicts_with = "start_time")]
    pub since: Option<String>,

    /// Only events at or after this RFC 3339 time
    #[arg(long = "start-time", value_parser = parse_rfc3339)]
    pub start_time: Option<DateTime<Utc>>,

    /// Only events at or before this RFC 3339 time
    #[arg(long = "end-time", value_parser = parse_rfc3339)]
    pub end_time: Option<DateTime<Utc>>,

    /// Keep only the most recent N events (1-10000)
    #[arg(short = 'n', long, value_parser = parse_limit)]
    pub limit: Option<usize>,

    /// Keep polling for new events
    #[arg(short, long)]
    pub follow: bool,

    /// Restrict to the log streams of these tasks
    #[arg(long = "task-id", value_name = "ID")]
    pub task_ids: Vec<String>,

    /// Prefix joined with each task ID to form its log stream name
    #[arg(long = "stream-prefix", value_name = "PREFIX")]
    pub stream_prefix: Option<String>,

    /// Restrict to these log streams by exact name
    #[arg(long = "log-stream", value_name = "NAME")]
    pub log_streams: Vec<String>,

    /// Server-side filter pattern applied to every fetch
    #[arg(long = "filter")]
    pub filter_pattern: Option<String>,

    /// Open the interactive explorer
    #[arg(short, long)]
    pub interactive: bool,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Run explorer queries over the events already received instead of the log source
    #[arg(long = "local-query")]
    pub local_query: bool,

    /// Log source endpoint (overrides config)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Number of threads for local search (default: CPU count, at least 2)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Enable development mode - writes internal logs to a file, even in interactive mode
    #[arg(long)]
    pub dev: bool,

    /// Verbosity level for debug output (-v, -vv, ...)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Read or change persistent settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Set a configuration key
    Set {
        /// Dot-notation key, e.g. stream.poll_interval_ms
        key: String,
        value: String,
    },
    /// Show one key, or every key when omitted
    Get { key: Option<String> },
}

pub fn parse_args() -> Args {
    Args::parse()
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 time like 2024-01-31T12:00:00Z: {}", e))
}

fn parse_limit(value: &str) -> Result<usize, String> {
    let limit: usize = value
        .parse()
        .map_err(|_| format!("'{}' is not a whole number", value))?;
    if limit == 0 || limit > MAX_QUERY_LIMIT {
        return Err(format!("limit must be between 1 and {}", MAX_QUERY_LIMIT));
    }
    Ok(limit)
}

/// Parse a duration string like "5s", "2m", "3h" into seconds
pub fn parse_duration_to_seconds(duration: &str) -> Result<i64> {
    if duration.is_empty() {
        return Err(anyhow!("Duration string cannot be empty"));
    }

    let mut numeric_part = String::new();
    let mut unit_part = String::new();

    for c in duration.chars() {
        if c.is_ascii_digit() && unit_part.is_empty() {
            numeric_part.push(c);
        } else {
            unit_part.push(c);
        }
    }

    if numeric_part.is_empty() {
        return Err(anyhow!("Missing numeric value in duration string"));
    }

    let number = numeric_part
        .parse::<i64>()
        .map_err(|_| anyhow!("Invalid number in duration string"))?;

    let seconds = match unit_part.as_str() {
        "s" => Some(number),
        "m" => number.checked_mul(60),
        "h" => number.checked_mul(3600),
        "d" => number.checked_mul(86400),
        "" => return Err(anyhow!("Missing time unit. Expected format like '5s', '2m', '3h'")),
        _ => return Err(anyhow!("Invalid time unit '{}'. Supported units: s, m, h, d", unit_part)),
    };
    seconds.ok_or_else(|| anyhow!("Duration '{}' is too large", duration))
}

impl Args {
    /// Lower bound in epoch milliseconds from `--since` or `--start-time`
    pub fn start_millis(&self, now_millis: i64) -> Result<Option<i64>> {
        if let Some(since) = &self.since {
            let seconds = parse_duration_to_seconds(since)?;
            return Ok(Some(now_millis.saturating_sub(seconds.saturating_mul(1000))));
        }
        Ok(self.start_time.map(|t| t.timestamp_millis()))
    }

    pub fn end_millis(&self) -> Option<i64> {
        self.end_time.map(|t| t.timestamp_millis())
    }

    /// Stream names from `--log-stream` plus one per `--task-id`
    pub fn log_stream_names(&self) -> Vec<String> {
        let mut names = self.log_streams.clone();
        for task_id in &self.task_ids {
            let name = match &self.stream_prefix {
                Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), task_id),
                None => task_id.clone(),
            };
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    pub fn output_format(&self) -> &'static str {
        if self.json {
            "json"
        } else {
            "text"
        }
    }
}
