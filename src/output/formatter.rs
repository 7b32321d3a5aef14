use crate::logs::LogEvent;
use anyhow::{anyhow, Result};

/// Separator between the timestamp and the message in text output
pub const LINE_SEPARATOR: &str = "  ";

/// Render an event as `<ISO-8601 timestamp>  <message>`
pub fn format_line(event: &LogEvent) -> String {
    format!("{}{}{}", event.iso_timestamp(), LINE_SEPARATOR, event.message)
}

/// Trait for formatting log events
pub trait OutputFormatter: Send + Sync {
    /// Format a log event according to the formatter's rules
    fn format(&self, event: &LogEvent) -> Result<String>;

    /// Get the name of the formatter
    fn format_name(&self) -> Option<String> {
        None
    }
}

/// Text formatter for human-readable output
pub struct TextFormatter;

impl OutputFormatter for TextFormatter {
    fn format(&self, event: &LogEvent) -> Result<String> {
        Ok(format_line(event))
    }

    fn format_name(&self) -> Option<String> {
        Some("text".to_string())
    }
}

/// Formats events as one JSON object per line
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format(&self, event: &LogEvent) -> Result<String> {
        let json = serde_json::json!({
            "timestamp": event.iso_timestamp(),
            "timestampMillis": event.timestamp,
            "ingestionTime": event.ingestion_time,
            "message": event.message,
        });

        serde_json::to_string(&json).map_err(|e| anyhow!("Failed to serialize to JSON: {}", e))
    }

    fn format_name(&self) -> Option<String> {
        Some("json".to_string())
    }
}

/// Create a formatter based on the output format string
pub fn create_formatter(format: &str) -> Result<Box<dyn OutputFormatter>> {
    match format {
        "text" => Ok(Box::new(TextFormatter)),
        "json" => Ok(Box::new(JsonFormatter)),
        _ => Err(anyhow!("Unsupported output format: {}", format)),
    }
}
