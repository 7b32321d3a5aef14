mod args;

pub use args::{parse_args, parse_duration_to_seconds, Args, Commands, ConfigAction};

use anyhow::{Context, Result};
use std::io;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::filtering::{QueryEngine, QueryMode};
use crate::logs::{HttpLogBackend, LogFetcher, QueryWindow, StreamConfig, StreamCoordinator};
use crate::output;
use crate::ui::keymap::Keymap;
use crate::ui::theme::Theme;
use crate::ui::{InteractiveOptions, SessionOptions};

/// Whether this invocation draws the terminal UI
pub fn uses_ui(args: &Args) -> bool {
    args.command.is_none() && args.interactive
}

pub async fn run(args: Args, shutdown: CancellationToken) -> Result<()> {
    if let Some(Commands::Config { action }) = &args.command {
        return run_config(action);
    }

    let config = Config::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });

    let window = build_window(&args, &config, chrono::Utc::now().timestamp_millis())?;
    let endpoint = args.endpoint.clone().unwrap_or_else(|| config.backend.endpoint.clone());
    info!("Reading {} from {}", window.log_group, endpoint);

    let backend = HttpLogBackend::new(endpoint, &config.backend.headers)
        .context("Failed to create log source client")?;
    let fetcher = LogFetcher::new(Arc::new(backend));

    let stream = args
        .follow
        .then(|| StreamCoordinator::new(fetcher.clone(), stream_config(&window, &config)));

    if args.interactive {
        let query_mode = if args.local_query {
            QueryMode::LocalBuffer
        } else {
            config.query_mode()
        };
        let threads = args.threads.unwrap_or_else(QueryEngine::recommended_threads);
        let engine = QueryEngine::new(
            fetcher.clone(),
            window.clone().with_limit(config.query.limit),
            threads,
        );
        let keymap = Keymap::from_config(&config.keymap).context("Invalid keymap in config")?;

        let options = InteractiveOptions {
            fetcher,
            window,
            stream,
            engine: Arc::new(engine),
            session: SessionOptions {
                keymap,
                buffer_size: config.ui.buffer_size,
                query_mode,
            },
            theme: Theme::from_name(&config.ui.theme),
            tick_rate: config.tick_rate(),
            shutdown,
        };
        crate::ui::run_app(options).await?;
        return Ok(());
    }

    let formatter = output::create_formatter(args.output_format())?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let written = match stream {
        Some(coordinator) => output::follow(&coordinator, shutdown, formatter.as_ref(), &mut out).await?,
        None => output::print_once(&fetcher, &window, formatter.as_ref(), &mut out).await?,
    };
    info!("Wrote {} events", written);
    Ok(())
}

/// Resolve the fetch window from flags, falling back to config
pub fn build_window(args: &Args, config: &Config, now_millis: i64) -> Result<QueryWindow> {
    let log_group = args
        .log_group
        .clone()
        .or_else(|| config.log_group.clone())
        .context("No log group given. Pass --log-group or run `tailscope config set log_group <name>`")?;

    let start_time = args.start_millis(now_millis)?;
    let end_time = args.end_millis();
    if let (Some(start), Some(end)) = (start_time, end_time) {
        if start > end {
            anyhow::bail!("Start time is after end time");
        }
    }

    Ok(QueryWindow::new(log_group)
        .with_range(start_time, end_time)
        .with_limit(args.limit.unwrap_or(config.query.limit))
        .with_filter(args.filter_pattern.clone())
        .with_log_streams(args.log_stream_names()))
}

fn stream_config(window: &QueryWindow, config: &Config) -> StreamConfig {
    let mut stream = StreamConfig::new(window.log_group.clone());
    stream.start_time = window.start_time;
    stream.end_time = window.end_time;
    stream.initial_limit = window.limit;
    stream.filter_pattern = window.filter_pattern.clone();
    stream.log_stream_names = window.log_stream_names.clone();
    stream.poll_interval = config.poll_interval();
    stream.channel_capacity = config.stream.channel_capacity;
    stream
}

fn run_config(action: &ConfigAction) -> Result<()> {
    let mut config = Config::load()?;
    match action {
        ConfigAction::Set { key, value } => {
            config.set_value(key, value)?;
            config.save()?;
            println!("✅ Set {} = {}", key, value);
            println!("Config file: {}", Config::config_file_path()?.display());
        }
        ConfigAction::Get { key: Some(key) } => {
            println!("{} = {}", key, config.get_value(key)?);
        }
        ConfigAction::Get { key: None } => {
            println!("{}", config.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("tailscope").chain(extra.iter().copied())).unwrap()
    }

    #[test]
    fn test_window_from_flags() {
        let config = Config::default();
        let window = build_window(
            &args(&["--log-group", "/ecs/web", "--since", "1m", "--limit", "50", "--task-id", "t1"]),
            &config,
            100_000,
        )
        .unwrap();

        assert_eq!(window.log_group, "/ecs/web");
        assert_eq!(window.start_time, Some(40_000));
        assert_eq!(window.end_time, None);
        assert_eq!(window.limit, 50);
        assert_eq!(window.log_stream_names, vec!["t1".to_string()]);
    }

    #[test]
    fn test_window_falls_back_to_config() {
        let mut config = Config::default();
        assert!(build_window(&args(&[]), &config, 0).is_err());

        config.log_group = Some("/from/config".into());
        let window = build_window(&args(&[]), &config, 0).unwrap();
        assert_eq!(window.log_group, "/from/config");
        assert_eq!(window.limit, config.query.limit);
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let result = build_window(
            &args(&[
                "-g", "g",
                "--start-time", "2024-01-02T00:00:00Z",
                "--end-time", "2024-01-01T00:00:00Z",
            ]),
            &Config::default(),
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_stream_config_mirrors_window() {
        let window = QueryWindow::new("g").with_range(Some(5), None).with_limit(20);
        let stream = stream_config(&window, &Config::default());
        assert_eq!(stream.start_time, Some(5));
        assert_eq!(stream.initial_limit, 20);
        assert_eq!(stream.poll_interval, std::time::Duration::from_millis(2000));
    }

    #[test]
    fn test_ui_only_for_interactive_runs() {
        assert!(uses_ui(&args(&["-i", "-g", "g"])));
        assert!(!uses_ui(&args(&["-g", "g"])));
        assert!(!uses_ui(&args(&["-i", "config", "get"])));
    }
}
