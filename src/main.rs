use anyhow::Result;
use tokio_util::sync::CancellationToken;

use tailscope::{cli, logging};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments first to determine if we're using UI mode
    let args = cli::parse_args();

    // Logs must never draw over the terminal UI; --dev sends them to a file
    let _log_guard = logging::init_tracing(args.verbosity, cli::uses_ui(&args), args.dev)?;

    // In UI mode raw input delivers Ctrl+C as a key; elsewhere the signal cancels streaming
    let shutdown = CancellationToken::new();
    if !cli::uses_ui(&args) {
        logging::setup_signal_handler(shutdown.clone());
    }

    cli::run(args, shutdown).await
}
