use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use nestegg::api::ApiState;
use nestegg::core::{DEFAULT_PARALLEL_THRESHOLD, HistoricalReturns};

#[derive(Parser)]
#[command(name = "nestegg", about = "Monte Carlo retirement-planning engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Override the embedded historical monthly return series.
        #[arg(long)]
        data_file: Option<PathBuf>,
        /// Batches at or above this run count fan out over the rayon pool;
        /// smaller ones run sequentially.
        #[arg(long, default_value_t = DEFAULT_PARALLEL_THRESHOLD)]
        parallel_threshold: usize,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            port,
            data_file,
            parallel_threshold,
        } => {
            let history = match &data_file {
                Some(path) => HistoricalReturns::from_path(path),
                None => HistoricalReturns::from_embedded(),
            };
            let history = match history {
                Ok(history) => {
                    tracing::info!(
                        months = history.months(),
                        skipped_rows = history.skipped_rows(),
                        bear_windows = history.bear_window_count(),
                        bull_windows = history.bull_window_count(),
                        "historical return series loaded"
                    );
                    Arc::new(history)
                }
                Err(e) => {
                    tracing::error!(error = %e, "refusing to serve without historical data");
                    std::process::exit(1);
                }
            };

            let state = ApiState::new(history, parallel_threshold);
            if let Err(e) = nestegg::api::run_http_server(port, state).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
    }
}
