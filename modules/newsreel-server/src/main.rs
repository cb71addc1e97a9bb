use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use newsreel_common::{Config, NewsreelError};

mod http;
mod runtime;

#[derive(Parser)]
#[command(name = "newsreel", about = "News aggregation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll configured feeds and normalize entries into articles
    Poll,
    /// Consume the article change stream and cluster into stories
    Cluster,
    /// Run the summarization orchestrator (real-time + batch paths)
    Summarize,
    /// Run the breaking-news monitor and retention sweeper
    Monitor,
    /// Run every component in one process over the in-memory store
    All,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("newsreel=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();

    info!("Newsreel starting...");

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "Configuration error");
            return ExitCode::from(1);
        }
    };
    config.log_redacted();

    let store = match runtime::build_store(&config) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Configuration error");
            return ExitCode::from(1);
        }
    };

    let shutdown = runtime::shutdown_channel();

    let result = match cli.command {
        Command::Poll => runtime::run_poll(config, store, shutdown).await,
        Command::Cluster => runtime::run_cluster(config, store, shutdown).await,
        Command::Summarize => runtime::run_summarize(config, store, shutdown).await,
        Command::Monitor => runtime::run_monitor(config, store, shutdown).await,
        Command::All => runtime::run_all(config, store, shutdown).await,
    };

    match result {
        Ok(()) => {
            info!("Clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => match e.downcast_ref::<NewsreelError>() {
            Some(NewsreelError::Config(_)) | Some(NewsreelError::Auth(_)) => {
                error!(error = %e, "Configuration error");
                ExitCode::from(1)
            }
            _ => {
                error!(error = %e, "Fatal runtime error");
                ExitCode::from(2)
            }
        },
    }
}
