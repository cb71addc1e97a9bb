//! Component wiring for the `newsreel` binary: store construction,
//! shutdown plumbing, and one run function per subcommand.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use ai_client::{ClaudeModel, LanguageModel};
use newsreel_cluster::{ClusterConsumer, ClusterDeps};
use newsreel_common::{Config, NewsreelError};
use newsreel_monitor::{BreakingMonitor, Sweeper};
use newsreel_poller::{sources, Poller, PollerStats};
use newsreel_store::{
    Articles, CostLog, DeadLetters, DocumentStore, FeedStates, MemoryStore, Notifications,
    Stories, SummaryAudit,
};
use newsreel_summarizer::{BatchSummarizer, Summarizer, SummarizerDeps};

use crate::http::{router, AppState};

/// A watch channel flipped once on SIGINT/SIGTERM. Every long-running
/// loop selects on it; in-flight work aborts and leases checkpoint.
pub fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("Shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}

/// The document store is an external collaborator; only the in-process
/// implementation ships with this binary.
pub fn build_store(config: &Config) -> Result<Arc<dyn DocumentStore>, NewsreelError> {
    match config.store_connection.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(NewsreelError::Config(format!(
            "unsupported STORE_CONNECTION {other:?} (this binary ships the \"memory\" store)"
        ))),
    }
}

fn build_model(config: &Config) -> Result<Arc<dyn LanguageModel>, NewsreelError> {
    if config.summarization_enabled && config.llm_api_key.is_empty() {
        return Err(NewsreelError::Auth(
            "LLM_API_KEY is required while SUMMARIZATION_ENABLED=true".to_string(),
        ));
    }
    Ok(Arc::new(ClaudeModel::new(config.llm_api_key.clone())))
}

pub async fn run_poll(
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let feeds = sources::load(config.feed_config_path.as_deref())?;
    let stats = Arc::new(PollerStats::new());
    let feed_states = FeedStates::new(store.clone());
    let articles = Articles::new(store.clone());

    let app_state = Arc::new(AppState {
        started_at: Instant::now(),
        stats: stats.clone(),
        feed_states: feed_states.clone(),
    });
    let http = serve_http(config.http_port, app_state, shutdown.clone());

    let poller = Poller::new(config, feeds, feed_states, articles, stats)?;
    let poll = poller.run(shutdown);

    tokio::try_join!(http, poll)?;
    Ok(())
}

pub async fn run_cluster(
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let deps = ClusterDeps {
        config,
        articles: Articles::new(store.clone()),
        stories: Stories::new(store.clone()),
        dead_letters: DeadLetters::new(store.clone()),
    };
    ClusterConsumer::new(store, deps).run(shutdown).await
}

pub async fn run_summarize(
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let model = build_model(&config)?;
    let deps = SummarizerDeps {
        config,
        model,
        stories: Stories::new(store.clone()),
        articles: Articles::new(store.clone()),
        cost_log: CostLog::new(store.clone()),
        audit: SummaryAudit::new(store.clone()),
    };
    let realtime = Summarizer::new(store, deps.clone());
    let batch = BatchSummarizer::new(deps);

    tokio::try_join!(realtime.run_realtime(shutdown.clone()), batch.run(shutdown))?;
    Ok(())
}

pub async fn run_monitor(
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let articles = Articles::new(store.clone());
    let stories = Stories::new(store.clone());
    let sweeper = Sweeper::new(config.clone(), articles, stories.clone());
    let monitor = BreakingMonitor::new(
        config,
        stories,
        Notifications::new(store.clone()),
        sweeper,
    );
    monitor.run(shutdown).await
}

/// Single-process mode: every component over one shared store.
pub async fn run_all(
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    tokio::try_join!(
        run_poll(config.clone(), store.clone(), shutdown.clone()),
        run_cluster(config.clone(), store.clone(), shutdown.clone()),
        run_summarize(config.clone(), store.clone(), shutdown.clone()),
        run_monitor(config, store, shutdown),
    )?;
    Ok(())
}

async fn serve_http(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Operational HTTP surface listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}
