//! The clustering consumer: an explicit loop over the article change
//! stream. Per-article failures are contained here — validation errors
//! and poison messages are dead-lettered and the stream advances; only
//! startup failures propagate.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use newsreel_common::{Article, NewsreelError};
use newsreel_store::{names, DocumentStore};

use crate::engine::{handle_article, ClusterDeps};

pub const CLUSTERING_LEASE: &str = "clustering";

/// Attempts for transient store errors before dead-lettering.
const HANDLER_MAX_ATTEMPTS: u32 = 3;
const HANDLER_RETRY_BASE: Duration = Duration::from_millis(500);

pub struct ClusterConsumer {
    store: Arc<dyn DocumentStore>,
    deps: ClusterDeps,
}

impl ClusterConsumer {
    pub fn new(store: Arc<dyn DocumentStore>, deps: ClusterDeps) -> Self {
        Self { store, deps }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut stream = self
            .store
            .change_stream(names::ARTICLES, CLUSTERING_LEASE)
            .await?;
        info!("Clustering consumer starting");

        loop {
            let doc = tokio::select! {
                _ = shutdown.changed() => break,
                doc = stream.next() => doc?,
            };

            let article: Article = match serde_json::from_value(doc.clone()) {
                Ok(article) => article,
                Err(e) => {
                    warn!(error = %e, payload = %doc, "Undecodable article document");
                    self.deps
                        .dead_letters
                        .record(CLUSTERING_LEASE, &format!("undecodable article: {e}"), doc)
                        .await;
                    continue;
                }
            };

            self.process(&article, doc).await;
        }

        // Commit the checkpoint so a replacement replica resumes exactly
        // where this one stopped.
        stream.checkpoint().await?;
        info!("Clustering consumer stopped");
        Ok(())
    }

    /// Handle one article, containing every per-item failure mode.
    async fn process(&self, article: &Article, doc: serde_json::Value) {
        for attempt in 1..=HANDLER_MAX_ATTEMPTS {
            match handle_article(&self.deps, article).await {
                Ok(_) => return,
                Err(NewsreelError::Validation(reason)) => {
                    // A bug building the story, not a transient condition:
                    // full payload to the log and the dead-letter store.
                    error!(
                        article_id = %article.article_id,
                        reason = %reason,
                        payload = %doc,
                        "Validation failure while clustering"
                    );
                    self.deps
                        .dead_letters
                        .record(CLUSTERING_LEASE, &reason, doc)
                        .await;
                    return;
                }
                Err(e) if e.is_retryable() && attempt < HANDLER_MAX_ATTEMPTS => {
                    warn!(
                        article_id = %article.article_id,
                        attempt,
                        error = %e,
                        "Transient clustering failure, backing off"
                    );
                    tokio::time::sleep(HANDLER_RETRY_BASE * 2u32.pow(attempt - 1)).await;
                }
                Err(e) => {
                    let poison = NewsreelError::PoisonMessage {
                        attempts: attempt,
                        reason: e.to_string(),
                    };
                    error!(
                        article_id = %article.article_id,
                        error = %poison,
                        "Poison article, dead-lettering"
                    );
                    self.deps
                        .dead_letters
                        .record(CLUSTERING_LEASE, &poison.to_string(), doc)
                        .await;
                    return;
                }
            }
        }
    }
}
