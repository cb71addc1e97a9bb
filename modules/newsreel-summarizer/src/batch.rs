//! The batched summarization path. On a timer, every story needing a
//! summary that did not qualify for real-time synthesis is bundled into
//! one bulk LLM request, which halves the per-item cost. Failed
//! submissions retry, then split in half and retry each half — one bad
//! request cannot sink the whole bundle.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use ai_client::{BatchStatus, SynthesisRequest};
use newsreel_common::{Story, StoryStatus, SummaryPath};

use crate::orchestrator::{apply_outcome, is_urgent, needs_synthesis, SummarizerDeps};
use crate::synthesis::build_request;

/// Stories updated more recently than this are still settling and wait
/// for the next cycle.
const BATCH_DEBOUNCE_MINUTES: i64 = 5;
/// Items per submitted batch.
const BATCH_CAP: usize = 50;
const BATCH_POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Overall wait for one batch before giving up on the cycle.
const BATCH_TOTAL_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

pub struct BatchSummarizer {
    deps: SummarizerDeps,
}

impl BatchSummarizer {
    pub fn new(deps: SummarizerDeps) -> Self {
        Self { deps }
    }

    /// Timer loop: one cycle per `summarization_batch_interval`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if !self.deps.config.summarization_enabled {
            info!("Summarization disabled, batch path idle");
            return Ok(());
        }
        info!(
            interval_secs = self.deps.config.summarization_batch_interval.as_secs(),
            "Batch summarizer starting"
        );
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.deps.config.summarization_batch_interval) => {}
            }
            if let Err(e) = self.run_cycle(&mut shutdown).await {
                warn!(error = %e, "Batch cycle failed");
            }
        }
        info!("Batch summarizer stopped");
        Ok(())
    }

    /// One cycle: collect, submit (with binary splitting), await, apply.
    pub async fn run_cycle(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let candidates = self.collect_candidates().await?;
        if candidates.is_empty() {
            return Ok(());
        }
        info!(stories = candidates.len(), "Submitting summary batch");

        let mut requests = Vec::new();
        let mut categories = std::collections::HashMap::new();
        for story in &candidates {
            let articles = crate::orchestrator::source_articles(&self.deps, story).await;
            categories.insert(story.story_id.clone(), story.category);
            requests.push(build_request(&self.deps.config, story, &articles));
        }

        let results = self.submit_with_split(requests, shutdown).await;
        for (story_id, outcome) in results {
            let Some(category) = categories.get(&story_id).copied() else {
                warn!(story_id = %story_id, "Batch result for unknown story");
                continue;
            };
            apply_outcome(&self.deps, &story_id, category, outcome, SummaryPath::Batch).await;
        }
        Ok(())
    }

    /// Non-urgent stories needing synthesis, plus urgent ones the
    /// real-time path deferred (anything quiet past the debounce window).
    async fn collect_candidates(&self) -> Result<Vec<Story>> {
        let cutoff = Utc::now() - chrono::Duration::minutes(BATCH_DEBOUNCE_MINUTES);
        let mut candidates = Vec::new();
        for status in [
            StoryStatus::Monitoring,
            StoryStatus::Developing,
            StoryStatus::Verified,
            StoryStatus::Breaking,
        ] {
            for story in self.deps.stories.with_status(status).await? {
                if !needs_synthesis(&story) {
                    continue;
                }
                if is_urgent(&story) && story.last_updated >= cutoff {
                    continue; // the real-time path owns this one
                }
                candidates.push(story);
                if candidates.len() >= BATCH_CAP {
                    return Ok(candidates);
                }
            }
        }
        Ok(candidates)
    }

    /// Submit and await one batch; on submission failure, retry once, then
    /// split in half and recurse. Single-request failures are dropped with
    /// a warning and picked up again next cycle.
    async fn submit_with_split(
        &self,
        requests: Vec<SynthesisRequest>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Vec<(String, ai_client::SynthesisOutcome)> {
        let mut pending = vec![requests];
        let mut results = Vec::new();

        while let Some(chunk) = pending.pop() {
            if chunk.is_empty() {
                continue;
            }
            let submitted = match self.deps.model.submit_batch(chunk.clone()).await {
                Ok(id) => Ok(id),
                Err(first) => {
                    warn!(error = %first, size = chunk.len(), "Batch submission failed, retrying");
                    self.deps.model.submit_batch(chunk.clone()).await
                }
            };
            match submitted {
                Ok(batch_id) => {
                    match self.await_batch(&batch_id, shutdown).await {
                        Ok(mut batch_results) => results.append(&mut batch_results),
                        Err(e) => warn!(error = %e, "Batch never completed"),
                    }
                }
                Err(e) if chunk.len() > 1 => {
                    let mid = chunk.len() / 2;
                    let mut chunk = chunk;
                    let tail = chunk.split_off(mid);
                    warn!(error = %e, "Splitting failed batch in half");
                    pending.push(chunk);
                    pending.push(tail);
                }
                Err(e) => {
                    warn!(error = %e, story_id = %chunk[0].request_id, "Dropping unsubmittable request");
                }
            }
        }
        results
    }

    async fn await_batch(
        &self,
        batch_id: &ai_client::BatchId,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Vec<(String, ai_client::SynthesisOutcome)>> {
        let deadline = tokio::time::Instant::now() + BATCH_TOTAL_TIMEOUT;
        loop {
            match self.deps.model.poll_batch(batch_id).await? {
                BatchStatus::Ended => break,
                BatchStatus::InProgress => {}
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("batch {} timed out", batch_id.0);
            }
            tokio::select! {
                _ = shutdown.changed() => anyhow::bail!("shutdown during batch wait"),
                _ = tokio::time::sleep(BATCH_POLL_INTERVAL) => {}
            }
        }
        self.deps.model.fetch_batch_results(batch_id).await
    }
}
