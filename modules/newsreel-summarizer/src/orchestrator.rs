//! The summarization orchestrator's real-time path: a consumer over the
//! story change stream that synthesizes urgent stories immediately.
//! Synthesis runs in a bounded worker pool so LLM latency never blocks
//! the stream; a per-story minimum gap stops headline thrash when
//! sources arrive in bursts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use ai_client::{estimate_cost_micro_usd, LanguageModel, Synthesis, SynthesisOutcome};
use newsreel_common::{
    Article, Config, CostLogEntry, NewsreelError, Story, StoryStatus, StorySummary, SummaryPath,
};
use newsreel_store::{
    names, update_with_etag_retry, Articles, CostLog, DocumentStore, Stories, SummaryAudit,
};

use crate::synthesis::{
    build_request, extractive_fallback, parse_output, word_count, SynthesisOutput,
};

pub const SUMMARIZER_LEASE: &str = "summarizer";

/// Real-time attempts before deferring a story to the batch path.
const SYNTHESIS_MAX_ATTEMPTS: u32 = 3;
const SYNTHESIS_RETRY_BASE: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct SummarizerDeps {
    pub config: Arc<Config>,
    pub model: Arc<dyn LanguageModel>,
    pub stories: Stories,
    pub articles: Articles,
    pub cost_log: CostLog,
    pub audit: SummaryAudit,
}

pub struct Summarizer {
    store: Arc<dyn DocumentStore>,
    deps: SummarizerDeps,
    pool: Arc<Semaphore>,
    /// Last synthesis start per story, for the minimum-gap rate limit.
    last_synthesis: Arc<Mutex<HashMap<String, Instant>>>,
}

/// Whether a story has synthesis work outstanding.
pub fn needs_synthesis(story: &Story) -> bool {
    if story.status == StoryStatus::Archived {
        return false;
    }
    match &story.summary {
        None => true,
        // Only a new distinct source moves `last_updated` — same-source
        // refreshes, summary writes, and status changes leave it. So this
        // is exactly "a distinct source was added since the last summary".
        Some(summary) => story.last_updated > summary.generated_at,
    }
}

/// Urgent stories take the real-time path; the rest wait for the batch.
pub fn is_urgent(story: &Story) -> bool {
    matches!(story.status, StoryStatus::Verified | StoryStatus::Breaking)
}

impl Summarizer {
    pub fn new(store: Arc<dyn DocumentStore>, deps: SummarizerDeps) -> Self {
        let pool = Arc::new(Semaphore::new(deps.config.llm_concurrency.max(1)));
        Self {
            store,
            deps,
            pool,
            last_synthesis: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Real-time path: consume the story change stream until shutdown.
    pub async fn run_realtime(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if !self.deps.config.summarization_enabled {
            info!("Summarization disabled, real-time path idle");
            return Ok(());
        }
        let mut stream = self
            .store
            .change_stream(names::STORIES, SUMMARIZER_LEASE)
            .await?;
        info!("Summarizer starting (real-time path)");

        loop {
            let doc = tokio::select! {
                _ = shutdown.changed() => break,
                doc = stream.next() => doc?,
            };
            let story: Story = match serde_json::from_value(doc) {
                Ok(story) => story,
                Err(e) => {
                    warn!(error = %e, "Undecodable story document on change stream");
                    continue;
                }
            };

            if !needs_synthesis(&story) || !is_urgent(&story) {
                continue;
            }
            if !self.mark_synthesis_started(&story.story_id) {
                debug!(story_id = %story.story_id, "Rate-limited, leaving for next event or batch");
                continue;
            }

            // Fire into the pool; the permit is taken inside the task so a
            // saturated pool queues work without stalling this loop.
            let deps = self.deps.clone();
            let pool = self.pool.clone();
            tokio::spawn(async move {
                let _permit = match pool.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                synthesize_story(&deps, &story.story_id, story.category, SummaryPath::Realtime)
                    .await;
            });
        }

        stream.checkpoint().await?;
        info!("Summarizer stopped (real-time path)");
        Ok(())
    }

    /// Record a synthesis start unless one ran within the minimum gap.
    pub(crate) fn mark_synthesis_started(&self, story_id: &str) -> bool {
        let gap = self.deps.config.summarization_min_gap;
        let mut last = self.last_synthesis.lock().expect("rate limiter lock");
        let now = Instant::now();
        match last.get(story_id) {
            Some(started) if now.duration_since(*started) < gap => false,
            _ => {
                last.insert(story_id.to_string(), now);
                true
            }
        }
    }
}

/// Load the story fresh, call the model with retries, and persist the
/// result. Falls back to an extractive summary on refusal, and defers to
/// the batch path when the provider stays unavailable.
pub async fn synthesize_story(
    deps: &SummarizerDeps,
    story_id: &str,
    category: newsreel_common::Category,
    path: SummaryPath,
) {
    let story = match deps.stories.get(story_id, category).await {
        Ok(story) => story,
        Err(e) => {
            warn!(story_id, error = %e, "Failed to load story for synthesis");
            return;
        }
    };
    if !needs_synthesis(&story) {
        return;
    }

    let articles = source_articles(deps, &story).await;
    let request = build_request(&deps.config, &story, &articles);

    let mut attempt = 0;
    let outcome = loop {
        attempt += 1;
        match deps.model.synthesize(request.clone()).await {
            Ok(SynthesisOutcome::RateLimited { retry_after }) => {
                let wait = retry_after.unwrap_or(SYNTHESIS_RETRY_BASE);
                if attempt >= SYNTHESIS_MAX_ATTEMPTS {
                    debug!(story_id, "Rate limited, deferring to batch path");
                    return;
                }
                warn!(story_id, wait_secs = wait.as_secs(), "LLM rate limited");
                tokio::time::sleep(wait).await;
            }
            Ok(SynthesisOutcome::Transient { message }) => {
                if attempt >= SYNTHESIS_MAX_ATTEMPTS {
                    debug!(story_id, message = %message, "LLM unavailable, deferring to batch path");
                    return;
                }
                warn!(story_id, message = %message, attempt, "Transient LLM failure");
                tokio::time::sleep(SYNTHESIS_RETRY_BASE * 2u32.pow(attempt - 1)).await;
            }
            Ok(outcome) => break outcome,
            Err(e) => {
                error!(story_id, error = %e, "LLM call failed fatally");
                return;
            }
        }
    };

    apply_outcome(deps, story_id, category, outcome, path).await;
}

/// Fetch the full articles behind a story's compact refs. Lookups fan
/// out; a missing article just drops to the ref's title in the prompt.
pub(crate) async fn source_articles(deps: &SummarizerDeps, story: &Story) -> Vec<Article> {
    use futures::stream::{self, StreamExt};

    stream::iter(story.source_articles.clone())
        .map(|r| {
            let articles = deps.articles.clone();
            async move {
                match articles.get_anywhere(&r.article_id).await {
                    Ok(found) => found,
                    Err(e) => {
                        debug!(article_id = %r.article_id, error = %e, "Source article lookup failed");
                        None
                    }
                }
            }
        })
        .buffer_unordered(4)
        .filter_map(|a| async move { a })
        .collect()
        .await
}

/// Persist one synthesis outcome through the etag retry loop.
pub async fn apply_outcome(
    deps: &SummarizerDeps,
    story_id: &str,
    category: newsreel_common::Category,
    outcome: SynthesisOutcome,
    path: SummaryPath,
) {
    let (output, synthesis) = match outcome {
        SynthesisOutcome::Ok(synthesis) => match parse_output(&synthesis.text) {
            Ok(output) => (output, Some(synthesis)),
            Err(e) => {
                warn!(story_id, error = %e, "Unparseable synthesis output, using fallback");
                fallback_output(deps, story_id, category, "unparseable output").await
            }
        },
        SynthesisOutcome::Refusal { reason } => {
            warn!(story_id, reason = %reason, "Model refused, using extractive fallback");
            fallback_output(deps, story_id, category, &reason).await
        }
        SynthesisOutcome::RateLimited { .. } | SynthesisOutcome::Transient { .. } => return,
    };

    let model_id = if synthesis.is_some() {
        deps.config.llm_model_id.clone()
    } else {
        "extractive-fallback".to_string()
    };
    let cost = synthesis
        .as_ref()
        .map(|s| {
            estimate_cost_micro_usd(
                &model_id,
                s.input_tokens,
                s.output_tokens,
                s.cached_input_tokens,
                path == SummaryPath::Batch,
            )
        })
        .unwrap_or(0);

    if let Some(s) = &synthesis {
        log_cache_rate(story_id, s);
    }

    let result = {
        let stories = deps.stories.clone();
        let audit = deps.audit.clone();
        let audit_enabled = deps.config.summary_audit_log;
        let output = output.clone();
        let model_id = model_id.clone();
        update_with_etag_retry("summarizer.apply", move || {
            let stories = stories.clone();
            let audit = audit.clone();
            let output = output.clone();
            let model_id = model_id.clone();
            async move {
                let mut story = stories.get(story_id, category).await?;

                // An unchanged body with a kept headline is a no-op write;
                // the version only moves when the summary actually does.
                let body_unchanged = story
                    .summary
                    .as_ref()
                    .is_some_and(|s| s.text == output.summary);
                if body_unchanged && output.keeps_headline() {
                    return Ok(story.summary.as_ref().map(|s| s.version).unwrap_or(0));
                }

                if audit_enabled {
                    if let Some(previous) = story.summary.clone() {
                        audit.append(&story.story_id, &previous).await?;
                    }
                }

                let summary = StorySummary {
                    word_count: word_count(&output.summary),
                    text: output.summary.clone(),
                    version: story.next_summary_version(),
                    generated_at: Utc::now(),
                    model_id: model_id.clone(),
                    cost_micro_usd: cost,
                };
                story
                    .set_summary(summary)
                    .map_err(NewsreelError::Validation)?;

                if !output.keeps_headline() {
                    story.title = output.headline.trim().to_string();
                }

                stories.replace(&mut story).await?;
                Ok(story.summary.as_ref().map(|s| s.version).unwrap_or(0))
            }
        })
        .await
    };

    match result {
        Ok(version) => {
            info!(story_id, version, path = %path, cost_micro_usd = cost, "Summary stored");
            let entry = CostLogEntry {
                story_id: story_id.to_string(),
                timestamp: Utc::now(),
                model_id,
                input_tokens: synthesis.as_ref().map(|s| s.input_tokens).unwrap_or(0),
                output_tokens: synthesis.as_ref().map(|s| s.output_tokens).unwrap_or(0),
                cost_micro_usd: cost,
                path,
            };
            if let Err(e) = deps.cost_log.append(&entry).await {
                warn!(story_id, error = %e, "Failed to append cost log entry");
            }
        }
        Err(e) => {
            error!(story_id, error = %e, "Failed to persist summary");
        }
    }
}

async fn fallback_output(
    deps: &SummarizerDeps,
    story_id: &str,
    category: newsreel_common::Category,
    reason: &str,
) -> (SynthesisOutput, Option<Synthesis>) {
    let text = match deps.stories.get(story_id, category).await {
        Ok(story) => {
            let articles = source_articles(deps, &story).await;
            extractive_fallback(&story, &articles)
        }
        Err(_) => String::new(),
    };
    info!(story_id, reason, "Recorded extractive fallback");
    (
        SynthesisOutput {
            summary: text,
            headline: crate::synthesis::KEEP_CURRENT.to_string(),
        },
        None,
    )
}

fn log_cache_rate(story_id: &str, synthesis: &Synthesis) {
    let rate = if synthesis.input_tokens > 0 {
        synthesis.cached_input_tokens as f64 / synthesis.input_tokens as f64
    } else {
        0.0
    };
    debug!(
        story_id,
        input_tokens = synthesis.input_tokens,
        cached_input_tokens = synthesis.cached_input_tokens,
        cache_hit_rate = rate,
        "Prompt cache usage"
    );
}
