//! Language-model client for the summarization pipeline.
//!
//! The pipeline talks to the `LanguageModel` trait; `claude::ClaudeModel`
//! is the wire implementation (Messages API + Message Batches API).
//! Outcomes are a closed sum type — callers never parse free-form error
//! strings to decide whether to retry.

pub mod claude;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub use claude::ClaudeModel;

// =============================================================================
// Requests
// =============================================================================

/// One synthesis call. `cacheable_prefix` is sent as a cache-marked system
/// block so identical prefixes across stories hit provider-side prompt
/// cache; `prompt` is the per-story remainder.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// Correlation id, returned with batch results. Story id in practice.
    pub request_id: String,
    pub cacheable_prefix: String,
    pub prompt: String,
    pub model_id: String,
    pub max_tokens: u32,
    /// When set, the model is forced through a structured-output tool with
    /// this JSON Schema and the outcome text is the tool input as JSON.
    pub output_schema: Option<Value>,
    pub timeout: Duration,
}

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Prompt-cache read tokens, for cache-hit-rate logging.
    pub cached_input_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisOutcome {
    Ok(Synthesis),
    /// The model declined or returned empty output.
    Refusal { reason: String },
    /// HTTP 429. `retry_after` comes from the response header when present.
    RateLimited { retry_after: Option<Duration> },
    /// Timeout, connection failure, or 5xx. Retryable with back-off.
    Transient { message: String },
}

// =============================================================================
// Batches
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    InProgress,
    Ended,
}

// =============================================================================
// Trait
// =============================================================================

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Single synchronous synthesis call.
    async fn synthesize(&self, req: SynthesisRequest) -> Result<SynthesisOutcome>;

    /// Submit a batch for asynchronous processing at batch pricing.
    async fn submit_batch(&self, reqs: Vec<SynthesisRequest>) -> Result<BatchId>;

    async fn poll_batch(&self, id: &BatchId) -> Result<BatchStatus>;

    /// Results keyed by `request_id`, available once the batch has ended.
    async fn fetch_batch_results(&self, id: &BatchId) -> Result<Vec<(String, SynthesisOutcome)>>;
}

// =============================================================================
// Pricing
// =============================================================================

/// Per-token prices in micro-USD, matched by model id prefix. Batch calls
/// are billed at half these rates.
const PRICES_MICRO_USD: &[(&str, f64, f64, f64)] = &[
    // (prefix, input, output, cache_read)
    ("claude-opus", 15.0, 75.0, 1.5),
    ("claude-sonnet", 3.0, 15.0, 0.3),
    ("claude-haiku", 0.8, 4.0, 0.08),
];

pub fn estimate_cost_micro_usd(
    model_id: &str,
    input_tokens: u64,
    output_tokens: u64,
    cached_input_tokens: u64,
    batch: bool,
) -> u64 {
    let (input_rate, output_rate, cache_rate) = PRICES_MICRO_USD
        .iter()
        .find(|(prefix, ..)| model_id.starts_with(prefix))
        .map(|(_, i, o, c)| (*i, *o, *c))
        .unwrap_or((3.0, 15.0, 0.3));

    let uncached = input_tokens.saturating_sub(cached_input_tokens);
    let mut cost = uncached as f64 * input_rate
        + cached_input_tokens as f64 * cache_rate
        + output_tokens as f64 * output_rate;
    if batch {
        cost /= 2.0;
    }
    cost.round() as u64
}
