mod client;
pub(crate) mod types;

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::{BatchId, BatchStatus, LanguageModel, Synthesis, SynthesisOutcome, SynthesisRequest};
use client::{ApiOutcome, ClaudeClient};
use types::*;

const STRUCTURED_TOOL_NAME: &str = "structured_response";

/// `LanguageModel` backed by the Anthropic Messages and Message Batches
/// APIs.
pub struct ClaudeModel {
    api_key: String,
    base_url: Option<String>,
}

impl ClaudeModel {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    fn client(&self) -> ClaudeClient {
        let client = ClaudeClient::new(&self.api_key);
        match &self.base_url {
            Some(url) => client.with_base_url(url),
            None => client,
        }
    }

    fn build_request(req: &SynthesisRequest) -> ChatRequest {
        let mut chat = ChatRequest::new(&req.model_id)
            .system_cached(&req.cacheable_prefix)
            .message(WireMessage::user(&req.prompt))
            .max_tokens(req.max_tokens)
            .temperature(0.0);
        if let Some(schema) = &req.output_schema {
            chat = chat.forced_tool(
                STRUCTURED_TOOL_NAME,
                "Return the synthesized output in the required shape.",
                schema.clone(),
            );
        }
        chat
    }

    /// Map one chat response into an outcome. Structured requests read the
    /// forced tool's input; plain requests read text content.
    fn outcome_from_response(structured: bool, response: ChatResponse) -> SynthesisOutcome {
        if response.stop_reason.as_deref() == Some("refusal") {
            return SynthesisOutcome::Refusal {
                reason: "model refusal".to_string(),
            };
        }

        let text = if structured {
            response
                .tool_input()
                .map(|input| input.to_string())
                .unwrap_or_default()
        } else {
            response.text().unwrap_or_default()
        };

        if text.trim().is_empty() {
            return SynthesisOutcome::Refusal {
                reason: "empty output".to_string(),
            };
        }

        debug!(
            input_tokens = response.usage.input_tokens,
            cached_input_tokens = response.usage.cache_read_input_tokens,
            "Synthesis response"
        );

        SynthesisOutcome::Ok(Synthesis {
            text,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            cached_input_tokens: response.usage.cache_read_input_tokens,
        })
    }
}

#[async_trait]
impl LanguageModel for ClaudeModel {
    async fn synthesize(&self, req: SynthesisRequest) -> Result<SynthesisOutcome> {
        let structured = req.output_schema.is_some();
        let chat = Self::build_request(&req);

        match self.client().chat(&chat, req.timeout).await? {
            ApiOutcome::Ok(response) => Ok(Self::outcome_from_response(structured, response)),
            ApiOutcome::RateLimited { retry_after } => {
                Ok(SynthesisOutcome::RateLimited { retry_after })
            }
            ApiOutcome::Transient { message } => Ok(SynthesisOutcome::Transient { message }),
        }
    }

    async fn submit_batch(&self, reqs: Vec<SynthesisRequest>) -> Result<BatchId> {
        let body = BatchCreateBody {
            requests: reqs
                .iter()
                .map(|req| BatchRequestItem {
                    custom_id: req.request_id.clone(),
                    params: Self::build_request(req),
                })
                .collect(),
        };

        match self.client().create_batch(&body).await? {
            ApiOutcome::Ok(meta) => Ok(BatchId(meta.id)),
            ApiOutcome::RateLimited { .. } | ApiOutcome::Transient { .. } => {
                Err(anyhow!("batch submission throttled or unavailable"))
            }
        }
    }

    async fn poll_batch(&self, id: &BatchId) -> Result<BatchStatus> {
        let meta = self.client().get_batch(&id.0).await?;
        Ok(match meta.processing_status.as_str() {
            "ended" => BatchStatus::Ended,
            _ => BatchStatus::InProgress,
        })
    }

    async fn fetch_batch_results(&self, id: &BatchId) -> Result<Vec<(String, SynthesisOutcome)>> {
        let meta = self.client().get_batch(&id.0).await?;
        let results_url = meta
            .results_url
            .ok_or_else(|| anyhow!("batch {} has no results_url yet", id.0))?;

        let lines = self.client().fetch_results(&results_url).await?;
        Ok(lines
            .into_iter()
            .map(|line| {
                let outcome = match (line.result.kind.as_str(), line.result.message) {
                    ("succeeded", Some(message)) => {
                        // Batch items mirror their originating request; the
                        // pipeline only batches structured synthesis.
                        ClaudeModel::outcome_from_response(true, message)
                    }
                    ("expired", _) | ("canceled", _) => SynthesisOutcome::Transient {
                        message: format!("batch item {}", line.result.kind),
                    },
                    (kind, _) => SynthesisOutcome::Transient {
                        message: format!("batch item failed: {kind}"),
                    },
                };
                (line.custom_id, outcome)
            })
            .collect())
    }
}
