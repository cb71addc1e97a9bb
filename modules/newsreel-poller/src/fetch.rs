//! Feed fetching with conditional GET. One fetch maps to exactly one
//! `FetchOutcome`; transport and status handling never leak reqwest
//! errors to the scheduler.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use tracing::info;

use newsreel_common::{FeedDescriptor, FeedPollState};

const USER_AGENT: &str = "newsreel-poller/0.1";

/// One parsed feed entry, before normalization.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub url: String,
    pub image_url: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// 304 — nothing new, validators still current.
    NotModified,
    Fetched {
        entries: Vec<RawEntry>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
    /// 4xx — our request is wrong for this feed; do not retry this cycle.
    ClientError { status: u16 },
    /// 5xx — the publisher is unwell; counts toward the circuit breaker.
    ServerError { status: u16 },
    /// Timeout, DNS, connection reset. Counts toward the circuit breaker.
    NetworkError { message: String },
}

pub struct FeedFetcher {
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build feed HTTP client")?;
        Ok(Self { client })
    }

    /// Fetch and parse one feed, sending stored validators when known.
    pub async fn fetch(
        &self,
        feed: &FeedDescriptor,
        state: &FeedPollState,
    ) -> FetchOutcome {
        let mut request = self.client.get(&feed.feed_url);
        if let Some(etag) = &state.last_etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(modified) = &state.last_modified {
            request = request.header(IF_MODIFIED_SINCE, modified);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                return FetchOutcome::NetworkError {
                    message: e.to_string(),
                };
            }
        };

        let status = response.status();
        if status.as_u16() == 304 {
            return FetchOutcome::NotModified;
        }
        if status.is_client_error() {
            return FetchOutcome::ClientError {
                status: status.as_u16(),
            };
        }
        if status.is_server_error() {
            return FetchOutcome::ServerError {
                status: status.as_u16(),
            };
        }

        let etag = header_string(&response, ETAG);
        let last_modified = header_string(&response, LAST_MODIFIED);

        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                return FetchOutcome::NetworkError {
                    message: e.to_string(),
                };
            }
        };

        let parsed = match feed_rs::parser::parse(&bytes[..]) {
            Ok(p) => p,
            Err(e) => {
                // A body we cannot parse is the feed's fault, not the
                // network's: treat like a client error so the circuit
                // still opens on a persistently broken feed.
                tracing::warn!(feed_id = %feed.feed_id, error = %e, "Failed to parse feed body");
                return FetchOutcome::ClientError { status: 200 };
            }
        };

        let entries: Vec<RawEntry> = parsed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let url = entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;

                let published = entry
                    .published
                    .or(entry.updated)
                    .map(|dt| dt.with_timezone(&Utc));

                let image_url = entry
                    .media
                    .iter()
                    .flat_map(|m| m.content.iter())
                    .find_map(|c| c.url.as_ref().map(|u| u.to_string()));

                Some(RawEntry {
                    title: entry.title.map(|t| t.content),
                    summary: entry.summary.map(|s| s.content),
                    content: entry.content.and_then(|c| c.body),
                    url,
                    image_url,
                    published,
                })
            })
            .collect();

        info!(feed_id = %feed.feed_id, entries = entries.len(), "Feed fetched");

        FetchOutcome::Fetched {
            entries,
            etag,
            last_modified,
        }
    }
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
