//! Operational HTTP surface: health, per-feed stats, and the manual
//! circuit-breaker reset. Read-mostly; the one mutation (reset) goes
//! through the same `FeedStates` handle the poller uses.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::info;

use newsreel_poller::PollerStats;
use newsreel_store::FeedStates;

pub struct AppState {
    pub started_at: Instant,
    pub stats: Arc<PollerStats>,
    pub feed_states: FeedStates,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/circuit-breaker/reset/{feed_id}", post(reset_circuit))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "stats": state.stats.snapshot(),
    }))
}

async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    let snapshot = state.stats.snapshot();
    let feed_states = state
        .feed_states
        .all()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let circuit_breakers: Vec<Value> = feed_states
        .iter()
        .map(|s| {
            json!({
                "feed_id": s.feed_id,
                "consecutive_failures": s.consecutive_failures,
                "circuit_open_until": s.circuit_open_until,
                "last_success_at": s.last_success_at,
            })
        })
        .collect();

    Ok(Json(json!({
        "feeds": snapshot.feeds,
        "articles_stored": snapshot.articles_stored,
        "articles_dropped": snapshot.articles_dropped,
        "queue_depth": snapshot.queue_depth,
        "circuit_breakers": circuit_breakers,
    })))
}

async fn reset_circuit(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let mut poll_state = state
        .feed_states
        .get(&feed_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    poll_state.circuit_open_until = None;
    poll_state.consecutive_failures = 0;
    state
        .feed_states
        .put(&poll_state)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!(feed_id = %feed_id, "Circuit breaker reset via API");
    Ok(Json(json!({"feed_id": feed_id, "reset": true})))
}
