use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::cache::{keys, Cache};
use crate::error::AppError;
use crate::state::PipelineState;
use crate::types::{ChainSummary, Navigation};

#[derive(Clone)]
pub struct ApiState {
    pub state: Arc<PipelineState>,
    pub cache: Cache,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/status", get(get_status))
        .route("/navigation", get(get_navigation))
        .with_state(state)
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub chain: ChainSummary,
    pub exchange_rate: f64,
    pub sports_tracked: usize,
}

async fn get_health() -> &'static str {
    "OK"
}

async fn get_status(State(api): State<ApiState>) -> Json<StatusResponse> {
    let chain = {
        let guard = api.state.chain.lock().await;
        ChainSummary {
            block_height: guard.height,
            average_time: guard.average_time,
            updated_at: guard.updated_at,
        }
    };
    let exchange_rate = api.state.exchange_rate().await;
    let sports_tracked = api.state.sport_keys().await.len();

    Json(StatusResponse { chain, exchange_rate, sports_tracked })
}

async fn get_navigation(State(api): State<ApiState>) -> Result<Json<Navigation>, AppError> {
    let navigation: Navigation = api.cache.get(keys::NAVIGATION).await?;
    Ok(Json(navigation))
}
