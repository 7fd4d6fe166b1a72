//! FlowScope introspection API
//!
//! HTTP endpoints for the monitoring caller:
//! - List aggregate trees
//! - Fetch one tree as a flat root record or a pre-order list
//! - Reset collected statistics
//! - Health probe
//!
//! Read/administrative surface only; lifecycle events never enter here.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use fs_common::FlatStatistic;
use fs_stats::StatisticsReader;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub reader: StatisticsReader,
}

/// Simple health response
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Summary of the collected aggregate trees
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TreeListResponse {
    pub tree_count: usize,
    pub names: Vec<String>,
}

/// Result of a statistics reset
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub reset: bool,
    pub reset_at: chrono::DateTime<chrono::Utc>,
}

/// API error translated into an HTTP response
#[derive(Debug)]
pub enum ApiError {
    TreeNotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::TreeNotFound(name) => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": format!("Tree not found: {name}") })),
            )
                .into_response(),
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn list_trees(State(state): State<AppState>) -> Json<TreeListResponse> {
    let mut names = state.reader.tree_names();
    names.sort();
    Json(TreeListResponse {
        tree_count: state.reader.tree_count(),
        names,
    })
}

async fn get_tree(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<FlatStatistic>, ApiError> {
    state
        .reader
        .get_tree(&name)
        .map(Json)
        .ok_or(ApiError::TreeNotFound(name))
}

async fn get_tree_as_list(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<FlatStatistic>>, ApiError> {
    state
        .reader
        .get_tree_as_list(&name)
        .map(Json)
        .ok_or(ApiError::TreeNotFound(name))
}

async fn reset(State(state): State<AppState>) -> Json<ResetResponse> {
    info!("Statistics reset requested via API");
    state.reader.reset();
    Json(ResetResponse {
        reset: true,
        reset_at: chrono::Utc::now(),
    })
}

/// Create the introspection router
pub fn create_router(reader: StatisticsReader) -> Router {
    let state = AppState { reader };

    Router::new()
        .route("/health", get(health))
        .route("/statistics/trees", get(list_trees).delete(reset))
        .route("/statistics/trees/:name", get(get_tree))
        .route("/statistics/trees/:name/list", get(get_tree_as_list))
        .with_state(state)
}
