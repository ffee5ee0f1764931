//! Health check endpoint
//!
//! Reports uptime, the routing setup and the most recent classification
//! failure.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use specid_common::config::ClassifierKind;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ClassifierEntry {
    /// Path segment selecting this classifier
    pub route: ClassifierKind,
    /// `classifier_id` carried in its results
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    /// Short commit hash the binary was built from
    pub build: String,
    pub uptime_seconds: u64,
    /// Classifier used for `/classify` and, unless strict, unknown segments
    pub default_classifier: ClassifierKind,
    pub strict_routes: bool,
    pub classifiers: Vec<ClassifierEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0) as u64;
    let router = state.service.router();
    let classifiers = state
        .service
        .adapters()
        .classifiers()
        .into_iter()
        .map(|(route, id)| ClassifierEntry { route, id })
        .collect();

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "specid-proxy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: env!("GIT_HASH").to_string(),
        uptime_seconds,
        default_classifier: router.default_kind(),
        strict_routes: router.is_strict(),
        classifiers,
        last_error: state.last_error.read().await.clone(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
