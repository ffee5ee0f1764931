//! Classification endpoints
//!
//! `POST /classify/{classifier}` selects the classifier by path segment;
//! `POST /classify` uses the configured default. Both take an urlencoded
//! body and answer with the canonical classification JSON.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method, Uri},
    routing::post,
    Json, Router,
};
use specid_common::ClassificationResult;
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::models::InboundRequest;
use crate::AppState;

/// POST /classify/{classifier}
pub async fn classify_with(
    State(state): State<AppState>,
    Path(classifier): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<ClassificationResult>> {
    let inbound = inbound_request(&method, &uri, &headers);
    run(&state, Some(classifier.as_str()), &inbound, &body).await
}

/// POST /classify
pub async fn classify_default(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<ClassificationResult>> {
    let inbound = inbound_request(&method, &uri, &headers);
    run(&state, None, &inbound, &body).await
}

async fn run(
    state: &AppState,
    segment: Option<&str>,
    inbound: &InboundRequest,
    body: &str,
) -> ApiResult<Json<ClassificationResult>> {
    match state.service.classify(segment, inbound, body).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            let error = ApiError::from(e);
            let (status, _) = error.status_and_code();
            warn!(classifier = ?segment, status = status.as_u16(), error = %error, "Classification failed");
            *state.last_error.write().await = Some(error.to_string());
            Err(error)
        }
    }
}

/// Framework-independent view of the inbound call
fn inbound_request(method: &Method, uri: &Uri, headers: &HeaderMap) -> InboundRequest {
    let headers = upstream_headers(headers);
    let query = uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    InboundRequest {
        method: method.to_string(),
        uri: uri.path().to_string(),
        headers,
        query,
    }
}

/// Re-home inbound headers onto the outbound client's header types
///
/// Values are carried as raw bytes, so non-UTF-8 values survive.
fn upstream_headers(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut upstream = reqwest::header::HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes());
        let value = reqwest::header::HeaderValue::from_bytes(value.as_bytes());
        if let (Ok(name), Ok(value)) = (name, value) {
            upstream.append(name, value);
        }
    }
    upstream
}

/// Build classification routes
pub fn classify_routes() -> Router<AppState> {
    Router::new()
        .route("/classify", post(classify_default))
        .route("/classify/:classifier", post(classify_with))
}
