//! Record Cleaner verification
//!
//! Record Cleaner checks a taxon against a location and date using the
//! rules of recording organisations. Each request authenticates with a
//! password grant, then submits one record per warehouse-matched suggestion.
//!
//! Failures never reach the caller as errors. Instead every suggestion is
//! annotated with a marker:
//! - `"error"`: authentication or transport failed
//! - `"omit"`: the request carried no spatial reference or date
//! - `"invalid"`: the service answered without a `records` list

use async_trait::async_trait;
use serde_json::{json, Value};
use specid_common::config::CleanerConfig;
use specid_common::suggestion::id_from_value;
use specid_common::{Error, RecordCleanerOpinion, Result, Suggestion};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::RequestContext;

/// Record Cleaner client errors
#[derive(Debug, Error)]
pub enum CleanerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Record Cleaner service operations
#[async_trait]
pub trait RecordCleanerApi: Send + Sync {
    /// Obtain a Bearer token
    async fn authenticate(&self) -> std::result::Result<String, CleanerError>;

    /// Submit a verification request and return the decoded JSON answer
    async fn verify(&self, token: &str, request: &Value) -> std::result::Result<Value, CleanerError>;
}

/// HTTP client for the Record Cleaner service
pub struct RecordCleanerClient {
    http_client: reqwest::Client,
    url: String,
    username: String,
    password: String,
}

impl RecordCleanerClient {
    pub fn new(config: &CleanerConfig, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            url: config.url.trim().trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }
}

#[async_trait]
impl RecordCleanerApi for RecordCleanerClient {
    async fn authenticate(&self) -> std::result::Result<String, CleanerError> {
        let params = [
            ("grant_type", "password"),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("scope", ""),
        ];

        let response = self
            .http_client
            .post(format!("{}/token", self.url))
            .form(&params)
            .send()
            .await
            .map_err(|e| CleanerError::Network(format!("Record Cleaner token request failed: {}", e)))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| CleanerError::Auth(format!("Token response is not JSON: {}", e)))?;
        body.get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CleanerError::Auth("Record Cleaner authentication failed".to_string()))
    }

    async fn verify(&self, token: &str, request: &Value) -> std::result::Result<Value, CleanerError> {
        let response = self
            .http_client
            .post(format!("{}/verify", self.url))
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|e| CleanerError::Network(format!("Record Cleaner verification failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            // Validation failures still carry a JSON explanation
            warn!(status = status.as_u16(), "Record Cleaner rejected verification request");
        }

        response
            .json()
            .await
            .map_err(|e| CleanerError::Parse(e.to_string()))
    }
}

/// Verification stage of the suggestion pipeline
pub struct RecordVerifier {
    api: Arc<dyn RecordCleanerApi>,
}

impl RecordVerifier {
    pub fn new(api: Arc<dyn RecordCleanerApi>) -> Self {
        Self { api }
    }

    /// Annotate every suggestion with a Record Cleaner opinion
    pub async fn annotate(&self, suggestions: &mut [Suggestion], context: &RequestContext) {
        if suggestions.is_empty() {
            return;
        }

        let token = match self.api.authenticate().await {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Record Cleaner authentication failed");
                mark_all(suggestions, RecordCleanerOpinion::error());
                return;
            }
        };

        let (Some(sref), Some(date)) = (&context.observation_sref, &context.observation_date) else {
            debug!("No spatial reference or date, Record Cleaner check omitted");
            mark_all(suggestions, RecordCleanerOpinion::omit());
            return;
        };

        let request = verification_request(suggestions, context, sref, date);
        let response = match self.api.verify(&token, &request).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Record Cleaner verification failed");
                mark_all(suggestions, RecordCleanerOpinion::error());
                return;
            }
        };

        let records = match response.get("records") {
            Some(Value::Array(records)) => records,
            Some(other) => {
                warn!(records = %other, "Record Cleaner records is not a list, nothing annotated");
                return;
            }
            None => {
                warn!(response = %response, "Record Cleaner response has no records");
                mark_all(suggestions, RecordCleanerOpinion::invalid());
                return;
            }
        };

        let mut annotated = 0usize;
        for (index, suggestion) in suggestions.iter_mut().enumerate() {
            let id = index as i64 + 1;
            let result = records
                .iter()
                .find(|record| record.get("id").and_then(id_from_value) == Some(id))
                .and_then(|record| record.get("result"));
            if let Some(result) = result {
                suggestion.record_cleaner = Some(RecordCleanerOpinion::Verified(result.clone()));
                annotated += 1;
            }
        }
        info!(
            suggestions = suggestions.len(),
            annotated = annotated,
            "Record Cleaner verification complete"
        );
    }
}

/// Build the `/verify` body
///
/// Only suggestions with a warehouse taxon become records; ids are their
/// 1-based positions in the full list.
pub fn verification_request(
    suggestions: &[Suggestion],
    context: &RequestContext,
    sref: &Value,
    date: &str,
) -> Value {
    let records: Vec<Value> = suggestions
        .iter()
        .enumerate()
        .filter_map(|(index, suggestion)| {
            suggestion.taxon.as_ref().map(|taxon| {
                json!({
                    "id": index + 1,
                    "name": taxon,
                    "date": date,
                    "sref": sref,
                })
            })
        })
        .collect();

    json!({
        "org_group_rules_list": context.org_group_rules.clone().unwrap_or_else(|| json!([])),
        "records": records,
    })
}

fn mark_all(suggestions: &mut [Suggestion], opinion: RecordCleanerOpinion) {
    for suggestion in suggestions.iter_mut() {
        suggestion.record_cleaner = Some(opinion.clone());
    }
}
