//! Outbound HTTP transport
//!
//! Adapters never talk to reqwest directly: they build an
//! [`UpstreamCallSpec`] and hand it to a [`Transport`]. Tests substitute an
//! in-process fake.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use specid_common::{Error, Result};
use std::time::Duration;
use tracing::debug;

use crate::models::{MultipartContent, MultipartPart, UpstreamBody, UpstreamCallSpec};

const USER_AGENT: &str = concat!("specid-proxy/", env!("CARGO_PKG_VERSION"));

/// Status and body of a completed upstream call
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// JSON response with status 200
    pub fn ok_json(value: &Value) -> Self {
        Self::new(200, value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fail with `UpstreamUnavailable` on a non-2xx status
    pub fn ensure_success(self, service: &str) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let snippet: String = String::from_utf8_lossy(&self.body).chars().take(200).collect();
        Err(Error::UpstreamUnavailable(format!(
            "{} returned status {}: {}",
            service, self.status, snippet
        )))
    }

    /// Decode the body as JSON
    pub fn json(&self) -> Result<Value> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::UpstreamMalformed(format!("Response is not JSON: {}", e)))
    }
}

/// Executes upstream calls
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the call; only transport-level failures are errors
    async fn execute(&self, call: &UpstreamCallSpec) -> Result<UpstreamResponse>;
}

/// reqwest-backed transport shared by all adapters
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, call: &UpstreamCallSpec) -> Result<UpstreamResponse> {
        let method = reqwest::Method::from_bytes(call.method.as_bytes())
            .map_err(|_| Error::Internal(format!("Invalid HTTP method: {}", call.method)))?;

        let mut builder = self.http_client.request(method, &call.uri);
        if !call.query.is_empty() {
            builder = builder.query(&call.query);
        }
        builder = builder.headers(call.headers.clone());
        builder = match &call.body {
            UpstreamBody::UrlEncoded(pairs) => builder.form(pairs),
            UpstreamBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        debug!(method = %call.method, uri = %call.uri, "Sending upstream request");

        let response = builder
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("{} {}: {}", call.method, call.uri, e)))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("Reading response body failed: {}", e)))?;

        debug!(uri = %call.uri, status = status, bytes = body.len(), "Upstream responded");

        Ok(UpstreamResponse::new(status, body.to_vec()))
    }
}

fn build_form(parts: &[MultipartPart]) -> Result<Form> {
    let mut form = Form::new();
    for part in parts {
        form = match &part.content {
            MultipartContent::Text(value) => form.text(part.name.clone(), value.clone()),
            MultipartContent::File {
                bytes,
                filename,
                media_type,
            } => {
                let file_part = Part::bytes(bytes.clone())
                    .file_name(filename.clone())
                    .mime_str(media_type)
                    .map_err(|e| Error::Internal(format!("Invalid media type {}: {}", media_type, e)))?;
                form.part(part.name.clone(), file_part)
            }
        };
    }
    Ok(form)
}
