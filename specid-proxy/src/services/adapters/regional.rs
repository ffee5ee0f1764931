//! Regional observation platform adapter
//!
//! Upstream URL is `{base_url}/{version}/{service}`. Every request first
//! exchanges the configured credentials for a Bearer token (OAuth password
//! grant) at `token_url`, or `{base_url}/token` when unset. Tokens are not
//! cached. Predictions arrive flat as `predictions[] {taxon.name, probability}`.

use async_trait::async_trait;
use reqwest::header;
use serde_json::Value;
use specid_common::config::{ClassifierKind, RegionalConfig};
use specid_common::{ClassificationResult, Error, Result};
use tracing::{debug, warn};

use super::{
    authorization_value, build_result, forward_field_parts, image_parts, join_uri, param_form_parts, param_query_pairs,
    required_array, strip_common_headers, suggestion_from, version_of, ClassifierAdapter,
};
use crate::models::{ClassificationRequest, InboundRequest, PreparedTarget, UpstreamBody, UpstreamCallSpec};
use crate::services::image_resolver::ResolvedImage;
use crate::services::transport::Transport;

pub struct RegionalAdapter {
    config: RegionalConfig,
}

impl RegionalAdapter {
    pub fn new(config: RegionalConfig) -> Self {
        Self { config }
    }

    fn token_url(&self) -> String {
        match &self.config.token_url {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => join_uri(&self.config.base_url, &["token"]),
        }
    }

    /// Password-grant token exchange
    async fn fetch_token(&self, transport: &dyn Transport) -> Result<String> {
        let mut fields = vec![
            ("grant_type".to_string(), "password".to_string()),
            ("username".to_string(), self.config.username.clone()),
            ("password".to_string(), self.config.password.clone()),
            ("scope".to_string(), String::new()),
        ];
        if let Some(client_id) = self.config.client_id.as_ref().filter(|c| !c.is_empty()) {
            fields.push(("client_id".to_string(), client_id.clone()));
        }
        let call = UpstreamCallSpec::form_post(self.token_url(), fields);

        let response = transport.execute(&call).await?.ensure_success("Token endpoint")?;
        let token = response
            .json()
            .ok()
            .and_then(|body| body.get("access_token").and_then(Value::as_str).map(str::to_string));
        match token {
            Some(token) => {
                debug!(classifier = "regional", "Access token obtained");
                Ok(token)
            }
            None => {
                warn!(classifier = "regional", url = %call.uri, "Token response has no access_token");
                Err(Error::UpstreamUnavailable(
                    "Regional classifier authentication failed".to_string(),
                ))
            }
        }
    }
}

#[async_trait]
impl ClassifierAdapter for RegionalAdapter {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Regional
    }

    fn classifier_id(&self) -> &str {
        &self.config.id
    }

    fn raw_default(&self) -> Option<bool> {
        self.config.raw_default
    }

    async fn prepare_request(
        &self,
        inbound: &InboundRequest,
        transport: &dyn Transport,
    ) -> Result<PreparedTarget> {
        let token = self.fetch_token(transport).await?;
        let uri = join_uri(&self.config.base_url, &[&self.config.version, &self.config.service]);
        let mut headers = strip_common_headers(&inbound.headers);
        let bearer = authorization_value(&format!("Bearer {}", token)).map_err(|_| {
            Error::UpstreamMalformed("Access token is not a valid header value".to_string())
        })?;
        headers.insert(header::AUTHORIZATION, bearer);

        Ok(PreparedTarget {
            method: "POST".to_string(),
            uri,
            headers,
            query: inbound.query.clone(),
        })
    }

    fn build_upstream_call(
        &self,
        mut target: PreparedTarget,
        request: &ClassificationRequest,
        images: &[ResolvedImage],
    ) -> Result<UpstreamCallSpec> {
        let mut parts = image_parts("image", images);
        parts.extend(forward_field_parts(&request.forward_fields));
        parts.extend(param_form_parts(request.params_form()));
        target.query.extend(param_query_pairs(request.params_query()));

        debug!(classifier = "regional", images = images.len(), "Built upstream call");
        Ok(UpstreamCallSpec::from_target(target, UpstreamBody::Multipart(parts)))
    }

    fn parse_response(&self, payload: Value, raw: bool) -> Result<ClassificationResult> {
        let suggestions = required_array(&payload, "/predictions")?
            .iter()
            .map(|item| suggestion_from(item, "/taxon/name", "probability"))
            .collect::<Result<Vec<_>>>()?;
        let version = version_of(payload.get("model_version").or_else(|| payload.get("version")));
        Ok(build_result(self.classifier_id(), version, suggestions, payload, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::adapters::test_support::{header_text, inbound_with_headers, RecordingTransport};
    use crate::services::transport::UpstreamResponse;
    use serde_json::json;

    fn config() -> RegionalConfig {
        RegionalConfig {
            base_url: "https://regional.example/api/".into(),
            version: "v1".into(),
            service: "classify".into(),
            username: "proxy".into(),
            password: "pw".into(),
            id: "regional-3".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_token_exchange_then_bearer_header() {
        let transport = RecordingTransport::replying(vec![Ok(UpstreamResponse::ok_json(
            &json!({"access_token": "tok-1", "token_type": "bearer"}),
        ))]);
        let target = RegionalAdapter::new(config())
            .prepare_request(&inbound_with_headers(), &transport)
            .await
            .unwrap();

        assert_eq!(target.uri, "https://regional.example/api/v1/classify");
        assert_eq!(header_text(&target.headers, "authorization"), Some("Bearer tok-1"));

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].uri, "https://regional.example/api/token");
        match &calls[0].body {
            UpstreamBody::UrlEncoded(fields) => {
                assert!(fields.contains(&("grant_type".to_string(), "password".to_string())));
                assert!(fields.contains(&("username".to_string(), "proxy".to_string())));
                assert!(!fields.iter().any(|(k, _)| k == "client_id"));
            }
            other => panic!("expected urlencoded token request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_configured_token_url_and_client_id() {
        let mut config = config();
        config.token_url = Some("https://auth.example/oauth/token".into());
        config.client_id = Some("specid".into());
        let transport =
            RecordingTransport::replying(vec![Ok(UpstreamResponse::ok_json(&json!({"access_token": "t"})))]);
        RegionalAdapter::new(config)
            .prepare_request(&inbound_with_headers(), &transport)
            .await
            .unwrap();

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].uri, "https://auth.example/oauth/token");
        match &calls[0].body {
            UpstreamBody::UrlEncoded(fields) => {
                assert!(fields.contains(&("client_id".to_string(), "specid".to_string())));
            }
            other => panic!("expected urlencoded token request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_token_without_access_token_is_unavailable() {
        let transport =
            RecordingTransport::replying(vec![Ok(UpstreamResponse::ok_json(&json!({"detail": "bad credentials"})))]);
        let err = RegionalAdapter::new(config())
            .prepare_request(&inbound_with_headers(), &transport)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));

        let transport = RecordingTransport::replying(vec![Ok(UpstreamResponse::new(401, "denied"))]);
        let err = RegionalAdapter::new(config())
            .prepare_request(&inbound_with_headers(), &transport)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
    }

    #[test]
    fn test_parse_response_prefers_model_version() {
        let adapter = RegionalAdapter::new(config());
        let payload = json!({
            "model_version": "m-7",
            "version": "api-2",
            "predictions": [{"taxon": {"name": "Vulpes vulpes"}, "probability": 0.77}]
        });
        let result = adapter.parse_response(payload, false).unwrap();
        assert_eq!(result.classifier_version, "m-7");
        assert_eq!(result.suggestions[0].taxon.as_deref(), Some("Vulpes vulpes"));

        let result = adapter
            .parse_response(json!({"version": "api-2", "predictions": []}), false)
            .unwrap();
        assert_eq!(result.classifier_version, "api-2");
        assert!(result.suggestions.is_empty());
    }
}
