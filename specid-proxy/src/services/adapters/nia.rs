//! Nature Identification API adapter
//!
//! Upstream URL is `{base_url}/{version}/{service}/{token}` with HTTP Basic
//! authentication. Responses nest predictions as
//! `predictions[0].taxa.items[] {scientific_name, probability}`.
//!
//! The body is multipart by default. The urlencoded form forwards the
//! resolved local paths instead of file content, for classifiers that share
//! the interim folder with the proxy.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::header;
use serde_json::Value;
use specid_common::config::{BodyFormat, ClassifierKind, NiaConfig};
use specid_common::{ClassificationResult, FieldValue, Result};
use tracing::debug;

use super::{
    authorization_value, build_result, forward_field_parts, image_parts, join_uri, param_form_parts, param_query_pairs,
    required_array, strip_common_headers, suggestion_from, version_of, ClassifierAdapter,
};
use crate::models::{ClassificationRequest, InboundRequest, PreparedTarget, UpstreamBody, UpstreamCallSpec};
use crate::services::image_resolver::ResolvedImage;
use crate::services::transport::Transport;

pub struct NiaAdapter {
    config: NiaConfig,
}

impl NiaAdapter {
    pub fn new(config: NiaConfig) -> Self {
        Self { config }
    }

    fn basic_auth(&self) -> String {
        let credentials = format!("{}:{}", self.config.username, self.config.password);
        format!("Basic {}", general_purpose::STANDARD.encode(credentials))
    }
}

#[async_trait]
impl ClassifierAdapter for NiaAdapter {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Nia
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
        _transport: &dyn Transport,
    ) -> Result<PreparedTarget> {
        let uri = join_uri(
            &self.config.base_url,
            &[&self.config.version, &self.config.service, &self.config.token],
        );
        let mut headers = strip_common_headers(&inbound.headers);
        headers.insert(header::AUTHORIZATION, authorization_value(&self.basic_auth())?);

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
        let body = match self.config.body_format {
            BodyFormat::Multipart => {
                let mut parts = image_parts("image", images);
                parts.extend(forward_field_parts(&request.forward_fields));
                parts.extend(param_form_parts(request.params_form()));
                target.query.extend(param_query_pairs(request.params_query()));
                UpstreamBody::Multipart(parts)
            }
            BodyFormat::UrlEncoded => {
                let mut fields = request.forward_fields.clone();
                let paths: Vec<String> = images
                    .iter()
                    .map(|image| image.path.to_string_lossy().into_owned())
                    .collect();
                let value = match paths.len() {
                    1 => FieldValue::Single(paths[0].clone()),
                    _ => FieldValue::Many(paths),
                };
                fields.insert("image", value);
                UpstreamBody::UrlEncoded(fields.to_pairs())
            }
        };

        debug!(
            classifier = "nia",
            images = images.len(),
            format = ?self.config.body_format,
            "Built upstream call"
        );
        Ok(UpstreamCallSpec::from_target(target, body))
    }

    fn parse_response(&self, payload: Value, raw: bool) -> Result<ClassificationResult> {
        let suggestions = required_array(&payload, "/predictions/0/taxa/items")?
            .iter()
            .map(|item| suggestion_from(item, "/scientific_name", "probability"))
            .collect::<Result<Vec<_>>>()?;
        let version = version_of(payload.pointer("/generated_by/tag"));
        Ok(build_result(self.classifier_id(), version, suggestions, payload, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MultipartContent;
    use crate::services::adapters::test_support::{header_text, inbound_with_headers, jpeg_image, RecordingTransport};
    use serde_json::json;
    use specid_common::Error;

    fn config() -> NiaConfig {
        NiaConfig {
            base_url: "https://nia.example/ ".into(),
            token: "/regional-token/".into(),
            username: "alice".into(),
            password: "s3cret".into(),
            id: "nia-1".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_prepare_request_builds_uri_and_basic_auth() {
        let adapter = NiaAdapter::new(config());
        let transport = RecordingTransport::default();
        let target = adapter
            .prepare_request(&inbound_with_headers(), &transport)
            .await
            .unwrap();

        assert_eq!(
            target.uri,
            "https://nia.example/v2/observation/identify/token/regional-token"
        );
        // base64("alice:s3cret")
        assert_eq!(header_text(&target.headers, "Authorization"), Some("Basic YWxpY2U6czNjcmV0"));
        assert!(target.headers.get("content-type").is_none());
        assert!(target.headers.get("origin").is_none());
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multipart_body_has_one_part_per_image() {
        let adapter = NiaAdapter::new(config());
        let target = adapter
            .prepare_request(&inbound_with_headers(), &RecordingTransport::default())
            .await
            .unwrap();
        let request = ClassificationRequest::parse("image%5B%5D=a.jpg&image%5B%5D=b.jpg&lang=en").unwrap();
        let call = adapter
            .build_upstream_call(target, &request, &[jpeg_image("a.jpg"), jpeg_image("b.jpg")])
            .unwrap();

        let images = call.parts_named("image");
        assert_eq!(images.len(), 2);
        match &images[1].content {
            MultipartContent::File { filename, media_type, .. } => {
                assert_eq!(filename, "b.jpg");
                assert_eq!(media_type, "image/jpeg");
            }
            other => panic!("expected file part, got {:?}", other),
        }
        assert_eq!(call.parts_named("lang").len(), 1);
    }

    #[tokio::test]
    async fn test_urlencoded_body_forwards_local_paths() {
        let mut config = config();
        config.body_format = BodyFormat::UrlEncoded;
        let adapter = NiaAdapter::new(config);
        let target = adapter
            .prepare_request(&inbound_with_headers(), &RecordingTransport::default())
            .await
            .unwrap();
        let request = ClassificationRequest::parse("image=a.jpg&list=4&lang=en").unwrap();
        let call = adapter
            .build_upstream_call(target, &request, &[jpeg_image("a.jpg")])
            .unwrap();

        assert_eq!(
            call.body,
            UpstreamBody::UrlEncoded(vec![
                ("lang".to_string(), "en".to_string()),
                ("image".to_string(), "/interim/a.jpg".to_string()),
            ])
        );
    }

    #[test]
    fn test_parse_response() {
        let adapter = NiaAdapter::new(config());
        let payload = json!({
            "generated_by": {"tag": "nia-2024.1"},
            "predictions": [{"taxa": {"items": [
                {"scientific_name": "Felis catus", "probability": 0.9},
                {"scientific_name": "Canis lupus", "probability": 0.3}
            ]}}]
        });
        let result = adapter.parse_response(payload.clone(), false).unwrap();
        assert_eq!(result.classifier_id, "nia-1");
        assert_eq!(result.classifier_version, "nia-2024.1");
        assert_eq!(result.suggestions.len(), 2);
        assert_eq!(result.suggestions[1].taxon.as_deref(), Some("Canis lupus"));
        assert!(result.raw.is_none());

        let result = adapter.parse_response(payload.clone(), true).unwrap();
        assert_eq!(result.raw, Some(payload));
    }

    #[test]
    fn test_missing_predictions_is_malformed() {
        let adapter = NiaAdapter::new(config());
        let err = adapter.parse_response(json!({"predictions": []}), false).unwrap_err();
        assert!(matches!(err, Error::UpstreamMalformed(_)));
    }
}
