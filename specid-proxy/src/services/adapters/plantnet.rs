//! Pl@ntNet adapter
//!
//! Upstream URL is `{base_url}/{version}/{service}/{project}`, authenticated
//! by an `api-key` query parameter. Images go up as multipart parts named
//! `images`; results arrive as `results[] {species, score}`.

use async_trait::async_trait;
use reqwest::header;
use serde_json::Value;
use specid_common::config::{ClassifierKind, PlantNetConfig};
use specid_common::{ClassificationResult, Result};
use tracing::debug;

use super::{
    build_result, forward_field_parts, image_parts, join_uri, param_form_parts, param_query_pairs,
    required_array, strip_common_headers, suggestion_from, version_of, ClassifierAdapter,
};
use crate::models::{ClassificationRequest, InboundRequest, PreparedTarget, UpstreamBody, UpstreamCallSpec};
use crate::services::image_resolver::ResolvedImage;
use crate::services::transport::Transport;

pub struct PlantNetAdapter {
    config: PlantNetConfig,
}

impl PlantNetAdapter {
    pub fn new(config: PlantNetConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClassifierAdapter for PlantNetAdapter {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::PlantNet
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
            &[&self.config.version, &self.config.service, &self.config.project],
        );
        // Authenticated by query key only
        let mut headers = strip_common_headers(&inbound.headers);
        headers.remove(header::AUTHORIZATION);

        let mut query = inbound.query.clone();
        query.retain(|(name, _)| name != "api-key");
        query.push(("api-key".to_string(), self.config.api_key.clone()));

        Ok(PreparedTarget {
            method: "POST".to_string(),
            uri,
            headers,
            query,
        })
    }

    fn build_upstream_call(
        &self,
        mut target: PreparedTarget,
        request: &ClassificationRequest,
        images: &[ResolvedImage],
    ) -> Result<UpstreamCallSpec> {
        let mut parts = image_parts("images", images);
        parts.extend(forward_field_parts(&request.forward_fields));
        parts.extend(param_form_parts(request.params_form()));
        target.query.extend(param_query_pairs(request.params_query()));

        debug!(classifier = "plantnet", images = images.len(), "Built upstream call");
        Ok(UpstreamCallSpec::from_target(target, UpstreamBody::Multipart(parts)))
    }

    fn parse_response(&self, payload: Value, raw: bool) -> Result<ClassificationResult> {
        let suggestions = required_array(&payload, "/results")?
            .iter()
            .map(|item| suggestion_from(item, "/species/scientificNameWithoutAuthor", "score"))
            .collect::<Result<Vec<_>>>()?;
        let version = version_of(payload.get("version"));
        Ok(build_result(self.classifier_id(), version, suggestions, payload, raw))
    }
}
