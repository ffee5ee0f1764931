//! Classifier adapters
//!
//! One adapter per backend. Each turns the canonical inbound request into
//! the backend's wire format and the backend's answer back into the
//! canonical [`ClassificationResult`].
//!
//! Call sequence for one inbound request:
//! 1. [`ClassifierAdapter::prepare_request`]: target URI, header rewrite, auth
//! 2. [`ClassifierAdapter::build_upstream_call`]: body shaping
//! 3. transport executes the call
//! 4. [`ClassifierAdapter::parse_response`]: normalisation

pub mod nia;
pub mod plantnet;
pub mod regional;

pub use nia::NiaAdapter;
pub use plantnet::PlantNetAdapter;
pub use regional::RegionalAdapter;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use specid_common::config::{ClassifierKind, ClassifiersConfig};
use specid_common::form::FormFields;
use specid_common::{ClassificationResult, Error, Result, Suggestion};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{
    ClassificationRequest, InboundRequest, MultipartPart, PreparedTarget, UpstreamCallSpec,
};
use crate::services::image_resolver::ResolvedImage;
use crate::services::transport::Transport;

/// Inbound headers never forwarded upstream: body description, origin,
/// hop-by-hop and encoding negotiation, caller credentials
const STRIPPED_HEADERS: [HeaderName; 11] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::ORIGIN,
    header::HOST,
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::ACCEPT_ENCODING,
    header::TE,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
    header::COOKIE,
];

/// Legacy hop-by-hop headers without a registered constant
const LEGACY_HOP_HEADERS: [&str; 2] = ["keep-alive", "proxy-connection"];

/// Request and response transformation for one classifier backend
#[async_trait]
pub trait ClassifierAdapter: Send + Sync {
    fn kind(&self) -> ClassifierKind;

    /// Classifier id reported in every result
    fn classifier_id(&self) -> &str;

    /// Per-backend raw output default, overriding the global one
    fn raw_default(&self) -> Option<bool>;

    /// Compute the upstream target and rewrite inbound headers
    ///
    /// May perform a token exchange through `transport`.
    async fn prepare_request(
        &self,
        inbound: &InboundRequest,
        transport: &dyn Transport,
    ) -> Result<PreparedTarget>;

    /// Attach the backend-specific body to the prepared target
    fn build_upstream_call(
        &self,
        target: PreparedTarget,
        request: &ClassificationRequest,
        images: &[ResolvedImage],
    ) -> Result<UpstreamCallSpec>;

    /// Normalise the backend payload
    fn parse_response(&self, payload: Value, raw: bool) -> Result<ClassificationResult>;
}

/// One adapter instance per classifier kind
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<ClassifierKind, Arc<dyn ClassifierAdapter>>,
}

impl AdapterRegistry {
    pub fn from_config(config: &ClassifiersConfig) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(NiaAdapter::new(config.nia.clone())));
        registry.register(Arc::new(PlantNetAdapter::new(config.plantnet.clone())));
        registry.register(Arc::new(RegionalAdapter::new(config.regional.clone())));
        registry
    }

    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Add or replace the adapter for its kind
    pub fn register(&mut self, adapter: Arc<dyn ClassifierAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// Registered kinds with the classifier id each reports, in path order
    pub fn classifiers(&self) -> Vec<(ClassifierKind, String)> {
        ClassifierKind::ALL
            .into_iter()
            .filter_map(|kind| {
                self.adapters
                    .get(&kind)
                    .map(|adapter| (kind, adapter.classifier_id().to_string()))
            })
            .collect()
    }

    pub fn get(&self, kind: ClassifierKind) -> Result<Arc<dyn ClassifierAdapter>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No adapter registered for {}", kind)))
    }
}

/// Copy inbound headers minus the ones that must not reach a classifier
pub fn strip_common_headers(headers: &HeaderMap) -> HeaderMap {
    let mut headers = headers.clone();
    for name in &STRIPPED_HEADERS {
        headers.remove(name);
    }
    for name in LEGACY_HOP_HEADERS {
        headers.remove(name);
    }
    headers
}

/// Join a base URL with path segments
///
/// Spaces and slashes are trimmed from every piece; empty segments are
/// skipped so an unset token does not leave a trailing slash.
pub fn join_uri(base: &str, segments: &[&str]) -> String {
    let mut uri = base.trim_end_matches(&[' ', '/'][..]).trim_start().to_string();
    for segment in segments {
        let segment = segment.trim_matches(&[' ', '/'][..]);
        if !segment.is_empty() {
            uri.push('/');
            uri.push_str(segment);
        }
    }
    uri
}

/// String forms of a parameter value
///
/// Booleans become `"true"`/`"false"`, numbers their JSON text, arrays one
/// entry per element, null nothing. Objects are passed as JSON text.
pub fn param_values(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Bool(b) => vec![b.to_string()],
        Value::Number(n) => vec![n.to_string()],
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(param_values).collect(),
        Value::Object(_) => vec![value.to_string()],
    }
}

/// `params.form` entries as multipart text parts
pub fn param_form_parts(form: Option<&Map<String, Value>>) -> Vec<MultipartPart> {
    form.into_iter()
        .flatten()
        .flat_map(|(name, value)| {
            param_values(value)
                .into_iter()
                .map(move |v| MultipartPart::text(name.clone(), v))
        })
        .collect()
}

/// `params.query` entries as query parameters
pub fn param_query_pairs(query: Option<&Map<String, Value>>) -> Vec<(String, String)> {
    query
        .into_iter()
        .flatten()
        .flat_map(|(name, value)| {
            param_values(value)
                .into_iter()
                .map(move |v| (name.clone(), v))
        })
        .collect()
}

/// Forwarded form fields as multipart text parts, sequences repeated
pub fn forward_field_parts(fields: &FormFields) -> Vec<MultipartPart> {
    fields
        .iter()
        .flat_map(|(name, value)| {
            value
                .values()
                .into_iter()
                .map(move |v| MultipartPart::text(name, v))
        })
        .collect()
}

/// One file part per image under `name`
pub fn image_parts(name: &str, images: &[ResolvedImage]) -> Vec<MultipartPart> {
    images
        .iter()
        .map(|image| {
            MultipartPart::file(
                name,
                image.bytes.clone(),
                image.filename(),
                image.media_type.clone(),
            )
        })
        .collect()
}

/// Decide whether the raw payload is attached
///
/// Request flag, then adapter default, then global default.
pub fn resolve_raw(request_flag: Option<bool>, adapter_default: Option<bool>, global_default: bool) -> bool {
    request_flag.or(adapter_default).unwrap_or(global_default)
}

/// Assemble a result, attaching the payload when `raw` is set
pub fn build_result(
    classifier_id: &str,
    classifier_version: String,
    suggestions: Vec<Suggestion>,
    payload: Value,
    raw: bool,
) -> ClassificationResult {
    ClassificationResult {
        classifier_id: classifier_id.to_string(),
        classifier_version,
        suggestions,
        params: None,
        raw: raw.then_some(payload),
    }
}

/// Read a probability given as a number or numeric string
pub fn probability_of(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Version text given as a string or number; empty when absent
pub fn version_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Array at `pointer`, or `UpstreamMalformed` naming what was expected
pub fn required_array<'a>(payload: &'a Value, pointer: &str) -> Result<&'a Vec<Value>> {
    payload
        .pointer(pointer)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::UpstreamMalformed(format!("Response has no {} array", pointer)))
}

/// Authorization header value for backend credentials
pub fn authorization_value(value: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|_| Error::Config("Credentials contain characters not allowed in a header".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Build one suggestion from a prediction entry
pub fn suggestion_from(item: &Value, name_pointer: &str, probability_key: &str) -> Result<Suggestion> {
    let name = item
        .pointer(name_pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::UpstreamMalformed(format!("Prediction lacks {}", name_pointer)))?;
    let probability = probability_of(item.get(probability_key))
        .ok_or_else(|| Error::UpstreamMalformed(format!("Prediction lacks {}", probability_key)))?;
    Ok(Suggestion::new(probability, name))
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use specid_common::FieldValue;

    #[test]
    fn test_join_uri_trims_and_skips_empty() {
        assert_eq!(
            join_uri("https://api.example/ ", &["/v2/", " observation/identify/token ", "abc"]),
            "https://api.example/v2/observation/identify/token/abc"
        );
        assert_eq!(join_uri("https://api.example/", &["v2", "identify", ""]), "https://api.example/v2/identify");
    }

    #[test]
    fn test_param_values_literals() {
        assert_eq!(param_values(&json!(true)), vec!["true"]);
        assert_eq!(param_values(&json!(false)), vec!["false"]);
        assert_eq!(param_values(&json!(3)), vec!["3"]);
        assert_eq!(param_values(&json!(0.25)), vec!["0.25"]);
        assert_eq!(param_values(&json!("leaf")), vec!["leaf"]);
        assert_eq!(param_values(&json!(["leaf", "flower"])), vec!["leaf", "flower"]);
        assert!(param_values(&json!(null)).is_empty());
    }

    #[test]
    fn test_param_form_arrays_repeat_parts() {
        let form = json!({"organs": ["leaf", "flower"], "lang": "fr"});
        let parts = param_form_parts(form.as_object());
        let names: Vec<&str> = parts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["lang", "organs", "organs"]);
        assert!(param_form_parts(None).is_empty());
    }

    #[test]
    fn test_param_query_booleans() {
        let query = json!({"include-related-images": false, "nb-results": 5, "skip": null});
        let pairs = param_query_pairs(query.as_object());
        assert!(pairs.contains(&("include-related-images".to_string(), "false".to_string())));
        assert!(pairs.contains(&("nb-results".to_string(), "5".to_string())));
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_strip_common_headers() {
        let stripped = strip_common_headers(&test_support::inbound_with_headers().headers);
        assert!(stripped.get("content-type").is_none());
        assert!(stripped.get("content-length").is_none());
        assert!(stripped.get("origin").is_none());
        assert!(stripped.get("host").is_none());
        assert_eq!(test_support::header_text(&stripped, "authorization"), Some("Basic inbound"));
        assert_eq!(test_support::header_text(&stripped, "accept"), Some("application/json"));
    }

    #[test]
    fn test_strip_common_headers_drops_encoding_and_caller_credentials() {
        let stripped = strip_common_headers(&test_support::inbound_with_headers().headers);
        for name in ["accept-encoding", "cookie", "proxy-authorization", "keep-alive"] {
            assert!(stripped.get(name).is_none(), "{name} forwarded");
        }
        assert_eq!(stripped.len(), 2);
    }

    #[test]
    fn test_forward_field_parts_repeat_sequences() {
        let mut fields = FormFields::new();
        fields.insert("lang", FieldValue::Single("en".into()));
        fields.insert("organs", FieldValue::Many(vec!["leaf".into(), "bark".into()]));
        let parts = forward_field_parts(&fields);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], MultipartPart::text("organs", "bark"));
    }

    #[test]
    fn test_resolve_raw_precedence() {
        assert!(resolve_raw(Some(true), Some(false), false));
        assert!(!resolve_raw(Some(false), Some(true), true));
        assert!(resolve_raw(None, Some(true), false));
        assert!(!resolve_raw(None, Some(false), true));
        assert!(resolve_raw(None, None, true));
        assert!(!resolve_raw(None, None, false));
    }

    #[test]
    fn test_suggestion_from_accepts_string_probability() {
        let item = json!({"taxon": {"name": "Quercus robur"}, "probability": "0.8"});
        let s = suggestion_from(&item, "/taxon/name", "probability").unwrap();
        assert_eq!(s.probability, 0.8);
        assert_eq!(s.taxon.as_deref(), Some("Quercus robur"));

        let err = suggestion_from(&json!({"probability": 1}), "/taxon/name", "probability").unwrap_err();
        assert!(matches!(err, Error::UpstreamMalformed(_)));
    }
}
