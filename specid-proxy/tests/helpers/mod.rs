//! Test fakes for the proxy's external collaborators
//!
//! Classifier backends, the species warehouse and Record Cleaner are replaced
//! by in-process implementations of the service traits.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use specid_common::config::TomlConfig;
use specid_common::{Error, Result};
use specid_proxy::models::UpstreamCallSpec;
use specid_proxy::services::record_cleaner::{CleanerError, RecordCleanerApi};
use specid_proxy::services::taxonomy::{TaxonRecord, TaxonSearch, TaxonomyError};
use specid_proxy::services::{ClassificationService, ImageResolver, ServiceDeps, Transport, UpstreamResponse};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Minimal JPEG signature, enough for media type sniffing
pub const JPEG_BYTES: [u8; 12] = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01];

/// Transport answering by URI substring, recording every call
#[derive(Default)]
pub struct FakeTransport {
    rules: Vec<(String, std::result::Result<UpstreamResponse, String>)>,
    pub calls: Mutex<Vec<UpstreamCallSpec>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer calls whose URI contains `pattern` with a JSON body
    pub fn reply_json(mut self, pattern: &str, body: Value) -> Self {
        self.rules.push((pattern.to_string(), Ok(UpstreamResponse::ok_json(&body))));
        self
    }

    /// Answer calls whose URI contains `pattern` with a status and raw body
    pub fn reply_status(mut self, pattern: &str, status: u16, body: &str) -> Self {
        self.rules
            .push((pattern.to_string(), Ok(UpstreamResponse::new(status, body.to_string()))));
        self
    }

    /// Fail calls whose URI contains `pattern` at the transport level
    pub fn fail(mut self, pattern: &str, message: &str) -> Self {
        self.rules.push((pattern.to_string(), Err(message.to_string())));
        self
    }

    pub fn recorded(&self) -> Vec<UpstreamCallSpec> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(&self, call: &UpstreamCallSpec) -> Result<UpstreamResponse> {
        self.calls.lock().unwrap().push(call.clone());
        match self.rules.iter().find(|(pattern, _)| call.uri.contains(pattern.as_str())) {
            Some((_, Ok(response))) => Ok(response.clone()),
            Some((_, Err(message))) => Err(Error::UpstreamUnavailable(message.clone())),
            None => Err(Error::UpstreamUnavailable(format!("no route to {}", call.uri))),
        }
    }
}

/// Warehouse keyed by searched name
#[derive(Default)]
pub struct FakeWarehouse {
    records: HashMap<String, TaxonRecord>,
    pub searches: Mutex<Vec<(String, i64)>>,
}

impl FakeWarehouse {
    pub fn with_taxon(mut self, name: &str, preferred: &str, group: i64) -> Self {
        self.records.insert(
            name.to_string(),
            TaxonRecord {
                preferred_taxon: Some(preferred.to_string()),
                preferred_taxa_taxon_list_id: Some(1000 + group),
                taxon_group_id: Some(group),
                default_common_name: Some(format!("{} (common)", preferred)),
                external_key: Some(format!("NHMSYS{:010}", group)),
                organism_key: None,
                identification_difficulty: Some(1),
            },
        );
        self
    }
}

#[async_trait]
impl TaxonSearch for FakeWarehouse {
    async fn search(&self, name: &str, taxon_list_id: i64) -> std::result::Result<Vec<TaxonRecord>, TaxonomyError> {
        self.searches
            .lock()
            .unwrap()
            .push((name.to_string(), taxon_list_id));
        Ok(self.records.get(name).cloned().into_iter().collect())
    }
}

/// Record Cleaner with scripted answers
pub struct FakeCleaner {
    token: Option<String>,
    response: Option<Value>,
    pub verify_requests: Mutex<Vec<Value>>,
}

impl FakeCleaner {
    pub fn accepting(response: Value) -> Self {
        Self {
            token: Some("rc-token".to_string()),
            response: Some(response),
            verify_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting_login() -> Self {
        Self {
            token: None,
            response: None,
            verify_requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RecordCleanerApi for FakeCleaner {
    async fn authenticate(&self) -> std::result::Result<String, CleanerError> {
        self.token
            .clone()
            .ok_or_else(|| CleanerError::Auth("Record Cleaner authentication failed".into()))
    }

    async fn verify(&self, _token: &str, request: &Value) -> std::result::Result<Value, CleanerError> {
        self.verify_requests.lock().unwrap().push(request.clone());
        self.response
            .clone()
            .ok_or_else(|| CleanerError::Network("connection reset".into()))
    }
}

/// Configuration with predictable classifier endpoints
pub fn test_config(interim: &Path) -> TomlConfig {
    let mut config = TomlConfig::default();
    config.images.interim_folder = interim.to_path_buf();
    config.classifiers.nia.base_url = "https://nia.test".into();
    config.classifiers.nia.token = "tok".into();
    config.classifiers.nia.id = "nia-test".into();
    config.classifiers.plantnet.base_url = "https://plantnet.test".into();
    config.classifiers.plantnet.api_key = "pk".into();
    config.classifiers.plantnet.id = "plantnet-test".into();
    config.classifiers.regional.base_url = "https://regional.test".into();
    config.classifiers.regional.version = "v1".into();
    config.classifiers.regional.service = "classify".into();
    config.classifiers.regional.id = "regional-test".into();
    config
}

/// Interim folder holding `cat.jpg`
pub fn interim_with_image() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("cat.jpg"), JPEG_BYTES).unwrap();
    dir
}

pub fn service(
    config: &TomlConfig,
    transport: Arc<FakeTransport>,
    taxa: Option<Arc<FakeWarehouse>>,
    cleaner: Option<Arc<FakeCleaner>>,
) -> ClassificationService {
    let images = ImageResolver::new(
        config.images.interim_folder.clone(),
        Duration::from_secs(1),
        Duration::from_secs(1),
    )
    .unwrap();
    let deps = ServiceDeps {
        transport,
        images,
        taxa: taxa.map(|t| t as Arc<dyn TaxonSearch>),
        cleaner: cleaner.map(|c| c as Arc<dyn RecordCleanerApi>),
    };
    ClassificationService::new(config, deps)
}

/// First value of a recorded header as text
pub fn header_text<'a>(headers: &'a reqwest::header::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// NIA response body listing `(name, probability)` predictions
pub fn nia_payload(predictions: &[(&str, f64)]) -> Value {
    let items: Vec<Value> = predictions
        .iter()
        .map(|(name, probability)| json!({"scientific_name": name, "probability": probability}))
        .collect();
    json!({
        "generated_by": {"tag": "nia-test-1"},
        "predictions": [{"taxa": {"items": items}}]
    })
}

/// Pl@ntNet response body listing `(name, score)` results
pub fn plantnet_payload(results: &[(&str, f64)]) -> Value {
    let results: Vec<Value> = results
        .iter()
        .map(|(name, score)| json!({"score": score, "species": {"scientificNameWithoutAuthor": name}}))
        .collect();
    json!({"version": "plantnet-test-1", "results": results})
}
