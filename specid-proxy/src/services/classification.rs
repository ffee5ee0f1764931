//! Classification request orchestration
//!
//! Drives one inbound request through parsing, routing, the selected
//! adapter, the upstream call and the suggestion pipeline. Request-scoped
//! values travel in a [`RequestContext`](crate::models::RequestContext), so
//! one service instance serves concurrent requests.

use serde_json::Value;
use specid_common::config::TomlConfig;
use specid_common::{ClassificationResult, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::models::{ClassificationRequest, InboundRequest};
use crate::services::adapters::{resolve_raw, AdapterRegistry};
use crate::services::image_resolver::ImageResolver;
use crate::services::pipeline::SuggestionPipeline;
use crate::services::record_cleaner::{RecordCleanerApi, RecordCleanerClient, RecordVerifier};
use crate::services::router::ClassifierRouter;
use crate::services::taxonomy::{TaxonSearch, TaxonomyEnricher, WarehouseClient};
use crate::services::transport::{HttpTransport, Transport};

/// External collaborators of the service
///
/// Production wiring comes from [`ServiceDeps::from_config`]; tests supply
/// fakes.
pub struct ServiceDeps {
    pub transport: Arc<dyn Transport>,
    pub images: ImageResolver,
    /// Present when a warehouse is configured
    pub taxa: Option<Arc<dyn TaxonSearch>>,
    /// Present when Record Cleaner checks are enabled
    pub cleaner: Option<Arc<dyn RecordCleanerApi>>,
}

impl ServiceDeps {
    pub fn from_config(config: &TomlConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(Duration::from_secs(
            config.timeouts.upstream_secs,
        ))?);
        let images = ImageResolver::new(
            config.images.interim_folder.clone(),
            Duration::from_secs(config.images.download_timeout_secs),
            Duration::from_secs(config.images.probe_timeout_secs),
        )?
        .with_max_download_bytes(config.images.max_download_bytes)
        .keep_downloads(config.images.keep_downloads);
        let taxa = match &config.warehouse {
            Some(warehouse) => Some(Arc::new(WarehouseClient::new(
                warehouse,
                Duration::from_secs(config.timeouts.taxonomy_secs),
            )?) as Arc<dyn TaxonSearch>),
            None => None,
        };
        let cleaner = if config.cleaner.enable {
            Some(Arc::new(RecordCleanerClient::new(
                &config.cleaner,
                Duration::from_secs(config.timeouts.cleaner_secs),
            )?) as Arc<dyn RecordCleanerApi>)
        } else {
            None
        };
        Ok(Self {
            transport,
            images,
            taxa,
            cleaner,
        })
    }
}

pub struct ClassificationService {
    router: ClassifierRouter,
    adapters: AdapterRegistry,
    transport: Arc<dyn Transport>,
    images: ImageResolver,
    pipeline: SuggestionPipeline,
    raw_default: bool,
}

impl ClassificationService {
    pub fn new(config: &TomlConfig, deps: ServiceDeps) -> Self {
        let enricher = deps.taxa.map(TaxonomyEnricher::new);
        let verifier = if config.cleaner.enable {
            deps.cleaner.map(RecordVerifier::new)
        } else {
            None
        };
        Self {
            router: ClassifierRouter::new(&config.routing),
            adapters: AdapterRegistry::from_config(&config.classifiers),
            transport: deps.transport,
            images: deps.images,
            pipeline: SuggestionPipeline::new(&config.classify, enricher, verifier),
            raw_default: config.output.raw_default,
        }
    }

    pub fn router(&self) -> &ClassifierRouter {
        &self.router
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Classify one inbound request
    ///
    /// `body` is the urlencoded inbound body; `segment` the classifier named
    /// in the path, if any.
    pub async fn classify(
        &self,
        segment: Option<&str>,
        inbound: &InboundRequest,
        body: &str,
    ) -> Result<ClassificationResult> {
        let request = ClassificationRequest::parse(body)?;
        let kind = self.router.select(segment)?;
        let adapter = self.adapters.get(kind)?;

        let target = adapter.prepare_request(inbound, self.transport.as_ref()).await?;
        let images = self.images.resolve_all(&request.image_locators).await?;
        let sent = match adapter.build_upstream_call(target, &request, &images) {
            Ok(call) => self.transport.execute(&call).await,
            Err(e) => Err(e),
        };
        self.images.release(&images).await;

        let response = sent?.ensure_success(kind.as_str())?;
        let payload: Value = response.json()?;

        let raw = resolve_raw(request.raw_override(), adapter.raw_default(), self.raw_default);
        let mut result = adapter.parse_response(payload, raw)?;
        let received = result.suggestions.len();

        let context = request.context();
        result.suggestions = self.pipeline.run(result.suggestions, &context).await;
        result.params = request.extra_params.clone();

        info!(
            classifier = %kind,
            images = images.len(),
            received = received,
            suggestions = result.suggestions.len(),
            "Classification complete"
        );
        Ok(result)
    }
}
