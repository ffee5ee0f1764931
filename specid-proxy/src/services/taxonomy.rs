//! Warehouse taxonomy enrichment
//!
//! Classifier names are looked up in the species warehouse's `taxa_search`
//! service, restricted to the caller's taxon list. The first result is taken
//! as the match and supplies the canonical name and identifiers.
//!
//! Lookup failures never fail the request: the suggestion is kept with the
//! classifier's own fields only.

use async_trait::async_trait;
use serde::Deserialize;
use specid_common::config::WarehouseConfig;
use specid_common::suggestion::flexible_id;
use specid_common::{Error, Result, Suggestion};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::RequestContext;

const TAXA_SEARCH_PATH: &str = "index.php/services/data/taxa_search";

/// Warehouse taxonomy errors, handled inside the enrichment stage
#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Warehouse returned status {0}")]
    Api(u16),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// One row of a `taxa_search` response
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaxonRecord {
    #[serde(default)]
    pub preferred_taxon: Option<String>,
    #[serde(default, deserialize_with = "flexible_id")]
    pub preferred_taxa_taxon_list_id: Option<i64>,
    #[serde(default, deserialize_with = "flexible_id")]
    pub taxon_group_id: Option<i64>,
    #[serde(default)]
    pub default_common_name: Option<String>,
    #[serde(default)]
    pub external_key: Option<String>,
    #[serde(default)]
    pub organism_key: Option<String>,
    #[serde(default, deserialize_with = "flexible_id")]
    pub identification_difficulty: Option<i64>,
}

/// Species name search against a taxon list
#[async_trait]
pub trait TaxonSearch: Send + Sync {
    /// Matches in warehouse priority order
    async fn search(&self, name: &str, taxon_list_id: i64) -> std::result::Result<Vec<TaxonRecord>, TaxonomyError>;
}

/// HTTP client for the warehouse data services
pub struct WarehouseClient {
    http_client: reqwest::Client,
    search_url: String,
    auth_token: String,
    nonce: String,
}

impl WarehouseClient {
    pub fn new(config: &WarehouseConfig, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            http_client,
            search_url: format!("{}{}", base, TAXA_SEARCH_PATH),
            auth_token: config.auth_token.clone(),
            nonce: config.nonce.clone(),
        })
    }

    pub fn search_url(&self) -> &str {
        &self.search_url
    }
}

#[async_trait]
impl TaxonSearch for WarehouseClient {
    async fn search(&self, name: &str, taxon_list_id: i64) -> std::result::Result<Vec<TaxonRecord>, TaxonomyError> {
        let list_id = taxon_list_id.to_string();
        let params = [
            ("searchQuery", name),
            ("taxon_list_id", list_id.as_str()),
            ("language", "lat"),
            ("auth_token", self.auth_token.as_str()),
            ("nonce", self.nonce.as_str()),
        ];

        let response = self
            .http_client
            .get(&self.search_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| TaxonomyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TaxonomyError::Api(status.as_u16()));
        }

        response
            .json::<Vec<TaxonRecord>>()
            .await
            .map_err(|e| TaxonomyError::Parse(e.to_string()))
    }
}

/// Enrichment stage of the suggestion pipeline
pub struct TaxonomyEnricher {
    search: Arc<dyn TaxonSearch>,
}

impl TaxonomyEnricher {
    pub fn new(search: Arc<dyn TaxonSearch>) -> Self {
        Self { search }
    }

    /// First warehouse match for `name`, or None on no match or failure
    pub async fn lookup(&self, name: &str, taxon_list_id: i64) -> Option<TaxonRecord> {
        match self.search.search(name, taxon_list_id).await {
            Ok(records) => records.into_iter().next(),
            Err(e) => {
                warn!(taxon = %name, list = taxon_list_id, error = %e, "Taxonomy lookup failed");
                None
            }
        }
    }

    /// Enrich suggestions in order, stopping once `max_suggestions` are kept
    ///
    /// A suggestion is dropped only when it matched a taxon outside the
    /// request's group allow-list. Without a taxon list id nothing changes.
    pub async fn enrich(
        &self,
        suggestions: Vec<Suggestion>,
        context: &RequestContext,
        max_suggestions: usize,
    ) -> Vec<Suggestion> {
        let Some(list_id) = context.taxon_list_id else {
            return suggestions;
        };

        let mut enriched = Vec::with_capacity(suggestions.len().min(max_suggestions.max(1)));
        for suggestion in suggestions {
            let classifier_taxon = suggestion.taxon.clone();
            let record = match &classifier_taxon {
                Some(name) => self.lookup(name, list_id).await,
                None => None,
            };

            if let Some(group) = record.as_ref().and_then(|r| r.taxon_group_id) {
                if context.excludes_group(group) {
                    debug!(
                        taxon = ?classifier_taxon,
                        group = group,
                        "Suggestion outside requested taxon groups, dropped"
                    );
                    continue;
                }
            }

            enriched.push(merge(suggestion.probability, classifier_taxon, record));

            if max_suggestions > 0 && enriched.len() >= max_suggestions {
                break;
            }
        }
        enriched
    }
}

fn merge(probability: f64, classifier_taxon: Option<String>, record: Option<TaxonRecord>) -> Suggestion {
    let mut suggestion = Suggestion {
        probability,
        classifier_taxon,
        ..Default::default()
    };
    if let Some(record) = record {
        suggestion.taxon = record.preferred_taxon;
        suggestion.taxa_taxon_list_id = record.preferred_taxa_taxon_list_id;
        suggestion.taxon_group_id = record.taxon_group_id;
        suggestion.default_common_name = record.default_common_name;
        suggestion.external_key = record.external_key;
        suggestion.organism_key = record.organism_key;
        suggestion.identification_difficulty = record.identification_difficulty;
    }
    suggestion
}
