//! Suggestion pipeline
//!
//! Stages run in a fixed order over the adapter's suggestions:
//! 1. threshold filter (`probability >= threshold`)
//! 2. stable sort, highest probability first
//! 3. taxonomy enrichment, when a taxon list id was given
//! 4. truncation to the configured maximum
//! 5. Record Cleaner annotation, when enabled
//!
//! Probabilities are never rescaled.

use specid_common::config::ClassifyConfig;
use specid_common::Suggestion;
use tracing::debug;

use crate::models::RequestContext;
use crate::services::record_cleaner::RecordVerifier;
use crate::services::taxonomy::TaxonomyEnricher;

pub struct SuggestionPipeline {
    threshold: f64,
    max_suggestions: usize,
    enricher: Option<TaxonomyEnricher>,
    verifier: Option<RecordVerifier>,
}

impl SuggestionPipeline {
    pub fn new(
        config: &ClassifyConfig,
        enricher: Option<TaxonomyEnricher>,
        verifier: Option<RecordVerifier>,
    ) -> Self {
        Self {
            threshold: config.threshold,
            max_suggestions: config.suggestions,
            enricher,
            verifier,
        }
    }

    pub async fn run(&self, suggestions: Vec<Suggestion>, context: &RequestContext) -> Vec<Suggestion> {
        let received = suggestions.len();
        let mut suggestions = filter_by_threshold(suggestions, self.threshold);
        sort_descending(&mut suggestions);

        if let Some(enricher) = &self.enricher {
            if context.taxon_list_id.is_some() {
                suggestions = enricher.enrich(suggestions, context, self.max_suggestions).await;
            }
        }

        suggestions.truncate(self.max_suggestions);

        if let Some(verifier) = &self.verifier {
            verifier.annotate(&mut suggestions, context).await;
        }

        debug!(
            received = received,
            suggestions = suggestions.len(),
            "Suggestion pipeline complete"
        );
        suggestions
    }
}

/// Keep suggestions at or above `threshold`, order preserved
pub fn filter_by_threshold(suggestions: Vec<Suggestion>, threshold: f64) -> Vec<Suggestion> {
    suggestions
        .into_iter()
        .filter(|s| s.probability >= threshold)
        .collect()
}

/// Stable sort by descending probability
pub fn sort_descending(suggestions: &mut [Suggestion]) {
    suggestions.sort_by(|a, b| b.probability.total_cmp(&a.probability));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(suggestions: &[Suggestion]) -> Vec<&str> {
        suggestions.iter().filter_map(|s| s.taxon.as_deref()).collect()
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let input = vec![
            Suggestion::new(0.5, "at"),
            Suggestion::new(0.49, "below"),
            Suggestion::new(0.8, "above"),
        ];
        assert_eq!(names(&filter_by_threshold(input, 0.5)), vec!["at", "above"]);
    }

    #[test]
    fn test_sort_is_stable_descending() {
        let mut input = vec![
            Suggestion::new(0.3, "c"),
            Suggestion::new(0.7, "a1"),
            Suggestion::new(0.9, "top"),
            Suggestion::new(0.7, "a2"),
        ];
        sort_descending(&mut input);
        assert_eq!(names(&input), vec!["top", "a1", "a2", "c"]);
    }

    #[tokio::test]
    async fn test_truncation_without_enrichment() {
        let pipeline = SuggestionPipeline::new(
            &ClassifyConfig {
                threshold: 0.2,
                suggestions: 2,
            },
            None,
            None,
        );
        let out = pipeline
            .run(
                vec![
                    Suggestion::new(0.3, "c"),
                    Suggestion::new(0.9, "a"),
                    Suggestion::new(0.1, "dropped"),
                    Suggestion::new(0.5, "b"),
                ],
                &RequestContext::default(),
            )
            .await;
        assert_eq!(names(&out), vec!["a", "b"]);
        assert_eq!(out[0].probability, 0.9);
    }
}
