//! Classifier selection from the request path

use specid_common::config::{ClassifierKind, RoutingConfig};
use specid_common::{Error, Result};
use tracing::{debug, warn};

/// Picks the adapter for a trailing path segment
#[derive(Debug, Clone)]
pub struct ClassifierRouter {
    default: ClassifierKind,
    strict: bool,
}

impl ClassifierRouter {
    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            default: config.default_classifier,
            strict: config.strict_routes,
        }
    }

    pub fn default_kind(&self) -> ClassifierKind {
        self.default
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Select a classifier
    ///
    /// Empty or missing segments use the default. Unknown segments use the
    /// default too, unless strict routing turns them into `NotFound`.
    pub fn select(&self, segment: Option<&str>) -> Result<ClassifierKind> {
        let segment = segment.map(|s| s.trim().trim_matches('/')).unwrap_or_default();
        if segment.is_empty() {
            debug!(classifier = %self.default, "No classifier in path, using default");
            return Ok(self.default);
        }
        match ClassifierKind::from_segment(segment) {
            Some(kind) => Ok(kind),
            None if self.strict => Err(Error::NotFound(format!("Unknown classifier: {}", segment))),
            None => {
                warn!(segment = %segment, classifier = %self.default, "Unknown classifier, using default");
                Ok(self.default)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(strict: bool) -> ClassifierRouter {
        ClassifierRouter::new(&RoutingConfig {
            default_classifier: ClassifierKind::Nia,
            strict_routes: strict,
        })
    }

    #[test]
    fn test_known_segments() {
        let router = router(false);
        assert_eq!(router.select(Some("plantnet")).unwrap(), ClassifierKind::PlantNet);
        assert_eq!(router.select(Some("/REGIONAL/")).unwrap(), ClassifierKind::Regional);
        assert_eq!(router.select(Some("nia")).unwrap(), ClassifierKind::Nia);
    }

    #[test]
    fn test_empty_segment_uses_default() {
        let router = ClassifierRouter::new(&RoutingConfig {
            default_classifier: ClassifierKind::PlantNet,
            strict_routes: true,
        });
        assert_eq!(router.select(None).unwrap(), ClassifierKind::PlantNet);
        assert_eq!(router.select(Some("/")).unwrap(), ClassifierKind::PlantNet);
    }

    #[test]
    fn test_unknown_segment_falls_back_unless_strict() {
        assert_eq!(router(false).select(Some("inat")).unwrap(), ClassifierKind::Nia);
        assert!(matches!(router(true).select(Some("inat")), Err(Error::NotFound(_))));
    }
}
