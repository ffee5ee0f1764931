//! Service layer: classifier adapters, pipeline stages and their clients

pub mod adapters;
pub mod classification;
pub mod image_resolver;
pub mod pipeline;
pub mod record_cleaner;
pub mod router;
pub mod taxonomy;
pub mod transport;

pub use classification::{ClassificationService, ServiceDeps};
pub use image_resolver::{ImageResolver, ResolvedImage};
pub use transport::{HttpTransport, Transport, UpstreamResponse};
