//! Request and upstream-call models

pub mod request;
pub mod upstream;

pub use request::{ClassificationRequest, InboundRequest, RequestContext};
pub use upstream::{MultipartContent, MultipartPart, PreparedTarget, UpstreamBody, UpstreamCallSpec};
