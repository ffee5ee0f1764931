//! # specid Common Library
//!
//! Shared code for the species identification proxy:
//! - Error and Result types
//! - Configuration file model and resolution
//! - Form-encoded field codec used by every inbound request
//! - Canonical suggestion model returned to callers

pub mod config;
pub mod error;
pub mod form;
pub mod suggestion;

pub use error::{Error, Result};
pub use form::{FieldValue, FormFields};
pub use suggestion::{ClassificationResult, RecordCleanerOpinion, Suggestion};
