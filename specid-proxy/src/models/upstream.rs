//! Upstream call description
//!
//! Adapters describe the call they want made; the transport executes it.
//! Keeping the description as plain data lets tests inspect exactly what
//! would go over the wire.

use reqwest::header::HeaderMap;

/// Where and how to reach the upstream, before a body is attached
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTarget {
    pub method: String,
    pub uri: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
}

/// Content of one multipart part
#[derive(Debug, Clone, PartialEq)]
pub enum MultipartContent {
    Text(String),
    File {
        bytes: Vec<u8>,
        filename: String,
        media_type: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartPart {
    pub name: String,
    pub content: MultipartContent,
}

impl MultipartPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: MultipartContent::Text(value.into()),
        }
    }

    pub fn file(
        name: impl Into<String>,
        bytes: Vec<u8>,
        filename: impl Into<String>,
        media_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            content: MultipartContent::File {
                bytes,
                filename: filename.into(),
                media_type: media_type.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamBody {
    UrlEncoded(Vec<(String, String)>),
    Multipart(Vec<MultipartPart>),
}

/// Complete description of one outbound HTTP call
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamCallSpec {
    pub method: String,
    pub uri: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

impl UpstreamCallSpec {
    /// Attach a body to a prepared target
    pub fn from_target(target: PreparedTarget, body: UpstreamBody) -> Self {
        Self {
            method: target.method,
            uri: target.uri,
            query: target.query,
            headers: target.headers,
            body,
        }
    }

    /// Urlencoded POST, as used by password-grant token endpoints
    pub fn form_post(uri: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: "POST".to_string(),
            uri: uri.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: UpstreamBody::UrlEncoded(fields),
        }
    }

    /// Multipart parts with the given name
    pub fn parts_named(&self, name: &str) -> Vec<&MultipartPart> {
        match &self.body {
            UpstreamBody::Multipart(parts) => parts.iter().filter(|p| p.name == name).collect(),
            _ => Vec::new(),
        }
    }
}
