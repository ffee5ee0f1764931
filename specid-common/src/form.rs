//! Form-encoded field codec
//!
//! Inbound classification requests always arrive as
//! `application/x-www-form-urlencoded`, whatever shape the upstream classifier
//! needs in the end. This module turns such a body into an ordered field map
//! in which bracketed keys (`image[]`, `groups[0]`) and repeated keys collapse
//! into sequences, and writes field maps back out for urlencoded forwarding.

use serde_json::Value;
use url::form_urlencoded;

/// Value of a single form field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Field given once without brackets
    Single(String),
    /// Field given with brackets or more than once
    Many(Vec<String>),
}

impl FieldValue {
    /// All values in submission order
    pub fn values(&self) -> Vec<&str> {
        match self {
            FieldValue::Single(v) => vec![v.as_str()],
            FieldValue::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    /// Consume into owned values in submission order
    pub fn into_values(self) -> Vec<String> {
        match self {
            FieldValue::Single(v) => vec![v],
            FieldValue::Many(vs) => vs,
        }
    }

    /// Scalar view: the value itself, or the last element of a sequence
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            FieldValue::Single(v) => Some(v.as_str()),
            FieldValue::Many(vs) => vs.last().map(String::as_str),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            FieldValue::Single(existing) => {
                let first = std::mem::take(existing);
                *self = FieldValue::Many(vec![first, value]);
            }
            FieldValue::Many(vs) => vs.push(value),
        }
    }
}

/// Ordered multimap of decoded form fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields {
    entries: Vec<(String, FieldValue)>,
}

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode an urlencoded body
    ///
    /// `name[]=a&name[]=b`, `name[0]=a` and `name=a&name=b` all yield
    /// `name: Many([a, b])`. Empty keys are ignored.
    pub fn parse(body: &str) -> Self {
        let mut fields = Self::new();
        for (key, value) in form_urlencoded::parse(body.trim().as_bytes()) {
            let (name, bracketed) = split_brackets(&key);
            if name.is_empty() {
                continue;
            }
            fields.push(name.to_string(), value.into_owned(), bracketed);
        }
        fields
    }

    fn push(&mut self, name: String, value: String, bracketed: bool) {
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => existing.push(value),
            None => {
                let value = if bracketed {
                    FieldValue::Many(vec![value])
                } else {
                    FieldValue::Single(value)
                };
                self.entries.push((name, value));
            }
        }
    }

    /// Insert or replace a field, keeping its original position when replaced
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Remove a field and return its value
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        let index = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Flatten into name/value pairs; sequences use `name[]` keys
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (name, value) in &self.entries {
            match value {
                FieldValue::Single(v) => pairs.push((name.clone(), v.clone())),
                FieldValue::Many(vs) => {
                    let key = format!("{}[]", name);
                    pairs.extend(vs.iter().map(|v| (key.clone(), v.clone())));
                }
            }
        }
        pairs
    }
}

/// Split `name[...]` into (`name`, true); plain keys into (key, false)
fn split_brackets(key: &str) -> (&str, bool) {
    match key.find('[') {
        Some(open) if key.ends_with(']') => (&key[..open], true),
        _ => (key, false),
    }
}

/// Loose boolean parsing for flags such as `raw`
///
/// Accepts `"1"`, `"yes"`, `"true"` (any case). Everything else is false.
pub fn is_truthy_str(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "yes" | "true"
    )
}

/// Loose boolean parsing over JSON values
///
/// `true`, integer `1` and the string forms accepted by [`is_truthy_str`]
/// are truthy.
pub fn is_truthy_value(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1) || n.as_u64() == Some(1),
        Value::String(s) => is_truthy_str(s),
        _ => false,
    }
}
