//! Inbound classification request
//!
//! The caller always posts `application/x-www-form-urlencoded`. Control
//! fields steer the proxy itself and are stripped here, once, so adapters
//! only ever see the fields meant for the classifier.

use serde_json::{Map, Value};
use specid_common::form::{is_truthy_str, is_truthy_value};
use specid_common::suggestion::id_from_value;
use specid_common::{Error, FieldValue, FormFields, Result};

use reqwest::header::HeaderMap;

/// Control fields consumed by the proxy and never forwarded
pub const CONTROL_FIELDS: [&str; 7] = [
    "list",
    "groups",
    "org_group_rules_list",
    "sref",
    "date",
    "raw",
    "params",
];

/// Transport-level view of the inbound call
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub method: String,
    pub uri: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
}

/// Parsed inbound body
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRequest {
    /// URLs or interim-folder references, in submission order
    pub image_locators: Vec<String>,
    pub taxon_list_id: Option<i64>,
    /// Taxon group allow-list, duplicates removed
    pub taxon_group_ids: Vec<i64>,
    pub org_group_rules: Option<Value>,
    pub observation_sref: Option<Value>,
    pub observation_date: Option<String>,
    /// Value of the `raw` field when one was given
    pub raw_passthrough: Option<bool>,
    /// Decoded `params` object
    pub extra_params: Option<Value>,
    /// Everything left after control fields and `image` were removed
    pub forward_fields: FormFields,
}

impl ClassificationRequest {
    /// Decode and split an urlencoded body
    pub fn parse(body: &str) -> Result<Self> {
        Self::from_fields(FormFields::parse(body))
    }

    /// Split decoded fields into control values and forwardable fields
    ///
    /// Fails with `InvalidInput` when `image` is absent or a control field
    /// cannot be interpreted.
    pub fn from_fields(mut fields: FormFields) -> Result<Self> {
        let image_locators: Vec<String> = fields
            .remove("image")
            .map(FieldValue::into_values)
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if image_locators.is_empty() {
            return Err(Error::InvalidInput(
                "The POST body must contain an image parameter holding the location of the image to classify"
                    .to_string(),
            ));
        }

        let taxon_list_id = match fields.remove("list") {
            Some(value) => parse_list_id(&value)?,
            None => None,
        };
        let taxon_group_ids = match fields.remove("groups") {
            Some(value) => parse_group_ids(&value)?,
            None => Vec::new(),
        };
        let org_group_rules = take_json(&mut fields, "org_group_rules_list")?;
        let observation_sref = take_json(&mut fields, "sref")?;
        let observation_date = fields
            .remove("date")
            .and_then(|v| v.as_scalar().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty());
        let raw_passthrough = fields
            .remove("raw")
            .and_then(|v| {
                v.as_scalar()
                    .filter(|s| !s.trim().is_empty())
                    .map(is_truthy_str)
            });

        let extra_params = take_json(&mut fields, "params")?;
        if let Some(params) = &extra_params {
            if !params.is_object() {
                return Err(Error::InvalidInput(
                    "params must be a JSON object".to_string(),
                ));
            }
        }

        Ok(Self {
            image_locators,
            taxon_list_id,
            taxon_group_ids,
            org_group_rules,
            observation_sref,
            observation_date,
            raw_passthrough,
            extra_params,
            forward_fields: fields,
        })
    }

    /// Request-level raw flag: the `raw` field wins over `params.raw`
    pub fn raw_override(&self) -> Option<bool> {
        self.raw_passthrough.or_else(|| {
            self.extra_params
                .as_ref()
                .and_then(|p| p.get("raw"))
                .filter(|v| !v.is_null())
                .map(is_truthy_value)
        })
    }

    /// `params.form` entries destined for multipart text parts
    pub fn params_form(&self) -> Option<&Map<String, Value>> {
        self.params_section("form")
    }

    /// `params.query` entries destined for the upstream query string
    pub fn params_query(&self) -> Option<&Map<String, Value>> {
        self.params_section("query")
    }

    fn params_section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.extra_params
            .as_ref()
            .and_then(|p| p.get(name))
            .and_then(Value::as_object)
    }

    /// Values the pipeline needs after the upstream call
    pub fn context(&self) -> RequestContext {
        RequestContext {
            taxon_list_id: self.taxon_list_id,
            taxon_group_ids: self.taxon_group_ids.clone(),
            org_group_rules: self.org_group_rules.clone(),
            observation_sref: self.observation_sref.clone(),
            observation_date: self.observation_date.clone(),
        }
    }
}

/// Per-request values handed to enrichment and verification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub taxon_list_id: Option<i64>,
    pub taxon_group_ids: Vec<i64>,
    pub org_group_rules: Option<Value>,
    pub observation_sref: Option<Value>,
    pub observation_date: Option<String>,
}

impl RequestContext {
    /// True when the group allow-list is active and excludes `group`
    pub fn excludes_group(&self, group: i64) -> bool {
        !self.taxon_group_ids.is_empty() && !self.taxon_group_ids.contains(&group)
    }
}

fn parse_list_id(value: &FieldValue) -> Result<Option<i64>> {
    let raw = value.as_scalar().unwrap_or_default().trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<i64>()
        .map(Some)
        .map_err(|_| Error::InvalidInput(format!("list must be an integer, got '{}'", raw)))
}

/// Accepts `groups[]=5&groups[]=7`, `groups=5,7` or `groups=[5,7]`
fn parse_group_ids(value: &FieldValue) -> Result<Vec<i64>> {
    let mut ids: Vec<i64> = Vec::new();
    for item in value.values() {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let parsed: Vec<i64> = if item.starts_with('[') {
            let array: Vec<Value> = serde_json::from_str(item).map_err(|e| {
                Error::InvalidInput(format!("groups is not a valid JSON array: {}", e))
            })?;
            array
                .iter()
                .map(|v| {
                    id_from_value(v).ok_or_else(|| {
                        Error::InvalidInput(format!("groups must hold integers, got {}", v))
                    })
                })
                .collect::<Result<_>>()?
        } else {
            item.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<i64>().map_err(|_| {
                        Error::InvalidInput(format!("groups must hold integers, got '{}'", s))
                    })
                })
                .collect::<Result<_>>()?
        };
        for id in parsed {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

fn take_json(fields: &mut FormFields, name: &str) -> Result<Option<Value>> {
    let Some(value) = fields.remove(name) else {
        return Ok(None);
    };
    let text = value.as_scalar().unwrap_or_default().trim();
    if text.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{} is not valid JSON: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_image_rejected() {
        let err = ClassificationRequest::parse("list=1").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = ClassificationRequest::parse("image=").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_control_fields_stripped() {
        let body = "image=cat.jpg&list=15&groups%5B%5D=5&groups%5B%5D=7&sref=%7B%22srid%22%3A27700%7D\
                    &date=2024-06-01&raw=yes&org_group_rules_list=%5B1%5D&lang=en";
        let request = ClassificationRequest::parse(body).unwrap();

        assert_eq!(request.image_locators, vec!["cat.jpg"]);
        assert_eq!(request.taxon_list_id, Some(15));
        assert_eq!(request.taxon_group_ids, vec![5, 7]);
        assert_eq!(request.observation_sref, Some(json!({"srid": 27700})));
        assert_eq!(request.observation_date.as_deref(), Some("2024-06-01"));
        assert_eq!(request.org_group_rules, Some(json!([1])));
        assert_eq!(request.raw_passthrough, Some(true));

        let remaining: Vec<&str> = request.forward_fields.iter().map(|(k, _)| k).collect();
        assert_eq!(remaining, vec!["lang"]);
    }

    #[test]
    fn test_image_sequence_kept_in_order() {
        let request =
            ClassificationRequest::parse("image%5B%5D=a.jpg&image%5B%5D=https%3A%2F%2Fx.org%2Fb.png")
                .unwrap();
        assert_eq!(request.image_locators, vec!["a.jpg", "https://x.org/b.png"]);
    }

    #[test]
    fn test_group_forms_accepted() {
        let request = ClassificationRequest::parse("image=a.jpg&groups=5,7,5").unwrap();
        assert_eq!(request.taxon_group_ids, vec![5, 7]);

        let request = ClassificationRequest::parse("image=a.jpg&groups=%5B3%2C%224%22%5D").unwrap();
        assert_eq!(request.taxon_group_ids, vec![3, 4]);
    }

    #[test]
    fn test_malformed_control_fields_rejected() {
        for body in [
            "image=a.jpg&list=abc",
            "image=a.jpg&groups=x",
            "image=a.jpg&sref=%7Bnot-json",
            "image=a.jpg&params=%5B1%5D",
        ] {
            let err = ClassificationRequest::parse(body).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{body}");
        }
    }

    #[test]
    fn test_raw_field_beats_params_raw() {
        let params = "%7B%22raw%22%3Atrue%7D";
        let request =
            ClassificationRequest::parse(&format!("image=a.jpg&raw=0&params={}", params)).unwrap();
        assert_eq!(request.raw_override(), Some(false));

        let request = ClassificationRequest::parse(&format!("image=a.jpg&params={}", params)).unwrap();
        assert_eq!(request.raw_override(), Some(true));

        let request = ClassificationRequest::parse("image=a.jpg").unwrap();
        assert_eq!(request.raw_override(), None);
    }

    #[test]
    fn test_empty_raw_field_counts_as_absent() {
        let request = ClassificationRequest::parse("image=a.jpg&raw=").unwrap();
        assert_eq!(request.raw_passthrough, None);
        assert_eq!(request.raw_override(), None);

        let params = "%7B%22raw%22%3Atrue%7D";
        let request =
            ClassificationRequest::parse(&format!("image=a.jpg&raw=+&params={}", params)).unwrap();
        assert_eq!(request.raw_override(), Some(true));
    }

    #[test]
    fn test_params_sections() {
        let params = json!({"form": {"organs": ["leaf", "flower"]}, "query": {"include-related-images": true}});
        let body = format!(
            "image=a.jpg&params={}",
            url::form_urlencoded::byte_serialize(params.to_string().as_bytes()).collect::<String>()
        );
        let request = ClassificationRequest::parse(&body).unwrap();
        assert_eq!(request.params_form().unwrap()["organs"], json!(["leaf", "flower"]));
        assert_eq!(request.params_query().unwrap()["include-related-images"], json!(true));
        assert_eq!(request.extra_params, Some(params));
    }

    #[test]
    fn test_context_group_exclusion() {
        let mut context = RequestContext::default();
        assert!(!context.excludes_group(7));
        context.taxon_group_ids = vec![5];
        assert!(context.excludes_group(7));
        assert!(!context.excludes_group(5));
    }
}
