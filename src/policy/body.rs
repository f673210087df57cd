//! Request-body field extraction.
//!
//! Reduces raw body bytes to a flat `field name → values` multimap based on
//! the `Content-Type` header. JSON object bodies contribute their top-level
//! keys; anything else is treated as URL-encoded form data after every `:`
//! has been substituted with `=` — an intentional lenience so JSON-like
//! `key: value` bodies degrade into form-decodable pairs. A JSON body that
//! fails to parse yields `None`, which the evaluator treats as "no body
//! fields to check" rather than a block.

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use tracing::warn;

/// Field multimap extracted from a request body.
pub type BodyFields = BTreeMap<String, Vec<String>>;

/// Extract body fields according to `content_type`.
pub fn extract(body: &[u8], content_type: &str) -> Option<BodyFields> {
    if content_type.to_ascii_lowercase().contains("application/json") {
        extract_json(body)
    } else {
        Some(extract_form(body))
    }
}

fn extract_json(body: &[u8]) -> Option<BodyFields> {
    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            warn!("failed to parse JSON body: {}", e);
            return None;
        }
    };
    let serde_json::Value::Object(object) = value else {
        warn!("JSON body is not an object; ignoring body fields");
        return None;
    };

    let mut fields = BodyFields::new();
    for (key, value) in object {
        fields.insert(key, stringify(value));
    }
    Some(fields)
}

/// Stringify one JSON value into its field values. String arrays become
/// multiple values; everything else collapses to a single string.
fn stringify(value: serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => vec![s],
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        serde_json::Value::Null => vec!["null".to_string()],
        other => vec![other.to_string()],
    }
}

fn extract_form(body: &[u8]) -> BodyFields {
    let text = String::from_utf8_lossy(body).replace(':', "=");

    let mut fields = BodyFields::new();
    for pair in text.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        fields
            .entry(decode(key))
            .or_default()
            .push(decode(value));
    }
    fields
}

fn decode(component: &str) -> String {
    let spaced = component.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
