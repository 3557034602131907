//! Outbound parameter handling
//!
//! Parameters are assembled as JSON values, merged with later sources
//! overriding earlier ones, then reduced to the recognized key set and
//! rendered to strings.

use serde_json::{Map, Value};

/// Parameter names the tracking backend accepts
pub const ALLOWED_PARAMS: [&str; 16] = [
    "a", "acount", "adelta", "aplay", "bn", "bns", "cts", "page", "pageid", "pcount",
    "playerId", "prcnt", "ref", "tai", "ttype", "vid",
];

/// Filtered, rendered query parameters in key order
pub type QueryParams = Vec<(String, String)>;

/// Allowlist filter for outbound parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterFilter;

impl ParameterFilter {
    pub fn is_allowed(key: &str) -> bool {
        ALLOWED_PARAMS.contains(&key)
    }

    /// Drop unrecognized keys and null values, render the rest
    pub fn filter(params: &Map<String, Value>) -> QueryParams {
        let mut out: QueryParams = params
            .iter()
            .filter(|(key, _)| Self::is_allowed(key))
            .filter_map(|(key, value)| render(value).map(|v| (key.clone(), v)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// Merge `layers` left to right; later keys win
pub fn merge_layers<'a>(layers: impl IntoIterator<Item = &'a Map<String, Value>>) -> Map<String, Value> {
    let mut merged = Map::new();
    for layer in layers {
        for (key, value) in layer {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Strip query string and fragment from a URL
pub fn base_url(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Final path segment of a URL, without extension
///
/// `http://host/a/b/super%20space.jpg?x=1` becomes `super%20space`.
pub fn basename(url: &str) -> &str {
    let path = base_url(url);
    let segment = match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    };
    match segment.rfind('.') {
        Some(idx) if idx > 0 => &segment[..idx],
        _ => segment,
    }
}
