//! Request signatures.
//!
//! A stream is identified by its endpoint and query parameters. Parameters
//! are kept sorted so that two requests differing only in parameter order
//! share a [`StreamKey`].

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// Query parameters of a GET request.
///
/// `null` values are treated as unset: they are neither sent nor part of
/// the signature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(BTreeMap<String, Value>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Whether no parameter has a value.
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Parameters with a value, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Stable serialization used for signatures.
    ///
    /// Keys and values are both written as JSON, so separators inside a key
    /// cannot collide with another parameter set.
    pub fn canonical(&self) -> String {
        self.iter()
            .map(|(k, v)| format!("{}={}", Value::from(k), v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Pairs to put on the wire. Arrays are sent as repeated `key[]` entries.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (key, value) in self.iter() {
            match value {
                Value::Array(items) => {
                    let array_key = format!("{}[]", key);
                    pairs.extend(
                        items
                            .iter()
                            .filter(|item| !item.is_null())
                            .map(|item| (array_key.clone(), scalar_text(item))),
                    );
                }
                other => pairs.push((key.to_string(), scalar_text(other))),
            }
        }
        pairs
    }

    /// Build from a JSON object. Non-object values yield empty parameters.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => Self::default(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonical signature of a stream: endpoint plus canonical query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    endpoint: String,
    query: String,
}

impl StreamKey {
    pub fn new(endpoint: &str, query: &QueryParams) -> Self {
        Self {
            endpoint: normalize_endpoint(endpoint),
            query: query.canonical(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.query.is_empty() {
            write!(f, "{}", self.endpoint)
        } else {
            write!(f, "{}?{}", self.endpoint, self.query)
        }
    }
}

/// Strip trailing slashes (the root `/` is kept).
pub fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    if trimmed.is_empty() && endpoint.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// The collection an endpoint belongs to: `/ideas/42` → `/ideas`.
///
/// Returns `None` for top-level endpoints.
pub fn parent_endpoint(endpoint: &str) -> Option<String> {
    let normalized = normalize_endpoint(endpoint);
    let (parent, _) = normalized.rsplit_once('/')?;
    if parent.is_empty() || parent.ends_with('/') || parent.ends_with(':') {
        return None;
    }
    Some(parent.to_string())
}

/// Last path segment of an endpoint: `/ideas/42` → `42`.
pub fn last_segment(endpoint: &str) -> Option<String> {
    let normalized = normalize_endpoint(endpoint);
    normalized
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(String::from)
}
