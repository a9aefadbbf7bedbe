//! Error types for the API transport.

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request failed before a response was received.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status and a structured `errors` body.
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: Value },

    /// The backend answered with a non-2xx status and an unstructured body.
    #[error("request failed ({status}): {body}")]
    Status { status: u16, body: String },

    /// The response body is not a JSON:API document.
    #[error("invalid document: {0}")]
    InvalidDocument(#[from] serde_json::Error),

    /// The endpoint could not be resolved against the API root.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// One `{field, error}` entry of a structured error body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiErrorEntry {
    pub field: Option<String>,
    pub error: String,
}

impl ApiError {
    /// Returns `true` if no response was received.
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    /// HTTP status of the response, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } | ApiError::Status { status, .. } => Some(*status),
            ApiError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Flattened `{field, error}` entries of a structured error body.
    ///
    /// Accepts both the array form (`[{"field": .., "error": ..}]`) and the
    /// per-field map form (`{"title": [{"error": "blank"}]}`).
    pub fn entries(&self) -> Vec<ApiErrorEntry> {
        let ApiError::Api { body, .. } = self else {
            return Vec::new();
        };

        match body.get("errors") {
            Some(Value::Array(items)) => items.iter().filter_map(entry_from_object).collect(),
            Some(Value::Object(fields)) => fields
                .iter()
                .flat_map(|(field, errors)| {
                    let errors = match errors {
                        Value::Array(errors) => errors.clone(),
                        other => vec![other.clone()],
                    };
                    errors.into_iter().map(move |e| ApiErrorEntry {
                        field: Some(field.clone()),
                        error: error_text(&e),
                    })
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn entry_from_object(item: &Value) -> Option<ApiErrorEntry> {
    let obj = item.as_object()?;
    let field = obj
        .get("field")
        .or_else(|| obj.get("source").and_then(|s| s.get("pointer")))
        .and_then(Value::as_str)
        .map(String::from);
    Some(ApiErrorEntry {
        field,
        error: error_text(item),
    })
}

fn error_text(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        Value::Object(obj) => ["error", "detail", "title", "code"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(String::from)
            .unwrap_or_else(|| item.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_entries_array_form() {
        let err = ApiError::Api {
            status: 422,
            body: json!({"errors": [{"field": "title", "error": "blank"}]}),
        };
        assert_eq!(
            err.entries(),
            vec![ApiErrorEntry {
                field: Some("title".to_string()),
                error: "blank".to_string(),
            }]
        );
    }

    #[test]
    fn test_entries_map_form() {
        let err = ApiError::Api {
            status: 422,
            body: json!({"errors": {"body_multiloc": [{"error": "blank"}, {"error": "too_short"}]}}),
        };
        let entries = err.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].field.as_deref(), Some("body_multiloc"));
        assert_eq!(entries[1].error, "too_short");
    }

    #[test]
    fn test_status_and_network() {
        let err = ApiError::Status {
            status: 500,
            body: "oops".to_string(),
        };
        assert_eq!(err.status(), Some(500));
        assert!(!err.is_network());
        assert!(err.entries().is_empty());
    }
}
