//! Error types for the streaming layer.

use civic_api::ApiError;
use thiserror::Error;

/// A resource object that would corrupt the cache if merged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The resource object has no `type`.
    #[error("resource {id:?} has no type")]
    MissingType { id: String },

    /// The resource object has no `id`.
    #[error("resource of type {kind:?} has no id")]
    MissingId { kind: String },
}

/// Errors delivered to stream subscribers and mutation callers.
#[derive(Debug, Error)]
pub enum StreamsError {
    /// The backend request failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The response could not be merged into the cache.
    #[error("cache consistency error: {0}")]
    Cache(#[from] CacheError),

    /// The data client owning the stream has been dropped.
    #[error("data client is closed")]
    ClientClosed,
}

impl StreamsError {
    /// The underlying API error, if any.
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            StreamsError::Api(e) => Some(e),
            _ => None,
        }
    }
}
