//! Mutation dispatch.
//!
//! A write goes to the backend first. Only once it succeeded are the returned
//! resources merged into the cache, pushed to the streams that show them, and
//! the affected streams invalidated. A failed write changes nothing.

use std::sync::Arc;

use civic_api::{Document, Method, ResourceKey, last_segment, normalize_endpoint, parent_endpoint};
use serde_json::Value;
use tracing::{debug, info};

use crate::StreamsError;
use crate::registry::{DataClient, InvalidationTarget};
use crate::stream::Stream;

/// A write against the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub method: Method,
    pub endpoint: String,
    pub body: Option<Value>,
    /// The resource being written, when the caller knows it.
    pub resource: Option<ResourceKey>,
}

impl MutationRequest {
    pub fn new(method: Method, endpoint: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            endpoint: normalize_endpoint(&endpoint.into()),
            body,
            resource: None,
        }
    }

    pub fn post(endpoint: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, endpoint, Some(body))
    }

    pub fn patch(endpoint: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, endpoint, Some(body))
    }

    pub fn put(endpoint: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, endpoint, Some(body))
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Delete, endpoint, None)
    }

    #[must_use]
    pub fn with_resource(mut self, key: ResourceKey) -> Self {
        self.resource = Some(key);
        self
    }
}

/// Streams a successful mutation invalidates.
///
/// A created resource shows up in its collection; an updated or deleted one
/// also changes the collection it belongs to. The detail endpoint of a
/// deleted resource is not refetched.
pub fn affected_targets(request: &MutationRequest) -> Vec<InvalidationTarget> {
    let endpoint = normalize_endpoint(&request.endpoint);
    let parent = parent_endpoint(&endpoint).map(InvalidationTarget::Endpoint);

    let mut targets = Vec::new();
    if !request.method.is_write() {
        return targets;
    }
    match request.method {
        Method::Get => {}
        Method::Post => targets.push(InvalidationTarget::Endpoint(endpoint)),
        Method::Patch | Method::Put => {
            targets.push(InvalidationTarget::Endpoint(endpoint));
            targets.extend(parent);
        }
        Method::Delete => {
            targets.extend(parent);
            if let Some(key) = &request.resource {
                targets.push(InvalidationTarget::Resource(key.clone()));
            }
        }
    }
    targets
}

impl DataClient {
    /// Send a write and apply its result.
    pub async fn mutate(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<Document, StreamsError> {
        self.dispatch(MutationRequest::new(method, endpoint, body))
            .await
    }

    /// Send a write, merge the response into the cache and invalidate the
    /// affected streams.
    ///
    /// Invalidation is triggered when this call completes; the refetches it
    /// starts are not awaited.
    pub async fn dispatch(&self, request: MutationRequest) -> Result<Document, StreamsError> {
        info!(method = %request.method, endpoint = %request.endpoint, "dispatching mutation");

        let document = self
            .inner
            .transport
            .send(request.method, &request.endpoint, request.body.as_ref())
            .await?;

        let changed = self.inner.cache.merge(document.resources())?;
        if !changed.is_empty() {
            self.inner.propagate(&changed, None);
        }

        let mut targets = affected_targets(&request);
        if request.method == Method::Delete {
            let deleted = request
                .resource
                .clone()
                .or_else(|| self.deleted_resource(&request.endpoint));
            if let Some(key) = deleted {
                self.remove_resource(&key);
                let target = InvalidationTarget::Resource(key);
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }

        let invalidation = self.invalidate_all(&targets);
        debug!(
            method = %request.method,
            endpoint = %request.endpoint,
            merged = changed.len(),
            refetched = invalidation.refetched(),
            "mutation applied"
        );
        Ok(document)
    }

    /// The resource a DELETE on `endpoint` removed.
    ///
    /// Looks for a detail stream on the endpoint, then for a resource with
    /// the endpoint's last segment as id in a stream on the parent
    /// collection, then for a single cached resource with that id.
    fn deleted_resource(&self, endpoint: &str) -> Option<ResourceKey> {
        let endpoint = normalize_endpoint(endpoint);
        let detail = self
            .inner
            .streams
            .iter()
            .filter(|entry| entry.key().endpoint() == endpoint)
            .find_map(|entry| {
                let doc = entry.value().document()?;
                if doc.is_collection() {
                    None
                } else {
                    doc.primary_key()
                }
            });
        if detail.is_some() {
            return detail;
        }

        let id = last_segment(&endpoint)?;
        if let Some(parent) = parent_endpoint(&endpoint) {
            let listed = self
                .inner
                .streams
                .iter()
                .filter(|entry| entry.key().endpoint() == parent)
                .find_map(|entry| {
                    let doc = entry.value().document()?;
                    doc.primary().iter().find(|r| r.id == id).map(|r| r.key())
                });
            if listed.is_some() {
                return listed;
            }
        }

        match self.inner.cache.keys_with_id(&id).as_slice() {
            [key] => Some(key.clone()),
            _ => None,
        }
    }

    fn remove_resource(&self, key: &ResourceKey) {
        self.inner.cache.remove(key);

        let streams: Vec<Arc<Stream>> = self
            .inner
            .streams
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let cleared = streams.iter().filter(|s| s.clear_primary(key)).count();
        debug!(key = %key, cleared, "removed deleted resource");
    }
}
