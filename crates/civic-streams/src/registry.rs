//! Stream registry.
//!
//! [`DataClient`] is the context object every consumer shares: it owns the
//! transport, the resource cache and the map from canonical signature to
//! live [`Stream`]. At most one stream exists per signature, so concurrent
//! consumers of the same query share a single in-flight request.
//!
//! Lock order is registry shard, then stream state. Code holding a stream's
//! state lock never touches the registry.

use std::sync::Arc;

use civic_api::{
    Document, HttpConfig, HttpTransport, QueryParams, ResourceKey, StreamKey, Transport,
    normalize_endpoint,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::StreamsError;
use crate::cache::ResourceCache;
use crate::config::StreamsConfig;
use crate::stream::{RefetchHandle, Stream, Subscription};

/// Which streams an invalidation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationTarget {
    /// The stream with exactly this signature.
    Signature(StreamKey),
    /// Every stream on this endpoint, whatever its query.
    Endpoint(String),
    /// Every stream whose endpoint starts with this prefix.
    Prefix(String),
    /// Every stream whose last document carries this resource.
    Resource(ResourceKey),
}

impl InvalidationTarget {
    pub fn endpoint(endpoint: &str) -> Self {
        InvalidationTarget::Endpoint(normalize_endpoint(endpoint))
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        InvalidationTarget::Prefix(prefix.into())
    }

    pub fn matches(&self, stream: &Stream) -> bool {
        match self {
            InvalidationTarget::Signature(key) => stream.key() == key,
            InvalidationTarget::Endpoint(endpoint) => {
                stream.endpoint() == normalize_endpoint(endpoint)
            }
            InvalidationTarget::Prefix(prefix) => stream.endpoint().starts_with(prefix.as_str()),
            InvalidationTarget::Resource(key) => stream.references(key),
        }
    }
}

/// Outcome of an invalidation.
#[derive(Default)]
pub struct Invalidation {
    refetching: Vec<RefetchHandle>,
    marked_stale: usize,
}

impl Invalidation {
    /// Number of subscribed streams that started a refetch.
    pub fn refetched(&self) -> usize {
        self.refetching.len()
    }

    /// Number of unsubscribed streams marked stale.
    pub fn marked_stale(&self) -> usize {
        self.marked_stale
    }

    /// Wait for every triggered refetch to be applied.
    pub async fn settled(self) {
        for handle in self.refetching {
            handle.finished().await;
        }
    }
}

pub(crate) struct ClientInner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) cache: ResourceCache,
    pub(crate) streams: DashMap<StreamKey, Arc<Stream>>,
    pub(crate) config: StreamsConfig,
}

impl ClientInner {
    fn live_streams(&self) -> Vec<Arc<Stream>> {
        self.streams.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Apply a finished fetch, then push cache changes to other streams.
    pub(crate) fn settle_fetch(
        &self,
        stream: &Arc<Stream>,
        generation: u64,
        outcome: Result<Document, StreamsError>,
    ) {
        let settled = stream.settle(generation, outcome, &self.cache);
        if !settled.changed.is_empty() {
            self.propagate(&settled.changed, Some(stream));
        }
        if let Some(epoch) = settled.teardown_epoch {
            stream.schedule_teardown(epoch);
        }
    }

    /// Re-emit every stream (but `except`) that carries a changed resource.
    pub(crate) fn propagate(&self, changed: &[ResourceKey], except: Option<&Arc<Stream>>) {
        let mut refreshed = 0;
        for stream in self.live_streams() {
            if except.is_some_and(|s| Arc::ptr_eq(s, &stream)) {
                continue;
            }
            if stream.refresh_from_cache(changed, &self.cache) {
                refreshed += 1;
            }
        }
        if refreshed > 0 {
            debug!(changed = changed.len(), refreshed, "propagated cache changes");
        }
    }

    /// Remove a stream from the registry if it is still idle.
    pub(crate) fn tear_down(&self, stream: &Arc<Stream>, epoch: Option<u64>) {
        let removed = self
            .streams
            .remove_if(stream.key(), |_, current| {
                Arc::ptr_eq(current, stream) && stream.try_tear_down(epoch)
            })
            .is_some();
        if removed {
            debug!(key = %stream.key(), "stream torn down");
        }
    }

    fn invalidate_all(&self, targets: &[InvalidationTarget]) -> Invalidation {
        let mut invalidation = Invalidation::default();
        if targets.is_empty() {
            return invalidation;
        }

        for stream in self.live_streams() {
            if !targets.iter().any(|t| t.matches(&stream)) {
                continue;
            }
            match stream.invalidate() {
                Some(handle) => invalidation.refetching.push(handle),
                None => invalidation.marked_stale += 1,
            }
        }

        debug!(
            targets = ?targets,
            refetched = invalidation.refetched(),
            stale = invalidation.marked_stale(),
            "invalidated streams"
        );
        invalidation
    }
}

/// Shared entry point of the data layer.
///
/// Cloning is cheap; clones share the same cache and streams. Methods that
/// start fetches must be called within a Tokio runtime.
#[derive(Clone)]
pub struct DataClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl DataClient {
    pub fn new(transport: Arc<dyn Transport>, config: StreamsConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                cache: ResourceCache::new(),
                streams: DashMap::new(),
                config,
            }),
        }
    }

    /// Client talking to the backend over HTTP.
    pub fn http(http: HttpConfig, config: StreamsConfig) -> Result<Self, StreamsError> {
        info!(api_root = %http.api_root, "creating data client");
        let transport = HttpTransport::new(http)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.inner.cache
    }

    pub fn config(&self) -> &StreamsConfig {
        &self.inner.config
    }

    /// Number of streams currently registered.
    pub fn stream_count(&self) -> usize {
        self.inner.streams.len()
    }

    pub fn stream(&self, key: &StreamKey) -> Option<Arc<Stream>> {
        self.inner.streams.get(key).map(|s| Arc::clone(s.value()))
    }

    /// Return the live stream for a signature, creating it and starting its
    /// first fetch if there is none. A live stream marked stale refetches.
    pub fn get_or_create(&self, endpoint: &str, query: QueryParams) -> Arc<Stream> {
        let (stream, (), created) = self.register(endpoint, query, |_| ());
        if created {
            stream.refetch();
        } else {
            stream.refetch_if_stale();
        }
        stream
    }

    /// Subscribe to a signature, creating its stream if needed.
    ///
    /// Lookup and subscription happen under the registry entry lock, so the
    /// stream cannot be torn down in between.
    pub fn subscribe(&self, endpoint: &str, query: QueryParams) -> Subscription {
        let (stream, subscription, created) = self.register(endpoint, query, Stream::subscribe);
        if created {
            stream.refetch();
        }
        subscription
    }

    fn register<T>(
        &self,
        endpoint: &str,
        query: QueryParams,
        with: impl FnOnce(&Arc<Stream>) -> T,
    ) -> (Arc<Stream>, T, bool) {
        let key = StreamKey::new(endpoint, &query);
        match self.inner.streams.entry(key.clone()) {
            Entry::Occupied(entry) if !entry.get().is_torn_down() => {
                let stream = Arc::clone(entry.get());
                let out = with(&stream);
                (stream, out, false)
            }
            entry => {
                let stream = Stream::new(key, query, Arc::downgrade(&self.inner));
                debug!(key = %stream.key(), "stream created");
                let out = with(&stream);
                entry.insert(Arc::clone(&stream));
                (stream, out, true)
            }
        }
    }

    /// Refetch subscribed streams matching `target`; mark the others stale.
    pub fn invalidate(&self, target: &InvalidationTarget) -> Invalidation {
        self.inner.invalidate_all(std::slice::from_ref(target))
    }

    /// Invalidate several targets at once. A stream matching more than one
    /// target is refetched once.
    pub fn invalidate_all(&self, targets: &[InvalidationTarget]) -> Invalidation {
        self.inner.invalidate_all(targets)
    }

    /// Invalidate and wait for the triggered refetches to be applied.
    pub async fn refetch_all_with(&self, targets: &[InvalidationTarget]) {
        self.invalidate_all(targets).settled().await;
    }

    /// Drop all cached state, e.g. after the signed-in user changed.
    ///
    /// Subscribed streams refetch; idle streams are removed.
    pub fn reset(&self) -> Invalidation {
        info!(streams = self.stream_count(), "resetting data client");
        self.inner.cache.clear();

        let mut invalidation = Invalidation::default();
        for stream in self.inner.live_streams() {
            if stream.subscriber_count() == 0 {
                self.inner.tear_down(&stream, None);
                if stream.is_torn_down() {
                    continue;
                }
            }
            match stream.invalidate() {
                Some(handle) => invalidation.refetching.push(handle),
                None => invalidation.marked_stale += 1,
            }
        }
        invalidation
    }
}
