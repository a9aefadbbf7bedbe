//! Subscribable streams.
//!
//! A [`Stream`] wraps one GET query. It remembers the last value it emitted,
//! replays it to new subscribers and pushes every later emission to all of
//! its subscribers in subscription order.
//!
//! # Ordering
//!
//! Each fetch gets a generation number when it starts. A result is only
//! applied if no fetch that started later has already been applied, so when
//! refetches overlap the most recently *started* request wins, and a slow
//! older response can never overwrite a newer one.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use civic_api::{Document, QueryParams, ResourceKey, StreamKey};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::StreamsError;
use crate::cache::ResourceCache;
use crate::registry::ClientInner;

/// Fetch status of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamStatus {
    #[default]
    Idle,
    Fetching,
    Error,
}

/// A value pushed to subscribers.
#[derive(Debug, Clone)]
pub enum Emission {
    /// A snapshot of the stream's document, resources taken from the cache.
    Value(Arc<Document>),
    /// The latest fetch failed.
    Error(Arc<StreamsError>),
}

impl Emission {
    pub fn document(&self) -> Option<&Document> {
        match self {
            Emission::Value(doc) => Some(doc),
            Emission::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&StreamsError> {
        match self {
            Emission::Value(_) => None,
            Emission::Error(e) => Some(e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Emission::Error(_))
    }
}

/// Identifier of a subscription within its stream.
pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<Emission>,
}

#[derive(Default)]
struct StreamState {
    last: Option<Emission>,
    /// Last successfully fetched document, as received.
    document: Option<Arc<Document>>,
    subscribers: Vec<Subscriber>,
    next_subscriber: SubscriberId,
    started: u64,
    applied: u64,
    in_flight: usize,
    stale: bool,
    status: StreamStatus,
    teardown_epoch: u64,
    torn_down: bool,
}

impl StreamState {
    fn emit(&mut self, emission: Emission) {
        self.last = Some(emission.clone());
        for subscriber in &self.subscribers {
            if subscriber.tx.send(emission.clone()).is_err() {
                trace!(subscriber = subscriber.id, "subscriber queue closed");
            }
        }
    }

    fn settled_status(&self) -> StreamStatus {
        if self.in_flight > 0 {
            StreamStatus::Fetching
        } else if self.last.as_ref().is_some_and(Emission::is_error) {
            StreamStatus::Error
        } else {
            StreamStatus::Idle
        }
    }

    /// Start a new teardown window if nothing keeps the stream alive.
    fn idle_epoch(&mut self) -> Option<u64> {
        if self.subscribers.is_empty() && self.in_flight == 0 && !self.torn_down {
            self.teardown_epoch += 1;
            Some(self.teardown_epoch)
        } else {
            None
        }
    }
}

/// Result of applying a finished fetch.
pub(crate) struct Settled {
    /// Cache keys whose value changed because of this fetch.
    pub(crate) changed: Vec<ResourceKey>,
    /// Teardown window to schedule, if the stream became idle.
    pub(crate) teardown_epoch: Option<u64>,
}

/// One live query against the backend.
pub struct Stream {
    key: StreamKey,
    query: QueryParams,
    client: Weak<ClientInner>,
    state: Mutex<StreamState>,
}

impl Stream {
    pub(crate) fn new(key: StreamKey, query: QueryParams, client: Weak<ClientInner>) -> Arc<Self> {
        Arc::new(Self {
            key,
            query,
            client,
            state: Mutex::new(StreamState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn endpoint(&self) -> &str {
        self.key.endpoint()
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }

    pub fn status(&self) -> StreamStatus {
        self.state().status
    }

    /// The value a new subscriber would receive first.
    pub fn last_value(&self) -> Option<Emission> {
        self.state().last.clone()
    }

    /// Last successfully fetched document, as received from the backend.
    pub fn document(&self) -> Option<Arc<Document>> {
        self.state().document.clone()
    }

    pub fn is_stale(&self) -> bool {
        self.state().stale
    }

    pub fn is_torn_down(&self) -> bool {
        self.state().torn_down
    }

    /// Whether the last good document carries the given resource.
    pub fn references(&self, key: &ResourceKey) -> bool {
        self.state()
            .document
            .as_ref()
            .is_some_and(|doc| doc.references(key))
    }

    /// Register a subscriber.
    ///
    /// The last emitted value, if any, is queued for the new subscriber before
    /// it is registered, so it always arrives ahead of later emissions. A
    /// stream marked stale starts a refetch, even if an older fetch is still
    /// in flight.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();

        let (id, refetch) = {
            let mut state = self.state();
            if let Some(last) = &state.last {
                let _ = tx.send(last.clone());
            }
            let id = state.next_subscriber;
            state.next_subscriber += 1;
            state.subscribers.push(Subscriber { id, tx });
            // Cancels any pending teardown.
            state.teardown_epoch += 1;
            (id, state.stale)
        };

        trace!(key = %self.key, subscriber = id, "subscribed");
        if refetch {
            self.refetch();
        }

        Subscription {
            id,
            stream: Arc::clone(self),
            rx,
            active: true,
        }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    ///
    /// When the last subscriber leaves, teardown is scheduled after the
    /// grace period.
    pub fn unsubscribe(self: &Arc<Self>, id: SubscriberId) -> bool {
        let epoch = {
            let mut state = self.state();
            let before = state.subscribers.len();
            state.subscribers.retain(|s| s.id != id);
            if state.subscribers.len() == before {
                return false;
            }
            state.idle_epoch()
        };

        trace!(key = %self.key, subscriber = id, "unsubscribed");
        if let Some(epoch) = epoch {
            self.schedule_teardown(epoch);
        }
        true
    }

    /// Re-issue the GET. Must be called within a Tokio runtime.
    ///
    /// If the owning client is gone, subscribers receive
    /// [`StreamsError::ClientClosed`] and the handle is detached.
    pub fn refetch(self: &Arc<Self>) -> RefetchHandle {
        let Some(client) = self.client.upgrade() else {
            let mut state = self.state();
            state.emit(Emission::Error(Arc::new(StreamsError::ClientClosed)));
            state.status = state.settled_status();
            debug!(key = %self.key, "refetch on closed client");
            return RefetchHandle { join: None };
        };

        let generation = {
            let mut state = self.state();
            state.started += 1;
            state.in_flight += 1;
            state.stale = false;
            state.status = StreamStatus::Fetching;
            state.started
        };
        debug!(key = %self.key, generation, "fetching stream");

        let stream = Arc::clone(self);
        let join = tokio::spawn(async move {
            let outcome = client
                .transport
                .get(stream.endpoint(), &stream.query)
                .await
                .map_err(StreamsError::from);
            client.settle_fetch(&stream, generation, outcome);
        });

        RefetchHandle { join: Some(join) }
    }

    /// Apply a finished fetch.
    pub(crate) fn settle(
        &self,
        generation: u64,
        outcome: Result<Document, StreamsError>,
        cache: &ResourceCache,
    ) -> Settled {
        let mut state = self.state();
        state.in_flight = state.in_flight.saturating_sub(1);
        let mut changed = Vec::new();

        if generation <= state.applied {
            debug!(
                key = %self.key,
                generation,
                applied = state.applied,
                "discarding response of superseded fetch"
            );
        } else {
            state.applied = generation;
            match outcome.and_then(|doc| Ok((cache.merge(doc.resources())?, doc))) {
                Ok((keys, doc)) => {
                    let snapshot = cache.snapshot(&doc);
                    state.document = Some(Arc::new(doc));
                    state.emit(Emission::Value(Arc::new(snapshot)));
                    changed = keys;
                }
                Err(e) => {
                    debug!(key = %self.key, generation, error = %e, "fetch failed");
                    state.emit(Emission::Error(Arc::new(e)));
                }
            }
        }

        state.status = state.settled_status();
        Settled {
            changed,
            teardown_epoch: state.idle_epoch(),
        }
    }

    /// Re-emit from the cache if the document carries one of `keys`.
    ///
    /// Streams whose latest fetch failed keep their error until refetched.
    pub(crate) fn refresh_from_cache(&self, keys: &[ResourceKey], cache: &ResourceCache) -> bool {
        let mut state = self.state();
        if state.last.as_ref().is_some_and(Emission::is_error) {
            return false;
        }
        let Some(doc) = state.document.clone() else {
            return false;
        };
        if !keys.iter().any(|key| doc.references(key)) {
            return false;
        }

        trace!(key = %self.key, "re-emitting from cache");
        state.emit(Emission::Value(Arc::new(cache.snapshot(&doc))));
        true
    }

    /// Empty a detail stream whose primary resource was deleted.
    pub(crate) fn clear_primary(&self, key: &ResourceKey) -> bool {
        let mut state = self.state();
        let is_primary = state
            .document
            .as_ref()
            .and_then(|doc| doc.primary_key())
            .is_some_and(|primary| &primary == key);
        if !is_primary {
            return false;
        }

        let empty = Arc::new(Document::empty());
        state.document = Some(Arc::clone(&empty));
        state.emit(Emission::Value(empty));
        true
    }

    /// Refetch if subscribed, otherwise mark stale for the next subscriber.
    ///
    /// Responses of fetches started before the invalidation are discarded.
    pub(crate) fn invalidate(self: &Arc<Self>) -> Option<RefetchHandle> {
        {
            let mut state = self.state();
            state.applied = state.started;
            if state.subscribers.is_empty() {
                state.stale = true;
                return None;
            }
        }
        Some(self.refetch())
    }

    /// Refetch if marked stale.
    pub(crate) fn refetch_if_stale(self: &Arc<Self>) -> Option<RefetchHandle> {
        let stale = self.state().stale;
        stale.then(|| self.refetch())
    }

    /// Mark the stream torn down if `epoch` is still the current teardown
    /// window (or unconditionally with `None`) and nothing keeps it alive.
    pub(crate) fn try_tear_down(&self, epoch: Option<u64>) -> bool {
        let mut state = self.state();
        let current = epoch.is_none_or(|e| e == state.teardown_epoch);
        if current && state.subscribers.is_empty() && state.in_flight == 0 && !state.torn_down {
            state.torn_down = true;
            true
        } else {
            false
        }
    }

    /// Tear the stream down once the grace period has passed. Outside a
    /// Tokio runtime there is no timer, so teardown happens right away.
    pub(crate) fn schedule_teardown(self: &Arc<Self>, epoch: u64) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        let grace = client.config.grace_period;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let client = Arc::downgrade(&client);
                let stream = Arc::clone(self);
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    if let Some(client) = client.upgrade() {
                        client.tear_down(&stream, Some(epoch));
                    }
                });
            }
            Err(_) => client.tear_down(self, Some(epoch)),
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Stream")
            .field("key", &self.key)
            .field("status", &state.status)
            .field("subscribers", &state.subscribers.len())
            .field("stale", &state.stale)
            .finish()
    }
}

/// Handle to a spawned fetch.
pub struct RefetchHandle {
    join: Option<JoinHandle<()>>,
}

impl RefetchHandle {
    /// Whether no fetch was started because the client is gone.
    pub fn is_detached(&self) -> bool {
        self.join.is_none()
    }

    /// Wait until the fetch has been applied (or discarded).
    pub async fn finished(self) {
        if let Some(join) = self.join {
            let _ = join.await;
        }
    }
}

/// A consumer's interest in a stream.
///
/// Emissions are queued per subscription. Dropping the handle unsubscribes;
/// dropped outside a Tokio runtime, the last handle tears its stream down
/// without waiting for the grace period.
pub struct Subscription {
    id: SubscriberId,
    stream: Arc<Stream>,
    rx: mpsc::UnboundedReceiver<Emission>,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Wait for the next emission. Returns `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Emission> {
        if !self.active {
            return None;
        }
        self.rx.recv().await
    }

    /// Take the next queued emission without waiting.
    pub fn try_recv(&mut self) -> Option<Emission> {
        if !self.active {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Stop receiving emissions. Calling this more than once is a no-op.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.rx.close();
        self.stream.unsubscribe(self.id);
    }
}

impl futures_util::Stream for Subscription {
    type Item = Emission;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Emission>> {
        let this = self.get_mut();
        if !this.active {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("stream", self.stream.key())
            .field("active", &self.active)
            .finish()
    }
}
