//! Normalized resource cache.
//!
//! Holds the freshest known version of every resource, keyed by
//! `(type, id)`, independently of which stream fetched it. Values are
//! stored behind `Arc` and replaced on update, so snapshots handed to
//! subscribers are never mutated after the fact.

use std::sync::Arc;

use civic_api::{Document, ResourceKey, ResourceObject};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tracing::trace;

use crate::CacheError;

/// Broadcast channel capacity for cache updates.
const BROADCAST_CHANNEL_CAPACITY: usize = 1024;

/// Update event for cache observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheUpdate {
    /// A resource was inserted or replaced.
    Upserted { key: ResourceKey },
    /// A resource was removed after a delete was acknowledged.
    Removed { key: ResourceKey },
    /// The cache was cleared.
    Cleared,
}

/// In-memory cache of resource objects.
pub struct ResourceCache {
    entries: DashMap<ResourceKey, Arc<ResourceObject>>,
    updates_tx: broadcast::Sender<CacheUpdate>,
}

impl ResourceCache {
    pub fn new() -> Self {
        let (updates_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Self {
            entries: DashMap::new(),
            updates_tx,
        }
    }

    /// Check that a resource object has an identity.
    pub fn validate(resource: &ResourceObject) -> Result<(), CacheError> {
        if resource.kind.is_empty() {
            return Err(CacheError::MissingType {
                id: resource.id.clone(),
            });
        }
        if resource.id.is_empty() {
            return Err(CacheError::MissingId {
                kind: resource.kind.clone(),
            });
        }
        Ok(())
    }

    /// Upsert resources by `(type, id)`; later objects win.
    ///
    /// Every object is validated before anything is written, so a malformed
    /// object leaves the cache untouched. Returns the keys whose stored value
    /// changed, in first-seen order.
    pub fn merge<'a, I>(&self, resources: I) -> Result<Vec<ResourceKey>, CacheError>
    where
        I: IntoIterator<Item = &'a ResourceObject>,
    {
        let resources: Vec<&ResourceObject> = resources.into_iter().collect();
        for resource in &resources {
            Self::validate(resource)?;
        }

        let mut changed: Vec<ResourceKey> = Vec::new();
        for resource in resources {
            let key = resource.key();
            let updated = match self.entries.entry(key.clone()) {
                Entry::Occupied(mut entry) => {
                    if entry.get().as_ref() == resource {
                        false
                    } else {
                        entry.insert(Arc::new(resource.clone()));
                        true
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(Arc::new(resource.clone()));
                    true
                }
            };

            if updated {
                trace!(key = %key, "cache: resource upserted");
                self.broadcast(CacheUpdate::Upserted { key: key.clone() });
                if !changed.contains(&key) {
                    changed.push(key);
                }
            }
        }

        Ok(changed)
    }

    pub fn get(&self, kind: &str, id: &str) -> Option<Arc<ResourceObject>> {
        self.get_key(&ResourceKey::new(kind, id))
    }

    pub fn get_key(&self, key: &ResourceKey) -> Option<Arc<ResourceObject>> {
        self.entries.get(key).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscribe to cache updates.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate> {
        self.updates_tx.subscribe()
    }

    /// Rebuild a document with the cached version of each of its resources.
    ///
    /// Resources that are not cached keep the version carried by the document.
    pub fn snapshot(&self, document: &Document) -> Document {
        document.map_resources(|resource| match self.get_key(&resource.key()) {
            Some(cached) => cached.as_ref().clone(),
            None => resource.clone(),
        })
    }

    /// Keys of every cached resource with this id, whatever its type.
    pub(crate) fn keys_with_id(&self, id: &str) -> Vec<ResourceKey> {
        self.entries
            .iter()
            .filter(|entry| entry.key().id == id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Drop a resource whose deletion the backend acknowledged.
    pub(crate) fn remove(&self, key: &ResourceKey) -> Option<Arc<ResourceObject>> {
        let removed = self.entries.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            trace!(key = %key, "cache: resource removed");
            self.broadcast(CacheUpdate::Removed { key: key.clone() });
        }
        removed
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
        self.broadcast(CacheUpdate::Cleared);
    }

    fn broadcast(&self, update: CacheUpdate) {
        if self.updates_tx.send(update).is_err() {
            trace!("no subscribers for cache update");
        }
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}
