//! Subscription streams over the civic participation backend.
//!
//! Consumers subscribe to a GET query and receive the latest result and
//! every later change. Identical queries share one stream and one request,
//! and all resources land in a normalized cache, so an update fetched by one
//! stream shows up in every other stream carrying the same resource.
//!
//! ## Features
//!
//! - **Registry**: `DataClient` deduplicates streams by canonical signature
//! - **Streams**: Replay of the last value, ordered emissions, grace-period teardown
//! - **Cache**: Normalized `(type, id)` cache with copy-on-write snapshots
//! - **Mutations**: Writes that merge their result and invalidate affected streams

pub mod cache;
mod config;
mod error;
pub mod mutation;
mod registry;
pub mod stream;

#[cfg(test)]
mod testing;

pub use cache::{CacheUpdate, ResourceCache};
pub use config::{DEFAULT_GRACE_PERIOD, StreamsConfig};
pub use error::{CacheError, StreamsError};
pub use mutation::{MutationRequest, affected_targets};
pub use registry::{DataClient, Invalidation, InvalidationTarget};
pub use stream::{Emission, RefetchHandle, Stream, StreamStatus, Subscription, SubscriberId};
