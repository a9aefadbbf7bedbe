//! JSON:API model and HTTP transport for the civic participation backend.
//!
//! This crate provides the wire-level half of the data layer:
//!
//! ## Features
//!
//! - **Documents**: JSON:API documents, resource objects and relationships
//! - **Queries**: Canonical request signatures for deduplicating streams
//! - **Transport**: `Transport` trait with a reqwest-backed implementation
//! - **Pagination**: Helpers for reading `links.next` / `links.last`

mod client;
mod config;
mod document;
mod error;
pub mod pagination;
pub mod query;

pub use client::{HttpTransport, Method, Transport};
pub use config::HttpConfig;
pub use document::{
    Document, Links, PrimaryData, Relationship, RelationshipData, ResourceIdentifier,
    ResourceKey, ResourceObject,
};
pub use error::{ApiError, ApiErrorEntry};
pub use pagination::page_number_from_url;
pub use query::{QueryParams, StreamKey, last_segment, normalize_endpoint, parent_endpoint};
