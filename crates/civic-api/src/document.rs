//! JSON:API document model.
//!
//! Documents are kept close to the wire format. Resource objects carry their
//! attributes as a JSON map so that the cache can store any resource type;
//! callers decode the attributes they need with [`ResourceObject::attributes_as`].

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pagination::page_number_from_url;

/// Normalized identity of a resource: its `(type, id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: String,
    pub id: String,
}

impl ResourceKey {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Resource linkage inside a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl ResourceIdentifier {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.kind, &self.id)
    }
}

/// Linkage data of a relationship.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipData {
    Many(Vec<ResourceIdentifier>),
    One(ResourceIdentifier),
    #[default]
    Null,
}

/// A named relationship of a resource object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub data: RelationshipData,
}

impl Relationship {
    /// Ids referenced by this relationship (empty for `null` linkage).
    pub fn ids(&self) -> Vec<&str> {
        match &self.data {
            RelationshipData::Many(items) => items.iter().map(|i| i.id.as_str()).collect(),
            RelationshipData::One(item) => vec![item.id.as_str()],
            RelationshipData::Null => Vec::new(),
        }
    }
}

/// A JSON:API resource object.
///
/// `type` and `id` default to empty strings when absent so that the cache
/// can reject the object with a precise error instead of the whole document
/// failing to parse.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceObject {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ResourceObject {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            ..Self::default()
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.kind, &self.id)
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Decode the attribute map into a typed struct.
    pub fn attributes_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.attributes.clone()))
    }
}

/// Primary data of a document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    Many(Vec<ResourceObject>),
    One(Box<ResourceObject>),
    #[default]
    Null,
}

/// Pagination links of a collection document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Links {
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(default)]
    pub first: Option<String>,
    #[serde(default)]
    pub prev: Option<String>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub last: Option<String>,
}

/// A JSON:API top-level document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub data: PrimaryData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<ResourceObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Document {
    /// A document with `data: null`, used for empty (204) responses.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn one(resource: ResourceObject) -> Self {
        Self {
            data: PrimaryData::One(Box::new(resource)),
            ..Self::default()
        }
    }

    pub fn many(resources: Vec<ResourceObject>) -> Self {
        Self {
            data: PrimaryData::Many(resources),
            ..Self::default()
        }
    }

    /// Parse a response body. Blank bodies yield [`Document::empty`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::empty());
        }
        serde_json::from_slice(bytes)
    }

    /// Resources in primary data order.
    pub fn primary(&self) -> Vec<&ResourceObject> {
        match &self.data {
            PrimaryData::Many(items) => items.iter().collect(),
            PrimaryData::One(item) => vec![item.as_ref()],
            PrimaryData::Null => Vec::new(),
        }
    }

    /// All resources carried by the document: primary data, then `included`.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceObject> {
        self.primary().into_iter().chain(self.included.iter())
    }

    pub fn resource_keys(&self) -> Vec<ResourceKey> {
        self.resources().map(ResourceObject::key).collect()
    }

    /// Key of the primary resource of a single-object document.
    pub fn primary_key(&self) -> Option<ResourceKey> {
        match &self.data {
            PrimaryData::One(item) => Some(item.key()),
            _ => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.data, PrimaryData::Many(_))
    }

    /// Whether any resource of the document has the given key.
    pub fn references(&self, key: &ResourceKey) -> bool {
        self.resources().any(|r| r.kind == key.kind && r.id == key.id)
    }

    /// Rebuild the document with every resource passed through `f`.
    ///
    /// Links and meta are kept; the shape of the primary data is preserved.
    pub fn map_resources<F>(&self, mut f: F) -> Document
    where
        F: FnMut(&ResourceObject) -> ResourceObject,
    {
        let data = match &self.data {
            PrimaryData::Many(items) => PrimaryData::Many(items.iter().map(&mut f).collect()),
            PrimaryData::One(item) => PrimaryData::One(Box::new(f(item.as_ref()))),
            PrimaryData::Null => PrimaryData::Null,
        };
        Document {
            data,
            included: self.included.iter().map(&mut f).collect(),
            links: self.links.clone(),
            meta: self.meta.clone(),
        }
    }

    /// Whether the backend advertises a next page.
    pub fn has_next_page(&self) -> bool {
        self.links.as_ref().is_some_and(|l| l.next.is_some())
    }

    /// Page number of the `last` pagination link.
    pub fn last_page(&self) -> Option<u32> {
        self.links
            .as_ref()
            .and_then(|l| l.last.as_deref())
            .and_then(page_number_from_url)
    }
}
