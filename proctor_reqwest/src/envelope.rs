//! Decoding of the backend's hypermedia envelopes
//!
//! Collections arrive as paged models:
//!
//! ```json
//! {
//!   "_embedded": { "testResponseDtoList": [ { "id": 7, "_links": { } } ] },
//!   "page": { "size": 20, "totalElements": 1, "totalPages": 1, "number": 0 },
//!   "_links": { "self": { "href": "http://localhost:8080/tests?page=0" } }
//! }
//! ```
//!
//! The key under `_embedded` varies with the resource type, so only its
//! position matters: the first entry is taken as the page's content.

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{Map, Value};

/// One page of a collection
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(
    try_from = "RawPaged",
    bound(deserialize = "T: DeserializeOwned")
)]
pub struct Paged<T> {
    /// The items on this page
    pub content: Vec<T>,
    /// The number of pages in the collection
    pub total_pages: u64,
    /// The number of items in the collection
    pub total_elements: u64,
    /// The zero-based index of this page
    pub number: u64,
    /// The requested page size
    pub size: u64,
    /// Whether this is the first page
    pub first: bool,
    /// Whether this is the last page
    pub last: bool,
    /// Navigation links, keyed by relation
    pub links: Map<String, Value>,
}

impl<T: DeserializeOwned> Paged<T> {
    /// Decodes a page from an already-parsed document
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[derive(Deserialize)]
struct RawPaged {
    #[serde(rename = "_embedded", default)]
    embedded: Map<String, Value>,
    #[serde(default)]
    page: PageMetadata,
    #[serde(rename = "_links", default)]
    links: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PageMetadata {
    total_pages: u64,
    total_elements: u64,
    number: u64,
    size: u64,
}

impl Default for PageMetadata {
    fn default() -> Self {
        Self {
            total_pages: 1,
            total_elements: 0,
            number: 0,
            size: 20,
        }
    }
}

impl<T: DeserializeOwned> TryFrom<RawPaged> for Paged<T> {
    type Error = serde_json::Error;

    fn try_from(raw: RawPaged) -> Result<Self, Self::Error> {
        let content = match raw.embedded.into_iter().next() {
            Some((_, items @ Value::Array(_))) => serde_json::from_value(items)?,
            _ => Vec::new(),
        };

        let page = raw.page;
        Ok(Self {
            content,
            total_pages: page.total_pages,
            total_elements: page.total_elements,
            number: page.number,
            size: page.size,
            first: page.number == 0,
            last: page.number >= page.total_pages.saturating_sub(1),
            links: raw.links,
        })
    }
}

/// Removes the `_links` member from a single entity model
///
/// Anything other than a JSON object is left untouched.
pub fn strip_links(mut entity: Value) -> Value {
    if let Value::Object(map) = &mut entity {
        map.remove("_links");
    }
    entity
}
