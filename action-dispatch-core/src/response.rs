//! Response and header types produced by the engine

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Success status.
pub const STATUS_OK: u16 = 200;
/// Not-found status, used when the requested action has no handler.
pub const STATUS_NOT_FOUND: u16 = 404;
/// Content type of structured responses.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Case-insensitive header map.
///
/// Names are stored lowercased; setting an existing name overwrites it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: IndexMap<String, String>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, overwriting any previous value.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Get a header value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether a header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Remove a header.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.shift_remove(&name.to_ascii_lowercase())
    }

    /// Copy every header of `other` into `self`, overwriting on collision.
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.set(name, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.set(name, value);
        }
        headers
    }
}

/// A response produced by a handler or synthesized by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Default for ActionResponse {
    fn default() -> Self {
        Self::new(STATUS_OK)
    }
}

impl ActionResponse {
    /// Empty response with the given status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Empty success response.
    pub fn ok() -> Self {
        Self::new(STATUS_OK)
    }

    /// Response whose body is `value` encoded as JSON.
    pub fn json<T: Serialize>(status: u16, value: &T) -> serde_json::Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(status)
            .with_header("content-type", CONTENT_TYPE_JSON)
            .with_body(body))
    }

    /// Set a header.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Body as UTF-8 text, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    pub fn body_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
