//! The uniform response shape shared by the wrapped operation and the cache.
//!
//! A [`Response`] is what the wrapped operation produces and what every caller
//! receives back. A [`CachedValue`] is the same data in its persisted form: the
//! record that gets serialized, compressed and written to the store.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered multimap of header name to values
///
/// Insertion order of names is preserved so a replayed response writes its
/// headers back in the order the operation produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(IndexMap<String, Vec<String>>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Append a value under `name`, keeping any values already present
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.entry(name.into()).or_default().push(value.into());
    }

    /// Replace all values under `name`
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<String>) -> Option<Vec<String>> {
        self.0.insert(name.into(), values)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    /// First value stored under `name`
    #[must_use]
    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// Output of one execution of the wrapped operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// Builder-style header append
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Whether the status code falls in `[200, 300)`
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Persisted form of a [`Response`]
///
/// Serializes as `{"code": .., "headers": {..}, "body": ".."}` where the body
/// is standard base64 so arbitrary bytes survive inside a string field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedValue {
    pub code: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,
}

impl From<&Response> for CachedValue {
    fn from(response: &Response) -> Self {
        Self {
            code: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
        }
    }
}

impl From<CachedValue> for Response {
    fn from(value: CachedValue) -> Self {
        Self {
            status: value.code,
            headers: value.headers,
            body: value.body,
        }
    }
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
