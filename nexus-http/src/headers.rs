//! Case-insensitive, multi-value header store.
//!
//! Names are trimmed and compared ASCII case-insensitively; the spelling of
//! the first insertion is kept for display. Each name maps to a non-empty,
//! insertion-ordered list of values. A single string passed to
//! [`HeaderStore::set`] or [`HeaderStore::append`] is split on `;` (plus one
//! optional whitespace), while an explicit list is taken verbatim.
//!
//! ```
//! use nexus_http::HeaderStore;
//!
//! let mut headers = HeaderStore::new();
//! headers.set("Content-Type", "application/json; charset=UTF-8");
//! assert_eq!(headers.get_all(" content-type "), Some(&["application/json".to_string(), "charset=UTF-8".to_string()][..]));
//! ```

use std::collections::HashMap;

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tracing::warn;

/// Separator used when several values are folded into a single wire header.
pub const VALUE_SEPARATOR: &str = "; ";

/// Header value input: a single string or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValues {
    /// A single string, split on `;` when stored.
    Single(String),
    /// Values taken as-is.
    Many(Vec<String>),
}

impl HeaderValues {
    fn into_values(self) -> Vec<String> {
        match self {
            HeaderValues::Single(value) => split_values(&value),
            HeaderValues::Many(values) => values,
        }
    }
}

impl From<&str> for HeaderValues {
    fn from(value: &str) -> Self {
        HeaderValues::Single(value.to_string())
    }
}

impl From<String> for HeaderValues {
    fn from(value: String) -> Self {
        HeaderValues::Single(value)
    }
}

impl From<&String> for HeaderValues {
    fn from(value: &String) -> Self {
        HeaderValues::Single(value.clone())
    }
}

impl From<Vec<String>> for HeaderValues {
    fn from(values: Vec<String>) -> Self {
        HeaderValues::Many(values)
    }
}

impl From<Vec<&str>> for HeaderValues {
    fn from(values: Vec<&str>) -> Self {
        HeaderValues::Many(values.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for HeaderValues {
    fn from(values: &[&str]) -> Self {
        HeaderValues::Many(values.iter().map(|v| v.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for HeaderValues {
    fn from(values: [&str; N]) -> Self {
        HeaderValues::Many(values.iter().map(|v| v.to_string()).collect())
    }
}

/// Split `a;b; c` into `["a", "b", "c"]`. Only one whitespace character
/// after each `;` is consumed; empty segments are dropped.
fn split_values(value: &str) -> Vec<String> {
    value
        .split(';')
        .enumerate()
        .map(|(index, segment)| {
            if index == 0 {
                return segment;
            }
            let mut chars = segment.chars();
            match chars.next() {
                Some(c) if c.is_whitespace() => chars.as_str(),
                _ => segment,
            }
        })
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct HeaderEntry {
    name: String,
    values: Vec<String>,
}

impl HeaderEntry {
    fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Ordered, case-insensitive multi-value header collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HeaderStore {
    entries: Vec<HeaderEntry>,
}

impl HeaderStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw header block (`"Name: value\n..."`).
    ///
    /// Lines without a `:` (or with an empty name) are ignored; values are
    /// trimmed and stored with the same splitting rules as [`append`](Self::append).
    pub fn parse(block: &str) -> Self {
        let mut store = Self::new();
        for line in block.lines() {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            if name.trim().is_empty() {
                continue;
            }
            store.append(name, value.trim());
        }
        store
    }

    /// Adapt a native header collection by iterating its entries.
    ///
    /// Values that are not valid UTF-8 are skipped.
    pub fn from_native(native: &HeaderMap) -> Self {
        let mut store = Self::new();
        for (name, value) in native {
            match value.to_str() {
                Ok(value) => store.append_raw(name.as_str(), value),
                Err(_) => warn!(header = %name, "Skipping non UTF-8 header value"),
            }
        }
        store
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.entries.iter().position(|entry| entry.matches(name))
    }

    /// Check for existence of a header.
    pub fn has(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// First value of a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of a header.
    pub fn get_all(&self, name: &str) -> Option<&[String]> {
        self.position(name)
            .map(|index| self.entries[index].values.as_slice())
    }

    /// Replace any existing values of `name`.
    pub fn set(&mut self, name: &str, values: impl Into<HeaderValues>) -> &mut Self {
        self.delete(name);
        self.append(name, values)
    }

    /// Add values to `name`, keeping existing ones.
    pub fn append(&mut self, name: &str, values: impl Into<HeaderValues>) -> &mut Self {
        let values = values.into().into_values();
        self.push_values(name, values);
        self
    }

    /// Append a single value without splitting it.
    fn append_raw(&mut self, name: &str, value: &str) {
        self.push_values(name, vec![value.to_string()]);
    }

    fn push_values(&mut self, name: &str, values: Vec<String>) {
        if values.is_empty() {
            return;
        }
        match self.position(name) {
            Some(index) => self.entries[index].values.extend(values),
            None => self.entries.push(HeaderEntry {
                name: name.trim().to_string(),
                values,
            }),
        }
    }

    /// Remove a header entirely. Removing an absent header is a no-op.
    pub fn delete(&mut self, name: &str) -> &mut Self {
        if let Some(index) = self.position(name) {
            self.entries.remove(index);
        }
        self
    }

    /// Remove the given values of `name`, dropping the entry once empty.
    pub fn delete_values<I, S>(&mut self, name: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(index) = self.position(name) else {
            return self;
        };
        let doomed: Vec<S> = values.into_iter().collect();
        let entry = &mut self.entries[index];
        entry
            .values
            .retain(|value| !doomed.iter().any(|d| d.as_ref() == value.as_str()));
        if entry.values.is_empty() {
            self.entries.remove(index);
        }
        self
    }

    /// Append every value of `other` that this store does not already hold
    /// under the same name.
    pub fn merge(&mut self, other: &HeaderStore) -> &mut Self {
        for entry in &other.entries {
            let fresh: Vec<String> = match self.get_all(&entry.name) {
                Some(existing) => entry
                    .values
                    .iter()
                    .filter(|value| !existing.contains(value))
                    .cloned()
                    .collect(),
                None => entry.values.clone(),
            };
            self.push_values(&entry.name, fresh);
        }
        self
    }

    /// Header names in insertion order.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    /// Visit every header with all of its values.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &[String]),
    {
        for entry in &self.entries {
            visit(&entry.name, &entry.values);
        }
    }

    /// Iterate over `(name, values)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry.values.as_slice()))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One `(name, value)` pair per header, values joined with `"; "`.
    pub fn to_wire(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.clone(), entry.values.join(VALUE_SEPARATOR)))
            .collect()
    }

    /// Convert to an [`http::HeaderMap`], skipping invalid names or values.
    pub fn to_native(&self) -> HeaderMap {
        let mut native = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in self.to_wire() {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(value)) => {
                    native.append(name, value);
                }
                _ => warn!(header = %name, "Skipping invalid header"),
            }
        }
        native
    }
}

impl From<&str> for HeaderStore {
    fn from(block: &str) -> Self {
        HeaderStore::parse(block)
    }
}

impl From<String> for HeaderStore {
    fn from(block: String) -> Self {
        HeaderStore::parse(&block)
    }
}

impl From<&HeaderMap> for HeaderStore {
    fn from(native: &HeaderMap) -> Self {
        HeaderStore::from_native(native)
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderStore
where
    K: AsRef<str>,
    V: Into<HeaderValues>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut store = HeaderStore::new();
        for (name, values) in iter {
            if name.as_ref().trim().is_empty() {
                continue;
            }
            store.append(name.as_ref(), values);
        }
        store
    }
}

impl<K, V> From<Vec<(K, V)>> for HeaderStore
where
    K: AsRef<str>,
    V: Into<HeaderValues>,
{
    fn from(pairs: Vec<(K, V)>) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for HeaderStore
where
    K: AsRef<str>,
    V: Into<HeaderValues>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K, V> From<HashMap<K, V>> for HeaderStore
where
    K: AsRef<str>,
    V: Into<HeaderValues>,
{
    fn from(map: HashMap<K, V>) -> Self {
        map.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_case_and_whitespace() {
        let mut headers = HeaderStore::new();
        headers.set("Content-Type", "application/json");
        assert!(headers.has("content-type"));
        assert!(headers.has("  CONTENT-TYPE "));
        assert_eq!(headers.get(" content-TYPE"), Some("application/json"));
    }

    #[test]
    fn test_missing_header() {
        let headers = HeaderStore::new();
        assert!(!headers.has("Content-Type"));
        assert_eq!(headers.get("Content-Type"), None);
        assert_eq!(headers.get_all("Content-Type"), None);
        assert!(headers.keys().is_empty());
    }

    #[test]
    fn test_set_replaces_and_append_keeps() {
        let mut headers = HeaderStore::new();
        headers.set("X-Trace", "a");
        headers.append("x-trace", "b");
        assert_eq!(
            headers.get_all("X-Trace"),
            Some(&["a".to_string(), "b".to_string()][..])
        );

        headers.set("X-Trace", "c");
        assert_eq!(headers.get_all("X-Trace"), Some(&["c".to_string()][..]));
    }

    #[test]
    fn test_append_does_not_deduplicate() {
        let mut headers = HeaderStore::new();
        headers.append("Accept", "text/plain");
        headers.append("Accept", "text/plain");
        assert_eq!(headers.get_all("Accept").map(<[String]>::len), Some(2));
    }

    #[test]
    fn test_single_string_is_split_on_semicolon() {
        let mut headers = HeaderStore::new();
        headers.set("Content-Type", "application/json;charset=UTF-8; q=1");
        assert_eq!(
            headers.get_all("Content-Type"),
            Some(
                &[
                    "application/json".to_string(),
                    "charset=UTF-8".to_string(),
                    "q=1".to_string()
                ][..]
            )
        );
    }

    #[test]
    fn test_explicit_list_is_not_split() {
        let mut headers = HeaderStore::new();
        headers.set("X-Raw", vec!["a;b", "c"]);
        assert_eq!(
            headers.get_all("X-Raw"),
            Some(&["a;b".to_string(), "c".to_string()][..])
        );
    }

    #[test]
    fn test_delete_all_values() {
        let mut headers = HeaderStore::new();
        headers.set(
            "Content-Type",
            ["application/json", "application/pdf", "application/x-json"],
        );
        headers.delete("content-type");
        assert!(!headers.has("Content-Type"));

        // deleting again is a no-op
        headers.delete("content-type");
        assert!(!headers.has("Content-Type"));
    }

    #[test]
    fn test_delete_given_values() {
        let mut headers = HeaderStore::new();
        headers.set(
            "Content-Type",
            ["application/json", "application/pdf", "application/x-json"],
        );

        headers.delete_values("Content-Type", ["application/pdf"]);
        assert_eq!(
            headers.get_all("Content-Type"),
            Some(&["application/json".to_string(), "application/x-json".to_string()][..])
        );

        headers.delete_values("Content-Type", ["application/json", "application/x-json"]);
        assert!(!headers.has("Content-Type"));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_keys_keep_insertion_order_and_spelling() {
        let mut headers = HeaderStore::new();
        headers.set("Content-Type", "application/json");
        headers.append("accept", "*/*");
        headers.append("CONTENT-TYPE", "charset=UTF-8");
        assert_eq!(headers.keys(), vec!["Content-Type", "accept"]);
    }

    #[test]
    fn test_parse_raw_block() {
        let headers = HeaderStore::parse(
            "Content-Type: text/html\r\nbroken line\nX-Count:  3 \n: nameless\nSet-Cookie: a=1\nSet-Cookie: b=2\n",
        );
        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("x-count"), Some("3"));
        assert_eq!(headers.len(), 3);
        assert_eq!(
            headers.get_all("set-cookie"),
            Some(&["a=1".to_string(), "b=2".to_string()][..])
        );
    }

    #[test]
    fn test_from_map_and_pairs() {
        let mut map = HashMap::new();
        map.insert("Accept", vec!["text/plain".to_string(), "*/*".to_string()]);
        let headers = HeaderStore::from(map);
        assert_eq!(headers.get_all("accept").map(<[String]>::len), Some(2));

        let headers = HeaderStore::from(vec![("X-A", "1"), ("x-a", "2"), ("", "ignored")]);
        assert_eq!(
            headers.get_all("X-A"),
            Some(&["1".to_string(), "2".to_string()][..])
        );
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_clone_is_a_copy() {
        let mut original = HeaderStore::from([("X-A", "1")]);
        let copy = original.clone();
        original.append("X-A", "2");
        assert_eq!(copy.get_all("X-A").map(<[String]>::len), Some(1));
    }

    #[test]
    fn test_merge_skips_values_already_present() {
        let mut headers = HeaderStore::from([("Accept", "application/json")]);
        let mut incoming = headers.clone();
        incoming.append("Accept", "text/plain");
        incoming.append("Authorization", "Bearer t");

        headers.merge(&incoming);
        assert_eq!(
            headers.get_all("Accept"),
            Some(&["application/json".to_string(), "text/plain".to_string()][..])
        );
        assert_eq!(headers.get("authorization"), Some("Bearer t"));
    }

    #[test]
    fn test_native_round_trip() {
        let mut native = HeaderMap::new();
        native.append("set-cookie", HeaderValue::from_static("a=1"));
        native.append("set-cookie", HeaderValue::from_static("b=2"));
        native.insert("content-type", HeaderValue::from_static("text/plain; charset=utf-8"));

        let store = HeaderStore::from_native(&native);
        assert_eq!(store.get_all("Set-Cookie").map(<[String]>::len), Some(2));
        // native values are taken verbatim
        assert_eq!(store.get("content-type"), Some("text/plain; charset=utf-8"));

        let mut headers = HeaderStore::new();
        headers.set("Content-Type", ["application/json", "charset=UTF-8"]);
        headers.set("Bad Name", "x");
        let native = headers.to_native();
        assert_eq!(native.len(), 1);
        assert_eq!(
            native.get("content-type").and_then(|v| v.to_str().ok()),
            Some("application/json; charset=UTF-8")
        );
    }
}
