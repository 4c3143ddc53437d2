//! Events: multimaps from keys to sets of values.

use ahash::{AHashMap, AHashSet};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A multimap from non-empty keys to non-empty sets of values.
///
/// A key present in an event always has at least one value: removing the
/// last value of a key removes the key.
///
/// # Examples
/// ```
/// use ahrules::Event;
///
/// let mut event = Event::new();
/// event.add("ip", "192.0.2.1");
/// event.add("ip", "192.0.2.2");
/// assert!(event.contains("ip", "192.0.2.1"));
/// assert_eq!(event.values("ip").count(), 2);
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Event {
    attrs: AHashMap<String, AHashSet<String>>,
}

impl Event {
    /// Create an empty event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value under a key.
    ///
    /// Returns `false` if the key is empty or the pair was already present.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if key.is_empty() {
            return false;
        }
        self.attrs.entry(key).or_default().insert(value.into())
    }

    /// Remove one value. Returns `true` if it was present.
    pub fn discard(&mut self, key: &str, value: &str) -> bool {
        let Some(values) = self.attrs.get_mut(key) else {
            return false;
        };
        let removed = values.remove(value);
        if values.is_empty() {
            self.attrs.remove(key);
        }
        removed
    }

    /// Remove a key with all of its values.
    pub fn clear(&mut self, key: &str) -> bool {
        self.attrs.remove(key).is_some()
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.attrs
            .get(key)
            .map_or(false, |values| values.contains(value))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }

    /// Keys in arbitrary order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }

    /// Values of a key in arbitrary order (empty if the key is missing).
    pub fn values<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> {
        self.attrs
            .get(key)
            .into_iter()
            .flat_map(|values| values.iter().map(String::as_str))
    }

    /// Any one value of a key.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values(key).next()
    }

    /// All `(key, value)` pairs in arbitrary order.
    pub fn items(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().flat_map(|(key, values)| {
            values
                .iter()
                .map(move |value| (key.as_str(), value.as_str()))
        })
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Event holding the pairs of both events.
    pub fn union(&self, other: &Event) -> Event {
        let mut merged = self.clone();
        for (key, value) in other.items() {
            merged.add(key, value);
        }
        merged
    }

    /// Event holding the pairs of `self` that are not in `other`.
    pub fn difference(&self, other: &Event) -> Event {
        self.items()
            .filter(|(key, value)| !other.contains(key, value))
            .collect()
    }

    /// Whether some value satisfies `predicate`, looking only under `key`
    /// or, if `key` is `None`, under every key.
    pub fn contains_where<F>(&self, key: Option<&str>, mut predicate: F) -> bool
    where
        F: FnMut(&str) -> bool,
    {
        match key {
            Some(key) => self.values(key).any(|value| predicate(value)),
            None => self
                .attrs
                .values()
                .flat_map(|values| values.iter())
                .any(|value| predicate(value)),
        }
    }

    fn sorted(&self) -> Vec<(&str, Vec<&str>)> {
        let mut pairs: Vec<(&str, Vec<&str>)> = self
            .attrs
            .iter()
            .map(|(key, values)| {
                let mut values: Vec<&str> = values.iter().map(String::as_str).collect();
                values.sort_unstable();
                (key.as_str(), values)
            })
            .collect();
        pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));
        pairs
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Event {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut event = Event::new();
        for (key, value) in iter {
            event.add(key, value);
        }
        event
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Event {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.add(key, value);
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.sorted()).finish()
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let sorted = self.sorted();
        let mut map = serializer.serialize_map(Some(sorted.len()))?;
        for (key, values) in sorted {
            map.serialize_entry(key, &values)?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

struct EventVisitor;

impl<'de> Visitor<'de> for EventVisitor {
    type Value = Event;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of keys to a string or a list of strings")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Event, A::Error> {
        let mut event = Event::new();
        while let Some((key, values)) = access.next_entry::<String, OneOrMany>()? {
            match values {
                OneOrMany::One(value) => {
                    event.add(key, value);
                }
                OneOrMany::Many(values) => {
                    for value in values {
                        event.add(key.clone(), value);
                    }
                }
            }
        }
        Ok(event)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(EventVisitor)
    }
}
