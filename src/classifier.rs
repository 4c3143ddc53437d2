//! Reference-counted mapping of rules to destinations.

use ahash::{AHashMap, AHashSet};
use std::hash::Hash;

use crate::event::Event;
use crate::rule::{MatchCache, Rule};

/// Registry of `rule -> {destination -> count}`.
///
/// The same `(rule, destination)` pair may be registered several times;
/// it stays active until it has been unregistered as many times.
///
/// # Examples
/// ```
/// use ahrules::{rulelang, Classifier, Event};
///
/// let mut classifier = Classifier::new();
/// classifier.inc(rulelang::parse("type=malware").unwrap(), "customer-a");
/// classifier.inc(rulelang::parse("type=spam").unwrap(), "customer-b");
///
/// let event: Event = [("type", "malware")].into_iter().collect();
/// let classes = classifier.classify(&event);
/// assert_eq!(classes.len(), 1);
/// assert!(classes.contains("customer-a"));
/// ```
#[derive(Debug)]
pub struct Classifier<D> {
    rules: AHashMap<Rule, AHashMap<D, usize>>,
}

impl<D: Eq + Hash + Clone> Classifier<D> {
    pub fn new() -> Self {
        Self {
            rules: AHashMap::new(),
        }
    }

    /// Register `destination` for `rule` once more.
    pub fn inc(&mut self, rule: Rule, destination: D) {
        *self
            .rules
            .entry(rule)
            .or_default()
            .entry(destination)
            .or_insert(0) += 1;
    }

    /// Drop one registration of `destination` for `rule`.
    ///
    /// Unknown pairs are ignored.
    pub fn dec(&mut self, rule: &Rule, destination: &D) {
        let Some(destinations) = self.rules.get_mut(rule) else {
            return;
        };
        if let Some(count) = destinations.get_mut(destination) {
            *count -= 1;
            if *count == 0 {
                destinations.remove(destination);
            }
        }
        if destinations.is_empty() {
            self.rules.remove(rule);
        }
    }

    /// Destinations of every rule matching `event`.
    pub fn classify(&self, event: &Event) -> AHashSet<D> {
        let mut result = AHashSet::new();
        let mut cache = MatchCache::new();

        for (rule, destinations) in &self.rules {
            if destinations.keys().all(|d| result.contains(d)) {
                continue;
            }
            if rule.matches_with_cache(event, &mut cache) {
                result.extend(destinations.keys().cloned());
            }
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of distinct registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Current registration count of a pair.
    pub fn count(&self, rule: &Rule, destination: &D) -> usize {
        self.rules
            .get(rule)
            .and_then(|destinations| destinations.get(destination))
            .copied()
            .unwrap_or(0)
    }

    /// Registered rules in arbitrary order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.keys()
    }
}

impl<D: Eq + Hash + Clone> Default for Classifier<D> {
    fn default() -> Self {
        Self::new()
    }
}
