//! Per-evaluation memo of rule results.

use ahash::AHashMap;

use super::Rule;

/// Results of rules already evaluated against one event.
///
/// Canonical rules share sub-rules, so a cache reused across the rules of
/// one classification evaluates every shared node once.
#[derive(Debug, Default)]
pub struct MatchCache {
    results: AHashMap<u64, bool>,
}

impl MatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, rule: &Rule) -> Option<bool> {
        self.results.get(&rule.id()).copied()
    }

    pub fn insert(&mut self, rule: &Rule, result: bool) {
        self.results.insert(rule.id(), result);
    }

    /// Number of cached results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
