//! Routing of events from source rooms to destination rooms.
//!
//! Each source room owns a [`Classifier`] mapping rules to destination
//! rooms. A session `(src, dst, rule)` registers `dst` for `rule` in the
//! classifier of `src`.

mod config;

pub use config::{RoomGraphConfig, Session};

use ahash::AHashMap;

use crate::classifier::Classifier;
use crate::event::Event;
use crate::rule::Rule;

/// Per-room event counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomStats {
    /// Events received from the room as a source
    pub seen: u64,
    /// Events routed to the room as a destination
    pub sent: u64,
}

/// Classifiers keyed by source room, plus routing statistics.
#[derive(Debug, Default)]
pub struct RoomGraph {
    sources: AHashMap<String, Classifier<String>>,
    stats: AHashMap<String, RoomStats>,
}

impl RoomGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph with every session of `config` subscribed.
    pub fn from_config(config: &RoomGraphConfig) -> Self {
        let mut graph = Self::new();
        graph.apply(config);
        graph
    }

    /// Subscribe every session of `config`. Returns the number of sessions.
    pub fn apply(&mut self, config: &RoomGraphConfig) -> usize {
        for session in config.sessions() {
            self.subscribe(&session.src, &session.dst, Some(session.rule.clone()));
        }
        config.len()
    }

    /// Route events from `src` matching `rule` to `dst`.
    ///
    /// A missing rule routes everything.
    pub fn subscribe(&mut self, src: &str, dst: &str, rule: Option<Rule>) {
        let rule = rule.unwrap_or_else(Rule::anything);
        self.sources
            .entry(src.to_string())
            .or_default()
            .inc(rule, dst.to_string());
    }

    /// Undo one matching [`subscribe`](Self::subscribe).
    ///
    /// The source's classifier is dropped once it has no rules left.
    pub fn unsubscribe(&mut self, src: &str, dst: &str, rule: Option<&Rule>) {
        let Some(classifier) = self.sources.get_mut(src) else {
            return;
        };
        let anything = Rule::anything();
        classifier.dec(rule.unwrap_or(&anything), &dst.to_string());
        if classifier.is_empty() {
            self.sources.remove(src);
        }
    }

    /// Destination rooms of an event received from `src`, sorted.
    pub fn route(&mut self, src: &str, event: &Event) -> Vec<String> {
        self.stats.entry(src.to_string()).or_default().seen += 1;

        let Some(classifier) = self.sources.get(src) else {
            return Vec::new();
        };
        let mut destinations: Vec<String> = classifier.classify(event).into_iter().collect();
        destinations.sort();

        for dst in &destinations {
            self.stats.entry(dst.clone()).or_default().sent += 1;
        }
        destinations
    }

    /// Whether any session reads from `room`.
    pub fn is_source(&self, room: &str) -> bool {
        self.sources.contains_key(room)
    }

    /// Source rooms, sorted.
    pub fn sources(&self) -> Vec<&str> {
        let mut rooms: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        rooms.sort_unstable();
        rooms
    }

    /// Return and reset the counters, sorted by room.
    pub fn take_stats(&mut self) -> Vec<(String, RoomStats)> {
        let mut stats: Vec<(String, RoomStats)> = self.stats.drain().collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));

        for (room, counts) in &stats {
            log::info!(
                "Room {:?}: seen {}, sent {} events",
                room,
                counts.seen,
                counts.sent
            );
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rulelang::parse;

    fn event(pairs: &[(&str, &str)]) -> Event {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_route_sorted_destinations() {
        let mut graph = RoomGraph::new();
        graph.subscribe("in", "zeta", None);
        graph.subscribe("in", "alpha", Some(parse("type=malware").unwrap()));
        graph.subscribe("in", "beta", Some(parse("type=spam").unwrap()));

        let rooms = graph.route("in", &event(&[("type", "malware")]));
        assert_eq!(rooms, vec!["alpha".to_string(), "zeta".to_string()]);

        assert!(graph.route("elsewhere", &event(&[("type", "malware")])).is_empty());
    }

    #[test]
    fn test_unsubscribe_drops_empty_sources() {
        let rule = parse("a=1").unwrap();
        let mut graph = RoomGraph::new();
        graph.subscribe("in", "out", Some(rule.clone()));
        graph.subscribe("in", "out", None);
        assert!(graph.is_source("in"));

        graph.unsubscribe("in", "out", Some(&rule));
        assert!(graph.is_source("in"));
        graph.unsubscribe("in", "out", None);
        assert!(!graph.is_source("in"));
        assert!(graph.sources().is_empty());

        graph.unsubscribe("in", "out", None);
        assert!(!graph.is_source("in"));
    }

    #[test]
    fn test_stats_are_counted_and_reset() {
        let mut graph = RoomGraph::new();
        graph.subscribe("in", "out", Some(parse("a=1").unwrap()));

        graph.route("in", &event(&[("a", "1")]));
        graph.route("in", &event(&[("a", "2")]));
        graph.route("other", &event(&[("a", "1")]));

        let stats = graph.take_stats();
        assert_eq!(
            stats,
            vec![
                ("in".to_string(), RoomStats { seen: 2, sent: 0 }),
                ("other".to_string(), RoomStats { seen: 1, sent: 0 }),
                ("out".to_string(), RoomStats { seen: 0, sent: 1 }),
            ]
        );
        assert!(graph.take_stats().is_empty());
    }

    #[test]
    fn test_sources_sorted() {
        let mut graph = RoomGraph::new();
        graph.subscribe("b", "x", None);
        graph.subscribe("a", "x", None);
        assert_eq!(graph.sources(), vec!["a", "b"]);
    }
}
