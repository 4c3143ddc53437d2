//! ahrules - rule language, classifier and room router for abuse-report events.
//!
//! Events are multi-valued key/value records. Rules are boolean expressions
//! over events, written in a small text language and compiled into canonical,
//! interned objects: two rules that are structurally equal are the same
//! object, so they compare and hash by identity.
//!
//! # Features
//!
//! - **Rule language**: `ip in 10.0.0.0/8 and no type=spam`, parsed and
//!   formatted losslessly
//! - **Atoms**: case-insensitive strings, regular expressions, IPv4/IPv6
//!   ranges and domain name patterns
//! - **Classifier**: reference-counted rule to destination registry
//! - **Room graph**: per-source classifiers routing events between rooms
//! - **Structured form**: serde encoding of atoms and rules
//! - **Thread-safe interning**: rules and atoms are `Send + Sync`
//!
//! # Quick Start
//!
//! ```
//! use ahrules::{rulelang, Classifier, Event};
//!
//! let rule = rulelang::parse("ip in 192.0.2.0/24 and no type=test").unwrap();
//!
//! let mut event = Event::new();
//! event.add("ip", "192.0.2.200");
//! event.add("type", "malware");
//! assert!(rule.matches(&event));
//!
//! let mut classifier = Classifier::new();
//! classifier.inc(rule, "customer");
//! assert!(classifier.classify(&event).contains("customer"));
//! ```
//!
//! # Rule Language
//!
//! | Form | Meaning |
//! |------|---------|
//! | `key=value`, `key!=value` | some / no value of `key` equals `value` |
//! | `key=/re/i` | a value of `key` contains a match of `re` |
//! | `key in 10.0.0.0/8`, `key not in *.example.com` | IP range or domain containment |
//! | `*=value`, `key=*`, `*` | wildcards |
//! | `value`, `/re/`, `10.0.0.1`, `*.example.com` | fuzzy match against any value |
//! | `no r`, `a and b`, `a or b`, `(r)` | boolean structure |

mod error;
mod intern;

pub mod atom;
pub mod classifier;
pub mod compat;
pub mod event;
pub mod parsing;
pub mod roomgraph;
pub mod rule;
pub mod rulelang;
pub mod serialize;

// Re-export core types
pub use error::{
    DomainNameError, Error, IpRangeError, ParserError, RegexAtomError, Result,
};
pub use event::Event;

// Re-export atoms and rules
pub use atom::{Atom, AtomKind, DomainNamePattern, IpRange, IpVersion, RegexFlags};
pub use rule::{MatchCache, Rule, RuleKind};

// Re-export the rule language entry points
pub use rulelang::{format, parse, rule};

// Re-export routing
pub use classifier::Classifier;
pub use roomgraph::{RoomGraph, RoomGraphConfig, RoomStats, Session};
