//! Canonical boolean rules over events.
//!
//! Rules are hash-consed: constructing a rule from the same arguments twice
//! yields the same object, and `And`/`Or` children are flattened,
//! deduplicated and ordered so that operand order does not matter.
//!
//! # Examples
//! ```
//! use ahrules::{Atom, Event, Rule};
//!
//! let malware = Rule::matching(Some("type"), Some(Atom::string("malware")));
//! let local = Rule::matching(Some("ip"), Some(Atom::parse_ip("10.0.0.0/8").unwrap()));
//! let rule = Rule::and([malware.clone(), local.clone()]).unwrap();
//! assert_eq!(rule, Rule::and([local, malware]).unwrap());
//!
//! let event: Event = [("type", "malware"), ("ip", "10.1.2.3")].into_iter().collect();
//! assert!(rule.matches(&event));
//! ```

mod cache;

pub use cache::MatchCache;

use once_cell::sync::Lazy;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use crate::atom::{Atom, AtomKind};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::intern::Interner;

/// The variant and operands of a rule.
#[derive(Debug)]
pub enum RuleKind {
    /// Some value (under `key`, or under any key) is contained in `atom`.
    /// Without an atom, the key (or any key) exists.
    Match {
        key: Option<String>,
        atom: Option<Atom>,
    },
    /// Some value (under `key`, or under any key) is not contained in
    /// `atom`. Without an atom, the key (or any key) exists.
    NonMatch {
        key: Option<String>,
        atom: Option<Atom>,
    },
    And(Vec<Rule>),
    Or(Vec<Rule>),
    No(Rule),
    /// The atom matches some value, or for string atoms some key.
    Fuzzy(Atom),
    Anything,
}

#[derive(PartialEq, Eq, Hash)]
enum RuleKey {
    Match(Option<String>, Option<u64>),
    NonMatch(Option<String>, Option<u64>),
    And(Vec<u64>),
    Or(Vec<u64>),
    No(u64),
    Fuzzy(u64),
    Anything,
}

fn ids(rules: &[Rule]) -> Vec<u64> {
    rules.iter().map(Rule::id).collect()
}

impl RuleKind {
    fn key(&self) -> RuleKey {
        match self {
            RuleKind::Match { key, atom } => RuleKey::Match(key.clone(), atom.as_ref().map(Atom::id)),
            RuleKind::NonMatch { key, atom } => {
                RuleKey::NonMatch(key.clone(), atom.as_ref().map(Atom::id))
            }
            RuleKind::And(children) => RuleKey::And(ids(children)),
            RuleKind::Or(children) => RuleKey::Or(ids(children)),
            RuleKind::No(child) => RuleKey::No(child.id()),
            RuleKind::Fuzzy(atom) => RuleKey::Fuzzy(atom.id()),
            RuleKind::Anything => RuleKey::Anything,
        }
    }

    /// Direct sub-rules, in evaluation order.
    fn operands(&self) -> &[Rule] {
        match self {
            RuleKind::And(children) | RuleKind::Or(children) => children,
            RuleKind::No(child) => std::slice::from_ref(child),
            _ => &[],
        }
    }
}

struct RuleNode {
    id: u64,
    kind: RuleKind,
}

impl RuleNode {
    /// Remove the table entry and hand over the operands.
    ///
    /// The node is left as `Anything`. The real `Anything` is a static
    /// singleton that is never dropped, so a released node is skipped.
    fn release(&mut self) -> Vec<Rule> {
        if matches!(self.kind, RuleKind::Anything) {
            return Vec::new();
        }
        RULES.forget(&self.kind.key());
        match std::mem::replace(&mut self.kind, RuleKind::Anything) {
            RuleKind::And(children) | RuleKind::Or(children) => children,
            RuleKind::No(child) => vec![child],
            _ => Vec::new(),
        }
    }
}

impl Drop for RuleNode {
    fn drop(&mut self) {
        // Operands whose last handle is ours are unlinked here instead of
        // recursing through their own drops.
        let mut pending = self.release();
        while let Some(rule) = pending.pop() {
            if let Some(mut node) = Arc::into_inner(rule.0) {
                pending.append(&mut node.release());
            }
        }
    }
}

static RULES: Lazy<Interner<RuleKey, RuleNode>> = Lazy::new(Interner::new);

static ANYTHING: Lazy<Rule> = Lazy::new(|| Rule::intern(RuleKind::Anything));

#[derive(Clone, Copy, PartialEq, Eq)]
enum Junction {
    And,
    Or,
}

/// A canonical rule.
#[derive(Clone)]
pub struct Rule(Arc<RuleNode>);

impl Rule {
    fn intern(kind: RuleKind) -> Rule {
        Rule(RULES.intern(kind.key(), |id| RuleNode { id, kind }))
    }

    pub fn matching(key: Option<&str>, atom: Option<Atom>) -> Rule {
        Self::intern(RuleKind::Match {
            key: key.map(str::to_string),
            atom,
        })
    }

    pub fn non_matching(key: Option<&str>, atom: Option<Atom>) -> Rule {
        Self::intern(RuleKind::NonMatch {
            key: key.map(str::to_string),
            atom,
        })
    }

    /// Conjunction of one or more rules.
    ///
    /// A single distinct operand is returned as-is.
    pub fn and(rules: impl IntoIterator<Item = Rule>) -> Result<Rule> {
        Self::junction(Junction::And, rules.into_iter().collect())
    }

    /// Disjunction of one or more rules.
    ///
    /// A single distinct operand is returned as-is.
    pub fn or(rules: impl IntoIterator<Item = Rule>) -> Result<Rule> {
        Self::junction(Junction::Or, rules.into_iter().collect())
    }

    /// Conjunction of two rules.
    pub fn both(left: Rule, right: Rule) -> Rule {
        Self::junction_of(Junction::And, vec![left, right])
    }

    /// Disjunction of two rules.
    pub fn either(left: Rule, right: Rule) -> Rule {
        Self::junction_of(Junction::Or, vec![left, right])
    }

    fn junction(junction: Junction, rules: Vec<Rule>) -> Result<Rule> {
        if rules.is_empty() {
            return Err(Error::EmptyOperands(match junction {
                Junction::And => "And",
                Junction::Or => "Or",
            }));
        }
        Ok(Self::junction_of(junction, rules))
    }

    /// Build a flattened, deduplicated junction from a non-empty list.
    fn junction_of(junction: Junction, rules: Vec<Rule>) -> Rule {
        let mut children = Vec::with_capacity(rules.len());
        for rule in rules {
            match (junction, rule.kind()) {
                (Junction::And, RuleKind::And(inner)) | (Junction::Or, RuleKind::Or(inner)) => {
                    children.extend(inner.iter().cloned())
                }
                _ => children.push(rule),
            }
        }
        children.sort();
        children.dedup();

        if children.len() == 1 {
            if let Some(only) = children.pop() {
                return only;
            }
        }
        Self::intern(match junction {
            Junction::And => RuleKind::And(children),
            Junction::Or => RuleKind::Or(children),
        })
    }

    pub fn no(rule: Rule) -> Rule {
        Self::intern(RuleKind::No(rule))
    }

    pub fn fuzzy(atom: Atom) -> Rule {
        Self::intern(RuleKind::Fuzzy(atom))
    }

    /// The rule matching every event.
    pub fn anything() -> Rule {
        ANYTHING.clone()
    }

    /// Process-wide unique id of this rule.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn kind(&self) -> &RuleKind {
        &self.0.kind
    }

    pub fn ptr_eq(a: &Rule, b: &Rule) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Binding strength used when formatting: `Or` binds loosest.
    pub fn precedence(&self) -> u8 {
        match self.kind() {
            RuleKind::Or(_) => 0,
            RuleKind::And(_) => 1,
            RuleKind::No(_) => 2,
            RuleKind::Match { .. } | RuleKind::NonMatch { .. } => 3,
            RuleKind::Fuzzy(_) | RuleKind::Anything => 4,
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.matches_with_cache(event, &mut MatchCache::new())
    }

    /// Evaluate against `event`, reusing and filling `cache`.
    ///
    /// Sub-rules are walked with an explicit stack, so nesting depth costs
    /// heap rather than host stack.
    pub fn matches_with_cache(&self, event: &Event, cache: &mut MatchCache) -> bool {
        // (junction or negation, index of the next operand)
        let mut stack: Vec<(&Rule, usize)> = Vec::new();
        let mut current = self;

        loop {
            let mut result = match cache.get(current) {
                Some(result) => result,
                None => match current.kind().operands().first() {
                    Some(first) => {
                        stack.push((current, 1));
                        current = first;
                        continue;
                    }
                    None => {
                        let result = leaf_matches(current.kind(), event);
                        cache.insert(current, result);
                        result
                    }
                },
            };

            loop {
                let Some((parent, next)) = stack.last_mut() else {
                    return result;
                };
                let parent: &Rule = *parent;
                let operands = parent.kind().operands();
                let settled = match parent.kind() {
                    RuleKind::And(_) => !result,
                    RuleKind::Or(_) => result,
                    _ => false,
                };
                if !settled && *next < operands.len() {
                    current = &operands[*next];
                    *next += 1;
                    break;
                }

                if matches!(parent.kind(), RuleKind::No(_)) {
                    result = !result;
                }
                cache.insert(parent, result);
                stack.pop();
            }
        }
    }
}

/// Result of a rule without operands.
fn leaf_matches(kind: &RuleKind, event: &Event) -> bool {
    match kind {
        RuleKind::Match { key, atom } => match atom {
            Some(atom) => event.contains_where(key.as_deref(), |value| atom.contains(value)),
            None => has_key(event, key.as_deref()),
        },
        RuleKind::NonMatch { key, atom } => match atom {
            Some(atom) => event.contains_where(key.as_deref(), |value| !atom.contains(value)),
            None => has_key(event, key.as_deref()),
        },
        RuleKind::Fuzzy(atom) => {
            let keys = matches!(atom.kind(), AtomKind::String(_))
                && event.keys().any(|key| atom.matches(key));
            keys || event.contains_where(None, |value| atom.matches(value))
        }
        RuleKind::Anything => true,
        RuleKind::And(_) | RuleKind::Or(_) | RuleKind::No(_) => false,
    }
}

fn has_key(event: &Event, key: Option<&str>) -> bool {
    match key {
        Some(key) => event.contains_key(key),
        None => !event.is_empty(),
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Rule {}

impl Hash for Rule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl PartialOrd for Rule {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rule {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::rulelang::format(self))
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rule({:?})", crate::rulelang::format(self))
    }
}

impl FromStr for Rule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        crate::rulelang::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(key: &str, value: &str) -> Rule {
        Rule::matching(Some(key), Some(Atom::string(value)))
    }

    fn event(pairs: &[(&str, &str)]) -> Event {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_canonical_identity() {
        let a = eq("ip", "1.2.3.4");
        let b = eq("ip", "1.2.3.4");
        assert!(Rule::ptr_eq(&a, &b));
        assert_ne!(a, eq("ip", "1.2.3.5"));
        assert!(Rule::ptr_eq(&Rule::anything(), &Rule::anything()));
        assert!(Rule::ptr_eq(&Rule::no(a.clone()), &Rule::no(b)));
    }

    #[test]
    fn test_junctions_are_commutative_and_idempotent() {
        let a = eq("a", "1");
        let b = eq("b", "2");

        assert_eq!(Rule::both(a.clone(), b.clone()), Rule::both(b.clone(), a.clone()));
        assert_eq!(Rule::either(a.clone(), b.clone()), Rule::either(b.clone(), a.clone()));
        assert_eq!(Rule::both(a.clone(), a.clone()), Rule::and([a.clone()]).unwrap());
        assert_eq!(Rule::and([a.clone()]).unwrap(), a);
        assert_eq!(Rule::or([a.clone(), a.clone()]).unwrap(), a);
        assert_ne!(Rule::both(a.clone(), b.clone()), Rule::either(a, b));
    }

    #[test]
    fn test_junctions_flatten() {
        let a = eq("a", "1");
        let b = eq("b", "2");
        let c = eq("c", "3");

        let nested = Rule::both(a.clone(), Rule::both(b.clone(), c.clone()));
        let flat = Rule::and([a.clone(), b.clone(), c.clone()]).unwrap();
        assert_eq!(nested, flat);
        match flat.kind() {
            RuleKind::And(children) => assert_eq!(children.len(), 3),
            _ => panic!("expected And"),
        }

        // Or inside And stays nested
        let mixed = Rule::both(a.clone(), Rule::either(b, c));
        match mixed.kind() {
            RuleKind::And(children) => assert_eq!(children.len(), 2),
            _ => panic!("expected And"),
        }
    }

    #[test]
    fn test_empty_junction_is_an_error() {
        assert!(matches!(Rule::and(Vec::<Rule>::new()), Err(Error::EmptyOperands("And"))));
        assert!(matches!(Rule::or(Vec::<Rule>::new()), Err(Error::EmptyOperands("Or"))));
    }

    #[test]
    fn test_match() {
        let e = event(&[("a", "b"), ("c", "d")]);
        assert!(eq("a", "B").matches(&e));
        assert!(!eq("a", "d").matches(&e));
        assert!(Rule::matching(None, Some(Atom::string("d"))).matches(&e));
        assert!(Rule::matching(Some("a"), None).matches(&e));
        assert!(!Rule::matching(Some("x"), None).matches(&e));
        assert!(Rule::matching(None, None).matches(&e));
        assert!(!Rule::matching(None, None).matches(&Event::new()));
    }

    #[test]
    fn test_non_match_is_per_value() {
        let both = event(&[("k", "a"), ("k", "b")]);
        let m = eq("k", "a");
        let nm = Rule::non_matching(Some("k"), Some(Atom::string("a")));

        // One value matches, another does not: both hold at once
        assert!(m.matches(&both));
        assert!(nm.matches(&both));
        assert!(!Rule::no(m.clone()).matches(&both));

        let others = event(&[("k", "b"), ("k", "c")]);
        assert!(!m.matches(&others));
        assert!(nm.matches(&others));

        let missing = event(&[("x", "y")]);
        assert!(!m.matches(&missing));
        assert!(!nm.matches(&missing));
        assert!(Rule::no(m).matches(&missing));
    }

    #[test]
    fn test_fuzzy() {
        let e = event(&[("Host", "mail.example.com")]);
        assert!(Rule::fuzzy(Atom::string("host")).matches(&e));
        assert!(Rule::fuzzy(Atom::string("MAIL.example.com")).matches(&e));
        assert!(!Rule::fuzzy(Atom::regexp("^Ho", false).unwrap()).matches(&e));
        assert!(Rule::fuzzy(Atom::regexp("^mail", false).unwrap()).matches(&e));

        let wildcard = Rule::fuzzy(Atom::parse_domain_name("*.example.com").unwrap());
        assert!(wildcard.matches(&e));
        assert!(!wildcard.matches(&event(&[("host", "example.com")])));
    }

    #[test]
    fn test_match_uses_containment() {
        let net = Rule::matching(Some("ip"), Some(Atom::parse_ip("192.0.2.0/24").unwrap()));
        assert!(net.matches(&event(&[("ip", "192.0.2.200")])));
        assert!(!net.matches(&event(&[("ip", "198.51.100.1")])));

        let domain = Rule::matching(
            Some("host"),
            Some(Atom::parse_domain_name("example.com").unwrap()),
        );
        assert!(domain.matches(&event(&[("host", "deep.sub.example.com")])));
    }

    #[test]
    fn test_cache_is_filled() {
        let a = eq("a", "1");
        let rule = Rule::both(a.clone(), Rule::no(a.clone()));
        let mut cache = MatchCache::new();
        assert!(!rule.matches_with_cache(&event(&[("a", "1")]), &mut cache));
        assert_eq!(cache.get(&a), Some(true));
        assert_eq!(cache.get(&rule), Some(false));
    }

    #[test]
    fn test_deep_negation_matches_and_drops() {
        let leaf = eq("deep-drop", "1");
        let leaf_id = leaf.id();

        let mut rule = leaf;
        for _ in 0..100_000 {
            rule = Rule::no(rule);
        }
        assert!(rule.matches(&event(&[("deep-drop", "1")])));
        assert!(!rule.matches(&event(&[("deep-drop", "2")])));

        drop(rule);
        assert_ne!(eq("deep-drop", "1").id(), leaf_id);
    }

    #[test]
    fn test_deep_junctions_match_like_their_operands() {
        let e = event(&[("a", "0"), ("b", "3"), ("a", "10")]);
        let mut rule = eq("a", "1");
        let mut expected = false;

        for i in 0..20_000 {
            let leaf = eq(if i % 2 == 0 { "a" } else { "b" }, &i.to_string());
            let hit = leaf.matches(&e);
            if i % 2 == 0 {
                rule = Rule::both(rule, leaf);
                expected = expected && hit;
            } else {
                rule = Rule::either(rule, leaf);
                expected = expected || hit;
            }
        }
        assert_eq!(rule.matches(&e), expected);

        let mut cache = MatchCache::new();
        assert_eq!(rule.matches_with_cache(&e, &mut cache), expected);
        assert_eq!(cache.get(&rule), Some(expected));
    }

    #[test]
    fn test_shared_operands_survive_drop() {
        let shared = Rule::no(eq("shared", "1"));
        let outer = Rule::both(shared.clone(), eq("other", "2"));
        drop(outer);
        assert!(shared.matches(&event(&[("shared", "2")])));
        assert!(Rule::ptr_eq(&shared, &Rule::no(eq("shared", "1"))));
    }

    #[test]
    fn test_precedence() {
        let a = eq("a", "1");
        let b = eq("b", "2");
        assert_eq!(Rule::either(a.clone(), b.clone()).precedence(), 0);
        assert_eq!(Rule::both(a.clone(), b).precedence(), 1);
        assert_eq!(Rule::no(a.clone()).precedence(), 2);
        assert_eq!(a.precedence(), 3);
        assert_eq!(Rule::anything().precedence(), 4);
    }
}
