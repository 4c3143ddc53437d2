//! Structured serialized form of atoms and rules.
//!
//! Every variant is tagged with a short stable name:
//!
//! | tag | variant | payload |
//! |-----|---------|---------|
//! | `rs` | string atom | value |
//! | `rr` | regexp atom | `[pattern, ignore_case]` |
//! | `ri` | IP atom | range text |
//! | `rd` | domain atom | pattern text |
//! | `rm` / `rnm` | Match / NonMatch | `[key, atom]` (`null` for `*`) |
//! | `ra` / `ro` | And / Or | list of rules |
//! | `rn` | No | rule |
//! | `rf` | Fuzzy | atom |
//! | `r*` | Anything | |
//!
//! Decoding goes through the canonical constructors, so decoded objects
//! are identical to ones built directly. Use [`from_json_str`] for JSON
//! text: it lifts serde_json's nesting limit of 128 levels.

use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::atom::{Atom, AtomKind};
use crate::rule::{Rule, RuleKind};

#[derive(Serialize)]
enum AtomRef<'a> {
    #[serde(rename = "rs")]
    String(&'a str),
    #[serde(rename = "rr")]
    RegExp(&'a str, bool),
    #[serde(rename = "ri")]
    Ip(String),
    #[serde(rename = "rd")]
    DomainName(String),
}

#[derive(Deserialize)]
enum AtomRepr {
    #[serde(rename = "rs")]
    String(String),
    #[serde(rename = "rr")]
    RegExp(String, bool),
    #[serde(rename = "ri")]
    Ip(String),
    #[serde(rename = "rd")]
    DomainName(String),
}

impl Serialize for Atom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match self.kind() {
            AtomKind::String(value) => AtomRef::String(value),
            AtomKind::RegExp(re) => AtomRef::RegExp(re.pattern(), re.ignore_case()),
            AtomKind::Ip(range) => AtomRef::Ip(range.to_string()),
            AtomKind::DomainName(pattern) => AtomRef::DomainName(pattern.to_string()),
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Atom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let atom = match AtomRepr::deserialize(deserializer)? {
            AtomRepr::String(value) => Atom::string(value),
            AtomRepr::RegExp(pattern, ignore_case) => {
                Atom::regexp(&pattern, ignore_case).map_err(D::Error::custom)?
            }
            AtomRepr::Ip(range) => Atom::parse_ip(&range).map_err(D::Error::custom)?,
            AtomRepr::DomainName(pattern) => {
                Atom::parse_domain_name(&pattern).map_err(D::Error::custom)?
            }
        };
        Ok(atom)
    }
}

#[derive(Serialize)]
enum RuleRef<'a> {
    #[serde(rename = "rm")]
    Match(Option<&'a str>, Option<&'a Atom>),
    #[serde(rename = "rnm")]
    NonMatch(Option<&'a str>, Option<&'a Atom>),
    #[serde(rename = "ra")]
    And(&'a [Rule]),
    #[serde(rename = "ro")]
    Or(&'a [Rule]),
    #[serde(rename = "rn")]
    No(&'a Rule),
    #[serde(rename = "rf")]
    Fuzzy(&'a Atom),
    #[serde(rename = "r*")]
    Anything,
}

#[derive(Deserialize)]
enum RuleRepr {
    #[serde(rename = "rm")]
    Match(Option<String>, Option<Atom>),
    #[serde(rename = "rnm")]
    NonMatch(Option<String>, Option<Atom>),
    #[serde(rename = "ra")]
    And(Vec<Rule>),
    #[serde(rename = "ro")]
    Or(Vec<Rule>),
    #[serde(rename = "rn")]
    No(Rule),
    #[serde(rename = "rf")]
    Fuzzy(Atom),
    #[serde(rename = "r*")]
    Anything,
}

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match self.kind() {
            RuleKind::Match { key, atom } => RuleRef::Match(key.as_deref(), atom.as_ref()),
            RuleKind::NonMatch { key, atom } => RuleRef::NonMatch(key.as_deref(), atom.as_ref()),
            RuleKind::And(children) => RuleRef::And(children),
            RuleKind::Or(children) => RuleRef::Or(children),
            RuleKind::No(child) => RuleRef::No(child),
            RuleKind::Fuzzy(atom) => RuleRef::Fuzzy(atom),
            RuleKind::Anything => RuleRef::Anything,
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rule = match RuleRepr::deserialize(deserializer)? {
            RuleRepr::Match(key, atom) => Rule::matching(key.as_deref(), atom),
            RuleRepr::NonMatch(key, atom) => Rule::non_matching(key.as_deref(), atom),
            RuleRepr::And(children) => Rule::and(children).map_err(D::Error::custom)?,
            RuleRepr::Or(children) => Rule::or(children).map_err(D::Error::custom)?,
            RuleRepr::No(child) => Rule::no(child),
            RuleRepr::Fuzzy(atom) => Rule::fuzzy(atom),
            RuleRepr::Anything => Rule::anything(),
        };
        Ok(rule)
    }
}

/// Decode JSON text of any nesting depth.
///
/// The recursion limit is disabled and the stack grows on demand instead.
pub fn from_json_str<T: DeserializeOwned>(text: &str) -> serde_json::Result<T> {
    let mut deserializer = serde_json::Deserializer::from_str(text);
    deserializer.disable_recursion_limit();
    let value = T::deserialize(serde_stacker::Deserializer::new(&mut deserializer))?;
    deserializer.end()?;
    Ok(value)
}

/// Decode an already parsed JSON value of any nesting depth.
pub fn from_json_value<T: DeserializeOwned>(value: serde_json::Value) -> serde_json::Result<T> {
    T::deserialize(serde_stacker::Deserializer::new(value))
}
