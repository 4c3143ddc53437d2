//! The rule language.
//!
//! ```text
//! ip in 10.0.0.0/8 and type=malware
//! no (a=b or c=d)
//! *.evil.example
//! url=/login\.php/i
//! ```
//!
//! Operators from loosest to tightest: `or`, `and`, `no`, then the match
//! operators `=`, `!=`, `in` and `not in`. Keywords are case-insensitive.
//! Strings are bare tokens or JSON-style double-quoted strings.

mod format;
mod grammar;

pub use format::format;

use once_cell::sync::Lazy;

use crate::error::{Error, ParserError, Result};
use crate::parsing::Parser;
use crate::rule::Rule;

static EXPRESSION: Lazy<std::result::Result<Parser<Rule>, ParserError>> =
    Lazy::new(grammar::expression);

/// Parse rule language text.
///
/// The whole input has to be consumed; otherwise the error carries the
/// original text.
///
/// # Examples
/// ```
/// use ahrules::{rulelang, Event};
///
/// let rule = rulelang::parse("ip=10.0.0.1 and asn=64512").unwrap();
/// let event: Event = [("ip", "10.0.0.1"), ("asn", "64512")].into_iter().collect();
/// assert!(rule.matches(&event));
///
/// assert!(rulelang::parse("a=b and").is_err());
/// ```
pub fn parse(text: &str) -> Result<Rule> {
    let parser = EXPRESSION.as_ref().map_err(|e| Error::Parser(e.clone()))?;
    match parser.parse(text)? {
        Some((rule, "")) => Ok(rule),
        _ => Err(Error::Parse(text.to_string())),
    }
}

/// Values that can be turned into a rule: rules and rule text.
pub trait IntoRule {
    fn into_rule(self) -> Result<Rule>;
}

impl IntoRule for Rule {
    fn into_rule(self) -> Result<Rule> {
        Ok(self)
    }
}

impl IntoRule for &Rule {
    fn into_rule(self) -> Result<Rule> {
        Ok(self.clone())
    }
}

impl IntoRule for &str {
    fn into_rule(self) -> Result<Rule> {
        parse(self)
    }
}

impl IntoRule for String {
    fn into_rule(self) -> Result<Rule> {
        parse(&self)
    }
}

impl IntoRule for &String {
    fn into_rule(self) -> Result<Rule> {
        parse(self)
    }
}

/// Rule from either an existing rule (returned as-is) or rule text.
pub fn rule(obj: impl IntoRule) -> Result<Rule> {
    obj.into_rule()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;
    use crate::event::Event;

    fn event(pairs: &[(&str, &str)]) -> Event {
        pairs.iter().copied().collect()
    }

    fn eq(key: &str, value: &str) -> Rule {
        Rule::matching(Some(key), Some(Atom::string(value)))
    }

    fn roundtrip(text: &str) {
        let rule = parse(text).unwrap();
        let formatted = format(&rule);
        assert_eq!(parse(&formatted).unwrap(), rule, "{} -> {}", text, formatted);
    }

    #[test]
    fn test_match_forms() {
        assert_eq!(parse("a=b").unwrap(), eq("a", "b"));
        assert_eq!(parse("a == b").unwrap(), eq("a", "b"));
        assert_eq!(parse("  a = b  ").unwrap(), eq("a", "b"));
        assert_eq!(parse(r#""a key"="a value""#).unwrap(), eq("a key", "a value"));
        assert_eq!(
            parse("a!=b").unwrap(),
            Rule::non_matching(Some("a"), Some(Atom::string("b")))
        );
        assert_eq!(parse("*=b").unwrap(), Rule::matching(None, Some(Atom::string("b"))));
        assert_eq!(parse("a=*").unwrap(), Rule::matching(Some("a"), None));
        assert_eq!(parse("*").unwrap(), Rule::anything());
        assert_eq!(
            parse("a=/b+/i").unwrap(),
            Rule::matching(Some("a"), Some(Atom::regexp("b+", true).unwrap()))
        );
    }

    #[test]
    fn test_in_forms() {
        let net = Atom::parse_ip("10.0.0.0/8").unwrap();
        assert_eq!(
            parse("ip in 10.0.0.0/8").unwrap(),
            Rule::matching(Some("ip"), Some(net.clone()))
        );
        assert_eq!(
            parse("ip NOT IN 10.0.0.0 / 8").unwrap(),
            Rule::non_matching(Some("ip"), Some(net))
        );
        assert_eq!(
            parse("host in *.example.com").unwrap(),
            Rule::matching(
                Some("host"),
                Some(Atom::parse_domain_name("*.example.com").unwrap())
            )
        );
    }

    #[test]
    fn test_fuzzy_forms() {
        assert_eq!(parse("foo").unwrap(), Rule::fuzzy(Atom::string("foo")));
        assert_eq!(parse(r#""10.0.0.1""#).unwrap(), Rule::fuzzy(Atom::string("10.0.0.1")));
        assert_eq!(
            parse("10.0.0.1").unwrap(),
            Rule::fuzzy(Atom::parse_ip("10.0.0.1").unwrap())
        );
        assert_eq!(
            parse("2001:db8::/32").unwrap(),
            Rule::fuzzy(Atom::parse_ip("2001:db8::/32").unwrap())
        );
        assert_eq!(
            parse("*.example.com").unwrap(),
            Rule::fuzzy(Atom::parse_domain_name("*.example.com").unwrap())
        );
        assert_eq!(
            parse("/a b/").unwrap(),
            Rule::fuzzy(Atom::regexp("a b", false).unwrap())
        );
    }

    #[test]
    fn test_precedence() {
        let a = eq("a", "1");
        let b = eq("b", "2");
        let c = eq("c", "3");

        assert_eq!(
            parse("a=1 or b=2 and c=3").unwrap(),
            Rule::either(a.clone(), Rule::both(b.clone(), c.clone()))
        );
        assert_eq!(
            parse("(a=1 or b=2) and c=3").unwrap(),
            Rule::both(Rule::either(a.clone(), b.clone()), c.clone())
        );
        assert_eq!(
            parse("no a=1 and b=2").unwrap(),
            Rule::both(Rule::no(a.clone()), b.clone())
        );
        assert_eq!(
            parse("no (a=1 and b=2)").unwrap(),
            Rule::no(Rule::both(a.clone(), b.clone()))
        );
        assert_eq!(
            parse("a=1 AND b=2 And c=3").unwrap(),
            Rule::and([a, b, c]).unwrap()
        );
    }

    #[test]
    fn test_keyword_spacing() {
        assert!(parse("(a=1)and(b=2)").is_ok());
        assert!(parse("no(a=1)").is_ok());
        assert!(parse("a=1 andb=2").is_err());
        assert!(parse("a=1 and").is_err());
        assert_eq!(parse("noise").unwrap(), Rule::fuzzy(Atom::string("noise")));
        assert_eq!(parse("android=1").unwrap(), eq("android", "1"));
    }

    #[test]
    fn test_parse_errors_carry_the_text() {
        for text in ["", "a=", "(a=1", "a=1)", "a in example", "ip in 10.0.0.0/33", "/(/"] {
            match parse(text) {
                Err(Error::Parse(reported)) => assert_eq!(reported, text),
                other => panic!("{:?} parsed as {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_no_nesting_beyond_recursion_limits() {
        let depth = 2 * 1000;
        let text = format!("{}a=1", "no ".repeat(depth));
        let mut rule = parse(&text).unwrap();

        let mut count = 0;
        loop {
            let next = match rule.kind() {
                crate::rule::RuleKind::No(child) => child.clone(),
                _ => break,
            };
            rule = next;
            count += 1;
        }
        assert_eq!(count, depth);
        assert_eq!(rule, eq("a", "1"));
    }

    #[test]
    fn test_deep_rules_match_format_and_drop() {
        let depth = 100_000;
        let text = format!("{}deep=1", "no ".repeat(depth));
        let rule = parse(&text).unwrap();

        assert!(rule.matches(&event(&[("deep", "1")])));
        assert!(!rule.matches(&event(&[("deep", "2")])));
        assert_eq!(parse(&format(&rule)).unwrap(), rule);

        let leaf_id = eq("deep", "1").id();
        drop(rule);
        assert_ne!(eq("deep", "1").id(), leaf_id);
    }

    #[test]
    fn test_unicode_whitespace_between_tokens() {
        assert_eq!(
            parse("a=1\u{a0}and\u{2003}b=2").unwrap(),
            parse("a=1 and b=2").unwrap()
        );
        assert_eq!(parse("\u{3000}no\u{a0}a=1\u{a0}").unwrap(), Rule::no(eq("a", "1")));
    }

    #[test]
    fn test_parens_nesting_beyond_recursion_limits() {
        let depth = 2 * 1000;
        let text = format!("{}a=1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(parse(&text).unwrap(), eq("a", "1"));
    }

    #[test]
    fn test_roundtrips() {
        for text in [
            "a=b",
            "a!=b",
            "*=*",
            "*!=x",
            "a=*",
            "*",
            "foo",
            "\"\"",
            "\"and\"",
            "\"10.0.0.1\"",
            "\"example.com\"",
            "key=\"with space\"",
            "\"a\\\"q\"=\"\\u00e4\"",
            "a=/x\\/y/i",
            "/a\\/b/",
            "ip in 192.0.2.0/24",
            "ip not in 192.0.2.1-192.0.2.5",
            "ip in ::1",
            "host in example.com",
            "*.example.com",
            "example.com",
            "10.0.0.0/8",
            "no a=1",
            "no no a=1",
            "no (a=1 or b=2)",
            "(a=1 or b=2) and no c=3",
            "a=1 or b=2 and c=3 or no *",
            "*=1 and * and foo",
        ] {
            roundtrip(text);
        }
    }

    #[test]
    fn test_rule_accepts_rules_and_text() {
        let r = eq("a", "b");
        assert_eq!(rule(&r).unwrap(), r);
        assert_eq!(rule(r.clone()).unwrap(), r);
        assert_eq!(rule("a=b").unwrap(), r);
        assert_eq!(rule(String::from("a = b")).unwrap(), r);
        assert!(rule("a=").is_err());
    }

    #[test]
    fn test_display_and_from_str() {
        let r: Rule = "ip in 10.0.0.0/8 and type=malware".parse().unwrap();
        let shown = r.to_string();
        assert_eq!(shown.parse::<Rule>().unwrap(), r);
    }

    #[test]
    fn test_end_to_end_scenarios() {
        let r = parse("ip=10.0.0.1 and asn=64512").unwrap();
        assert!(r.matches(&event(&[("ip", "10.0.0.1"), ("asn", "64512")])));
        assert!(!r.matches(&event(&[("ip", "10.0.0.1"), ("asn", "1")])));

        let r = parse("no (a=b or c=d)").unwrap();
        assert!(!r.matches(&event(&[("a", "b")])));
        assert!(r.matches(&event(&[("e", "f")])));

        let r = parse("ip in 192.0.2.0/24").unwrap();
        assert!(r.matches(&event(&[("ip", "192.0.2.200")])));
        assert!(!r.matches(&event(&[("ip", "198.51.100.1")])));

        let r = parse("*.example.com").unwrap();
        assert!(r.matches(&event(&[("host", "mail.example.com")])));
        assert!(!r.matches(&event(&[("host", "example.com")])));
    }
}
