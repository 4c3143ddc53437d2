//! Token scanners and the rule expression grammar.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::atom::{Atom, DomainNamePattern, IpRange};
use crate::error::ParserError;
use crate::parsing::{
    maybe, scan, seq3, step, step_default, tail, txt, txt_ignore_case, union, ForwardRef, Parser,
};
use crate::rule::Rule;

static BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^[^\s\\()"*!=/]+"#).unwrap());

static QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^"(?:\\u[0-9a-fA-F]{4}|\\[\\"/fbnrt]|[^\\"])*""#).unwrap()
});

static REGEXP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/((?:\\.|[^\\/])*)/(i)?").unwrap());

const IPV4: &str = r"[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}";
const IPV6: &str = r"[0-9a-fA-F]*:[0-9a-fA-F]*:[0-9a-fA-F:.]*";

static IP: Lazy<Regex> = Lazy::new(|| {
    let ip = format!("(?:{}|{})", IPV4, IPV6);
    Regex::new(&format!(r"^({ip})(?:\s*/\s*([0-9]{{1,5}})|\s*-\s*({ip}))?", ip = ip)).unwrap()
});

static DOMAIN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^(?:\*\.)*[^\s\\()"*!=/]+"#).unwrap());

/// Length of the bare token at the start of `text`.
pub(super) fn bare_len(text: &str) -> usize {
    BARE.find(text).map_or(0, |m| m.end())
}

/// Scan an IP address, CIDR block or range ending at a token boundary.
pub(super) fn scan_ip(input: &str, pos: usize) -> Option<(IpRange, usize)> {
    let caps = IP.captures(&input[pos..])?;
    let whole = caps.get(0)?;
    let first = caps.get(1)?.as_str();

    let range = if let Some(bits) = caps.get(2) {
        IpRange::from_cidr(first.parse().ok()?, bits.as_str().parse().ok()?).ok()?
    } else if let Some(last) = caps.get(3) {
        IpRange::from_range(first.parse().ok()?, last.as_str().parse().ok()?).ok()?
    } else {
        IpRange::from_ip(first.parse().ok()?)
    };

    let end = pos + whole.end();
    match input[end..].chars().next() {
        None | Some(')') => Some((range, end)),
        Some(c) if c.is_whitespace() => Some((range, end)),
        _ => None,
    }
}

/// Scan a domain name pattern such as `*.example.com`.
pub(super) fn scan_domain(input: &str, pos: usize) -> Option<(DomainNamePattern, usize)> {
    let found = DOMAIN.find(&input[pos..])?;
    let pattern = DomainNamePattern::parse(found.as_str()).ok()?;
    Some((pattern, pos + found.end()))
}

fn scan_string(input: &str, pos: usize) -> Option<(String, usize)> {
    let rest = &input[pos..];
    if rest.starts_with('"') {
        let found = QUOTED.find(rest)?;
        let value = serde_json::from_str::<String>(found.as_str()).ok()?;
        return Some((value, pos + found.end()));
    }
    let len = bare_len(rest);
    (len > 0).then(|| (rest[..len].to_string(), pos + len))
}

fn scan_regexp(input: &str, pos: usize) -> Option<(Atom, usize)> {
    let caps = REGEXP.captures(&input[pos..])?;
    let whole = caps.get(0)?;
    let atom = Atom::regexp(caps.get(1)?.as_str(), caps.get(2).is_some()).ok()?;
    Some((atom, pos + whole.end()))
}

/// Any Unicode whitespace, the same set that ends a bare token.
fn ws() -> Parser<()> {
    scan(|input: &str, pos| {
        let rest = &input[pos..];
        let len = rest.len() - rest.trim_start_matches(char::is_whitespace).len();
        (len > 0).then_some(((), pos + len))
    })
}

/// Whitespace, or nothing when next to a parenthesis.
fn gap() -> Parser<()> {
    scan(|input: &str, pos| {
        let rest = &input[pos..];
        let end = pos + rest.len() - rest.trim_start_matches(char::is_whitespace).len();
        let separated =
            end > pos || input[..pos].ends_with(')') || input[end..].starts_with('(');
        separated.then_some(((), end))
    })
}

fn keyword(word: &str) -> Parser<()> {
    txt_ignore_case(word).map(|_| ())
}

fn star() -> Parser<()> {
    txt("*").map(|_| ())
}

fn ip_or_domain() -> Parser<Atom> {
    union([
        scan(scan_ip).map(Atom::ip),
        scan(scan_domain).map(Atom::domain_name),
    ])
}

/// The right-hand side of `=` and `!=`.
fn value() -> Parser<Option<Atom>> {
    union([
        star().map(|_| None),
        scan(scan_regexp).map(Some),
        scan(scan_string).map(|s| Some(Atom::string(s))),
    ])
}

fn match_tail() -> Parser<Option<Atom>> {
    union([
        maybe(ws())
            .then(txt("="))
            .then(maybe(txt("=")))
            .then(maybe(ws()))
            .then(value()),
        ws().then(keyword("in")).then(ws()).then(ip_or_domain()).map(Some),
    ])
}

fn non_match_tail() -> Parser<Option<Atom>> {
    union([
        maybe(ws()).then(txt("!=")).then(maybe(ws())).then(value()),
        ws().then(keyword("not"))
            .then(ws())
            .then(keyword("in"))
            .then(ws())
            .then(ip_or_domain())
            .map(Some),
    ])
}

fn basic() -> Parser<Rule> {
    let key = union([star().map(|_| None), scan(scan_string).map(Some)]);
    union([
        scan(scan_regexp).map(Rule::fuzzy),
        step(
            key,
            [
                tail(match_tail(), |key: Option<String>, atom| {
                    Rule::matching(key.as_deref(), atom)
                }),
                tail(non_match_tail(), |key: Option<String>, atom| {
                    Rule::non_matching(key.as_deref(), atom)
                }),
            ],
        ),
        ip_or_domain().map(Rule::fuzzy),
        scan(scan_string).map(|s| Rule::fuzzy(Atom::string(s))),
        star().map(|_| Rule::anything()),
    ])
}

/// Build the expression grammar.
///
/// Precedence from loosest: `or`, `and`, `no`, then matches and atoms.
/// Binary operators are right-recursive; junction constructors flatten
/// the resulting chains.
pub(super) fn expression() -> Result<Parser<Rule>, ParserError> {
    let expr = ForwardRef::<Rule>::new();
    let or_expr = ForwardRef::<Rule>::new();
    let and_expr = ForwardRef::<Rule>::new();
    let unary = ForwardRef::<Rule>::new();

    let parens = seq3(txt("("), expr.parser(), txt(")")).map(|(_, rule, _)| rule);

    let no = keyword("no")
        .then(union([
            maybe(ws()).then(parens.clone()),
            ws().then(unary.parser()),
        ]))
        .map(Rule::no);

    unary.set(&union([no, parens, basic()]))?;

    and_expr.set(&step(
        unary.parser(),
        [
            tail(
                gap().then(keyword("and")).then(gap()).then(and_expr.parser()),
                Rule::both,
            ),
            step_default(|rule: Rule| rule),
        ],
    ))?;

    or_expr.set(&step(
        and_expr.parser(),
        [
            tail(
                gap().then(keyword("or")).then(gap()).then(or_expr.parser()),
                Rule::either,
            ),
            step_default(|rule: Rule| rule),
        ],
    ))?;

    expr.set(&maybe(ws()).then(or_expr.parser()).skip(maybe(ws())))?;
    Ok(expr.parser())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_tokens() {
        assert_eq!(bare_len("abc def"), 3);
        assert_eq!(bare_len("a=b"), 1);
        assert_eq!(bare_len("\"x\""), 0);
        assert_eq!(bare_len("ä-ö.1"), "ä-ö.1".len());
        assert_eq!(bare_len(""), 0);
    }

    #[test]
    fn test_quoted_strings() {
        assert_eq!(
            scan_string(r#""a \"b\"ä" rest"#, 0),
            Some(("a \"b\"ä".to_string(), 11))
        );
        assert_eq!(scan_string(r#""unterminated"#, 0), None);
        assert_eq!(scan_string(r#""""#, 0), Some((String::new(), 2)));
    }

    #[test]
    fn test_ip_tokens() {
        let (range, end) = scan_ip("10.0.0.0 / 8)", 0).unwrap();
        assert_eq!(range.to_string(), "10.0.0.0/8");
        assert_eq!(end, 12);

        let (range, _) = scan_ip("192.0.2.1 - 192.0.2.9", 0).unwrap();
        assert_eq!(range.to_string(), "192.0.2.1-192.0.2.9");

        let (range, _) = scan_ip("2001:db8::/32", 0).unwrap();
        assert_eq!(range.to_string(), "2001:db8::/32");

        // Not at a token boundary
        assert!(scan_ip("10.0.0.1.example.com", 0).is_none());
        assert!(scan_ip("10.0.0.1x", 0).is_none());
        assert!(scan_ip("10.0.0.0/33", 0).is_none());
        assert!(scan_ip("999.0.0.1", 0).is_none());
    }

    #[test]
    fn test_domain_tokens() {
        let (pattern, end) = scan_domain("*.example.com and", 0).unwrap();
        assert_eq!(pattern.to_string(), "*.example.com");
        assert_eq!(end, 13);
        assert!(scan_domain("example", 0).is_none());
        assert!(scan_domain("*", 0).is_none());
    }

    #[test]
    fn test_regexp_tokens() {
        let (atom, end) = scan_regexp(r"/a\/b/i x", 0).unwrap();
        assert_eq!(end, 7);
        assert!(atom.matches("A/B"));
        assert!(scan_regexp("/(/", 0).is_none());
        assert!(scan_regexp("/unterminated", 0).is_none());
    }

    #[test]
    fn test_gap() {
        let p = txt("a").then(gap()).then(txt("b"));
        assert!(p.parse("a b").unwrap().is_some());
        assert!(p.parse("ab").unwrap().is_none());

        let p = txt(")").then(gap()).then(txt("b"));
        assert!(p.parse(")b").unwrap().is_some());

        let p = txt("a").then(gap()).then(txt("("));
        assert!(p.parse("a(").unwrap().is_some());
    }

    #[test]
    fn test_unicode_whitespace_separates_tokens() {
        let p = txt("a").then(gap()).then(txt("b"));
        assert!(p.parse("a\u{a0}b").unwrap().is_some());
        assert!(p.parse("a\u{2003}\u{3000}b").unwrap().is_some());

        let p = txt("a").then(ws()).then(txt("b"));
        assert!(p.parse("a\u{a0}b").unwrap().is_some());
    }
}
