//! Rendering rules back to rule language text.

use crate::atom::{Atom, AtomKind};
use crate::rule::{Rule, RuleKind};

use super::grammar::{bare_len, scan_domain, scan_ip};

const KEYWORDS: [&str; 5] = ["and", "or", "no", "not", "in"];

fn is_keyword(text: &str) -> bool {
    KEYWORDS.iter().any(|kw| kw.eq_ignore_ascii_case(text))
}

fn quote(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

/// Format a string as a key or a value, quoting when the bare form would
/// not read back as the same string.
fn format_string(text: &str) -> String {
    if text.is_empty() || bare_len(text) != text.len() || is_keyword(text) {
        quote(text)
    } else {
        text.to_string()
    }
}

/// Format a fuzzy string. Bare strings that read back as addresses or
/// domain names get quoted as well.
fn format_fuzzy_string(text: &str) -> String {
    if scan_ip(text, 0).is_some() || scan_domain(text, 0).is_some() {
        quote(text)
    } else {
        format_string(text)
    }
}

/// Format a regular expression, escaping slashes in the pattern.
fn format_regexp(pattern: &str, ignore_case: bool) -> String {
    let mut out = String::with_capacity(pattern.len() + 3);
    out.push('/');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '/' => out.push_str("\\/"),
            _ => out.push(c),
        }
    }
    out.push('/');
    if ignore_case {
        out.push('i');
    }
    out
}

fn format_value(atom: &Atom) -> String {
    match atom.kind() {
        AtomKind::String(value) => format_string(value),
        AtomKind::RegExp(re) => format_regexp(re.pattern(), re.ignore_case()),
        AtomKind::Ip(range) => range.to_string(),
        AtomKind::DomainName(pattern) => pattern.to_string(),
    }
}

fn format_fuzzy(atom: &Atom) -> String {
    match atom.kind() {
        AtomKind::String(value) => format_fuzzy_string(value),
        _ => format_value(atom),
    }
}

fn format_match(key: &Option<String>, atom: &Option<Atom>, negated: bool) -> String {
    let key = key.as_deref().map_or_else(|| "*".to_string(), format_string);
    let Some(atom) = atom else {
        let op = if negated { "!=" } else { "=" };
        return format!("{}{}*", key, op);
    };
    let op = match (atom.kind(), negated) {
        (AtomKind::Ip(_) | AtomKind::DomainName(_), false) => " in ",
        (AtomKind::Ip(_) | AtomKind::DomainName(_), true) => " not in ",
        (_, false) => "=",
        (_, true) => "!=",
    };
    format!("{}{}{}", key, op, format_value(atom))
}

enum Piece<'a> {
    Rule(&'a Rule),
    Text(&'static str),
}

fn push_operand<'a>(stack: &mut Vec<Piece<'a>>, rule: &'a Rule, parenthesize: bool) {
    if parenthesize {
        stack.push(Piece::Text(")"));
        stack.push(Piece::Rule(rule));
        stack.push(Piece::Text("("));
    } else {
        stack.push(Piece::Rule(rule));
    }
}

/// Render a rule as rule language text.
///
/// `parse(&format(rule))` yields `rule` again. Works on an explicit stack,
/// so arbitrarily deep rules format without recursion.
pub fn format(rule: &Rule) -> String {
    let mut out = String::new();
    let mut stack = vec![Piece::Rule(rule)];

    while let Some(piece) = stack.pop() {
        let rule = match piece {
            Piece::Text(text) => {
                out.push_str(text);
                continue;
            }
            Piece::Rule(rule) => rule,
        };

        match rule.kind() {
            RuleKind::And(children) | RuleKind::Or(children) => {
                let separator = match rule.kind() {
                    RuleKind::And(_) => " and ",
                    _ => " or ",
                };
                for (index, child) in children.iter().enumerate().rev() {
                    push_operand(&mut stack, child, child.precedence() < rule.precedence());
                    if index > 0 {
                        stack.push(Piece::Text(separator));
                    }
                }
            }
            RuleKind::No(child) => {
                let parenthesize = matches!(child.kind(), RuleKind::And(_) | RuleKind::Or(_));
                push_operand(&mut stack, child, parenthesize);
                stack.push(Piece::Text("no "));
            }
            RuleKind::Match { key, atom } => out.push_str(&format_match(key, atom, false)),
            RuleKind::NonMatch { key, atom } => out.push_str(&format_match(key, atom, true)),
            RuleKind::Fuzzy(atom) => out.push_str(&format_fuzzy(atom)),
            RuleKind::Anything => out.push('*'),
        }
    }
    out
}
