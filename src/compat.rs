//! Constructors in the style of the older rule API.
//!
//! These build the same canonical rules as [`Rule`]'s own constructors;
//! `match_value("a", "b") == rulelang::parse("a=b")`.

use crate::atom::{Atom, IpRange, RegexFlags};
use crate::error::{IpRangeError, Result};
use crate::rule::Rule;

/// Second netblock argument: a bitmask or the last address of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitsOrEnd<'a> {
    Bits(u32),
    End(&'a str),
}

/// Any key with any value.
pub fn match_any() -> Rule {
    Rule::matching(None, None)
}

/// Key `key` with any value.
pub fn match_key(key: &str) -> Rule {
    Rule::matching(Some(key), None)
}

/// Key `key` with a value equal to `value`, ignoring case.
pub fn match_value(key: &str, value: &str) -> Rule {
    Rule::matching(Some(key), Some(Atom::string(value)))
}

/// Key `key` with a value in which `pattern` is found.
pub fn match_regex(key: &str, pattern: &str, flags: RegexFlags) -> Result<Rule> {
    let atom = Atom::regexp_with_flags(pattern, flags)?;
    Ok(Rule::matching(Some(key), Some(atom)))
}

pub fn and(rules: impl IntoIterator<Item = Rule>) -> Result<Rule> {
    Rule::and(rules)
}

pub fn or(rules: impl IntoIterator<Item = Rule>) -> Result<Rule> {
    Rule::or(rules)
}

pub fn not(rule: Rule) -> Rule {
    Rule::no(rule)
}

pub fn anything() -> Rule {
    Rule::anything()
}

fn netblock_range(ip_or_range: &str, bits_or_end: Option<BitsOrEnd<'_>>) -> Result<IpRange> {
    let Some(extra) = bits_or_end else {
        return Ok(IpRange::autodetect(ip_or_range)?);
    };
    if ip_or_range.contains(['/', '-']) {
        return Err(IpRangeError::UnexpectedArgument(ip_or_range.trim().to_string()).into());
    }

    let start = IpRange::from_ip_str(ip_or_range)?.first_addr();
    let range = match extra {
        BitsOrEnd::Bits(bits) => IpRange::from_cidr(start, bits)?,
        BitsOrEnd::End(end) => {
            let end = IpRange::from_ip_str(end)?.first_addr();
            IpRange::from_range(start, end)?
        }
    };
    Ok(range)
}

/// Values inside an IP range.
///
/// `ip_or_range` is an address, a CIDR block or a range. A bare address
/// may be combined with a bitmask or a range end; a block or a range may
/// not. Without `keys` any key is checked, otherwise only the given keys.
///
/// # Examples
/// ```
/// use ahrules::compat::{netblock, BitsOrEnd};
/// use ahrules::Event;
///
/// let rule = netblock("192.0.2.10", Some(BitsOrEnd::Bits(24)), Some(&["ip"][..])).unwrap();
/// let event: Event = [("ip", "192.0.2.200")].into_iter().collect();
/// assert!(rule.matches(&event));
///
/// assert!(netblock("192.0.2.0/24", Some(BitsOrEnd::Bits(24)), None).is_err());
/// ```
pub fn netblock(
    ip_or_range: &str,
    bits_or_end: Option<BitsOrEnd<'_>>,
    keys: Option<&[&str]>,
) -> Result<Rule> {
    let atom = Atom::ip(netblock_range(ip_or_range, bits_or_end)?);
    match keys {
        Some(keys) if !keys.is_empty() => Rule::or(
            keys.iter()
                .map(|&key| Rule::matching(Some(key), Some(atom.clone()))),
        ),
        _ => Ok(Rule::matching(None, Some(atom))),
    }
}
