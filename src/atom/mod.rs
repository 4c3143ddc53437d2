//! Canonical leaf matchers for event values.
//!
//! An [`Atom`] is one of:
//! - a string, matched case-insensitively
//! - a regular expression, searched anywhere in the value
//! - an IP range, matched against addresses, CIDR blocks or ranges
//! - a domain name pattern, matched against domain names
//!
//! Atoms built from equal normalized arguments are the same object, so
//! equality and hashing are pointer-cheap.

mod domain;
mod iprange;

pub use domain::{parse_name, DomainNamePattern};
pub use iprange::{IpRange, IpVersion};

use bitflags::bitflags;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{DomainNameError, IpRangeError, RegexAtomError};
use crate::intern::Interner;

bitflags! {
    /// Regular expression flags a caller may request.
    ///
    /// Unicode and dot-matches-newline are always on; `MULTILINE`,
    /// `VERBOSE` and `LOCALE` are rejected.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegexFlags: u32 {
        const IGNORE_CASE = 0b000001;
        const MULTILINE = 0b000010;
        const VERBOSE = 0b000100;
        const LOCALE = 0b001000;
        const UNICODE = 0b010000;
        const DOTALL = 0b100000;
    }
}

const FORBIDDEN_FLAGS: [(RegexFlags, &str); 3] = [
    (RegexFlags::VERBOSE, "VERBOSE"),
    (RegexFlags::MULTILINE, "MULTILINE"),
    (RegexFlags::LOCALE, "LOCALE"),
];

/// Find an inline flag group such as `(?m)` or `(?x:...)` enabling a
/// forbidden flag. Flags after a `-` are being disabled and are allowed.
fn forbidden_inline_flag(pattern: &str) -> Option<&'static str> {
    let bytes = pattern.as_bytes();
    let mut in_class = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'[' => in_class = true,
            b']' => in_class = false,
            b'(' if !in_class && bytes.get(i + 1) == Some(&b'?') => {
                for &flag in &bytes[i + 2..] {
                    match flag {
                        b'm' => return Some("MULTILINE"),
                        b'x' => return Some("VERBOSE"),
                        c if c.is_ascii_alphabetic() => continue,
                        _ => break,
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Replace `\/` with `/`; both mean a literal slash.
fn unescape_slashes(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('/') => out.push('/'),
            Some(escaped) => {
                out.push('\\');
                out.push(escaped);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// A compiled regular expression atom.
#[derive(Debug)]
pub struct RegExp {
    pattern: String,
    ignore_case: bool,
    regex: Regex,
}

impl RegExp {
    fn compile(pattern: &str, ignore_case: bool) -> Result<Self, RegexAtomError> {
        if let Some(name) = forbidden_inline_flag(pattern) {
            return Err(RegexAtomError::ForbiddenFlag(name));
        }
        let pattern = unescape_slashes(pattern);
        let regex = RegexBuilder::new(&pattern)
            .unicode(true)
            .dot_matches_new_line(true)
            .case_insensitive(ignore_case)
            .build()
            .map_err(|e| RegexAtomError::Invalid {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            pattern,
            ignore_case,
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn ignore_case(&self) -> bool {
        self.ignore_case
    }

    /// Search for the pattern anywhere in `value`.
    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

/// The variant and arguments of an atom.
#[derive(Debug)]
pub enum AtomKind {
    String(String),
    RegExp(RegExp),
    Ip(IpRange),
    DomainName(DomainNamePattern),
}

#[derive(PartialEq, Eq, Hash)]
enum AtomKey {
    String(String),
    RegExp(String, bool),
    Ip(IpRange),
    DomainName(DomainNamePattern),
}

impl AtomKind {
    fn key(&self) -> AtomKey {
        match self {
            AtomKind::String(value) => AtomKey::String(value.clone()),
            AtomKind::RegExp(re) => AtomKey::RegExp(re.pattern.clone(), re.ignore_case),
            AtomKind::Ip(range) => AtomKey::Ip(*range),
            AtomKind::DomainName(pattern) => AtomKey::DomainName(pattern.clone()),
        }
    }
}

struct AtomNode {
    id: u64,
    kind: AtomKind,
}

impl Drop for AtomNode {
    fn drop(&mut self) {
        ATOMS.forget(&self.kind.key());
    }
}

static ATOMS: Lazy<Interner<AtomKey, AtomNode>> = Lazy::new(Interner::new);

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// A canonical leaf matcher.
///
/// # Examples
/// ```
/// use ahrules::Atom;
///
/// let a = Atom::string("Malware");
/// assert!(a.matches("malware"));
/// assert_eq!(a, Atom::string("Malware"));
///
/// let net = Atom::parse_ip("192.0.2.0/24").unwrap();
/// assert!(net.matches("192.0.2.200"));
/// assert!(!net.matches("not an address"));
/// ```
#[derive(Clone)]
pub struct Atom(Arc<AtomNode>);

impl Atom {
    fn intern(kind: AtomKind) -> Atom {
        Atom(ATOMS.intern(kind.key(), |id| AtomNode { id, kind }))
    }

    /// String atom matching values equal to `value`, ignoring case.
    pub fn string(value: impl Into<String>) -> Atom {
        Self::intern(AtomKind::String(value.into()))
    }

    /// Regular expression atom.
    ///
    /// An escaped slash `\/` is stored as a plain `/`, so `a\/b` and `a/b`
    /// are the same atom. Both match the same values.
    pub fn regexp(pattern: &str, ignore_case: bool) -> Result<Atom, RegexAtomError> {
        RegExp::compile(pattern, ignore_case).map(|re| Self::intern(AtomKind::RegExp(re)))
    }

    /// Regular expression atom from a flag set.
    pub fn regexp_with_flags(pattern: &str, flags: RegexFlags) -> Result<Atom, RegexAtomError> {
        for (flag, name) in FORBIDDEN_FLAGS {
            if flags.contains(flag) {
                return Err(RegexAtomError::ForbiddenFlag(name));
            }
        }
        Self::regexp(pattern, flags.contains(RegexFlags::IGNORE_CASE))
    }

    pub fn ip(range: IpRange) -> Atom {
        Self::intern(AtomKind::Ip(range))
    }

    /// IP atom from an address, CIDR block or range.
    pub fn parse_ip(text: &str) -> Result<Atom, IpRangeError> {
        IpRange::autodetect(text).map(Self::ip)
    }

    pub fn domain_name(pattern: DomainNamePattern) -> Atom {
        Self::intern(AtomKind::DomainName(pattern))
    }

    /// Domain atom from a pattern such as `*.example.com`.
    pub fn parse_domain_name(text: &str) -> Result<Atom, DomainNameError> {
        DomainNamePattern::parse(text).map(Self::domain_name)
    }

    /// Process-wide unique id of this atom.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn kind(&self) -> &AtomKind {
        &self.0.kind
    }

    pub fn ptr_eq(a: &Atom, b: &Atom) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Whether the atom matches `value`.
    ///
    /// Domain patterns require the exact depth of the pattern here; see
    /// [`contains`](Self::contains) for the subdomain test.
    pub fn matches(&self, value: &str) -> bool {
        match self.kind() {
            AtomKind::String(expected) => eq_ignore_case(expected, value),
            AtomKind::RegExp(re) => re.is_match(value),
            AtomKind::Ip(range) => {
                IpRange::autodetect(value).map_or(false, |other| range.contains(&other))
            }
            AtomKind::DomainName(pattern) => {
                parse_name(value).map_or(false, |name| pattern.matches(&name))
            }
        }
    }

    /// Whether `value` is contained in the atom.
    ///
    /// Same as [`matches`](Self::matches) except that domain patterns also
    /// accept deeper subdomains.
    pub fn contains(&self, value: &str) -> bool {
        match self.kind() {
            AtomKind::DomainName(pattern) => {
                parse_name(value).map_or(false, |name| pattern.contains(&name))
            }
            _ => self.matches(value),
        }
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Atom {}

impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl PartialOrd for Atom {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Atom {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            AtomKind::String(value) => write!(f, "String({:?})", value),
            AtomKind::RegExp(re) if re.ignore_case => write!(f, "RegExp({:?}, i)", re.pattern),
            AtomKind::RegExp(re) => write!(f, "RegExp({:?})", re.pattern),
            AtomKind::Ip(range) => write!(f, "Ip({})", range),
            AtomKind::DomainName(pattern) => write!(f, "DomainName({})", pattern),
        }
    }
}
